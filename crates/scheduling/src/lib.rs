//! Appointment scheduling module (event-sourced).

pub mod appointment;

pub use appointment::{
    Appointment, AppointmentCancelled, AppointmentCommand, AppointmentCompleted,
    AppointmentEvent, AppointmentId, AppointmentRescheduled, AppointmentScheduled,
    AppointmentStatus, CancelAppointment, CompleteAppointment, RescheduleAppointment,
    ScheduleAppointment,
};
