//! Billing module (event-sourced).
//!
//! The `Invoice` aggregate owns the payment ledger: every mutation recomputes
//! `amount_paid`, the outstanding balance, and the derived payment status.
//! Invoice numbers are allocated up front (atomic sequence store in infra)
//! and are immutable once assigned.

pub mod invoice;

pub use invoice::{
    AddPayment, CancelInvoice, CreateInvoice, Invoice, InvoiceCancelled, InvoiceCommand,
    InvoiceCreated, InvoiceEvent, InvoiceId, InvoiceLine, PaymentAdded, PaymentEntry,
    PaymentMethod, PaymentRemoved, PaymentStatus, PaymentUpdated, RemovePayment, UpdatePayment,
    derive_payment_status,
};
