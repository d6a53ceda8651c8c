use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use clinicore_core::{AggregateId, DocumentKind, DomainError, OrganizationId};
use clinicore_events::{EventBus, EventEnvelope, InMemoryEventBus};
use clinicore_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{InMemoryEventStore, StoredEvent},
    projections::{
        appointments::{AppointmentBookProjection, AppointmentReadModel},
        invoices::{InvoiceReadModel, InvoicesProjection},
        patients::{PatientDirectoryProjection, PatientReadModel},
        prescriptions::{PrescriptionReadModel, PrescriptionRegisterProjection},
        supply_stock::{SupplyReadModel, SupplyStockProjection},
        treatment_plans::{TreatmentPlanReadModel, TreatmentPlansProjection},
    },
    read_model::InMemoryOrgStore,
    sequences::{InMemorySequenceStore, NumberAllocator, SequenceError},
};

#[cfg(feature = "postgres")]
use clinicore_infra::{event_store::PostgresEventStore, sequences::PostgresSequenceStore};
#[cfg(feature = "postgres")]
use sqlx::PgPool;

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub organization_id: OrganizationId,
    pub topic: String,
    pub payload: serde_json::Value,
}

type JsonEnvelope = EventEnvelope<serde_json::Value>;

// Type-erased dispatcher for in-memory implementations
type InMemoryDispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<JsonEnvelope>>>;

// Type-erased dispatcher for persistent implementations (in-memory bus; the
// event store is the source of truth, the bus only feeds projections).
#[cfg(feature = "postgres")]
type PersistentDispatcher = CommandDispatcher<Arc<PostgresEventStore>, Arc<InMemoryEventBus<JsonEnvelope>>>;

type PatientsProj = Arc<PatientDirectoryProjection<Arc<InMemoryOrgStore<clinicore_patients::PatientId, PatientReadModel>>>>;
type PlansProj = Arc<TreatmentPlansProjection<Arc<InMemoryOrgStore<clinicore_treatments::TreatmentPlanId, TreatmentPlanReadModel>>>>;
type AppointmentsProj = Arc<AppointmentBookProjection<Arc<InMemoryOrgStore<clinicore_scheduling::AppointmentId, AppointmentReadModel>>>>;
type InvoicesProj = Arc<InvoicesProjection<Arc<InMemoryOrgStore<clinicore_billing::InvoiceId, InvoiceReadModel>>>>;
type PrescriptionsProj = Arc<PrescriptionRegisterProjection<Arc<InMemoryOrgStore<clinicore_prescriptions::PrescriptionId, PrescriptionReadModel>>>>;
type SuppliesProj = Arc<SupplyStockProjection<Arc<InMemoryOrgStore<clinicore_inventory::SupplyItemId, SupplyReadModel>>>>;

pub struct Projections {
    patients: PatientsProj,
    plans: PlansProj,
    appointments: AppointmentsProj,
    invoices: InvoicesProj,
    prescriptions: PrescriptionsProj,
    supplies: SuppliesProj,
}

pub enum AppServices {
    InMemory {
        dispatcher: Arc<InMemoryDispatcher>,
        allocator: Arc<NumberAllocator<Arc<InMemorySequenceStore>>>,
        projections: Arc<Projections>,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
    },
    #[cfg(feature = "postgres")]
    Persistent {
        dispatcher: Arc<PersistentDispatcher>,
        allocator: Arc<NumberAllocator<Arc<PostgresSequenceStore>>>,
        projections: Arc<Projections>,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
    },
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        #[cfg(feature = "postgres")]
        {
            return build_persistent_services().await;
        }
        #[cfg(not(feature = "postgres"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but postgres feature not enabled, falling back to in-memory"
            );
            return build_in_memory_services();
        }
    }

    build_in_memory_services()
}

fn build_projections() -> Arc<Projections> {
    let patients_store: Arc<InMemoryOrgStore<clinicore_patients::PatientId, PatientReadModel>> =
        Arc::new(InMemoryOrgStore::new());
    let plans_store: Arc<InMemoryOrgStore<clinicore_treatments::TreatmentPlanId, TreatmentPlanReadModel>> =
        Arc::new(InMemoryOrgStore::new());
    let appointments_store: Arc<InMemoryOrgStore<clinicore_scheduling::AppointmentId, AppointmentReadModel>> =
        Arc::new(InMemoryOrgStore::new());
    let invoices_store: Arc<InMemoryOrgStore<clinicore_billing::InvoiceId, InvoiceReadModel>> =
        Arc::new(InMemoryOrgStore::new());
    let prescriptions_store: Arc<InMemoryOrgStore<clinicore_prescriptions::PrescriptionId, PrescriptionReadModel>> =
        Arc::new(InMemoryOrgStore::new());
    let supplies_store: Arc<InMemoryOrgStore<clinicore_inventory::SupplyItemId, SupplyReadModel>> =
        Arc::new(InMemoryOrgStore::new());

    Arc::new(Projections {
        patients: Arc::new(PatientDirectoryProjection::new(patients_store)),
        plans: Arc::new(TreatmentPlansProjection::new(plans_store)),
        appointments: Arc::new(AppointmentBookProjection::new(appointments_store)),
        invoices: Arc::new(InvoicesProjection::new(invoices_store)),
        prescriptions: Arc::new(PrescriptionRegisterProjection::new(prescriptions_store)),
        supplies: Arc::new(SupplyStockProjection::new(supplies_store)),
    })
}

/// Background subscriber: bus -> projections, fanning realtime updates out
/// to SSE listeners. Projection failures are logged and skipped; the event
/// store remains the source of truth for rebuilds.
fn spawn_projection_worker(
    bus: Arc<InMemoryEventBus<JsonEnvelope>>,
    projections: Arc<Projections>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) {
    let sub = bus.subscribe();
    tokio::task::spawn_blocking(move || {
        loop {
            match sub.recv() {
                Ok(env) => {
                    let at = env.aggregate_type().to_string();

                    let apply_ok = match at.as_str() {
                        "patients.patient" => projections.patients.apply_envelope(&env).map_err(|e| e.to_string()),
                        "treatments.plan" => projections.plans.apply_envelope(&env).map_err(|e| e.to_string()),
                        "scheduling.appointment" => projections.appointments.apply_envelope(&env).map_err(|e| e.to_string()),
                        "billing.invoice" => projections.invoices.apply_envelope(&env).map_err(|e| e.to_string()),
                        "prescriptions.prescription" => projections.prescriptions.apply_envelope(&env).map_err(|e| e.to_string()),
                        "inventory.item" => projections.supplies.apply_envelope(&env).map_err(|e| e.to_string()),
                        _ => Ok(()),
                    };

                    if let Err(e) = apply_ok {
                        tracing::warn!("projection apply failed: {e}");
                        continue;
                    }

                    // Broadcast projection update (lossy; no backpressure on core).
                    let _ = realtime_tx.send(RealtimeMessage {
                        organization_id: env.organization_id(),
                        topic: format!("{at}.projection_updated"),
                        payload: serde_json::json!({
                            "kind": "projection_update",
                            "aggregate_type": at,
                            "aggregate_id": env.aggregate_id().to_string(),
                            "sequence_number": env.sequence_number(),
                        }),
                    });
                }
                Err(_) => break,
            }
        }
    });
}

fn build_in_memory_services() -> AppServices {
    // In-memory infra wiring (dev/test): store + bus + sequences + projections.
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<JsonEnvelope>> = Arc::new(InMemoryEventBus::new());
    let allocator = Arc::new(NumberAllocator::new(Arc::new(InMemorySequenceStore::new())));

    let projections = build_projections();

    // Realtime channel (SSE): lossy broadcast, organization-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_worker(bus.clone(), projections.clone(), realtime_tx.clone());

    let dispatcher: Arc<InMemoryDispatcher> = Arc::new(CommandDispatcher::new(store, bus));
    AppServices::InMemory {
        dispatcher,
        allocator,
        projections,
        realtime_tx,
    }
}

#[cfg(feature = "postgres")]
async fn build_persistent_services() -> AppServices {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    let store = Arc::new(PostgresEventStore::new(pool.clone()));
    let allocator = Arc::new(NumberAllocator::new(Arc::new(PostgresSequenceStore::new(pool))));

    // The bus + read models stay in-memory; projections rebuild from the
    // event store on restart and can be swapped to persistent stores later.
    let bus: Arc<InMemoryEventBus<JsonEnvelope>> = Arc::new(InMemoryEventBus::new());
    let projections = build_projections();

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_worker(bus.clone(), projections.clone(), realtime_tx.clone());

    let dispatcher: Arc<PersistentDispatcher> = Arc::new(CommandDispatcher::new(store, bus));
    AppServices::Persistent {
        dispatcher,
        allocator,
        projections,
        realtime_tx,
    }
}

impl AppServices {
    fn projections(&self) -> &Arc<Projections> {
        match self {
            AppServices::InMemory { projections, .. } => projections,
            #[cfg(feature = "postgres")]
            AppServices::Persistent { projections, .. } => projections,
        }
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        match self {
            AppServices::InMemory { realtime_tx, .. } => realtime_tx,
            #[cfg(feature = "postgres")]
            AppServices::Persistent { realtime_tx, .. } => realtime_tx,
        }
    }

    /// Allocate the next document number for `kind` at `at` (atomic; see
    /// `clinicore_infra::sequences`).
    pub fn allocate_number(
        &self,
        organization_id: OrganizationId,
        kind: DocumentKind,
        at: DateTime<Utc>,
    ) -> Result<String, SequenceError> {
        match self {
            AppServices::InMemory { allocator, .. } => allocator.allocate(organization_id, kind, at),
            #[cfg(feature = "postgres")]
            AppServices::Persistent { allocator, .. } => allocator.allocate(organization_id, kind, at),
        }
    }

    pub fn dispatch<A>(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(OrganizationId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: clinicore_core::Aggregate<Error = DomainError>,
        A::Event: clinicore_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        match self {
            AppServices::InMemory { dispatcher, .. } => dispatcher.dispatch::<A>(
                organization_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
            #[cfg(feature = "postgres")]
            AppServices::Persistent { dispatcher, .. } => dispatcher.dispatch::<A>(
                organization_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
        }
    }

    pub fn patients_get(
        &self,
        organization_id: OrganizationId,
        patient_id: &clinicore_patients::PatientId,
    ) -> Option<PatientReadModel> {
        self.projections().patients.get(organization_id, patient_id)
    }

    pub fn patients_list(&self, organization_id: OrganizationId) -> Vec<PatientReadModel> {
        self.projections().patients.list(organization_id)
    }

    pub fn plans_get(
        &self,
        organization_id: OrganizationId,
        plan_id: &clinicore_treatments::TreatmentPlanId,
    ) -> Option<TreatmentPlanReadModel> {
        self.projections().plans.get(organization_id, plan_id)
    }

    pub fn plans_list(&self, organization_id: OrganizationId) -> Vec<TreatmentPlanReadModel> {
        self.projections().plans.list(organization_id)
    }

    pub fn appointments_get(
        &self,
        organization_id: OrganizationId,
        appointment_id: &clinicore_scheduling::AppointmentId,
    ) -> Option<AppointmentReadModel> {
        self.projections().appointments.get(organization_id, appointment_id)
    }

    pub fn appointments_list(&self, organization_id: OrganizationId) -> Vec<AppointmentReadModel> {
        self.projections().appointments.list(organization_id)
    }

    pub fn invoices_get(
        &self,
        organization_id: OrganizationId,
        invoice_id: &clinicore_billing::InvoiceId,
    ) -> Option<InvoiceReadModel> {
        self.projections().invoices.get(organization_id, invoice_id)
    }

    pub fn invoices_list(&self, organization_id: OrganizationId) -> Vec<InvoiceReadModel> {
        self.projections().invoices.list(organization_id)
    }

    pub fn prescriptions_get(
        &self,
        organization_id: OrganizationId,
        prescription_id: &clinicore_prescriptions::PrescriptionId,
    ) -> Option<PrescriptionReadModel> {
        self.projections().prescriptions.get(organization_id, prescription_id)
    }

    pub fn prescriptions_list(&self, organization_id: OrganizationId) -> Vec<PrescriptionReadModel> {
        self.projections().prescriptions.list(organization_id)
    }

    pub fn supplies_get(
        &self,
        organization_id: OrganizationId,
        item_id: &clinicore_inventory::SupplyItemId,
    ) -> Option<SupplyReadModel> {
        self.projections().supplies.get(organization_id, item_id)
    }

    pub fn supplies_list(&self, organization_id: OrganizationId) -> Vec<SupplyReadModel> {
        self.projections().supplies.list(organization_id)
    }
}

/// Build an SSE stream for an organization (used by `/stream`).
pub fn organization_sse_stream(
    services: Arc<AppServices>,
    organization_id: OrganizationId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.organization_id == organization_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
