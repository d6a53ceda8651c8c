//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → Projection → ReadModel
//!
//! Verifies:
//! - Billing commands produce events that update the invoice read model
//! - Organization isolation is preserved
//! - Optimistic concurrency conflicts are detected
//! - Document numbers allocated through the sequence store are gap-free

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use uuid::Uuid;

    use clinicore_billing::{
        AddPayment, CreateInvoice, Invoice, InvoiceCommand, InvoiceId, InvoiceLine, PaymentMethod,
        PaymentStatus, RemovePayment, UpdatePayment,
    };
    use clinicore_core::{AggregateId, DocumentKind, ExpectedVersion, OrganizationId, StaffId};
    use clinicore_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use clinicore_patients::PatientId;

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
    use crate::projections::invoices::{InvoiceReadModel, InvoicesProjection};
    use crate::read_model::InMemoryOrgStore;
    use crate::sequences::{InMemorySequenceStore, NumberAllocator};

    type Dispatcher =
        CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>>;
    type Projection = InvoicesProjection<Arc<InMemoryOrgStore<InvoiceId, InvoiceReadModel>>>;

    fn setup() -> (Dispatcher, Arc<Projection>, Arc<InMemoryEventStore>) {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
            Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(store.clone(), bus.clone());

        let rm_store: Arc<InMemoryOrgStore<InvoiceId, InvoiceReadModel>> =
            Arc::new(InMemoryOrgStore::new());
        let projection = Arc::new(InvoicesProjection::new(rm_store));

        // Subscribe to the bus BEFORE any events are published.
        let projection_clone = projection.clone();
        let bus_clone = bus.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            let sub = bus_clone.subscribe();
            let _ = ready_tx.send(());
            loop {
                match sub.recv() {
                    Ok(env) => {
                        if let Err(e) = projection_clone.apply_envelope(&env) {
                            eprintln!("failed to apply envelope: {e:?}");
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        ready_rx.recv().expect("subscriber thread did not start");

        (dispatcher, projection, store)
    }

    /// Poll until `cond` holds (the projection runs on a background thread).
    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("projection did not catch up within timeout");
    }

    fn create_invoice(
        dispatcher: &Dispatcher,
        organization_id: OrganizationId,
        invoice_number: &str,
        total: u64,
    ) -> (AggregateId, InvoiceId) {
        let agg = AggregateId::new();
        let invoice_id = InvoiceId::new(agg);
        let cmd = InvoiceCommand::CreateInvoice(CreateInvoice {
            organization_id,
            clinic_id: None,
            invoice_id,
            patient_id: PatientId::new(AggregateId::new()),
            treatment_plan_id: None,
            invoice_number: invoice_number.to_string(),
            lines: vec![InvoiceLine {
                line_no: 1,
                description: "Scaling and polishing".to_string(),
                procedure_code: Some("D1110".to_string()),
                quantity: 1,
                unit_price: total,
            }],
            due_date: Utc::now() + Duration::days(30),
            occurred_at: Utc::now(),
        });

        dispatcher
            .dispatch::<Invoice>(organization_id, agg, "billing.invoice", cmd, |_org, id| {
                Invoice::empty(InvoiceId::new(id))
            })
            .expect("create invoice failed");

        (agg, invoice_id)
    }

    fn add_payment(
        dispatcher: &Dispatcher,
        organization_id: OrganizationId,
        agg: AggregateId,
        invoice_id: InvoiceId,
        amount: u64,
    ) -> Uuid {
        let payment_id = Uuid::now_v7();
        let cmd = InvoiceCommand::AddPayment(AddPayment {
            organization_id,
            invoice_id,
            payment_id,
            receipt_number: None,
            amount,
            method: PaymentMethod::Cash,
            transaction_id: None,
            notes: None,
            received_by: StaffId::new(),
            occurred_at: Utc::now(),
        });
        dispatcher
            .dispatch::<Invoice>(organization_id, agg, "billing.invoice", cmd, |_org, id| {
                Invoice::empty(InvoiceId::new(id))
            })
            .expect("add payment failed");
        payment_id
    }

    #[test]
    fn create_invoice_updates_read_model() {
        let (dispatcher, projection, _store) = setup();
        let organization_id = OrganizationId::new();

        let (_agg, invoice_id) = create_invoice(&dispatcher, organization_id, "INV-202501-0001", 9_440);

        wait_until(|| projection.get(organization_id, &invoice_id).is_some());
        let rm = projection.get(organization_id, &invoice_id).unwrap();
        assert_eq!(rm.invoice_number, "INV-202501-0001");
        assert_eq!(rm.total_amount, 9_440);
        assert_eq!(rm.amount_paid, 0);
        assert_eq!(rm.balance_amount(), 9_440);
        assert_eq!(rm.status, PaymentStatus::Unpaid);
    }

    #[test]
    fn payment_lifecycle_flows_through_to_the_read_model() {
        let (dispatcher, projection, _store) = setup();
        let organization_id = OrganizationId::new();

        let (agg, invoice_id) = create_invoice(&dispatcher, organization_id, "INV-202501-0001", 9_440);
        add_payment(&dispatcher, organization_id, agg, invoice_id, 5_000);

        wait_until(|| {
            projection
                .get(organization_id, &invoice_id)
                .is_some_and(|rm| rm.amount_paid == 5_000)
        });
        let rm = projection.get(organization_id, &invoice_id).unwrap();
        assert_eq!(rm.balance_amount(), 4_440);
        assert_eq!(rm.status, PaymentStatus::PartiallyPaid);
        assert_eq!(rm.payments.len(), 1);

        let second = add_payment(&dispatcher, organization_id, agg, invoice_id, 4_440);
        wait_until(|| {
            projection
                .get(organization_id, &invoice_id)
                .is_some_and(|rm| rm.amount_paid == 9_440)
        });
        let rm = projection.get(organization_id, &invoice_id).unwrap();
        assert_eq!(rm.balance_amount(), 0);
        assert_eq!(rm.status, PaymentStatus::Paid);

        // Edit the second payment down, then remove it entirely.
        let cmd = InvoiceCommand::UpdatePayment(UpdatePayment {
            organization_id,
            invoice_id,
            payment_id: second,
            amount: 2_000,
            method: PaymentMethod::Card,
            transaction_id: Some("tx-7".to_string()),
            notes: None,
            occurred_at: Utc::now(),
        });
        dispatcher
            .dispatch::<Invoice>(organization_id, agg, "billing.invoice", cmd, |_org, id| {
                Invoice::empty(InvoiceId::new(id))
            })
            .expect("update payment failed");

        wait_until(|| {
            projection
                .get(organization_id, &invoice_id)
                .is_some_and(|rm| rm.amount_paid == 7_000)
        });
        let rm = projection.get(organization_id, &invoice_id).unwrap();
        assert_eq!(rm.status, PaymentStatus::PartiallyPaid);
        let entry = rm.payments.iter().find(|p| p.payment_id == second).unwrap();
        assert_eq!(entry.amount, 2_000);
        assert_eq!(entry.method, PaymentMethod::Card);

        let cmd = InvoiceCommand::RemovePayment(RemovePayment {
            organization_id,
            invoice_id,
            payment_id: second,
            occurred_at: Utc::now(),
        });
        dispatcher
            .dispatch::<Invoice>(organization_id, agg, "billing.invoice", cmd, |_org, id| {
                Invoice::empty(InvoiceId::new(id))
            })
            .expect("remove payment failed");

        wait_until(|| {
            projection
                .get(organization_id, &invoice_id)
                .is_some_and(|rm| rm.amount_paid == 5_000)
        });
        let rm = projection.get(organization_id, &invoice_id).unwrap();
        assert_eq!(rm.payments.len(), 1);
        assert_eq!(rm.balance_amount(), 4_440);
    }

    #[test]
    fn organization_isolation_preserved() {
        let (dispatcher, projection, _store) = setup();
        let org_a = OrganizationId::new();
        let org_b = OrganizationId::new();

        let (agg, invoice_id) = create_invoice(&dispatcher, org_a, "INV-202501-0001", 1_000);
        wait_until(|| projection.get(org_a, &invoice_id).is_some());

        // Org B sees nothing.
        assert!(projection.get(org_b, &invoice_id).is_none());
        assert!(projection.list(org_b).is_empty());

        // Org B cannot pay org A's invoice: its own stream is empty, so the
        // invoice simply does not exist there.
        let cmd = InvoiceCommand::AddPayment(AddPayment {
            organization_id: org_b,
            invoice_id,
            payment_id: Uuid::now_v7(),
            receipt_number: None,
            amount: 100,
            method: PaymentMethod::Cash,
            transaction_id: None,
            notes: None,
            received_by: StaffId::new(),
            occurred_at: Utc::now(),
        });
        let err = dispatcher
            .dispatch::<Invoice>(org_b, agg, "billing.invoice", cmd, |_org, id| {
                Invoice::empty(InvoiceId::new(id))
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(entity) if entity == "invoice"));
    }

    #[test]
    fn optimistic_concurrency_conflict_detected() {
        let (dispatcher, _projection, store) = setup();
        let organization_id = OrganizationId::new();
        let (agg, invoice_id) = create_invoice(&dispatcher, organization_id, "INV-202501-0001", 1_000);

        // A stale writer that read version 0 loses against the committed create.
        let stale = UncommittedEvent {
            event_id: Uuid::now_v7(),
            organization_id,
            aggregate_id: agg,
            aggregate_type: "billing.invoice".to_string(),
            event_type: "billing.invoice.cancelled".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({
                "InvoiceCancelled": {
                    "organization_id": organization_id,
                    "invoice_id": invoice_id,
                    "reason": null,
                    "occurred_at": Utc::now(),
                }
            }),
        };
        let err = store
            .append(vec![stale], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::event_store::EventStoreError::Concurrency(_)
        ));
    }

    #[test]
    fn rejected_command_does_not_update_read_model() {
        let (dispatcher, projection, _store) = setup();
        let organization_id = OrganizationId::new();
        let (agg, invoice_id) = create_invoice(&dispatcher, organization_id, "INV-202501-0001", 1_000);
        add_payment(&dispatcher, organization_id, agg, invoice_id, 600);

        wait_until(|| {
            projection
                .get(organization_id, &invoice_id)
                .is_some_and(|rm| rm.amount_paid == 600)
        });

        // Overpayment is rejected at the aggregate; nothing reaches the bus.
        let cmd = InvoiceCommand::AddPayment(AddPayment {
            organization_id,
            invoice_id,
            payment_id: Uuid::now_v7(),
            receipt_number: None,
            amount: 500,
            method: PaymentMethod::Cash,
            transaction_id: None,
            notes: None,
            received_by: StaffId::new(),
            occurred_at: Utc::now(),
        });
        let err = dispatcher
            .dispatch::<Invoice>(organization_id, agg, "billing.invoice", cmd, |_org, id| {
                Invoice::empty(InvoiceId::new(id))
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidAmount(_)));

        let rm = projection.get(organization_id, &invoice_id).unwrap();
        assert_eq!(rm.amount_paid, 600);
        assert_eq!(rm.payments.len(), 1);
    }

    #[test]
    fn allocated_invoice_numbers_are_sequential_and_unique() {
        let (dispatcher, projection, _store) = setup();
        let organization_id = OrganizationId::new();
        let allocator = NumberAllocator::new(InMemorySequenceStore::new());

        let now = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let number = allocator
                .allocate(organization_id, DocumentKind::Invoice, now)
                .unwrap();
            let (_agg, invoice_id) = create_invoice(&dispatcher, organization_id, &number, 500);
            ids.push((invoice_id, number));
        }

        wait_until(|| projection.list(organization_id).len() == 4);

        let mut numbers: Vec<String> = projection
            .list(organization_id)
            .into_iter()
            .map(|rm| rm.invoice_number)
            .collect();
        numbers.sort();

        let expected: Vec<String> = ids.iter().map(|(_, n)| n.clone()).collect();
        assert_eq!(numbers, expected);

        // Strictly increasing, no gaps: 0001..0004 for this month.
        for (idx, number) in numbers.iter().enumerate() {
            assert!(number.ends_with(&format!("{:04}", idx + 1)), "got {number}");
        }
    }
}
