use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicore_core::{AggregateId, OrganizationId};
use clinicore_events::EventEnvelope;
use clinicore_inventory::{InventoryEvent, SupplyItemId};

use crate::read_model::OrgStore;

/// Queryable supply read model: current stock per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplyReadModel {
    pub item_id: SupplyItemId,
    pub name: String,
    pub unit: String,
    pub stock: i64,
    pub reorder_level: i64,
}

impl SupplyReadModel {
    pub fn needs_reorder(&self) -> bool {
        self.stock <= self.reorder_level
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum SupplyProjectionError {
    #[error("failed to deserialize inventory event: {0}")]
    Deserialize(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Supply stock projection (organization-isolated, rebuildable).
#[derive(Debug)]
pub struct SupplyStockProjection<S>
where
    S: OrgStore<SupplyItemId, SupplyReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> SupplyStockProjection<S>
where
    S: OrgStore<SupplyItemId, SupplyReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, item_id: &SupplyItemId) -> Option<SupplyReadModel> {
        self.store.get(organization_id, item_id)
    }

    pub fn list(&self, organization_id: OrganizationId) -> Vec<SupplyReadModel> {
        self.store.list(organization_id)
    }

    /// Apply a published envelope (idempotent, at-least-once safe).
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), SupplyProjectionError> {
        if envelope.aggregate_type() != "inventory.item" {
            return Ok(());
        }

        let organization_id = envelope.organization_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if let Ok(mut cursors) = self.cursors.write() {
            let key = CursorKey {
                organization_id,
                aggregate_id,
            };
            let last = *cursors.get(&key).unwrap_or(&0);

            if seq == 0 {
                return Err(SupplyProjectionError::NonMonotonicSequence { last, found: seq });
            }
            if seq <= last {
                return Ok(());
            }
            if seq != last + 1 && last != 0 {
                return Err(SupplyProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: InventoryEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| SupplyProjectionError::Deserialize(e.to_string()))?;

            let (event_org, item_id) = match &ev {
                InventoryEvent::ItemCreated(e) => (e.organization_id, e.item_id),
                InventoryEvent::StockAdjusted(e) => (e.organization_id, e.item_id),
                InventoryEvent::ReorderLevelSet(e) => (e.organization_id, e.item_id),
            };

            if event_org != organization_id {
                return Err(SupplyProjectionError::OrganizationIsolation(
                    "event organization_id does not match envelope organization_id".to_string(),
                ));
            }
            if item_id.0 != aggregate_id {
                return Err(SupplyProjectionError::OrganizationIsolation(
                    "event item_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match ev {
                InventoryEvent::ItemCreated(e) => {
                    self.store.upsert(
                        organization_id,
                        e.item_id,
                        SupplyReadModel {
                            item_id: e.item_id,
                            name: e.name,
                            unit: e.unit,
                            stock: 0,
                            reorder_level: 0,
                        },
                    );
                }
                InventoryEvent::StockAdjusted(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.item_id) {
                        rm.stock += e.delta;
                        self.store.upsert(organization_id, e.item_id, rm);
                    }
                }
                InventoryEvent::ReorderLevelSet(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.item_id) {
                        rm.reorder_level = e.level;
                        self.store.upsert(organization_id, e.item_id, rm);
                    }
                }
            }

            cursors.insert(key, seq);
        }

        Ok(())
    }
}
