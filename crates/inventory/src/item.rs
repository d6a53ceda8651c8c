use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicore_core::{Aggregate, AggregateId, AggregateRoot, DomainError, OrganizationId};
use clinicore_events::Event;

/// Supply item identifier (organization-scoped via `organization_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplyItemId(pub AggregateId);

impl SupplyItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SupplyItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: SupplyItem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplyItem {
    id: SupplyItemId,
    organization_id: Option<OrganizationId>,
    name: String,
    /// Unit of issue (e.g. "box", "carpule").
    unit: String,
    stock: i64,
    reorder_level: i64,
    version: u64,
    created: bool,
}

impl SupplyItem {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SupplyItemId) -> Self {
        Self {
            id,
            organization_id: None,
            name: String::new(),
            unit: String::new(),
            stock: 0,
            reorder_level: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SupplyItemId {
        self.id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn stock(&self) -> i64 {
        self.stock
    }

    pub fn reorder_level(&self) -> i64 {
        self.reorder_level
    }

    /// Whether current stock has fallen to or below the reorder level.
    pub fn needs_reorder(&self) -> bool {
        self.stock <= self.reorder_level
    }
}

impl AggregateRoot for SupplyItem {
    type Id = SupplyItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItem {
    pub organization_id: OrganizationId,
    pub item_id: SupplyItemId,
    pub name: String,
    pub unit: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub organization_id: OrganizationId,
    pub item_id: SupplyItemId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetReorderLevel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReorderLevel {
    pub organization_id: OrganizationId,
    pub item_id: SupplyItemId,
    pub level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    CreateItem(CreateItem),
    AdjustStock(AdjustStock),
    SetReorderLevel(SetReorderLevel),
}

/// Event: ItemCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreated {
    pub organization_id: OrganizationId,
    pub item_id: SupplyItemId,
    pub name: String,
    pub unit: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub organization_id: OrganizationId,
    pub item_id: SupplyItemId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReorderLevelSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderLevelSet {
    pub organization_id: OrganizationId,
    pub item_id: SupplyItemId,
    pub level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ItemCreated(ItemCreated),
    StockAdjusted(StockAdjusted),
    ReorderLevelSet(ReorderLevelSet),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ItemCreated(_) => "inventory.item.created",
            InventoryEvent::StockAdjusted(_) => "inventory.item.stock_adjusted",
            InventoryEvent::ReorderLevelSet(_) => "inventory.item.reorder_level_set",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ItemCreated(e) => e.occurred_at,
            InventoryEvent::StockAdjusted(e) => e.occurred_at,
            InventoryEvent::ReorderLevelSet(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SupplyItem {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ItemCreated(e) => {
                self.id = e.item_id;
                self.organization_id = Some(e.organization_id);
                self.name = e.name.clone();
                self.unit = e.unit.clone();
                self.stock = 0;
                self.reorder_level = 0;
                self.created = true;
            }
            InventoryEvent::StockAdjusted(e) => {
                self.stock += e.delta;
            }
            InventoryEvent::ReorderLevelSet(e) => {
                self.reorder_level = e.level;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::CreateItem(cmd) => self.handle_create(cmd),
            InventoryCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            InventoryCommand::SetReorderLevel(cmd) => self.handle_set_reorder(cmd),
        }
    }
}

impl SupplyItem {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_item_id(&self, item_id: SupplyItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateItem) -> Result<Vec<InventoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("item already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit.trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        Ok(vec![InventoryEvent::ItemCreated(ItemCreated {
            organization_id: cmd.organization_id,
            item_id: cmd.item_id,
            name: cmd.name.clone(),
            unit: cmd.unit.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<InventoryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("supply item"));
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }

        let new_stock = self.stock + cmd.delta;
        if new_stock < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }

        Ok(vec![InventoryEvent::StockAdjusted(StockAdjusted {
            organization_id: cmd.organization_id,
            item_id: cmd.item_id,
            delta: cmd.delta,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_reorder(&self, cmd: &SetReorderLevel) -> Result<Vec<InventoryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("supply item"));
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.level < 0 {
            return Err(DomainError::validation("reorder level cannot be negative"));
        }

        Ok(vec![InventoryEvent::ReorderLevelSet(ReorderLevelSet {
            organization_id: cmd.organization_id,
            item_id: cmd.item_id,
            level: cmd.level,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicore_core::AggregateId;
    use proptest::prelude::*;

    fn test_org_id() -> OrganizationId {
        OrganizationId::new()
    }

    fn test_item_id() -> SupplyItemId {
        SupplyItemId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_item(organization_id: OrganizationId, item_id: SupplyItemId) -> SupplyItem {
        let mut item = SupplyItem::empty(item_id);
        let events = item
            .handle(&InventoryCommand::CreateItem(CreateItem {
                organization_id,
                item_id,
                name: "Nitrile gloves (M)".to_string(),
                unit: "box".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            item.apply(e);
        }
        item
    }

    fn adjust(item: &mut SupplyItem, organization_id: OrganizationId, delta: i64) {
        let events = item
            .handle(&InventoryCommand::AdjustStock(AdjustStock {
                organization_id,
                item_id: item.id_typed(),
                delta,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            item.apply(e);
        }
    }

    #[test]
    fn stock_cannot_go_negative() {
        let organization_id = test_org_id();
        let mut item = created_item(organization_id, test_item_id());
        adjust(&mut item, organization_id, 10);

        let err = item
            .handle(&InventoryCommand::AdjustStock(AdjustStock {
                organization_id,
                item_id: item.id_typed(),
                delta: -11,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(item.stock(), 10);
    }

    #[test]
    fn reorder_level_drives_needs_reorder() {
        let organization_id = test_org_id();
        let mut item = created_item(organization_id, test_item_id());
        adjust(&mut item, organization_id, 5);

        let events = item
            .handle(&InventoryCommand::SetReorderLevel(SetReorderLevel {
                organization_id,
                item_id: item.id_typed(),
                level: 8,
                occurred_at: test_time(),
            }))
            .unwrap();
        item.apply(&events[0]);

        assert!(item.needs_reorder());
        adjust(&mut item, organization_id, 20);
        assert!(!item.needs_reorder());
    }

    #[test]
    fn zero_delta_is_rejected() {
        let organization_id = test_org_id();
        let item = created_item(organization_id, test_item_id());
        let err = item
            .handle(&InventoryCommand::AdjustStock(AdjustStock {
                organization_id,
                item_id: item.id_typed(),
                delta: 0,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        /// Property: after any accepted sequence of adjustments, stock equals
        /// the sum of applied deltas and never dips below zero.
        #[test]
        fn stock_equals_sum_of_accepted_deltas(
            deltas in prop::collection::vec(-50i64..100i64, 1..30)
        ) {
            let organization_id = test_org_id();
            let mut item = created_item(organization_id, test_item_id());
            let mut expected: i64 = 0;

            for delta in deltas {
                if delta == 0 {
                    continue;
                }
                let cmd = InventoryCommand::AdjustStock(AdjustStock {
                    organization_id,
                    item_id: item.id_typed(),
                    delta,
                    occurred_at: test_time(),
                });
                match item.handle(&cmd) {
                    Ok(events) => {
                        for e in &events {
                            item.apply(e);
                        }
                        expected += delta;
                    }
                    Err(_) => {
                        // Rejected adjustment must not change state.
                        prop_assert_eq!(item.stock(), expected);
                    }
                }
                prop_assert!(item.stock() >= 0);
            }

            prop_assert_eq!(item.stock(), expected);
        }
    }
}
