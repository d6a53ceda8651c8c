//! Clinic supply inventory module (event-sourced).
//!
//! Business rules for consumable supplies (gloves, anesthetic carpules,
//! impression material), implemented purely as deterministic domain logic.

pub mod item;

pub use item::{
    AdjustStock, CreateItem, InventoryCommand, InventoryEvent, ItemCreated, ReorderLevelSet,
    SetReorderLevel, StockAdjusted, SupplyItem, SupplyItemId,
};
