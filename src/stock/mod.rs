//! Stock Reconciler
//!
//! Append-only inventory ledger, persisted mosaics and their catalog
//! compositions. Current stock is always the sum of ledger movements;
//! nothing in the ledger is ever updated or deleted.

mod reconcile;
mod store;

pub use reconcile::{CompositionOutcome, DeductionOutcome, FinalizedMosaic};
pub use store::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bom::ItemId;
use crate::error::Result;
use crate::pavage::{HexColor, Shape};

pub type MosaicId = i64;
pub type OrderId = i64;

/// Stock level under which an item is reported as low.
pub const LOW_STOCK_THRESHOLD: i64 = 50;

/// One ledger movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockEntry {
    pub id: i64,
    pub item_id: ItemId,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

/// Catalog item joined with its running stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLevel {
    pub item_id: ItemId,
    pub shape: Shape,
    pub shape_name: String,
    pub color_id: i64,
    pub color_name: String,
    pub color: HexColor,
    pub unit_price: f64,
    /// May be negative: sales are never refused for lack of stock.
    pub current_stock: i64,
}

impl StockLevel {
    pub fn is_critical(&self) -> bool {
        self.current_stock < 0
    }
}

/// A chosen layout, persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mosaic {
    pub id: MosaicId,
    pub image_id: i64,
    pub style: Option<String>,
    pub layout: String,
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionLine {
    pub item_id: ItemId,
    pub quantity_needed: u32,
}

/// The ledger contract. Movements are appended, balances are sums.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Append one signed movement. Never refused for insufficient stock.
    async fn record_movement(&self, item_id: ItemId, quantity: i64) -> Result<StockEntry>;

    async fn current_stock(&self, item_id: ItemId) -> Result<i64>;

    /// Every catalog item with its balance, read in a single query.
    async fn stock_levels(&self) -> Result<Vec<StockLevel>>;
}
