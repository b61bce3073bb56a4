//! Brick Mosaic Engine
//!
//! Turns images into priced brick mosaics and keeps the brick inventory
//! consistent with what was sold:
//! - Pavage layout codec
//! - Bill-of-materials aggregation and catalog resolution
//! - Retail pricing
//! - Locked, cached orchestration of the external tiling engine
//! - Append-only stock ledger with idempotent order reconciliation
//! - Printable assembly plans

pub mod bom;
pub mod config;
pub mod error;
pub mod generation;
pub mod pavage;
pub mod plan;
pub mod pricing;
pub mod stock;

// Re-exports for convenience
pub use config::MosaicConfig;
pub use error::{MosaicError, Result};
pub use generation::{GenerationOrchestrator, GenerationReport, StyleVariant};
pub use pavage::{parse_layout, ParsedLayout, Placement};
pub use pricing::Price;
pub use stock::{SqliteStore, StockLedger};
