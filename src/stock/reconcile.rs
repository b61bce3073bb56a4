//! Composition and sale-time deduction.
//!
//! Both writers run in an IMMEDIATE transaction so two finalizations of
//! the same mosaic serialize: compositions are written at most once per
//! mosaic and stock is deducted at most once per mosaic.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::store::{attach_order_in, load_catalog, load_mosaic, SqliteStore};
use super::{CompositionLine, MosaicId, OrderId};
use crate::bom::{aggregate, order_brick_list, to_catalog_quantities, BomLine};
use crate::error::{MosaicError, Result};
use crate::pavage::{count_pieces, parse_layout};
use crate::pricing::{price_layout, Price};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompositionOutcome {
    Created {
        lines: Vec<CompositionLine>,
        /// Groups with no catalog item, left out of the composition.
        unresolved: Vec<BomLine>,
    },
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeductionOutcome {
    Deducted { movements: usize, bricks: u64 },
    AlreadyDeducted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedMosaic {
    pub mosaic_id: MosaicId,
    pub order_attached: bool,
    pub composition: CompositionOutcome,
    /// `None` when the mosaic resolved to no catalog item at all.
    pub deduction: Option<DeductionOutcome>,
}

fn check_order(mosaic_id: MosaicId, attached_to: Option<OrderId>, order_id: OrderId) -> Result<()> {
    match attached_to {
        Some(other) if other != order_id => {
            warn!("Mosaic {} already sold under order {}, refusing order {}", mosaic_id, other, order_id);
            Err(MosaicError::OrderMismatch { mosaic_id, order_id, attached_to: other })
        }
        _ => Ok(()),
    }
}

impl SqliteStore {
    /// Build and persist the catalog composition of a mosaic, once.
    pub async fn ensure_composition(&self, mosaic_id: MosaicId) -> Result<CompositionOutcome> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let exists = tx
                .query_row(
                    "SELECT 1 FROM mosaic_compositions WHERE mosaic_id = ?1 LIMIT 1",
                    params![mosaic_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                return Ok(CompositionOutcome::AlreadyPresent);
            }

            let mosaic = load_mosaic(&tx, mosaic_id)?;
            let layout = parse_layout(&mosaic.layout);
            if layout.skipped > 0 {
                warn!("Mosaic {}: {} malformed layout lines ignored", mosaic_id, layout.skipped);
            }
            let bom = aggregate(&layout.placements);
            let catalog = load_catalog(&tx)?;
            let resolution = to_catalog_quantities(&bom, &catalog);

            let mut lines = Vec::with_capacity(resolution.resolved.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO mosaic_compositions (mosaic_id, item_id, quantity_needed) VALUES (?1, ?2, ?3)",
                )?;
                for (item_id, qty) in &resolution.resolved {
                    stmt.execute(params![mosaic_id, item_id, qty])?;
                    lines.push(CompositionLine { item_id: *item_id, quantity_needed: *qty });
                }
            }
            tx.commit()?;

            info!(
                "Composition for mosaic {}: {} items, {} unresolved groups",
                mosaic_id,
                lines.len(),
                resolution.unresolved.len()
            );
            Ok(CompositionOutcome::Created { lines, unresolved: resolution.unresolved })
        })
        .await
    }

    pub async fn composition(&self, mosaic_id: MosaicId) -> Result<Vec<CompositionLine>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT item_id, quantity_needed FROM mosaic_compositions WHERE mosaic_id = ?1 ORDER BY item_id",
            )?;
            let rows = stmt.query_map(params![mosaic_id], |row| {
                Ok(CompositionLine { item_id: row.get(0)?, quantity_needed: row.get(1)? })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Append one negative movement per composition line. A mosaic is
    /// deducted at most once; later calls are no-ops.
    pub async fn deduct(&self, mosaic_id: MosaicId) -> Result<DeductionOutcome> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let done = tx
                .query_row(
                    "SELECT 1 FROM stock_deductions WHERE mosaic_id = ?1",
                    params![mosaic_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if done {
                return Ok(DeductionOutcome::AlreadyDeducted);
            }

            let lines: Vec<(i64, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT item_id, quantity_needed FROM mosaic_compositions WHERE mosaic_id = ?1 ORDER BY item_id",
                )?;
                let rows = stmt.query_map(params![mosaic_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            if lines.is_empty() {
                return Err(MosaicError::CompositionMissing(mosaic_id));
            }

            let now = Utc::now().to_rfc3339();
            let mut bricks = 0u64;
            {
                let mut stmt =
                    tx.prepare("INSERT INTO stock_entries (item_id, quantity, created_at) VALUES (?1, ?2, ?3)")?;
                for (item_id, qty) in &lines {
                    stmt.execute(params![item_id, -qty.abs(), &now])?;
                    bricks += qty.unsigned_abs();
                }
            }
            tx.execute(
                "INSERT INTO stock_deductions (mosaic_id, deducted_at) VALUES (?1, ?2)",
                params![mosaic_id, &now],
            )?;
            tx.commit()?;

            info!("Deducted {} bricks over {} items for mosaic {}", bricks, lines.len(), mosaic_id);
            Ok(DeductionOutcome::Deducted { movements: lines.len(), bricks })
        })
        .await
    }

    /// Sale-time path for every mosaic of a paid order: attach the order,
    /// compose, then deduct stock.
    ///
    /// Fails with `OrderMismatch` before touching anything when one of the
    /// mosaics already belongs to another order.
    pub async fn finalize_order(&self, order_id: OrderId, mosaic_ids: &[MosaicId]) -> Result<Vec<FinalizedMosaic>> {
        for &mosaic_id in mosaic_ids {
            let mosaic = self.get_mosaic(mosaic_id).await?;
            check_order(mosaic_id, mosaic.order_id, order_id)?;
        }

        let mut finalized = Vec::with_capacity(mosaic_ids.len());
        for &mosaic_id in mosaic_ids {
            let order_attached = self
                .with_conn(move |conn| {
                    let attached = attach_order_in(conn, mosaic_id, order_id)?;
                    if !attached {
                        // lost a race with another order since the check above
                        check_order(mosaic_id, load_mosaic(conn, mosaic_id)?.order_id, order_id)?;
                    }
                    Ok(attached)
                })
                .await?;
            let composition = self.ensure_composition(mosaic_id).await?;
            let deduction = match self.deduct(mosaic_id).await {
                Ok(outcome) => Some(outcome),
                Err(MosaicError::CompositionMissing(id)) => {
                    warn!("Mosaic {} resolved to no catalog item, stock untouched", id);
                    None
                }
                Err(e) => return Err(e),
            };
            finalized.push(FinalizedMosaic { mosaic_id, order_attached, composition, deduction });
        }

        Ok(finalized)
    }

    pub async fn mosaic_price(&self, mosaic_id: MosaicId) -> Result<Price> {
        let mosaic = self.get_mosaic(mosaic_id).await?;
        price_layout(&mosaic.layout).ok_or(MosaicError::EmptyLayout(mosaic_id))
    }

    pub async fn mosaic_piece_count(&self, mosaic_id: MosaicId) -> Result<usize> {
        let mosaic = self.get_mosaic(mosaic_id).await?;
        Ok(count_pieces(&mosaic.layout))
    }

    /// Buyer-facing brick list of a single mosaic.
    pub async fn mosaic_bricks(&self, mosaic_id: MosaicId) -> Result<Vec<BomLine>> {
        let mosaic = self.get_mosaic(mosaic_id).await?;
        let bom = aggregate(&parse_layout(&mosaic.layout).placements);
        Ok(order_brick_list([&bom]))
    }

    /// Brick list of a whole order, merged across its mosaics.
    pub async fn order_bricks(&self, order_id: OrderId) -> Result<Vec<BomLine>> {
        let mosaics = self.mosaics_for_order(order_id).await?;
        let bills: Vec<_> = mosaics.iter().map(|m| aggregate(&parse_layout(&m.layout).placements)).collect();
        Ok(order_brick_list(&bills))
    }
}
