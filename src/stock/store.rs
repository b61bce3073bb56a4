//! SQLite persistence for catalog, ledger and mosaics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;
use tracing::debug;

use super::{Mosaic, MosaicId, OrderId, StockEntry, StockLedger, StockLevel};
use crate::bom::{CatalogItem, ItemId};
use crate::error::{MosaicError, Result};
use crate::pavage::{HexColor, Shape};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS shapes (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    width INTEGER NOT NULL,
    length INTEGER NOT NULL,
    hole TEXT
);
CREATE TABLE IF NOT EXISTS colors (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    hex_color TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    shape_id INTEGER NOT NULL REFERENCES shapes(id),
    color_id INTEGER NOT NULL REFERENCES colors(id),
    price REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS stock_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES items(id),
    quantity INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stock_entries_item ON stock_entries(item_id);
CREATE TRIGGER IF NOT EXISTS stock_entries_no_update BEFORE UPDATE ON stock_entries
BEGIN
    SELECT RAISE(ABORT, 'stock ledger is append-only');
END;
CREATE TRIGGER IF NOT EXISTS stock_entries_no_delete BEFORE DELETE ON stock_entries
BEGIN
    SELECT RAISE(ABORT, 'stock ledger is append-only');
END;
CREATE TABLE IF NOT EXISTS mosaics (
    id INTEGER PRIMARY KEY,
    image_id INTEGER NOT NULL,
    style TEXT,
    pavage TEXT NOT NULL,
    order_id INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_mosaics_order ON mosaics(order_id);
CREATE TABLE IF NOT EXISTS mosaic_compositions (
    mosaic_id INTEGER NOT NULL REFERENCES mosaics(id),
    item_id INTEGER NOT NULL REFERENCES items(id),
    quantity_needed INTEGER NOT NULL,
    PRIMARY KEY (mosaic_id, item_id)
);
CREATE TABLE IF NOT EXISTS stock_deductions (
    mosaic_id INTEGER PRIMARY KEY REFERENCES mosaics(id),
    deducted_at TEXT NOT NULL
);
"#;

pub(super) const STOCK_LEVELS_SQL: &str = r#"
SELECT i.id, s.width, s.length, s.hole, s.name, c.id, c.name, c.hex_color, i.price,
       IFNULL(e.current_stock, 0)
FROM items i
JOIN shapes s ON i.shape_id = s.id
JOIN colors c ON i.color_id = c.id
LEFT JOIN (
    SELECT item_id, SUM(quantity) AS current_stock
    FROM stock_entries
    GROUP BY item_id
) e ON i.id = e.item_id
"#;

pub(super) const CATALOG_SQL: &str = r#"
SELECT i.id, s.width, s.length, s.hole, c.id, c.hex_color, i.price
FROM items i
JOIN shapes s ON i.shape_id = s.id
JOIN colors c ON i.color_id = c.id
ORDER BY i.id
"#;

/// Catalog, ledger and mosaic storage in one SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let path_clone = path.clone();

        task::spawn_blocking(move || {
            let conn = open_connection(&path_clone)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, MosaicError>(())
        })
        .await??;

        debug!("Stock store ready at {}", path.display());
        Ok(Self { db_path: path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` on a fresh connection off the async runtime.
    pub(super) async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        task::spawn_blocking(move || {
            let mut conn = open_connection(&path)?;
            f(&mut conn)
        })
        .await?
    }

    // ── Catalog ──────────────────────────────────────────────────────────

    pub async fn add_shape(&self, name: &str, shape: Shape) -> Result<i64> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO shapes (name, width, length, hole) VALUES (?1, ?2, ?3, ?4)",
                params![name, shape.width, shape.length, shape.hole],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn add_color(&self, name: &str, color: &HexColor) -> Result<i64> {
        let name = name.to_string();
        let hex = color.without_hash().to_string();
        self.with_conn(move |conn| {
            conn.execute("INSERT INTO colors (name, hex_color) VALUES (?1, ?2)", params![name, hex])?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn add_item(&self, shape_id: i64, color_id: i64, unit_price: f64) -> Result<ItemId> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO items (shape_id, color_id, price) VALUES (?1, ?2, ?3)",
                params![shape_id, color_id, unit_price],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Catalog items in id order, the iteration order resolution relies on.
    pub async fn catalog(&self) -> Result<Vec<CatalogItem>> {
        self.with_conn(|conn| load_catalog(conn)).await
    }

    /// `<shapeName>/<hex>` as the engine's replenishment commands expect it.
    pub async fn item_reference(&self, item_id: ItemId) -> Result<String> {
        self.with_conn(move |conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT s.name, c.hex_color FROM items i
                     JOIN shapes s ON i.shape_id = s.id
                     JOIN colors c ON i.color_id = c.id
                     WHERE i.id = ?1",
                    params![item_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (shape_name, hex) = row.ok_or(MosaicError::ItemNotFound(item_id))?;
            Ok(format!("{}/{}", shape_name, hex.trim_start_matches('#').to_ascii_lowercase()))
        })
        .await
    }

    pub async fn low_stock(&self, threshold: i64) -> Result<Vec<StockLevel>> {
        let levels = self.stock_levels().await?;
        Ok(levels.into_iter().filter(|l| l.current_stock < threshold).collect())
    }

    /// Every movement of one item, oldest first.
    pub async fn ledger_for(&self, item_id: ItemId) -> Result<Vec<StockEntry>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, item_id, quantity, created_at FROM stock_entries WHERE item_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![item_id], stock_entry_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    // ── Mosaics ──────────────────────────────────────────────────────────

    pub async fn save_mosaic(&self, image_id: i64, layout: &str, style: Option<&str>) -> Result<MosaicId> {
        let layout = layout.to_string();
        let style = style.map(str::to_string);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO mosaics (image_id, style, pavage, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![image_id, style, layout, Utc::now().to_rfc3339()],
            )?;
            let id = conn.last_insert_rowid();
            debug!("Saved mosaic {} for image {}", id, image_id);
            Ok(id)
        })
        .await
    }

    pub async fn get_mosaic(&self, mosaic_id: MosaicId) -> Result<Mosaic> {
        self.with_conn(move |conn| load_mosaic(conn, mosaic_id)).await
    }

    /// Set the order reference once. Returns false if it was already set.
    pub async fn attach_order(&self, mosaic_id: MosaicId, order_id: OrderId) -> Result<bool> {
        self.with_conn(move |conn| attach_order_in(conn, mosaic_id, order_id)).await
    }

    pub async fn mosaics_for_order(&self, order_id: OrderId) -> Result<Vec<Mosaic>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, image_id, style, pavage, order_id, created_at FROM mosaics WHERE order_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![order_id], mosaic_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[async_trait]
impl StockLedger for SqliteStore {
    async fn record_movement(&self, item_id: ItemId, quantity: i64) -> Result<StockEntry> {
        self.with_conn(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO stock_entries (item_id, quantity, created_at) VALUES (?1, ?2, ?3)",
                params![item_id, quantity, created_at.to_rfc3339()],
            )?;
            Ok(StockEntry { id: conn.last_insert_rowid(), item_id, quantity, created_at })
        })
        .await
    }

    async fn current_stock(&self, item_id: ItemId) -> Result<i64> {
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT IFNULL(SUM(quantity), 0) FROM stock_entries WHERE item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )?;
            Ok(total)
        })
        .await
    }

    async fn stock_levels(&self) -> Result<Vec<StockLevel>> {
        self.with_conn(|conn| load_stock_levels(conn)).await
    }
}

pub(super) fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(conn)
}

pub(super) fn load_catalog(conn: &Connection) -> Result<Vec<CatalogItem>> {
    let mut stmt = conn.prepare(CATALOG_SQL)?;
    let rows = stmt.query_map([], |row| {
        let hex: String = row.get(5)?;
        Ok(CatalogItem {
            id: row.get(0)?,
            shape: Shape { width: row.get(1)?, length: row.get(2)?, hole: row.get(3)? },
            color_id: row.get(4)?,
            color: HexColor::new(&hex),
            unit_price: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(super) fn load_stock_levels(conn: &Connection) -> Result<Vec<StockLevel>> {
    let sql = format!("{STOCK_LEVELS_SQL} ORDER BY i.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        let hex: String = row.get(7)?;
        Ok(StockLevel {
            item_id: row.get(0)?,
            shape: Shape { width: row.get(1)?, length: row.get(2)?, hole: row.get(3)? },
            shape_name: row.get(4)?,
            color_id: row.get(5)?,
            color_name: row.get(6)?,
            color: HexColor::new(&hex),
            unit_price: row.get(8)?,
            current_stock: row.get(9)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(super) fn load_mosaic(conn: &Connection, mosaic_id: MosaicId) -> Result<Mosaic> {
    conn.query_row(
        "SELECT id, image_id, style, pavage, order_id, created_at FROM mosaics WHERE id = ?1",
        params![mosaic_id],
        mosaic_from_row,
    )
    .optional()?
    .ok_or(MosaicError::MosaicNotFound(mosaic_id))
}

pub(super) fn attach_order_in(conn: &Connection, mosaic_id: MosaicId, order_id: OrderId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE mosaics SET order_id = ?1 WHERE id = ?2 AND order_id IS NULL",
        params![order_id, mosaic_id],
    )?;
    if changed == 0 {
        // distinguish "already attached" from "no such mosaic"
        load_mosaic(conn, mosaic_id)?;
    }
    Ok(changed > 0)
}

fn mosaic_from_row(row: &Row<'_>) -> rusqlite::Result<Mosaic> {
    let created_at: DateTime<Utc> = row.get(5)?;
    Ok(Mosaic {
        id: row.get(0)?,
        image_id: row.get(1)?,
        style: row.get(2)?,
        layout: row.get(3)?,
        order_id: row.get(4)?,
        created_at,
    })
}

fn stock_entry_from_row(row: &Row<'_>) -> rusqlite::Result<StockEntry> {
    Ok(StockEntry {
        id: row.get(0)?,
        item_id: row.get(1)?,
        quantity: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn seeded_store(dir: &Path) -> (SqliteStore, ItemId, ItemId) {
        let store = SqliteStore::new(dir.join("shop.db")).await.unwrap();
        let brick = store.add_shape("2-4", Shape::new(2, 4)).await.unwrap();
        let plate = store.add_shape("1-1", Shape::new(1, 1)).await.unwrap();
        let red = store.add_color("Red", &HexColor::new("FF0000")).await.unwrap();
        let a = store.add_item(brick, red, 0.12).await.unwrap();
        let b = store.add_item(plate, red, 0.03).await.unwrap();
        (store, a, b)
    }

    #[tokio::test]
    async fn test_current_stock_is_sum_of_movements() {
        let dir = tempdir().unwrap();
        let (store, item, _) = seeded_store(dir.path()).await;

        for qty in [100, -30, 5, -80] {
            store.record_movement(item, qty).await.unwrap();
        }
        assert_eq!(store.current_stock(item).await.unwrap(), -5);
        assert_eq!(store.ledger_for(item).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_movements_sum() {
        let dir = tempdir().unwrap();
        let (store, item, _) = seeded_store(dir.path()).await;

        let mut handles = Vec::new();
        for i in 0..10i64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.record_movement(item, if i % 2 == 0 { i } else { -i }).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // 0 - 1 + 2 - 3 + 4 - 5 + 6 - 7 + 8 - 9
        assert_eq!(store.current_stock(item).await.unwrap(), -5);
    }

    #[tokio::test]
    async fn test_ledger_rejects_rewrites() {
        let dir = tempdir().unwrap();
        let (store, item, _) = seeded_store(dir.path()).await;
        store.record_movement(item, 10).await.unwrap();

        let update = store
            .with_conn(|conn| Ok(conn.execute("UPDATE stock_entries SET quantity = 0", [])?))
            .await;
        assert!(matches!(update, Err(MosaicError::Storage(_))));
        let delete = store.with_conn(|conn| Ok(conn.execute("DELETE FROM stock_entries", [])?)).await;
        assert!(delete.is_err());
        assert_eq!(store.current_stock(item).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_stock_levels_batch_and_low_stock() {
        let dir = tempdir().unwrap();
        let (store, a, b) = seeded_store(dir.path()).await;
        store.record_movement(a, 200).await.unwrap();
        store.record_movement(b, -4).await.unwrap();

        let levels = store.stock_levels().await.unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].current_stock, 200);
        assert_eq!(levels[0].color.as_str(), "#FF0000");
        assert!(levels[1].is_critical());

        let low = store.low_stock(super::super::LOW_STOCK_THRESHOLD).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].item_id, b);
    }

    #[tokio::test]
    async fn test_item_reference() {
        let dir = tempdir().unwrap();
        let (store, a, _) = seeded_store(dir.path()).await;
        assert_eq!(store.item_reference(a).await.unwrap(), "2-4/ff0000");
        assert!(matches!(store.item_reference(999).await, Err(MosaicError::ItemNotFound(999))));
    }

    #[tokio::test]
    async fn test_mosaic_order_reference_is_set_once() {
        let dir = tempdir().unwrap();
        let (store, _, _) = seeded_store(dir.path()).await;
        let id = store.save_mosaic(12, "std 10\n2x4/ff0000 0 0 0\n", Some("economic")).await.unwrap();

        assert!(store.attach_order(id, 1).await.unwrap());
        assert!(!store.attach_order(id, 2).await.unwrap());

        let mosaic = store.get_mosaic(id).await.unwrap();
        assert_eq!(mosaic.order_id, Some(1));
        assert_eq!(mosaic.style.as_deref(), Some("economic"));
        assert_eq!(store.mosaics_for_order(1).await.unwrap().len(), 1);
        assert!(matches!(store.attach_order(404, 1).await, Err(MosaicError::MosaicNotFound(404))));
    }

    #[tokio::test]
    async fn test_timestamps_are_rfc3339() {
        let dir = tempdir().unwrap();
        let (store, a, _) = seeded_store(dir.path()).await;
        let entry = store.record_movement(a, 5).await.unwrap();
        let id = store.save_mosaic(3, "x 1\n", None).await.unwrap();

        let (movement_at, mosaic_at): (String, String) = store
            .with_conn(move |conn| {
                let movement = conn.query_row(
                    "SELECT created_at FROM stock_entries WHERE id = ?1",
                    params![entry.id],
                    |row| row.get(0),
                )?;
                let mosaic = conn.query_row("SELECT created_at FROM mosaics WHERE id = ?1", params![id], |row| row.get(0))?;
                Ok((movement, mosaic))
            })
            .await
            .unwrap();

        for raw in [&movement_at, &mosaic_at] {
            assert_eq!(raw.as_bytes()[10], b'T', "{raw}");
            assert!(DateTime::parse_from_rfc3339(raw).is_ok(), "{raw}");
        }
        assert_eq!(DateTime::parse_from_rfc3339(&movement_at).unwrap(), entry.created_at);
        // rows still decode into typed timestamps
        assert_eq!(store.ledger_for(a).await.unwrap()[0].created_at, entry.created_at);
        assert!(store.get_mosaic(id).await.unwrap().created_at <= Utc::now());
    }
}
