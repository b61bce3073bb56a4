//! Plan Projector
//!
//! Rebuilds the occupancy grid of a layout for printed assembly plans.
//! Each distinct color gets a symbol (`A`..`Z`, then `A1`..`Z1`, ...);
//! overlapping bricks are resolved last-write-wins.

use serde::{Deserialize, Serialize};

use tracing::warn;

use crate::pavage::{HexColor, Placement};

/// Largest grid materialized by `project`.
pub const MAX_PLAN_CELLS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCell {
    pub color: HexColor,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub symbol: String,
    pub color: HexColor,
}

/// Placement with its effective footprint, for renderers drawing whole bricks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedBrick {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub color: HexColor,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProjection {
    /// Grid coordinates of `grid[0][0]`.
    pub origin: (i32, i32),
    pub width: u32,
    pub height: u32,
    /// `grid[row][column]`, `None` where no brick covers the cell.
    pub grid: Vec<Vec<Option<PlanCell>>>,
    /// Set when the bounding box exceeds `MAX_PLAN_CELLS`; `grid` is then empty.
    pub grid_omitted: bool,
    /// Placements whose extent does not fit in grid coordinates.
    pub skipped: usize,
    /// Colors in first-seen order.
    pub legend: Vec<LegendEntry>,
    pub bricks: Vec<PlacedBrick>,
}

/// Symbol for the `index`-th distinct color.
pub fn symbol_for_index(index: usize) -> String {
    let letter = (b'A' + (index % 26) as u8) as char;
    match index / 26 {
        0 => letter.to_string(),
        round => format!("{letter}{round}"),
    }
}

pub fn project(placements: &[Placement]) -> PlanProjection {
    let mut legend: Vec<LegendEntry> = Vec::new();
    let mut bricks = Vec::with_capacity(placements.len());
    let mut skipped = 0;

    for p in placements {
        if p.far_corner().is_none() {
            warn!("Brick {} at ({}, {}) extends past the grid range, left out of the plan", p.shape, p.x, p.y);
            skipped += 1;
            continue;
        }
        let symbol = match legend.iter().find(|entry| entry.color == p.color) {
            Some(entry) => entry.symbol.clone(),
            None => {
                let symbol = symbol_for_index(legend.len());
                legend.push(LegendEntry { symbol: symbol.clone(), color: p.color.clone() });
                symbol
            }
        };
        let (width, height) = p.footprint();
        bricks.push(PlacedBrick { x: p.x, y: p.y, width, height, color: p.color.clone(), symbol });
    }

    let Some(first) = bricks.first() else {
        return PlanProjection {
            origin: (0, 0),
            width: 0,
            height: 0,
            grid: Vec::new(),
            grid_omitted: false,
            skipped,
            legend,
            bricks,
        };
    };

    // Extents in i64: a span from a negative origin can exceed i32.
    let (mut min_x, mut min_y) = (i64::from(first.x), i64::from(first.y));
    let (mut max_x, mut max_y) = (min_x, min_y);
    for b in &bricks {
        min_x = min_x.min(i64::from(b.x));
        min_y = min_y.min(i64::from(b.y));
        max_x = max_x.max(i64::from(b.x) + i64::from(b.width));
        max_y = max_y.max(i64::from(b.y) + i64::from(b.height));
    }

    let width = (max_x - min_x) as u32;
    let height = (max_y - min_y) as u32;
    let origin = (min_x as i32, min_y as i32);

    if u64::from(width) * u64::from(height) > MAX_PLAN_CELLS {
        warn!("Plan of {}x{} cells exceeds {} cells, grid not built", width, height, MAX_PLAN_CELLS);
        return PlanProjection { origin, width, height, grid: Vec::new(), grid_omitted: true, skipped, legend, bricks };
    }

    let mut grid: Vec<Vec<Option<PlanCell>>> = vec![vec![None; width as usize]; height as usize];
    for b in &bricks {
        let row0 = (i64::from(b.y) - min_y) as usize;
        let col0 = (i64::from(b.x) - min_x) as usize;
        for row in &mut grid[row0..row0 + b.height as usize] {
            for cell in &mut row[col0..col0 + b.width as usize] {
                *cell = Some(PlanCell { color: b.color.clone(), symbol: b.symbol.clone() });
            }
        }
    }

    PlanProjection { origin, width, height, grid, grid_omitted: false, skipped, legend, bricks }
}

impl PlanProjection {
    pub fn symbol_for(&self, color: &HexColor) -> Option<&str> {
        self.legend.iter().find(|e| &e.color == color).map(|e| e.symbol.as_str())
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<&PlanCell> {
        let row = usize::try_from(i64::from(y) - i64::from(self.origin.1)).ok()?;
        let col = usize::try_from(i64::from(x) - i64::from(self.origin.0)).ok()?;
        self.grid.get(row)?.get(col)?.as_ref()
    }

    /// Printable plan: one text row per grid row, then the legend.
    pub fn to_text(&self) -> String {
        let cell_width = self.legend.iter().map(|e| e.symbol.len()).max().unwrap_or(1);
        let mut out = String::new();

        for row in &self.grid {
            let line: Vec<String> = row
                .iter()
                .map(|cell| {
                    let symbol = cell.as_ref().map(|c| c.symbol.as_str()).unwrap_or(".");
                    format!("{symbol:<cell_width$}")
                })
                .collect();
            out.push_str(line.join(" ").trim_end());
            out.push('\n');
        }

        if !self.legend.is_empty() {
            out.push('\n');
            for entry in &self.legend {
                out.push_str(&format!("{} {}\n", entry.symbol, entry.color));
            }
        }
        out
    }
}
