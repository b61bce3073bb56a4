//! Stock snapshot consumed by the engine (`briques.txt`).
//!
//! ```text
//! <shapeCount> <colorCount> <lineCount>
//! <width>-<length>[-<hole>]      one per shape
//! <hexNoHash>                    one per color
//! <shapeIdx>/<colorIdx> <price> <stock>
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::stock::StockLevel;

/// Shapes and colors get dense indices in first-seen order; colors are
/// keyed by catalog id. Negative balances are exported as zero.
pub fn render_snapshot(levels: &[StockLevel]) -> String {
    let mut shapes: Vec<String> = Vec::new();
    let mut shape_index: HashMap<String, usize> = HashMap::new();
    let mut colors: Vec<&str> = Vec::new();
    let mut color_index: HashMap<i64, usize> = HashMap::new();
    let mut lines = Vec::with_capacity(levels.len());

    for level in levels {
        let key = level.shape.snapshot_key();
        let s_idx = match shape_index.get(&key) {
            Some(idx) => *idx,
            None => {
                shape_index.insert(key.clone(), shapes.len());
                shapes.push(key);
                shapes.len() - 1
            }
        };
        let c_idx = *color_index.entry(level.color_id).or_insert_with(|| {
            colors.push(level.color.without_hash());
            colors.len() - 1
        });
        lines.push(format!("{}/{} {} {}", s_idx, c_idx, level.unit_price, level.current_stock.max(0)));
    }

    let mut out = String::new();
    let _ = writeln!(out, "{} {} {}", shapes.len(), colors.len(), lines.len());
    for shape in &shapes {
        let _ = writeln!(out, "{shape}");
    }
    for color in &colors {
        let _ = writeln!(out, "{color}");
    }
    for line in &lines {
        let _ = writeln!(out, "{line}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pavage::{HexColor, Shape};

    fn level(item_id: i64, shape: Shape, color_id: i64, hex: &str, price: f64, stock: i64) -> StockLevel {
        StockLevel {
            item_id,
            shape,
            shape_name: String::new(),
            color_id,
            color_name: String::new(),
            color: HexColor::new(hex),
            unit_price: price,
            current_stock: stock,
        }
    }

    #[test]
    fn test_snapshot_layout() {
        let levels = vec![
            level(1, Shape::new(2, 4), 7, "FF0000", 0.25, 120),
            level(2, Shape::new(1, 1), 7, "FF0000", 0.05, -3),
            level(3, Shape::new(2, 4), 9, "00ff00", 0.3, 4),
            level(4, Shape::new(1, 1).with_hole("1"), 9, "00ff00", 0.1, 0),
        ];
        let snapshot = render_snapshot(&levels);
        assert_eq!(
            snapshot,
            "3 2 4\n2-4\n1-1\n1-1-1\nFF0000\n00ff00\n0/0 0.25 120\n1/0 0.05 0\n0/1 0.3 4\n2/1 0.1 0\n"
        );
    }

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(render_snapshot(&[]), "0 0 0\n");
    }
}
