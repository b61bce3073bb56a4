//! Bill of Materials
//!
//! Reduces placements to quantities per `(size, color)`, resolves those
//! groups against the catalog and orders the brick list shown to buyers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

use crate::pavage::{HexColor, Placement, Shape};

pub type ItemId = i64;

/// One `(size, color)` group and how many bricks it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomLine {
    pub shape: Shape,
    pub color: HexColor,
    pub count: u32,
}

/// Quantities per literal `(size, color)` key, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillOfMaterials {
    lines: Vec<BomLine>,
}

impl BillOfMaterials {
    pub fn lines(&self) -> &[BomLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<BomLine> {
        self.lines
    }

    pub fn total_pieces(&self) -> u32 {
        self.lines.iter().map(|l| l.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Catalog reference data needed for resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub shape: Shape,
    pub color_id: i64,
    pub color: HexColor,
    pub unit_price: f64,
}

/// Outcome of mapping a bill of materials onto catalog items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// `(item id, quantity)` in the order items were first resolved.
    pub resolved: Vec<(ItemId, u32)>,
    pub unresolved: Vec<BomLine>,
}

pub fn aggregate(placements: &[Placement]) -> BillOfMaterials {
    let mut index: HashMap<(Shape, HexColor), usize> = HashMap::new();
    let mut lines: Vec<BomLine> = Vec::new();

    for p in placements {
        let key = (p.shape.clone(), p.color.clone());
        match index.get(&key) {
            Some(&i) => lines[i].count += 1,
            None => {
                index.insert(key, lines.len());
                lines.push(BomLine { shape: p.shape.clone(), color: p.color.clone(), count: 1 });
            }
        }
    }

    BillOfMaterials { lines }
}

/// First catalog item with the same hex and the same footprint in either
/// orientation. A hole variant in the layout must match the item's.
pub fn find_item<'a>(catalog: &'a [CatalogItem], shape: &Shape, color: &HexColor) -> Option<&'a CatalogItem> {
    catalog.iter().find(|item| {
        item.color.matches(color)
            && item.shape.fits(shape.width, shape.length)
            && (shape.hole.is_none() || item.shape.hole == shape.hole)
    })
}

pub fn to_catalog_quantities(bom: &BillOfMaterials, catalog: &[CatalogItem]) -> Resolution {
    let mut resolution = Resolution::default();

    for line in bom.lines() {
        match find_item(catalog, &line.shape, &line.color) {
            Some(item) => {
                // 2x4 and 4x2 of one color land on the same item
                match resolution.resolved.iter_mut().find(|(id, _)| *id == item.id) {
                    Some((_, qty)) => *qty += line.count,
                    None => resolution.resolved.push((item.id, line.count)),
                }
            }
            None => {
                warn!("No catalog item for {} {} ({} bricks dropped)", line.shape, line.color, line.count);
                resolution.unresolved.push(line.clone());
            }
        }
    }

    resolution
}

/// Merge several mosaics' bills into the buyer-facing brick list:
/// biggest bricks first, then ascending color.
pub fn order_brick_list<'a>(bills: impl IntoIterator<Item = &'a BillOfMaterials>) -> Vec<BomLine> {
    let mut merged: Vec<BomLine> = Vec::new();
    for bill in bills {
        for line in bill.lines() {
            match merged.iter_mut().find(|m| m.shape == line.shape && m.color == line.color) {
                Some(existing) => existing.count += line.count,
                None => merged.push(line.clone()),
            }
        }
    }
    merged.sort_by(compare_for_assembly);
    merged
}

fn compare_for_assembly(a: &BomLine, b: &BomLine) -> Ordering {
    b.shape
        .area()
        .cmp(&a.shape.area())
        .then_with(|| b.shape.width.cmp(&a.shape.width))
        .then_with(|| a.color.as_str().to_ascii_lowercase().cmp(&b.color.as_str().to_ascii_lowercase()))
        .then_with(|| a.shape.hole.cmp(&b.shape.hole))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pavage::parse_layout;

    fn item(id: ItemId, width: u32, length: u32, hex: &str) -> CatalogItem {
        CatalogItem {
            id,
            shape: Shape::new(width, length),
            color_id: id,
            color: HexColor::new(hex),
            unit_price: 0.1,
        }
    }

    #[test]
    fn test_aggregate_groups_by_literal_key() {
        let layout = parse_layout("x 1\n2x4/ff0000 0 0 0\n2x4/ff0000 0 2 0\n4x2/ff0000 0 4 0\n1x1/00ff00 9 9 0\n");
        let bom = aggregate(&layout.placements);
        assert_eq!(bom.lines().len(), 3);
        assert_eq!(bom.lines()[0].count, 2);
        assert_eq!(bom.lines()[1].shape, Shape::new(4, 2));
        assert_eq!(bom.total_pieces(), 4);
    }

    #[test]
    fn test_resolution_in_either_orientation() {
        let layout = parse_layout("x 1\n2x4/ff0000 0 0 0\n4x2/FF0000 0 4 0\n");
        let bom = aggregate(&layout.placements);
        let catalog = vec![item(7, 4, 2, "#ff0000")];
        let resolution = to_catalog_quantities(&bom, &catalog);
        assert_eq!(resolution.resolved, vec![(7, 2)]);
        assert!(resolution.unresolved.is_empty());
    }

    #[test]
    fn test_unresolvable_group_is_dropped_siblings_resolve() {
        let layout = parse_layout("x 1\n2x4/ff0000 0 0 0\n2x2/00ff00 4 0 0\n2x2/00ff00 6 0 0\n");
        let bom = aggregate(&layout.placements);
        let catalog = vec![item(1, 2, 2, "00ff00"), item(2, 2, 4, "0000ff")];
        let resolution = to_catalog_quantities(&bom, &catalog);
        assert_eq!(resolution.resolved, vec![(1, 2)]);
        assert_eq!(resolution.unresolved.len(), 1);
        assert_eq!(resolution.unresolved[0].color.as_str(), "#ff0000");
    }

    #[test]
    fn test_first_match_wins() {
        let catalog = vec![item(3, 1, 1, "ffffff"), item(4, 1, 1, "ffffff")];
        let found = find_item(&catalog, &Shape::new(1, 1), &HexColor::new("ffffff")).unwrap();
        assert_eq!(found.id, 3);
    }

    #[test]
    fn test_hole_variant_must_match() {
        let mut holed = item(5, 1, 1, "ffffff");
        holed.shape = Shape::new(1, 1).with_hole("1");
        let catalog = vec![item(4, 1, 1, "ffffff"), holed];
        let found = find_item(&catalog, &Shape::new(1, 1).with_hole("1"), &HexColor::new("ffffff")).unwrap();
        assert_eq!(found.id, 5);
    }

    #[test]
    fn test_order_brick_list_sorting() {
        let a = aggregate(&parse_layout("x 1\n1x1/bbbbbb 0 0 0\n2x4/cccccc 0 0 0\n").placements);
        let b = aggregate(&parse_layout("y 1\n2x4/aaaaaa 0 0 0\n1x1/bbbbbb 1 1 0\n2x2/000000 3 3 0\n").placements);
        let list = order_brick_list([&a, &b]);

        let keys: Vec<String> = list.iter().map(|l| format!("{}/{}", l.shape, l.color)).collect();
        assert_eq!(keys, vec!["2x4/#aaaaaa", "2x4/#cccccc", "2x2/#000000", "1x1/#bbbbbb"]);
        assert_eq!(list[3].count, 2);
    }

    #[test]
    fn test_order_brick_list_with_oversized_bricks() {
        let bill = aggregate(&parse_layout("x 1\n1x1/ff0000 0 0 0\n70000x70000/ff0000 2 0 0\n").placements);
        let list = order_brick_list([&bill]);
        assert_eq!(list[0].shape, Shape::new(70000, 70000));
        assert_eq!(list[1].shape, Shape::new(1, 1));
    }
}
