use brick_mosaic::bom::{aggregate, order_brick_list, to_catalog_quantities, CatalogItem};
use brick_mosaic::pavage::{count_pieces, parse_layout, serialize_layout, HexColor, Shape};
use brick_mosaic::plan::project;
use brick_mosaic::pricing::{order_total, price_layout};

const LAYOUT: &str = "\
libre 3.2
2x2/ff0000 0 0 0
2x1/ff0000 2 0 1
1x1/00ff00 3 1 0
garbage line without slash
1x1/00ff00 x 1 0
";

#[test]
fn test_layout_reports_agree() {
    let parsed = parse_layout(LAYOUT);
    assert_eq!(parsed.placements.len(), 3);
    assert_eq!(parsed.skipped, 1);
    // the cheap counter does not validate lines
    assert_eq!(count_pieces(LAYOUT), 4);

    // floor(3.2 * 2 + 5.99) = 12
    assert_eq!(price_layout(LAYOUT).map(|p| p.to_string()), Some("12.99".to_string()));

    let bill = aggregate(&parsed.placements);
    assert_eq!(bill.total_pieces(), 3);

    let catalog = vec![
        CatalogItem { id: 10, shape: Shape::new(2, 2), color_id: 1, color: HexColor::new("FF0000"), unit_price: 0.2 },
        CatalogItem { id: 11, shape: Shape::new(1, 2), color_id: 1, color: HexColor::new("ff0000"), unit_price: 0.1 },
    ];
    let resolution = to_catalog_quantities(&bill, &catalog);
    assert_eq!(resolution.resolved, vec![(10, 1), (11, 1)]);
    assert_eq!(resolution.unresolved.len(), 1);
    assert_eq!(resolution.unresolved[0].color, HexColor::new("00ff00"));
}

#[test]
fn test_plan_covers_rotated_bricks() {
    let parsed = parse_layout(LAYOUT);
    let plan = project(&parsed.placements);
    assert_eq!((plan.width, plan.height), (4, 2));
    assert_eq!(plan.to_text(), "A A A .\nA A A B\n\nA #ff0000\nB #00ff00\n");
}

#[test]
fn test_serialized_layout_prices_the_same() {
    let parsed = parse_layout(LAYOUT);
    let text = serialize_layout("libre", parsed.raw_cost, &parsed.placements);
    assert_eq!(price_layout(&text), price_layout(LAYOUT));
    assert_eq!(count_pieces(&text), parsed.placements.len());
}

#[test]
fn test_order_brick_list_and_total() {
    let first = aggregate(&parse_layout("a 1\n1x1/ff0000 0 0 0\n2x2/ff0000 1 0 0\n").placements);
    let second = aggregate(&parse_layout("b 1\n1x1/ff0000 0 0 0\n").placements);
    let list = order_brick_list([&first, &second]);
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].shape, Shape::new(2, 2));
    assert_eq!(list[1].count, 2);

    let prices: Vec<_> = [LAYOUT, "x 0\n"].iter().filter_map(|t| price_layout(t)).collect();
    // 12.99 + fallback 19.99 + delivery 4.99
    assert_eq!(order_total(&prices).to_string(), "37.97");
}
