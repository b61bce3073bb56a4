//! Pavage text codec
//!
//! Line 0 carries `<label> <rawCost>`; each following line containing a
//! `/` is one brick: `<W>x<L>/<hex> <x> <y> <rotation>`. Malformed brick
//! lines are skipped and counted, never rejected.

use serde::{Deserialize, Serialize};

use super::placement::{HexColor, Placement, Rotation, Shape};

/// Label written when serializing a layout that carried none.
pub const DEFAULT_LABEL: &str = "pavage";

/// Result of a tolerant parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLayout {
    pub label: Option<String>,
    /// Engine cost; `0.0` when missing or unparsable.
    pub raw_cost: f64,
    pub placements: Vec<Placement>,
    /// Lines that looked like bricks but could not be decoded.
    pub skipped: usize,
}

impl ParsedLayout {
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn to_pavage(&self) -> String {
        serialize_layout(self.label.as_deref().unwrap_or(DEFAULT_LABEL), self.raw_cost, &self.placements)
    }
}

pub fn parse_layout(text: &str) -> ParsedLayout {
    let raw_cost = extract_raw_cost(text);
    let label = text
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.contains('/'))
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_string);

    let mut placements = Vec::new();
    let mut skipped = 0;

    for line in text.lines().map(str::trim) {
        if line.is_empty() || !line.contains('/') {
            continue;
        }
        match parse_placement(line) {
            Some(placement) => placements.push(placement),
            None => skipped += 1,
        }
    }

    ParsedLayout { label, raw_cost, placements, skipped }
}

/// Decode one brick line, `None` when it is malformed.
pub fn parse_placement(line: &str) -> Option<Placement> {
    let mut tokens = line.split_whitespace();
    let (size, color) = tokens.next()?.split_once('/')?;
    if color.is_empty() || color == "#" {
        return None;
    }
    let shape = Shape::parse_size(size)?;
    let x: i32 = tokens.next()?.parse().ok()?;
    let y: i32 = tokens.next()?.parse().ok()?;
    let rotation = match tokens.next() {
        Some(flag) => Rotation::from_flag(flag.parse().ok()?)?,
        None => Rotation::Upright,
    };

    Some(Placement { shape, color: HexColor::new(color), x, y, rotation })
}

pub fn serialize_layout(label: &str, raw_cost: f64, placements: &[Placement]) -> String {
    let mut out = format!("{} {}\n", label, raw_cost);
    for p in placements {
        out.push_str(&format!(
            "{}/{} {} {} {}\n",
            p.shape,
            p.color.without_hash(),
            p.x,
            p.y,
            p.rotation.flag()
        ));
    }
    out
}

/// Number of non-blank lines containing `/`, without decoding them.
pub fn count_pieces(text: &str) -> usize {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains('/'))
        .count()
}

/// Cost token of line 0; extra tokens are ignored.
pub fn extract_raw_cost(text: &str) -> f64 {
    text.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|token| token.parse::<f64>().ok())
        .filter(|cost| cost.is_finite())
        .unwrap_or(0.0)
}
