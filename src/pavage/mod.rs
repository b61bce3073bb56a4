//! Pavage Module
//!
//! The line-oriented brick layout format emitted by the tiling engine:
//! placements, parsing, serialization and cheap single-pass counters.

mod codec;
mod placement;

pub use codec::{
    count_pieces, extract_raw_cost, parse_layout, parse_placement, serialize_layout, ParsedLayout,
    DEFAULT_LABEL,
};
pub use placement::{HexColor, Placement, Rotation, Shape};
