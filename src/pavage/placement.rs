use serde::{Deserialize, Serialize};
use std::fmt;

/// Brick footprint in studs, with the optional hole variant of the part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Shape {
    pub width: u32,
    pub length: u32,
    pub hole: Option<String>,
}

impl Shape {
    pub fn new(width: u32, length: u32) -> Self {
        Self { width, length, hole: None }
    }

    pub fn with_hole(mut self, hole: impl Into<String>) -> Self {
        self.hole = Some(hole.into());
        self
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.length)
    }

    /// True when `width x length` equals this shape in either orientation.
    pub fn fits(&self, width: u32, length: u32) -> bool {
        (self.width == width && self.length == length) || (self.width == length && self.length == width)
    }

    /// Parse the `WxL` or `WxL-hole` size token of a layout line.
    pub fn parse_size(token: &str) -> Option<Self> {
        let (width, rest) = token.split_once('x')?;
        let (length, hole) = match rest.split_once('-') {
            Some((length, hole)) if !hole.is_empty() => (length, Some(hole.to_string())),
            Some(_) => return None,
            None => (rest, None),
        };
        let width: u32 = width.trim().parse().ok()?;
        let length: u32 = length.trim().parse().ok()?;
        if width == 0 || length == 0 {
            return None;
        }
        Some(Self { width, length, hole })
    }

    /// `W-L[-hole]`, the shape notation of the stock snapshot file.
    pub fn snapshot_key(&self) -> String {
        match &self.hole {
            Some(hole) => format!("{}-{}-{}", self.width, self.length, hole),
            None => format!("{}-{}", self.width, self.length),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hole {
            Some(hole) => write!(f, "{}x{}-{}", self.width, self.length, hole),
            None => write!(f, "{}x{}", self.width, self.length),
        }
    }
}

/// RGB color as `#rrggbb`. The leading `#` is always present once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HexColor(String);

impl HexColor {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with('#') {
            Self(raw.to_string())
        } else {
            Self(format!("#{raw}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn without_hash(&self) -> &str {
        &self.0[1..]
    }

    /// Case-insensitive comparison, the way catalog hex values are matched.
    pub fn matches(&self, other: &HexColor) -> bool {
        self.without_hash().eq_ignore_ascii_case(other.without_hash())
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Upright,
    Rotated,
}

impl Rotation {
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Rotation::Upright),
            1 => Some(Rotation::Rotated),
            _ => None,
        }
    }

    pub fn flag(&self) -> u8 {
        match self {
            Rotation::Upright => 0,
            Rotation::Rotated => 1,
        }
    }
}

/// One brick of a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub shape: Shape,
    pub color: HexColor,
    pub x: i32,
    pub y: i32,
    pub rotation: Rotation,
}

impl Placement {
    /// Occupied `(width, height)` in grid cells; rotation swaps the axes.
    pub fn footprint(&self) -> (u32, u32) {
        match self.rotation {
            Rotation::Upright => (self.shape.width, self.shape.length),
            Rotation::Rotated => (self.shape.length, self.shape.width),
        }
    }

    /// Exclusive far corner `(x + width, y + height)`, `None` when it does
    /// not fit in grid coordinates.
    pub fn far_corner(&self) -> Option<(i32, i32)> {
        let (w, h) = self.footprint();
        let x_end = self.x.checked_add(i32::try_from(w).ok()?)?;
        let y_end = self.y.checked_add(i32::try_from(h).ok()?)?;
        Some((x_end, y_end))
    }

    /// Every `(x, y)` cell covered by this brick. Empty when the brick
    /// extends past the grid coordinate range.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let (x_end, y_end) = self.far_corner().unwrap_or((self.x, self.y));
        (self.y..y_end).flat_map(move |y| (self.x..x_end).map(move |x| (x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(Shape::parse_size("2x4"), Some(Shape::new(2, 4)));
        assert_eq!(Shape::parse_size("1x1-1"), Some(Shape::new(1, 1).with_hole("1")));
        assert_eq!(Shape::parse_size("2by4"), None);
        assert_eq!(Shape::parse_size("0x4"), None);
        assert_eq!(Shape::parse_size("2x"), None);
        assert_eq!(Shape::parse_size("2x4-"), None);
    }

    #[test]
    fn test_shape_fits_both_orientations() {
        let shape = Shape::new(2, 4);
        assert!(shape.fits(2, 4));
        assert!(shape.fits(4, 2));
        assert!(!shape.fits(2, 2));
    }

    #[test]
    fn test_snapshot_key() {
        assert_eq!(Shape::new(2, 4).snapshot_key(), "2-4");
        assert_eq!(Shape::new(1, 1).with_hole("1").snapshot_key(), "1-1-1");
    }

    #[test]
    fn test_color_normalization() {
        let color = HexColor::new("ff0000");
        assert_eq!(color.as_str(), "#ff0000");
        assert_eq!(color.without_hash(), "ff0000");
        assert_eq!(HexColor::new("#ff0000"), color);
        assert!(HexColor::new("FF0000").matches(&color));
    }

    #[test]
    fn test_rotated_footprint_and_cells() {
        let placement = Placement {
            shape: Shape::new(1, 3),
            color: HexColor::new("00ff00"),
            x: 5,
            y: 2,
            rotation: Rotation::Rotated,
        };
        assert_eq!(placement.footprint(), (3, 1));
        let cells: Vec<_> = placement.cells().collect();
        assert_eq!(cells, vec![(5, 2), (6, 2), (7, 2)]);
        assert_eq!(placement.far_corner(), Some((8, 3)));
    }

    #[test]
    fn test_huge_dimensions_do_not_overflow() {
        let shape = Shape::parse_size("70000x70000").unwrap();
        assert_eq!(shape.area(), 4_900_000_000);

        let placement = Placement {
            shape: Shape::new(3_000_000_000, 1),
            color: HexColor::new("ff0000"),
            x: 0,
            y: 0,
            rotation: Rotation::Upright,
        };
        assert_eq!(placement.far_corner(), None);
        assert_eq!(placement.cells().count(), 0);

        let near_edge = Placement { shape: Shape::new(2, 1), x: i32::MAX - 1, ..placement };
        assert_eq!(near_edge.far_corner(), None);
    }
}
