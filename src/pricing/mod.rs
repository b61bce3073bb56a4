//! Pricing Engine
//!
//! Raw engine cost to customer price. Pure: no storage access, so a fresh
//! layout and a persisted one always price identically.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use crate::pavage::extract_raw_cost;

/// Coefficient applied to the raw cost.
pub const MARGIN_COEFF: f64 = 2.0;
/// Fixed order preparation and handling fee.
pub const HANDLING_FEE: f64 = 5.99;
/// Price used when the engine could not determine a cost.
pub const FALLBACK_PRICE: Price = Price::from_cents(1999);
/// Standard shipping cost added once per order.
pub const DELIVERY_FEE: Price = Price::from_cents(499);
/// Largest whole-unit amount whose `.99` price still fits in cents.
const MAX_PRICE_UNITS: i64 = (i64::MAX - 99) / 100;

/// Money amount held in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Price {
    cents: i64,
}

impl Price {
    pub const ZERO: Price = Price::from_cents(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    pub fn as_f64(&self) -> f64 {
        self.cents as f64 / 100.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Price {
    type Output = Price;

    fn add(self, rhs: Price) -> Price {
        Price::from_cents(self.cents.saturating_add(rhs.cents))
    }
}

impl Sum for Price {
    fn sum<I: Iterator<Item = Price>>(iter: I) -> Price {
        iter.fold(Price::ZERO, Add::add)
    }
}

/// `floor(raw * MARGIN_COEFF + HANDLING_FEE) + 0.99`, or the fallback
/// price when the cost is unknown (non-positive). Costs beyond the
/// representable range price at the ceiling, still ending in `.99`.
pub fn price(raw_cost: f64) -> Price {
    if raw_cost.is_nan() || raw_cost <= 0.0 {
        return FALLBACK_PRICE;
    }
    // `as` saturates on out-of-range floats
    let units = ((raw_cost * MARGIN_COEFF + HANDLING_FEE).floor() as i64).min(MAX_PRICE_UNITS);
    Price::from_cents(units * 100 + 99)
}

/// Price of a layout text; `None` for an empty text so callers can render
/// a placeholder.
pub fn price_layout(text: &str) -> Option<Price> {
    if text.trim().is_empty() {
        return None;
    }
    Some(price(extract_raw_cost(text)))
}

pub fn order_total(prices: &[Price]) -> Price {
    prices.iter().copied().sum::<Price>() + DELIVERY_FEE
}
