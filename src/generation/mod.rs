//! Generation Orchestrator
//!
//! Drives the external tiling engine for one image: snapshot the stock,
//! run the engine under an exclusive cross-process lock, collect the
//! per-style artifacts and clean up after every run.

mod artifacts;
mod cache;
mod engine;
mod lock;
mod orchestrator;
mod snapshot;

pub use artifacts::{collect_artifacts, data_uri, parse_inventory_count, remove_run_files, CollectedArtifacts};
pub use cache::GenerationCache;
pub use engine::{factory_balance, operator_message, EngineRun, ProcessEngine, ReplenishCommand, TilingEngine};
pub use lock::{GenerationLock, LockGuard};
pub use orchestrator::GenerationOrchestrator;
pub use snapshot::render_snapshot;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pavage::count_pieces;
use crate::pricing::{price_layout, Price};

/// Tiling objective behind one engine output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleVariant {
    /// Fewest pieces
    Balanced,
    /// Cheapest
    Economic,
    /// Only bricks currently in stock
    WarehouseOnly,
    /// Unconstrained tiling
    Reinforced,
}

impl StyleVariant {
    pub const ALL: [StyleVariant; 4] = [
        StyleVariant::Balanced,
        StyleVariant::Economic,
        StyleVariant::WarehouseOnly,
        StyleVariant::Reinforced,
    ];

    pub fn as_key(&self) -> &'static str {
        match self {
            StyleVariant::Balanced => "balanced",
            StyleVariant::Economic => "economic",
            StyleVariant::WarehouseOnly => "warehouse_only",
            StyleVariant::Reinforced => "reinforced",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|style| style.as_key() == key)
    }

    /// Style of an engine output file, by first matching marker in its name.
    /// Anything unmarked (including `libre`) is the unconstrained tiling.
    pub fn classify(file_name: &str) -> Self {
        let name = file_name.to_lowercase();
        if name.contains("minimisation") {
            StyleVariant::Balanced
        } else if name.contains("rentabilite") || name.contains("rentable") {
            StyleVariant::Economic
        } else if name.contains("stock") {
            StyleVariant::WarehouseOnly
        } else {
            StyleVariant::Reinforced
        }
    }
}

impl fmt::Display for StyleVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// Whatever the engine produced for one style. Every part is optional:
/// a failed sub-objective degrades to a partial result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    /// `data:<mime>;base64,...`
    pub preview: Option<String>,
    pub layout: Option<String>,
    /// Total reported by the engine's inventory file.
    pub inventory_count: Option<u32>,
}

impl VariantResult {
    pub fn is_empty(&self) -> bool {
        self.preview.is_none() && self.layout.is_none() && self.inventory_count.is_none()
    }

    /// Engine-reported total when present, otherwise counted from the layout.
    pub fn piece_count(&self) -> usize {
        match (self.inventory_count, &self.layout) {
            (Some(count), _) => count as usize,
            (None, Some(layout)) => count_pieces(layout),
            (None, None) => 0,
        }
    }

    pub fn price(&self) -> Option<Price> {
        self.layout.as_deref().and_then(price_layout)
    }
}

/// Lifecycle of one generation run, logged at every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationPhase {
    Idle,
    LockAcquired,
    SnapshotWritten,
    EngineRunning,
    ResultsCollected,
    CleanedUp,
    Failed,
}

/// Outcome of `GenerationOrchestrator::generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub image_id: i64,
    pub run_id: String,
    pub variants: BTreeMap<StyleVariant, VariantResult>,
    /// Exit status of the engine; `None` when served from the cache.
    pub engine_status: Option<i32>,
    pub cached: bool,
    /// Phases the producing run went through.
    pub phases: Vec<GenerationPhase>,
}

/// A style as shown to a customer: preview, price and piece count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleOffer {
    pub style: StyleVariant,
    pub preview: Option<String>,
    pub price: Option<Price>,
    pub pieces: usize,
}

impl GenerationReport {
    pub fn variant(&self, style: StyleVariant) -> Option<&VariantResult> {
        self.variants.get(&style)
    }

    pub fn offers(&self) -> Vec<StyleOffer> {
        self.variants
            .iter()
            .map(|(style, result)| StyleOffer {
                style: *style,
                preview: result.preview.clone(),
                price: result.price(),
                pieces: result.piece_count(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_precedence() {
        assert_eq!(StyleVariant::classify("image_3_minimisation.png"), StyleVariant::Balanced);
        assert_eq!(StyleVariant::classify("image_3_rentabilite.txt"), StyleVariant::Economic);
        assert_eq!(StyleVariant::classify("image_3_rentable.txt"), StyleVariant::Economic);
        assert_eq!(StyleVariant::classify("image_3_stock.txt"), StyleVariant::WarehouseOnly);
        assert_eq!(StyleVariant::classify("image_3_libre.png"), StyleVariant::Reinforced);
        assert_eq!(StyleVariant::classify("image_3.png"), StyleVariant::Reinforced);
        // first marker wins
        assert_eq!(StyleVariant::classify("minimisation_stock.txt"), StyleVariant::Balanced);
        assert_eq!(StyleVariant::classify("rentable_stock.txt"), StyleVariant::Economic);
    }

    #[test]
    fn test_style_keys() {
        for style in StyleVariant::ALL {
            assert_eq!(StyleVariant::from_key(style.as_key()), Some(style));
        }
        assert_eq!(StyleVariant::from_key("libre"), None);
    }

    #[test]
    fn test_piece_count_prefers_inventory() {
        let layout = "x 1\n1x1/ff0000 0 0 0\n1x1/ff0000 1 0 0\n".to_string();
        let mut result = VariantResult { layout: Some(layout), ..Default::default() };
        assert_eq!(result.piece_count(), 2);
        result.inventory_count = Some(40);
        assert_eq!(result.piece_count(), 40);
        assert_eq!(VariantResult::default().piece_count(), 0);
        assert!(VariantResult::default().is_empty());
    }

    #[test]
    fn test_offers() {
        let mut variants = BTreeMap::new();
        variants.insert(
            StyleVariant::Economic,
            VariantResult { layout: Some("x 10\n1x1/ff0000 0 0 0\n".into()), ..Default::default() },
        );
        variants.insert(
            StyleVariant::Balanced,
            VariantResult { preview: Some("data:image/png;base64,AA==".into()), ..Default::default() },
        );
        let report = GenerationReport {
            image_id: 1,
            run_id: "r".into(),
            variants,
            engine_status: Some(0),
            cached: false,
            phases: Vec::new(),
        };
        let offers = report.offers();
        assert_eq!(offers[0].style, StyleVariant::Balanced);
        assert_eq!(offers[0].price, None);
        assert_eq!(offers[1].price.map(|p| p.to_string()), Some("25.99".to_string()));
        assert_eq!(offers[1].pieces, 1);
    }
}
