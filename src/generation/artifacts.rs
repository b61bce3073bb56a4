//! Engine output collection
//!
//! Every file in the output directory whose name contains the run id
//! belongs to that run. Each is read, classified and then removed.

use std::collections::BTreeMap;
use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use regex::Regex;
use tokio::fs;
use tracing::{debug, warn};

use super::{StyleVariant, VariantResult};
use crate::error::Result;

lazy_static::lazy_static! {
    static ref INVENTORY_TOTAL: Regex = Regex::new(r"Total de briques\s*:\s*(\d+)").expect("valid inventory pattern");
}

#[derive(Debug, Default)]
pub struct CollectedArtifacts {
    pub variants: BTreeMap<StyleVariant, VariantResult>,
    pub files_removed: usize,
}

impl CollectedArtifacts {
    /// True when the run produced nothing usable at all.
    pub fn is_empty(&self) -> bool {
        self.variants.values().all(VariantResult::is_empty)
    }
}

pub fn parse_inventory_count(text: &str) -> Option<u32> {
    INVENTORY_TOTAL.captures(text).and_then(|caps| caps[1].parse().ok())
}

fn image_mime(extension: &str) -> Option<&'static str> {
    match extension {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

/// Engine reports are not always UTF-8 (Latin-1 accents in the inventory).
async fn read_text_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read and remove every artifact of `run_id` in `output_dir`.
pub async fn collect_artifacts(output_dir: &Path, run_id: &str) -> Result<CollectedArtifacts> {
    let mut collected = CollectedArtifacts::default();
    let mut entries = fs::read_dir(output_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.contains(run_id) {
            continue;
        }
        let path = entry.path();
        let style = StyleVariant::classify(&file_name);
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let result = collected.variants.entry(style).or_default();
        if file_name.contains("inventory") {
            let text = read_text_lossy(&path).await?;
            match parse_inventory_count(&text) {
                Some(count) => result.inventory_count = Some(count),
                None => warn!("Inventory file {} has no brick total", file_name),
            }
        } else if extension == "txt" {
            result.layout = Some(read_text_lossy(&path).await?);
        } else if let Some(mime) = image_mime(&extension) {
            let bytes = fs::read(&path).await?;
            if !bytes.is_empty() {
                result.preview = Some(data_uri(mime, &bytes));
            }
        } else {
            debug!("Ignoring unrecognised artifact {}", file_name);
        }

        fs::remove_file(&path).await?;
        collected.files_removed += 1;
    }

    collected.variants.retain(|_, result| !result.is_empty());
    Ok(collected)
}

/// Best-effort synchronous sweep used on failure and cancellation paths.
pub fn remove_run_files(dir: &Path, run_id: &str) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().contains(run_id) {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_inventory_count() {
        assert_eq!(parse_inventory_count("Resume\nTotal de briques : 412\n"), Some(412));
        assert_eq!(parse_inventory_count("Total de briques:7"), Some(7));
        assert_eq!(parse_inventory_count("Total: 7"), None);
    }

    #[tokio::test]
    async fn test_collect_classifies_and_removes() {
        let dir = tempdir().unwrap();
        let run = "image_4_abc";
        let write = |name: &str, body: &[u8]| std::fs::write(dir.path().join(name), body).unwrap();
        write(&format!("{run}_minimisation.txt"), b"m 3\n1x1/ff0000 0 0 0\n");
        write(&format!("{run}_minimisation.png"), b"\x89PNG");
        write(&format!("{run}_minimisation_inventory.log"), b"Total de briques : 1\n");
        write(&format!("{run}_rentable.txt"), b"r 2\n");
        write(&format!("{run}_libre.jpg"), b"jpg");
        write("image_4_other_stock.txt", b"not ours");

        let collected = collect_artifacts(dir.path(), run).await.unwrap();
        assert_eq!(collected.files_removed, 5);

        let balanced = &collected.variants[&StyleVariant::Balanced];
        assert!(balanced.layout.as_deref().unwrap().starts_with("m 3"));
        assert!(balanced.preview.as_deref().unwrap().starts_with("data:image/png;base64,"));
        assert_eq!(balanced.inventory_count, Some(1));
        assert!(collected.variants[&StyleVariant::Economic].preview.is_none());
        assert!(collected.variants[&StyleVariant::Reinforced]
            .preview
            .as_deref()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
        assert!(!collected.variants.contains_key(&StyleVariant::WarehouseOnly));

        let left: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().map(|e| e.file_name()).collect();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn test_collect_nothing() {
        let dir = tempdir().unwrap();
        let collected = collect_artifacts(dir.path(), "image_1_x").await.unwrap();
        assert!(collected.is_empty());
        assert_eq!(remove_run_files(dir.path(), "image_1_x"), 0);
    }

    #[tokio::test]
    async fn test_collect_latin1_inventory() {
        let dir = tempdir().unwrap();
        let run = "image_9_lat";
        std::fs::write(dir.path().join(format!("{run}_rentable.txt")), b"r 2\n1x1/ff0000 0 0 0\n").unwrap();
        std::fs::write(
            dir.path().join(format!("{run}_rentable_inventory.log")),
            b"R\xe9sum\xe9\nTotal de briques : 1\n",
        )
        .unwrap();

        let collected = collect_artifacts(dir.path(), run).await.unwrap();
        assert_eq!(collected.files_removed, 2);
        let economic = &collected.variants[&StyleVariant::Economic];
        assert!(economic.layout.as_deref().unwrap().starts_with("r 2"));
        assert_eq!(economic.inventory_count, Some(1));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
