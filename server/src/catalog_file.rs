//! YAML catalog loaded at startup.

use anyhow::{Context, Result};
use packbattle_execution::{MemoryCatalog, PullRateTable};
use packbattle_types::pack::CatalogBox;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct CatalogFile {
    pub boxes: Vec<CatalogBox>,
}

pub fn parse(raw: &str) -> Result<CatalogFile> {
    serde_yaml::from_str(raw).context("invalid catalog yaml")
}

/// Reads and normalizes a catalog file.
///
/// Boxes whose rate tables do not validate are still loaded; every draw from
/// them is rejected until an admin republishes a fixed table.
pub fn load(path: &Path) -> Result<MemoryCatalog> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    let file = parse(&raw)?;
    for catalog_box in &file.boxes {
        let normalized = catalog_box.clone().normalize();
        if let Err(err) = normalized.and_then(|card_box| PullRateTable::from_box(&card_box)) {
            tracing::warn!(box_id = catalog_box.id, error = %err, "catalog box is not drawable");
        }
    }
    let boxes = file.boxes.len();
    let catalog =
        MemoryCatalog::from_catalog_boxes(file.boxes).context("failed to normalize catalog")?;
    tracing::info!(boxes, path = %path.display(), "catalog loaded");
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use packbattle_execution::Catalog;
    use std::io::Write;

    const SAMPLE: &str = r#"
boxes:
  - id: 1
    name: Starter
    price: 10
    cards:
      - provider: manual
        id: 101
        name: Common
        pullRate: 75
        coinValue: 2
        rarity: common
      - provider: scryfall
        id: 102
        name: Foil
        pullRate: 25
        rarity: mythic
        usd: "0.40"
"#;

    #[test]
    fn loads_provider_cards_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let catalog = load(file.path()).unwrap();
        let card_box = catalog.get_box(1).unwrap().unwrap();
        assert_eq!(card_box.cards_per_pack, 1);
        assert_eq!(card_box.cards[0].pull_rate.thousandths(), 75_000);
        assert_eq!(card_box.cards[1].coin_value, 40);
    }

    #[test]
    fn bundled_sample_is_drawable() {
        let file = parse(include_str!("../catalog.yaml")).unwrap();
        assert_eq!(file.boxes.len(), 3);
        for catalog_box in file.boxes {
            let card_box = catalog_box.normalize().unwrap();
            PullRateTable::from_box(&card_box).unwrap();
        }
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = parse("boxes: [{id: nope}]").unwrap_err();
        assert!(err.to_string().contains("invalid catalog yaml"));
    }

    #[test]
    fn undrawable_box_still_loads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.replace("pullRate: 25", "pullRate: 20").as_bytes())
            .unwrap();
        let catalog = load(file.path()).unwrap();
        assert!(catalog.get_box(1).unwrap().is_some());
    }

    #[test]
    fn empty_pack_box_loads_but_is_not_drawable() {
        let raw = SAMPLE.replace("price: 10", "price: 10\n    cardsPerPack: 0");
        let file = parse(&raw).unwrap();
        let card_box = file.boxes[0].clone().normalize().unwrap();
        assert_eq!(card_box.cards_per_pack, 0);
        assert!(matches!(
            PullRateTable::from_box(&card_box),
            Err(packbattle_types::EngineError::InvalidQuantity { quantity: 0, .. })
        ));
    }
}
