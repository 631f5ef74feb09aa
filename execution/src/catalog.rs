//! Catalog boundary.
//!
//! Box configuration is owned outside the engine. The engine only reads it,
//! and every read is followed by validation, so a catalog that serves a
//! broken table blocks the operation instead of skewing draws.

use packbattle_types::pack::{CardBox, CatalogBox};
use packbattle_types::EngineError;
use std::collections::BTreeMap;
use std::sync::RwLock;

pub trait Catalog: Send + Sync {
    fn get_box(&self, box_id: u64) -> Result<Option<CardBox>, EngineError>;
    fn put_box(&self, card_box: CardBox) -> Result<(), EngineError>;
    fn list(&self) -> Result<Vec<CardBox>, EngineError>;
}

#[derive(Default)]
pub struct MemoryCatalog {
    boxes: RwLock<BTreeMap<u64, CardBox>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from provider payloads. Rates are not checked here;
    /// publishing through the engine is what validates.
    pub fn from_catalog_boxes(
        boxes: impl IntoIterator<Item = CatalogBox>,
    ) -> Result<Self, EngineError> {
        let catalog = Self::new();
        for catalog_box in boxes {
            catalog.put_box(catalog_box.normalize()?)?;
        }
        Ok(catalog)
    }
}

impl Catalog for MemoryCatalog {
    fn get_box(&self, box_id: u64) -> Result<Option<CardBox>, EngineError> {
        let boxes = self
            .boxes
            .read()
            .map_err(|_| EngineError::storage("catalog lock poisoned"))?;
        Ok(boxes.get(&box_id).cloned())
    }

    fn put_box(&self, card_box: CardBox) -> Result<(), EngineError> {
        let mut boxes = self
            .boxes
            .write()
            .map_err(|_| EngineError::storage("catalog lock poisoned"))?;
        boxes.insert(card_box.id, card_box);
        Ok(())
    }

    fn list(&self) -> Result<Vec<CardBox>, EngineError> {
        let boxes = self
            .boxes
            .read()
            .map_err(|_| EngineError::storage("catalog lock poisoned"))?;
        Ok(boxes.values().cloned().collect())
    }
}
