//! Configuration blocks: the on-disk/on-wire unit of a store's item
//! definitions, keyed by the UUID the daemon minted for itself the first
//! time it ran.

use std::collections::BTreeMap;

use mktl_core::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provenance::ProvenanceStratum;

/// Per-item configuration metadata: datatype, description, units, and
/// whatever else a store's configuration file declares for that key. Kept
/// as an open map rather than a fixed struct because the set of fields is
/// defined by each store, not by the protocol itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl ItemConfig {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }
}

/// A complete configuration block for one store: its identity, the
/// provenance chain it was received over, and the per-item metadata for
/// every key it declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub uuid: Uuid,
    pub store: String,
    #[serde(default)]
    pub provenance: Vec<ProvenanceStratum>,
    #[serde(default)]
    pub items: BTreeMap<String, ItemConfig>,
}

impl Block {
    pub fn new(uuid: Uuid, store: impl Into<String>) -> Self {
        Self {
            uuid,
            store: store.into(),
            provenance: Vec::new(),
            items: BTreeMap::new(),
        }
    }

    /// Item keys are always lowercased on ingress; this enforces that
    /// invariant for blocks built up programmatically rather than loaded
    /// from a file that has already been through [`crate::file::load_daemon`].
    pub fn insert_item(&mut self, key: impl Into<String>, config: ItemConfig) {
        self.items.insert(key.into().to_lowercase(), config);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(|k| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_item_lowercases_key() {
        let mut block = Block::new(Uuid::nil(), "mystore");
        block.insert_item("TEMP", ItemConfig::default().with_field("datatype", "float"));
        assert!(block.items.contains_key("temp"));
        assert!(!block.items.contains_key("TEMP"));
    }

    #[test]
    fn block_roundtrips_through_json() {
        let mut block = Block::new(Uuid::nil(), "mystore");
        block.insert_item("temp", ItemConfig::default().with_field("units", "K"));
        let raw = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&raw).unwrap();
        assert_eq!(block, back);
    }
}
