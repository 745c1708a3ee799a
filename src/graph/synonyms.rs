use std::collections::BTreeMap;

use super::{ExtractedEntity, Relation};

/// Surface name -> canonical name, built once per normalization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynonymMap {
    map: BTreeMap<String, String>,
}

impl SynonymMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every temp name and alias that differs from its canonical name.
    /// A surface name declared twice keeps its last mapping.
    pub fn from_entities(entities: &[ExtractedEntity]) -> Self {
        let mut synonyms = Self::new();
        for extracted in entities {
            for surface in &extracted.surface_names {
                synonyms.insert(surface, &extracted.entity.canonical_name);
            }
        }
        synonyms
    }

    pub fn insert(&mut self, surface: &str, canonical: &str) {
        if surface != canonical {
            self.map.insert(surface.to_string(), canonical.to_string());
        }
    }

    /// Canonical name for `name`; unmapped names pass through.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.map.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn rewrite(&self, relation: &mut Relation) {
        relation.head = self.resolve(&relation.head).to_string();
        relation.tail = self.resolve(&relation.tail).to_string();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
