use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CategoryIndexError {
    #[error("duplicate category_id {0}")]
    DuplicateCategory(u64),
    #[error("duplicate category_idx {0}")]
    DuplicateIndex(u32),
    #[error("category_idx values must be dense 0..{num_classes}; missing {missing}")]
    NotDense { num_classes: u32, missing: u32 },
    #[error("unknown category_id {0}")]
    UnknownCategory(u64),
    #[error("unknown category_idx {0}")]
    UnknownIndex(u32),
}

/// Bidirectional mapping between raw category ids and dense zero-based
/// class indices. Indices must cover exactly `0..num_classes` with no gaps
/// or duplicates; lookups of unmapped values are errors, not defaults.
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    by_id: HashMap<u64, u32>,
    by_idx: Vec<u64>,
}

impl CategoryIndex {
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (u64, u32)>,
    ) -> Result<Self, CategoryIndexError> {
        let mut by_id: HashMap<u64, u32> = HashMap::new();
        let mut items: Vec<(u32, u64)> = Vec::new();
        for (category_id, category_idx) in pairs {
            if by_id.insert(category_id, category_idx).is_some() {
                return Err(CategoryIndexError::DuplicateCategory(category_id));
            }
            items.push((category_idx, category_id));
        }

        items.sort_by_key(|(idx, _)| *idx);
        let num_classes = items.len() as u32;
        let mut by_idx: Vec<u64> = Vec::with_capacity(items.len());
        for (slot, (idx, category_id)) in items.into_iter().enumerate() {
            let slot = slot as u32;
            if idx == slot {
                by_idx.push(category_id);
            } else if idx < slot {
                return Err(CategoryIndexError::DuplicateIndex(idx));
            } else {
                return Err(CategoryIndexError::NotDense {
                    num_classes,
                    missing: slot,
                });
            }
        }

        Ok(Self { by_id, by_idx })
    }

    pub fn num_classes(&self) -> u32 {
        self.by_idx.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.by_idx.is_empty()
    }

    pub fn to_idx(&self, category_id: u64) -> Result<u32, CategoryIndexError> {
        self.by_id
            .get(&category_id)
            .copied()
            .ok_or(CategoryIndexError::UnknownCategory(category_id))
    }

    pub fn to_category(&self, category_idx: u32) -> Result<u64, CategoryIndexError> {
        self.by_idx
            .get(category_idx as usize)
            .copied()
            .ok_or(CategoryIndexError::UnknownIndex(category_idx))
    }
}
