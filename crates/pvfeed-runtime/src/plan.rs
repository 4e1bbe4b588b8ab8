use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use pvfeed_core::types::ImageRecord;

/// All rows of one product, in table order. `store_rows` is uncapped; the
/// per-batch image cap is applied at assembly time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductGroup {
    pub product_id: u64,
    pub label: u32,
    pub store_rows: Vec<u64>,
}

impl ProductGroup {
    pub fn is_single(&self) -> bool {
        self.store_rows.len() == 1
    }
}

/// Group eligibility: `only_single` keeps only single-image products;
/// otherwise single-image products are kept only when `include_singles`.
#[derive(Debug, Clone, Copy)]
pub struct GroupFilter {
    pub only_single: bool,
    pub include_singles: bool,
}

impl GroupFilter {
    pub fn keeps(&self, group: &ProductGroup) -> bool {
        if self.only_single {
            group.is_single()
        } else if group.is_single() {
            self.include_singles
        } else {
            true
        }
    }
}

/// Groups image rows by product id in first-appearance order. When the
/// source table was permuted, that permutation decides both the group order
/// and the row order within each group.
pub fn group_by_product(records: &[ImageRecord]) -> Vec<ProductGroup> {
    let mut slot_of: HashMap<u64, usize> = HashMap::new();
    let mut groups: Vec<ProductGroup> = Vec::new();

    for record in records {
        match slot_of.get(&record.product_id) {
            Some(&slot) => groups[slot].store_rows.push(record.store_row),
            None => {
                slot_of.insert(record.product_id, groups.len());
                groups.push(ProductGroup {
                    product_id: record.product_id,
                    label: record.category_idx,
                    store_rows: vec![record.store_row],
                });
            }
        }
    }

    groups
}

pub fn filter_groups(groups: Vec<ProductGroup>, filter: GroupFilter) -> Vec<ProductGroup> {
    groups.into_iter().filter(|g| filter.keeps(g)).collect()
}

/// Traversal order over `len` groups for one epoch.
///
/// Shuffled orders are seeded with `seed + epoch`, so a run is fully
/// determined by its configured seed yet reshuffles across epochs.
/// Unshuffled orders are the identity on every pass, which is what gives
/// validation feeds a fixed traversal across evaluation calls.
pub fn epoch_order(len: usize, shuffle: bool, seed: u64, epoch: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch));
        order.shuffle(&mut rng);
    }
    order
}
