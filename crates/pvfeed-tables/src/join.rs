use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::warn;

use pvfeed_core::category::CategoryIndex;
use pvfeed_core::types::{ImageRecord, ProductRecord};

use crate::{SampleSet, SplitTable};

/// Joins the product table, category index and split table into one
/// row-per-image table, restricted to products in `sample`.
///
/// The embedding-store row for image `i` of a product is its base offset
/// plus `i`, where base offsets are cumulative image counts over the FULL
/// product table in its original order. Restriction to the sample subset
/// therefore never shifts store rows.
///
/// Unmapped categories fail with a lookup error. Products absent from the
/// split table fall back to validation membership.
pub fn join_image_records(
    products: &[ProductRecord],
    categories: &CategoryIndex,
    split: &SplitTable,
    sample: &SampleSet,
) -> Result<Vec<ImageRecord>> {
    let mut seen: HashSet<u64> = HashSet::with_capacity(products.len());
    let mut records: Vec<ImageRecord> = Vec::new();
    let mut base: u64 = 0;
    let mut missing_split: u64 = 0;

    for product in products {
        anyhow::ensure!(
            seen.insert(product.product_id),
            "duplicate product_id {} in product table",
            product.product_id
        );

        if sample.contains(&product.product_id) {
            let category_idx = categories.to_idx(product.category_id).with_context(|| {
                format!(
                    "product {} references unmapped category",
                    product.product_id
                )
            })?;
            let train = match split.get(&product.product_id) {
                Some(train) => *train,
                None => {
                    missing_split = missing_split.saturating_add(1);
                    false
                }
            };

            for img_idx in 0..product.num_imgs {
                records.push(ImageRecord {
                    product_id: product.product_id,
                    category_idx,
                    img_idx,
                    num_imgs: product.num_imgs,
                    train,
                    store_row: base.saturating_add(u64::from(img_idx)),
                });
            }
        }

        base = base
            .checked_add(u64::from(product.num_imgs))
            .ok_or_else(|| anyhow::anyhow!("store row offset overflow"))?;
    }

    if missing_split > 0 {
        warn!(
            products = missing_split,
            "products missing from split table; treated as validation"
        );
    }

    Ok(records)
}
