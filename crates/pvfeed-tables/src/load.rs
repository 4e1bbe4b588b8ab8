use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use tracing::info;

use pvfeed_core::category::CategoryIndex;
use pvfeed_core::types::ProductRecord;

/// Per-product train/validation membership, keyed by product id.
pub type SplitTable = HashMap<u64, bool>;

/// The designated subset of products a run is restricted to.
pub type SampleSet = HashSet<u64>;

#[derive(Debug, Deserialize)]
struct CategoryRow {
    category_id: u64,
    category_idx: u32,
}

#[derive(Debug, Deserialize)]
struct SplitRow {
    product_id: u64,
    #[serde(deserialize_with = "de_table_bool")]
    train: bool,
}

#[derive(Debug, Deserialize)]
struct ProductIdRow {
    product_id: u64,
}

/// Accepts the boolean spellings that show up in exported tables
/// (`True`/`False`, `true`/`false`, `1`/`0`).
fn de_table_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid boolean value {other:?}"
        ))),
    }
}

/// Loads the product-info table. Row order is significant: it defines the
/// embedding store layout (see `ProductRecord`).
pub fn load_products(path: impl AsRef<Path>) -> Result<Vec<ProductRecord>> {
    let path = path.as_ref();
    let mut reader = ::csv::Reader::from_path(path)
        .with_context(|| format!("open product-info csv failed: {}", path.display()))?;

    let mut products: Vec<ProductRecord> = Vec::new();
    for (i, row) in reader.deserialize::<ProductRecord>().enumerate() {
        let record =
            row.with_context(|| format!("{}: bad product row {}", path.display(), i + 2))?;
        products.push(record);
    }

    info!(
        path = %path.display(),
        products = products.len(),
        "loaded product-info table"
    );
    Ok(products)
}

/// Loads the category-to-index table and validates density.
pub fn load_category_index(path: impl AsRef<Path>) -> Result<CategoryIndex> {
    let path = path.as_ref();
    let mut reader = ::csv::Reader::from_path(path)
        .with_context(|| format!("open category-idx csv failed: {}", path.display()))?;

    let mut pairs: Vec<(u64, u32)> = Vec::new();
    for (i, row) in reader.deserialize::<CategoryRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad category row {}", path.display(), i + 2))?;
        pairs.push((row.category_id, row.category_idx));
    }

    let index = CategoryIndex::from_pairs(pairs)
        .with_context(|| format!("invalid category index: {}", path.display()))?;
    info!(
        path = %path.display(),
        num_classes = index.num_classes(),
        "loaded category index"
    );
    Ok(index)
}

pub fn load_train_split(path: impl AsRef<Path>) -> Result<SplitTable> {
    let path = path.as_ref();
    let mut reader = ::csv::Reader::from_path(path)
        .with_context(|| format!("open train-split csv failed: {}", path.display()))?;

    let mut split: SplitTable = HashMap::new();
    for (i, row) in reader.deserialize::<SplitRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad split row {}", path.display(), i + 2))?;
        split.insert(row.product_id, row.train);
    }

    info!(path = %path.display(), products = split.len(), "loaded train split");
    Ok(split)
}

/// Loads the sample-subset table; only the `product_id` column is read.
pub fn load_sample_set(path: impl AsRef<Path>) -> Result<SampleSet> {
    let path = path.as_ref();
    let mut reader = ::csv::Reader::from_path(path)
        .with_context(|| format!("open sample-prod-info csv failed: {}", path.display()))?;

    let mut sample: SampleSet = HashSet::new();
    for (i, row) in reader.deserialize::<ProductIdRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad sample row {}", path.display(), i + 2))?;
        sample.insert(row.product_id);
    }

    info!(path = %path.display(), products = sample.len(), "loaded sample subset");
    Ok(sample)
}
