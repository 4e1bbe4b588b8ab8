use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use pvfeed_core::category::CategoryIndex;
use pvfeed_core::types::{ImageRecord, ProductRecord};
use pvfeed_tables::join::join_image_records;
use pvfeed_tables::shuffle::shuffle_records;
use pvfeed_tables::{SampleSet, SplitTable};

use crate::feed::{FeedConfig, VecFeed};
use crate::store::EmbeddingStore;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub batch_size: usize,
    /// Seeded full-row permutation of the joined table before splitting.
    /// `None` keeps table order.
    pub shuffle_seed: Option<u64>,
    /// Seed for the training feed's per-epoch group shuffle.
    pub batch_seed: u64,
    /// Image cap for the training feed. Validation feeds carry their own
    /// fixed caps.
    pub max_images: usize,
    pub prefetch_workers: usize,
    pub max_queue_batches: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            shuffle_seed: None,
            batch_seed: 123,
            max_images: 2,
            prefetch_workers: 4,
            max_queue_batches: 2,
        }
    }
}

/// The three feeds a training run consumes: an endless shuffled training
/// feed, and two finite fixed-order validation feeds split by image count.
pub struct Session {
    pub train: VecFeed,
    pub valid_multi: VecFeed,
    pub valid_single: VecFeed,
    num_classes: u32,
}

impl Session {
    pub fn build(
        products: &[ProductRecord],
        categories: &CategoryIndex,
        split: &SplitTable,
        sample: &SampleSet,
        store: Arc<EmbeddingStore>,
        opts: &SessionOptions,
    ) -> Result<Self> {
        let mut records = join_image_records(products, categories, split, sample)
            .context("joining metadata tables failed")?;
        shuffle_records(&mut records, opts.shuffle_seed);

        // The class count a model head would size to: distinct categories
        // actually present in the sampled table, not the index size.
        let realized_classes = records
            .iter()
            .map(|r| r.category_idx)
            .collect::<HashSet<u32>>()
            .len() as u32;
        let index_classes = categories.num_classes();

        let (train_rows, valid_rows): (Vec<ImageRecord>, Vec<ImageRecord>) =
            records.into_iter().partition(|r| r.train);
        info!(
            train_rows = train_rows.len(),
            valid_rows = valid_rows.len(),
            num_classes = realized_classes,
            index_classes,
            "session tables joined"
        );

        let train = VecFeed::spawn(
            store.clone(),
            &train_rows,
            index_classes,
            FeedConfig {
                batch_size: opts.batch_size,
                shuffle: true,
                seed: opts.batch_seed,
                only_single: false,
                include_singles: true,
                max_images: opts.max_images,
                prefetch_workers: opts.prefetch_workers,
                max_queue_batches: opts.max_queue_batches,
                endless: true,
            },
        )
        .context("spawning training feed failed")?;

        let valid_multi = VecFeed::spawn(
            store.clone(),
            &valid_rows,
            index_classes,
            FeedConfig {
                batch_size: opts.batch_size,
                shuffle: false,
                seed: opts.batch_seed,
                only_single: false,
                include_singles: false,
                max_images: 4,
                prefetch_workers: 1,
                max_queue_batches: opts.max_queue_batches,
                endless: false,
            },
        )
        .context("spawning multi-image validation feed failed")?;

        let valid_single = VecFeed::spawn(
            store,
            &valid_rows,
            index_classes,
            FeedConfig {
                batch_size: opts.batch_size,
                shuffle: false,
                seed: opts.batch_seed,
                only_single: true,
                include_singles: true,
                max_images: 1,
                prefetch_workers: 1,
                max_queue_batches: opts.max_queue_batches,
                endless: false,
            },
        )
        .context("spawning single-image validation feed failed")?;

        info!(
            train_products = train.samples(),
            valid_multi_products = valid_multi.samples(),
            valid_single_products = valid_single.samples(),
            "session feeds started"
        );

        Ok(Self {
            train,
            valid_multi,
            valid_single,
            num_classes: realized_classes,
        })
    }

    /// Realized class count: distinct category indices present in the
    /// sampled, joined table. May be smaller than the category index when
    /// the sample does not touch every category; feeds still validate
    /// labels against the full index size.
    pub fn num_classes(&self) -> u32 {
        self.num_classes
    }

    pub async fn shutdown_all(&mut self) {
        self.train.shutdown().await;
        self.valid_multi.shutdown().await;
        self.valid_single.shutdown().await;
    }
}
