use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

use pvfeed_core::types::ImageRecord;
use pvfeed_observe::metrics::{Counter, DurationAgg, Gauge, ScopedTimer};

use crate::plan::{epoch_order, filter_groups, group_by_product, GroupFilter, ProductGroup};
use crate::store::EmbeddingStore;
use crate::types::{VecBatch, AUX_WIDTH};

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub batch_size: usize,
    /// Reshuffle group order each epoch, seeded by `seed + epoch`.
    pub shuffle: bool,
    pub seed: u64,
    pub only_single: bool,
    pub include_singles: bool,
    /// Cap on images taken per product per batch; the first N rows in table
    /// order are taken.
    pub max_images: usize,
    /// Concurrent assembly tasks running ahead of the consumer. `0` and `1`
    /// both assemble sequentially in the producer task.
    pub prefetch_workers: usize,
    /// Depth of the delivery queue between producer and consumer.
    pub max_queue_batches: usize,
    /// Endless feeds loop epochs forever (training); finite feeds deliver
    /// exactly one pass and close (validation).
    pub endless: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            shuffle: false,
            seed: 123,
            only_single: false,
            include_singles: true,
            max_images: 2,
            prefetch_workers: 0,
            max_queue_batches: 2,
            endless: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct FeedMetrics {
    pub emitted_batches_total: Counter,
    pub emitted_products_total: Counter,
    pub queue_depth: Gauge,
    pub queue_depth_high_water: Gauge,
    pub epoch: Gauge,
    pub store_read: DurationAgg,
}

/// A running batch feed: a producer task streaming `VecBatch`es over a
/// bounded channel, with optional read-ahead workers.
#[derive(Debug)]
pub struct VecFeed {
    rx: Option<mpsc::Receiver<VecBatch>>,
    producer: Option<JoinHandle<Result<()>>>,
    metrics: Arc<FeedMetrics>,
    samples: usize,
    batch_size: usize,
    num_classes: u32,
}

impl VecFeed {
    /// Groups and filters `records`, validates them against the store, and
    /// spawns the producer. Must be called inside a tokio runtime.
    pub fn spawn(
        store: Arc<EmbeddingStore>,
        records: &[ImageRecord],
        num_classes: u32,
        cfg: FeedConfig,
    ) -> Result<Self> {
        anyhow::ensure!(cfg.batch_size > 0, "batch_size must be > 0");
        anyhow::ensure!(cfg.max_images > 0, "max_images must be > 0");

        let groups = filter_groups(
            group_by_product(records),
            GroupFilter {
                only_single: cfg.only_single,
                include_singles: cfg.include_singles,
            },
        );

        for group in &groups {
            anyhow::ensure!(
                group.label < num_classes,
                "product {} has class index {} >= num_classes {}",
                group.product_id,
                group.label,
                num_classes
            );
            for &row in &group.store_rows {
                anyhow::ensure!(
                    row < store.rows() as u64,
                    "product {} references embedding row {} beyond store ({} rows)",
                    group.product_id,
                    row,
                    store.rows()
                );
            }
        }

        let samples = groups.len();
        let batch_size = cfg.batch_size;
        let (tx, rx) = mpsc::channel::<VecBatch>(cfg.max_queue_batches.max(1));
        let metrics = Arc::new(FeedMetrics::default());

        let producer = tokio::spawn(produce_batches(
            store,
            groups,
            cfg,
            tx,
            metrics.clone(),
        ));

        Ok(Self {
            rx: Some(rx),
            producer: Some(producer),
            metrics,
            samples,
            batch_size,
            num_classes,
        })
    }

    /// Filtered group (product) count; the `samples` figure steps-per-epoch
    /// is computed from.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Batches per epoch. Zero when the filtered group list is empty; the
    /// caller guards before dividing by it.
    pub fn num_batches(&self) -> usize {
        self.samples.div_ceil(self.batch_size)
    }

    pub fn num_classes(&self) -> u32 {
        self.num_classes
    }

    pub fn metrics(&self) -> Arc<FeedMetrics> {
        self.metrics.clone()
    }

    /// Awaits the next ready batch. Returns `None` once a finite feed is
    /// drained; a producer failure surfaces here as the error.
    pub async fn next_batch(&mut self) -> Result<Option<VecBatch>> {
        let Some(rx) = self.rx.as_mut() else {
            return Ok(None);
        };
        match rx.recv().await {
            Some(batch) => {
                self.metrics.queue_depth.sub(1);
                Ok(Some(batch))
            }
            None => {
                self.rx = None;
                if let Some(producer) = self.producer.take() {
                    producer.await.map_err(anyhow::Error::from)??;
                }
                Ok(None)
            }
        }
    }

    /// Stops the feed: pending and future batches are dropped, the producer
    /// and its workers are cancelled and joined. Idempotent; safe to call
    /// when nothing was ever started or after the feed drained on its own.
    pub async fn shutdown(&mut self) {
        self.rx = None;
        if let Some(producer) = self.producer.take() {
            producer.abort();
            let _ = producer.await;
        }
        debug!("feed shut down");
    }
}

async fn produce_batches(
    store: Arc<EmbeddingStore>,
    groups: Vec<ProductGroup>,
    cfg: FeedConfig,
    tx: mpsc::Sender<VecBatch>,
    metrics: Arc<FeedMetrics>,
) -> Result<()> {
    if groups.is_empty() {
        debug!("no groups after filtering; feed closes with zero batches");
        return Ok(());
    }

    let groups = Arc::new(groups);
    let mut epoch: u64 = 0;
    loop {
        metrics.epoch.set(epoch);
        let order = epoch_order(groups.len(), cfg.shuffle, cfg.seed, epoch);

        let delivered = if cfg.prefetch_workers <= 1 {
            produce_epoch_sequential(&store, &groups, &order, &cfg, &tx, &metrics).await?
        } else {
            produce_epoch_prefetched(&store, &groups, &order, &cfg, &tx, &metrics).await?
        };
        if !delivered {
            debug!("consumer dropped; stopping feed");
            return Ok(());
        }

        if !cfg.endless {
            return Ok(());
        }
        epoch = epoch.wrapping_add(1);
    }
}

/// Returns false when the consumer went away mid-epoch.
async fn produce_epoch_sequential(
    store: &Arc<EmbeddingStore>,
    groups: &Arc<Vec<ProductGroup>>,
    order: &[usize],
    cfg: &FeedConfig,
    tx: &mpsc::Sender<VecBatch>,
    metrics: &Arc<FeedMetrics>,
) -> Result<bool> {
    for chunk in order.chunks(cfg.batch_size) {
        let batch_groups: Vec<ProductGroup> =
            chunk.iter().map(|&slot| groups[slot].clone()).collect();
        let store = store.clone();
        let max_images = cfg.max_images;
        let read_metrics = metrics.clone();
        let batch = tokio::task::spawn_blocking(move || {
            assemble_batch(&store, &batch_groups, max_images, &read_metrics)
        })
        .await
        .map_err(anyhow::Error::from)??;

        if !send_batch(tx, metrics, batch).await {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Up to `prefetch_workers` assembly tasks run ahead; a reorder buffer
/// keeps delivery order identical to plan order even when later batches
/// finish first.
async fn produce_epoch_prefetched(
    store: &Arc<EmbeddingStore>,
    groups: &Arc<Vec<ProductGroup>>,
    order: &[usize],
    cfg: &FeedConfig,
    tx: &mpsc::Sender<VecBatch>,
    metrics: &Arc<FeedMetrics>,
) -> Result<bool> {
    let mut chunks = order.chunks(cfg.batch_size).map(|c| c.to_vec());
    let mut joinset: JoinSet<(usize, Result<VecBatch>)> = JoinSet::new();
    let mut buffer: BTreeMap<usize, VecBatch> = BTreeMap::new();
    let mut next_to_send: usize = 0;
    let mut next_batch_id: usize = 0;
    let mut exhausted = false;

    loop {
        while !exhausted && joinset.len() < cfg.prefetch_workers {
            let Some(chunk) = chunks.next() else {
                exhausted = true;
                break;
            };
            let batch_id = next_batch_id;
            next_batch_id = next_batch_id.saturating_add(1);

            let store = store.clone();
            let groups = groups.clone();
            let max_images = cfg.max_images;
            let read_metrics = metrics.clone();
            joinset.spawn(async move {
                let assembled = tokio::task::spawn_blocking(move || {
                    let batch_groups: Vec<ProductGroup> =
                        chunk.iter().map(|&slot| groups[slot].clone()).collect();
                    assemble_batch(&store, &batch_groups, max_images, &read_metrics)
                })
                .await
                .map_err(anyhow::Error::from)
                .and_then(|res| res);
                (batch_id, assembled)
            });
        }

        let Some(joined) = joinset.join_next().await else {
            break;
        };
        let (batch_id, batch) = joined.map_err(anyhow::Error::from)?;
        buffer.insert(batch_id, batch?);

        while let Some(batch) = buffer.remove(&next_to_send) {
            if !send_batch(tx, metrics, batch).await {
                return Ok(false);
            }
            next_to_send = next_to_send.saturating_add(1);
        }
    }

    Ok(true)
}

async fn send_batch(
    tx: &mpsc::Sender<VecBatch>,
    metrics: &Arc<FeedMetrics>,
    batch: VecBatch,
) -> bool {
    let products = batch.product_count() as u64;
    // Raised before the send so the consumer's decrement can never land
    // first and wrap the gauge.
    let depth = metrics.queue_depth.add(1);
    metrics.queue_depth_high_water.max(depth);
    if tx.send(batch).await.is_err() {
        metrics.queue_depth.sub(1);
        return false;
    }
    metrics.emitted_batches_total.inc();
    metrics.emitted_products_total.inc_by(products);
    true
}

/// Reads, stacks and pads the embedding sequences of one batch.
///
/// Image selection is deterministic first-N: a product with more than
/// `max_images` rows contributes its first `max_images` rows in table
/// order. `max_imgs` is the largest capped sequence length in this batch;
/// shorter sequences are zero-padded, with all-zero aux rows marking the
/// padding positions.
fn assemble_batch(
    store: &EmbeddingStore,
    batch_groups: &[ProductGroup],
    max_images: usize,
    metrics: &FeedMetrics,
) -> Result<VecBatch> {
    let dim = store.dim();
    let max_imgs = batch_groups
        .iter()
        .map(|g| g.store_rows.len().min(max_images))
        .max()
        .unwrap_or(0);

    let mut product_ids: Vec<u64> = Vec::with_capacity(batch_groups.len());
    let mut labels: Vec<u32> = Vec::with_capacity(batch_groups.len());
    let mut embeddings = vec![0f32; batch_groups.len() * max_imgs * dim];
    let mut aux = vec![0f32; batch_groups.len() * max_imgs * AUX_WIDTH];

    for (slot, group) in batch_groups.iter().enumerate() {
        product_ids.push(group.product_id);
        labels.push(group.label);

        for (img, &row) in group.store_rows.iter().take(max_images).enumerate() {
            let off = (slot * max_imgs + img) * dim;
            let _timer = ScopedTimer::new(&metrics.store_read);
            store.read_row_into(row, &mut embeddings[off..off + dim])?;

            let aux_off = (slot * max_imgs + img) * AUX_WIDTH;
            aux[aux_off + img.min(AUX_WIDTH - 1)] = 1.0;
        }
    }

    let batch = VecBatch {
        product_ids: product_ids.into(),
        labels: labels.into(),
        embeddings: embeddings.into(),
        aux: aux.into(),
        max_imgs,
        dim,
    };
    batch.validate()?;
    Ok(batch)
}
