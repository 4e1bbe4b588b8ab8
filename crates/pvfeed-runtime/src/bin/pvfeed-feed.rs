#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, info_span, warn, Instrument};

use pvfeed_runtime::feed::{FeedMetrics, VecFeed};
use pvfeed_runtime::runlog::RunLog;
use pvfeed_runtime::session::{Session, SessionOptions};
use pvfeed_runtime::store::EmbeddingStore;
use pvfeed_tables::load::{load_category_index, load_products, load_sample_set, load_train_split};

#[derive(Debug, Parser)]
#[command(name = "pvfeed-feed")]
struct Args {
    /// Full product-info table; row order defines the embedding store layout.
    #[arg(long, env = "PVFEED_PROD_INFO_CSV")]
    prod_info_csv: PathBuf,

    /// Sample subset the run is restricted to.
    #[arg(long, env = "PVFEED_SAMPLE_PROD_INFO_CSV")]
    sample_prod_info_csv: PathBuf,

    #[arg(long, env = "PVFEED_CATEGORY_IDX_CSV")]
    category_idx_csv: PathBuf,

    #[arg(long, env = "PVFEED_TRAIN_SPLIT_CSV")]
    train_split_csv: PathBuf,

    #[arg(long, env = "PVFEED_STORE_PATH")]
    store_path: PathBuf,

    #[arg(long, env = "PVFEED_STORE_ROWS")]
    store_rows: usize,

    #[arg(long, env = "PVFEED_STORE_DIM", default_value_t = 2048)]
    store_dim: usize,

    /// Where training.log accumulates run history.
    #[arg(long, env = "PVFEED_MODELS_DIR")]
    models_dir: PathBuf,

    #[arg(long, env = "PVFEED_BATCH_SIZE", default_value_t = 64)]
    batch_size: usize,

    #[arg(long, env = "PVFEED_EPOCHS", default_value_t = 1)]
    epochs: u64,

    /// Seed for the full-row permutation of the joined table. Unset keeps
    /// table order.
    #[arg(long, env = "PVFEED_SHUFFLE_SEED")]
    shuffle_seed: Option<u64>,

    #[arg(long, env = "PVFEED_BATCH_SEED", default_value_t = 123)]
    batch_seed: u64,

    #[arg(long, env = "PVFEED_MAX_IMAGES", default_value_t = 2)]
    max_images: usize,

    #[arg(long, env = "PVFEED_PREFETCH_WORKERS", default_value_t = 4)]
    prefetch_workers: usize,

    #[arg(long, env = "PVFEED_MAX_QUEUE_BATCHES", default_value_t = 2)]
    max_queue_batches: usize,

    /// Periodically emit a metrics snapshot (0 disables).
    #[arg(long, env = "PVFEED_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 1000)]
    metrics_snapshot_interval_ms: u64,
}

fn emit_feed_metrics_snapshot(feed: &str, metrics: &FeedMetrics) {
    let store_read = metrics.store_read.snapshot();
    tracing::info!(
        target: "pvfeed_metrics",
        feed = feed,
        epoch = metrics.epoch.get(),
        emitted_batches_total = metrics.emitted_batches_total.get(),
        emitted_products_total = metrics.emitted_products_total.get(),
        queue_depth = metrics.queue_depth.get(),
        queue_depth_high_water = metrics.queue_depth_high_water.get(),
        store_read_count = store_read.count,
        store_read_avg_ns = store_read.avg_ns(),
        store_read_max_ns = store_read.max_ns,
        "metrics"
    );
}

/// Pulls one full pass off a finite feed and reports its batch and product
/// counts.
async fn drain_feed(feed: &mut VecFeed, name: &str) -> Result<(u64, u64)> {
    let mut batches: u64 = 0;
    let mut products: u64 = 0;
    while let Some(batch) = feed.next_batch().await? {
        batches += 1;
        products += batch.product_count() as u64;
    }
    info!(feed = name, batches, products, "validation pass drained");
    Ok((batches, products))
}

#[tokio::main]
async fn main() -> Result<()> {
    pvfeed_observe::logging::init_tracing();
    let args = Args::parse();

    let span = info_span!(
        "pvfeed-feed",
        batch_size = args.batch_size,
        epochs = args.epochs,
        batch_seed = args.batch_seed,
        max_images = args.max_images,
        prefetch_workers = args.prefetch_workers,
        max_queue_batches = args.max_queue_batches,
    );

    async move {
        let products = load_products(&args.prod_info_csv)?;
        let categories = load_category_index(&args.category_idx_csv)?;
        let split = load_train_split(&args.train_split_csv)?;
        let sample = load_sample_set(&args.sample_prod_info_csv)?;

        let store = Arc::new(EmbeddingStore::open(
            &args.store_path,
            args.store_rows,
            args.store_dim,
        )?);

        let opts = SessionOptions {
            batch_size: args.batch_size,
            shuffle_seed: args.shuffle_seed,
            batch_seed: args.batch_seed,
            max_images: args.max_images,
            prefetch_workers: args.prefetch_workers,
            max_queue_batches: args.max_queue_batches,
        };
        let mut session = Session::build(&products, &categories, &split, &sample, store, &opts)?;

        if session.train.num_batches() == 0 {
            warn!("training feed is empty after filtering; nothing to do");
            session.shutdown_all().await;
            return Ok(());
        }

        let mut runlog = RunLog::open(&args.models_dir)?;
        runlog.append_line(&format!("Multi {}", session.valid_multi.samples()))?;
        runlog.append_line(&format!("Single {}", session.valid_single.samples()))?;

        let metrics_task = if args.metrics_snapshot_interval_ms > 0 {
            let interval_ms = std::cmp::max(1, args.metrics_snapshot_interval_ms);
            let train = session.train.metrics();
            let valid_multi = session.valid_multi.metrics();
            let valid_single = session.valid_single.metrics();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    emit_feed_metrics_snapshot("train", &train);
                    emit_feed_metrics_snapshot("valid_multi", &valid_multi);
                    emit_feed_metrics_snapshot("valid_single", &valid_single);
                }
            }))
        } else {
            None
        };

        let start = Instant::now();
        let steps_per_epoch = session.train.num_batches();
        info!(
            steps_per_epoch,
            num_classes = session.num_classes(),
            "starting feed drive"
        );

        tokio::select! {
            res = async {
                let (multi_batches, multi_products) =
                    drain_feed(&mut session.valid_multi, "valid_multi").await?;
                runlog.append_line(&format!(
                    "valid_multi batches {multi_batches} products {multi_products}"
                ))?;
                let (single_batches, single_products) =
                    drain_feed(&mut session.valid_single, "valid_single").await?;
                runlog.append_line(&format!(
                    "valid_single batches {single_batches} products {single_products}"
                ))?;

                for epoch in 0..args.epochs {
                    let mut products: u64 = 0;
                    for _ in 0..steps_per_epoch {
                        match session.train.next_batch().await? {
                            Some(batch) => products += batch.product_count() as u64,
                            None => anyhow::bail!("training feed closed early"),
                        }
                    }
                    info!(feed = "train", epoch, products, "epoch drained");
                    runlog.append_line(&format!("epoch {epoch} products {products}"))?;
                }
                Ok::<(), anyhow::Error>(())
            } => {
                res?;
            }
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received; exiting");
            }
        }

        if let Some(task) = metrics_task {
            task.abort();
        }
        emit_feed_metrics_snapshot("train", &session.train.metrics());
        emit_feed_metrics_snapshot("valid_multi", &session.valid_multi.metrics());
        emit_feed_metrics_snapshot("valid_single", &session.valid_single.metrics());

        let elapsed = start.elapsed();
        let delivered = session.train.metrics().emitted_products_total.get();
        let throughput = if elapsed.as_secs_f64() > 0.0 {
            delivered as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            train_products = delivered,
            products_per_sec = throughput,
            "feed drive complete"
        );

        session.shutdown_all().await;
        Ok(())
    }
    .instrument(span)
    .await
}
