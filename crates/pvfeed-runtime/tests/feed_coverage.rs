use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use pvfeed_core::types::ImageRecord;
use pvfeed_runtime::feed::{FeedConfig, VecFeed};
use pvfeed_runtime::store::EmbeddingStore;
use pvfeed_runtime::types::{VecBatch, AUX_WIDTH};

const DIM: usize = 6;

fn temp_store(test_name: &str, rows: usize) -> Result<PathBuf> {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "pvfeed-coverage-{test_name}-{}-{}",
        std::process::id(),
        pvfeed_observe::time::unix_time_ms()
    ));
    let mut f = File::create(&path)?;
    for row in 0..rows {
        for d in 0..DIM {
            let v = (row * DIM + d) as f32;
            f.write_all(&v.to_le_bytes())?;
        }
    }
    f.flush()?;
    Ok(path)
}

/// Twenty products cycling through 1..=4 images, 50 store rows.
fn synthetic_records() -> (Vec<ImageRecord>, usize) {
    let mut out = Vec::new();
    let mut store_row: u64 = 0;
    for p in 0..20u64 {
        let num_imgs = (p % 4 + 1) as u32;
        for img_idx in 0..num_imgs {
            out.push(ImageRecord {
                product_id: 100 + p,
                category_idx: (p % 5) as u32,
                img_idx,
                num_imgs,
                train: true,
                store_row,
            });
            store_row += 1;
        }
    }
    (out, store_row as usize)
}

async fn collect(feed: &mut VecFeed) -> Result<Vec<VecBatch>> {
    let mut batches = Vec::new();
    while let Some(batch) = feed.next_batch().await? {
        batches.push(batch);
    }
    Ok(batches)
}

fn assert_shapes_and_padding(batch: &VecBatch, max_images: usize) {
    assert!(batch.max_imgs <= max_images);
    assert_eq!(batch.validate(), Ok(()));
    for product in 0..batch.product_count() {
        let aux = batch.aux_of(product);
        let emb = batch.embeddings_of(product);
        for img in 0..batch.max_imgs {
            let aux_row = &aux[img * AUX_WIDTH..(img + 1) * AUX_WIDTH];
            let filled = aux_row.iter().filter(|&&v| v != 0.0).count();
            if filled == 0 {
                // Padding slot: embedding must be zero too.
                let emb_row = &emb[img * DIM..(img + 1) * DIM];
                assert!(emb_row.iter().all(|&v| v == 0.0));
            } else {
                assert_eq!(filled, 1);
                assert_eq!(aux_row[img.min(AUX_WIDTH - 1)], 1.0);
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finite_pass_covers_every_product_exactly_once() -> Result<()> {
    let (rows, store_rows) = synthetic_records();
    let path = temp_store("once", store_rows)?;
    let store = Arc::new(EmbeddingStore::open(&path, store_rows, DIM)?);

    let mut feed = VecFeed::spawn(
        store,
        &rows,
        5,
        FeedConfig {
            batch_size: 3,
            max_images: 2,
            ..FeedConfig::default()
        },
    )?;
    assert_eq!(feed.samples(), 20);
    assert_eq!(feed.num_batches(), 7);

    let batches = collect(&mut feed).await?;
    assert_eq!(batches.len(), 7);

    let mut seen: HashSet<u64> = HashSet::new();
    for batch in &batches {
        assert_shapes_and_padding(batch, 2);
        for (&id, &label) in batch.product_ids.iter().zip(batch.labels.iter()) {
            assert!(seen.insert(id), "product {id} delivered twice");
            assert_eq!(label, ((id - 100) % 5) as u32);
        }
    }
    assert_eq!(seen.len(), 20);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_single_pass_delivers_single_image_products() -> Result<()> {
    let (rows, store_rows) = synthetic_records();
    let path = temp_store("single", store_rows)?;
    let store = Arc::new(EmbeddingStore::open(&path, store_rows, DIM)?);

    let mut feed = VecFeed::spawn(
        store,
        &rows,
        5,
        FeedConfig {
            batch_size: 2,
            only_single: true,
            max_images: 1,
            ..FeedConfig::default()
        },
    )?;
    // Products 0, 4, 8, 12, 16 have a single image.
    assert_eq!(feed.samples(), 5);

    let batches = collect(&mut feed).await?;
    let ids: Vec<u64> = batches
        .iter()
        .flat_map(|b| b.product_ids.iter().copied())
        .collect();
    assert_eq!(ids, vec![100, 104, 108, 112, 116]);
    for batch in &batches {
        assert_eq!(batch.max_imgs, 1);
        assert_shapes_and_padding(batch, 1);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn endless_feed_reshuffles_across_epochs() -> Result<()> {
    let (rows, store_rows) = synthetic_records();
    let path = temp_store("endless", store_rows)?;
    let store = Arc::new(EmbeddingStore::open(&path, store_rows, DIM)?);

    let mut feed = VecFeed::spawn(
        store,
        &rows,
        5,
        FeedConfig {
            batch_size: 4,
            shuffle: true,
            seed: 7,
            max_images: 2,
            endless: true,
            ..FeedConfig::default()
        },
    )?;
    let per_epoch = feed.num_batches();

    let mut first_epoch: Vec<u64> = Vec::new();
    for _ in 0..per_epoch {
        let batch = feed.next_batch().await?.unwrap();
        first_epoch.extend(batch.product_ids.iter().copied());
    }
    let mut second_epoch: Vec<u64> = Vec::new();
    for _ in 0..per_epoch {
        let batch = feed.next_batch().await?.unwrap();
        second_epoch.extend(batch.product_ids.iter().copied());
    }

    // Both epochs cover the full product set, in different orders.
    let all: HashSet<u64> = (100..120).collect();
    assert_eq!(first_epoch.iter().copied().collect::<HashSet<_>>(), all);
    assert_eq!(second_epoch.iter().copied().collect::<HashSet<_>>(), all);
    assert_ne!(first_epoch, second_epoch);

    feed.shutdown().await;
    Ok(())
}
