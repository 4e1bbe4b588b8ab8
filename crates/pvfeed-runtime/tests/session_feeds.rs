use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use pvfeed_core::category::CategoryIndex;
use pvfeed_core::types::ProductRecord;
use pvfeed_runtime::session::{Session, SessionOptions};
use pvfeed_runtime::store::EmbeddingStore;

const DIM: usize = 5;

fn temp_store(test_name: &str, rows: usize) -> Result<PathBuf> {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "pvfeed-session-{test_name}-{}-{}",
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

fn product(product_id: u64, category_id: u64, num_imgs: u32) -> ProductRecord {
    ProductRecord {
        product_id,
        category_id,
        num_imgs,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_splits_products_into_three_feeds() -> Result<()> {
    // 13 store rows across six products; product 6 is left out of the
    // sample subset.
    let products = vec![
        product(1, 10, 2),
        product(2, 10, 1),
        product(3, 11, 3),
        product(4, 11, 1),
        product(5, 10, 2),
        product(6, 11, 4),
    ];
    let categories = CategoryIndex::from_pairs(vec![(10, 0), (11, 1)])?;
    let split: HashMap<u64, bool> = [
        (1, true),
        (2, true),
        (3, false),
        (4, false),
        (5, false),
        (6, true),
    ]
    .into_iter()
    .collect();
    let sample: HashSet<u64> = [1, 2, 3, 4, 5].into_iter().collect();

    let path = temp_store("three-feeds", 13)?;
    let store = Arc::new(EmbeddingStore::open(&path, 13, DIM)?);

    let opts = SessionOptions {
        batch_size: 2,
        shuffle_seed: Some(11),
        prefetch_workers: 2,
        ..SessionOptions::default()
    };
    let mut session = Session::build(&products, &categories, &split, &sample, store, &opts)?;
    assert_eq!(session.num_classes(), 2);

    // Train side holds products 1 and 2; validation splits 3 and 5 from
    // the single-image product 4.
    assert_eq!(session.train.samples(), 2);
    assert_eq!(session.valid_multi.samples(), 2);
    assert_eq!(session.valid_single.samples(), 1);

    let mut multi_ids: Vec<u64> = Vec::new();
    while let Some(batch) = session.valid_multi.next_batch().await? {
        // valid_multi carries its fixed image cap of 4; product 3 has
        // three images, so the pass peaks at max_imgs 3.
        assert!(batch.max_imgs <= 4);
        multi_ids.extend(batch.product_ids.iter().copied());
    }
    multi_ids.sort_unstable();
    assert_eq!(multi_ids, vec![3, 5]);

    let mut single_ids: Vec<u64> = Vec::new();
    while let Some(batch) = session.valid_single.next_batch().await? {
        assert_eq!(batch.max_imgs, 1);
        single_ids.extend(batch.product_ids.iter().copied());
    }
    assert_eq!(single_ids, vec![4]);

    // Training feed is endless; it keeps producing past one epoch.
    let steps = session.train.num_batches();
    for _ in 0..steps + 1 {
        let batch = tokio::time::timeout(Duration::from_secs(5), session.train.next_batch())
            .await??;
        assert!(batch.is_some());
    }

    tokio::time::timeout(Duration::from_secs(5), session.shutdown_all()).await?;
    tokio::time::timeout(Duration::from_secs(5), session.shutdown_all()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn num_classes_counts_realized_categories() -> Result<()> {
    // Three categories in the index, but the sample only touches two.
    let products = vec![product(1, 10, 1), product(2, 11, 1), product(3, 12, 1)];
    let categories = CategoryIndex::from_pairs(vec![(10, 0), (11, 1), (12, 2)])?;
    let split: HashMap<u64, bool> = [(1, true), (2, true), (3, true)].into_iter().collect();
    let sample: HashSet<u64> = [1, 2].into_iter().collect();

    let path = temp_store("realized", 3)?;
    let store = Arc::new(EmbeddingStore::open(&path, 3, DIM)?);

    let mut session = Session::build(
        &products,
        &categories,
        &split,
        &sample,
        store,
        &SessionOptions::default(),
    )?;
    assert_eq!(session.num_classes(), 2);

    tokio::time::timeout(Duration::from_secs(5), session.shutdown_all()).await?;
    Ok(())
}
