use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use pvfeed_core::types::ImageRecord;

/// Deterministically permutes the full row order of the joined table.
///
/// With a seed, the same seed yields the identical permutation on every
/// run; with `None`, the original order is preserved. Applied before the
/// train/validation split so grouping-by-product downstream is not biased
/// by the source table order.
pub fn shuffle_records(records: &mut [ImageRecord], seed: Option<u64>) {
    let Some(seed) = seed else {
        return;
    };
    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);
}
