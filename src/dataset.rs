use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use rayon::prelude::*;

use crate::{calc_dataset_item, Error, HASH_BYTES};

/// Number of progress checkpoints per generation, besides the initial one.
const PROGRESS_STEPS: usize = 100;

/// Outcome of a generation that may be cancelled through its progress
/// callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated<T> {
    Complete(T),
    /// The callback asked to stop. Whatever was produced so far is incomplete.
    Cancelled,
}

impl<T> Generated<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Generated::Cancelled)
    }

    pub fn complete(self) -> Option<T> {
        match self {
            Generated::Complete(value) => Some(value),
            Generated::Cancelled => None,
        }
    }
}

struct Cancelled;

/// Make an Ethash dataset from the cache.
///
/// Items are computed in parallel, one batch of roughly 1% of the dataset at
/// a time. `progress` is called with 0 before any work and then with the
/// completed percentage after every batch; since batches finish on different
/// threads, percentages can arrive out of order. Returning
/// `ControlFlow::Break(())` stops the workers at their next batch boundary.
///
/// A non-empty dataset needs a cache made of whole nodes, at least one of
/// them; anything else is rejected before `progress` is first called.
pub fn make_dataset<F>(
    dataset: &mut [u8],
    cache: &[u8],
    progress: F,
) -> Result<Generated<()>, Error>
where
    F: Fn(u32) -> ControlFlow<()> + Sync,
{
    let items = dataset.len() / HASH_BYTES;
    if items > 0 && (cache.is_empty() || cache.len() % HASH_BYTES != 0) {
        return Err(Error::InvalidConfig {
            reason: format!(
                "cache of {} bytes is not a whole number of {}-byte nodes",
                cache.len(),
                HASH_BYTES
            ),
        });
    }

    if progress(0).is_break() {
        return Ok(Generated::Cancelled);
    }
    if items == 0 {
        return Ok(Generated::Complete(()));
    }

    setup_thread_pool();
    let batch = (items / PROGRESS_STEPS).max(1);
    let done = AtomicUsize::new(0);

    let outcome = dataset[..items * HASH_BYTES]
        .par_chunks_mut(batch * HASH_BYTES)
        .enumerate()
        .try_for_each(|(b, chunk)| {
            let first = b * batch;
            for (k, out) in chunk.chunks_exact_mut(HASH_BYTES).enumerate() {
                LittleEndian::write_u32_into(&calc_dataset_item(cache, first + k), out);
            }

            let count = chunk.len() / HASH_BYTES;
            let finished = done.fetch_add(count, Ordering::Relaxed) + count;
            let percent = (finished * 100 / items) as u32;
            tracing::trace!(percent, "dataset generation progress");
            match progress(percent) {
                ControlFlow::Continue(()) => Ok(()),
                ControlFlow::Break(()) => Err(Cancelled),
            }
        });

    Ok(match outcome {
        Ok(()) => Generated::Complete(()),
        Err(Cancelled) => Generated::Cancelled,
    })
}

fn setup_thread_pool() {
    // the global pool may already be set up by us or by the embedding
    // application; either way it is usable.
    let _ = rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{make_cache, Config};
    use std::sync::Mutex;

    fn test_cache() -> Vec<u8> {
        let config = Config::testing();
        let mut cache = vec![0u8; config.cache_size(0)];
        make_cache(&mut cache, config.seedhash(0));
        cache
    }

    #[test]
    fn matches_sequential_items() {
        let cache = test_cache();
        let mut dataset = vec![0u8; Config::testing().full_size(0)];
        let outcome = make_dataset(&mut dataset, &cache, |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(outcome, Generated::Complete(()));

        for (i, item) in dataset.chunks_exact(HASH_BYTES).enumerate() {
            let mut expected = [0u8; HASH_BYTES];
            LittleEndian::write_u32_into(&calc_dataset_item(&cache, i), &mut expected);
            assert_eq!(item, &expected[..], "item {}", i);
        }
    }

    #[test]
    fn reports_progress_from_zero_to_hundred() {
        let cache = test_cache();
        let mut dataset = vec![0u8; Config::testing().full_size(0)];
        let seen = Mutex::new(Vec::new());
        let outcome = make_dataset(&mut dataset, &cache, |p| {
            seen.lock().unwrap().push(p);
            ControlFlow::Continue(())
        })
        .unwrap();
        assert!(!outcome.is_cancelled());

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen[0], 0);
        assert!(seen.iter().all(|&p| p <= 100));
        assert_eq!(seen.iter().max(), Some(&100));
    }

    #[test]
    fn cancels_on_first_report() {
        let cache = test_cache();
        let mut dataset = vec![0u8; Config::testing().full_size(0)];
        let outcome = make_dataset(&mut dataset, &cache, |_| ControlFlow::Break(())).unwrap();
        assert!(outcome.is_cancelled());
        assert!(dataset.iter().all(|&b| b == 0));
    }

    #[test]
    fn cancels_mid_generation() {
        let cache = test_cache();
        let mut dataset = vec![0u8; Config::testing().full_size(0)];
        let calls = AtomicUsize::new(0);
        let outcome = make_dataset(&mut dataset, &cache, |_| {
            if calls.fetch_add(1, Ordering::Relaxed) >= 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        assert_eq!(outcome.complete(), None);
    }

    #[test]
    fn rejects_cache_without_whole_nodes() {
        for cache in [Vec::new(), vec![0u8; HASH_BYTES - 1], vec![0u8; HASH_BYTES * 2 + 8]] {
            let mut dataset = vec![0u8; 2 * HASH_BYTES];
            let calls = AtomicUsize::new(0);
            let outcome = make_dataset(&mut dataset, &cache, |_| {
                calls.fetch_add(1, Ordering::Relaxed);
                ControlFlow::Continue(())
            });
            assert!(
                matches!(outcome, Err(Error::InvalidConfig { .. })),
                "cache of {} bytes",
                cache.len()
            );
            assert_eq!(calls.load(Ordering::Relaxed), 0);
            assert!(dataset.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn empty_dataset_needs_no_cache() {
        let outcome = make_dataset(&mut [], &[], |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(outcome, Generated::Complete(()));
    }

    #[test]
    fn repeated_generation_reuses_the_thread_pool() {
        let cache = test_cache();
        let mut first = vec![0u8; 16 * HASH_BYTES];
        let mut second = vec![0u8; 16 * HASH_BYTES];
        let keep_going = |_: u32| ControlFlow::<()>::Continue(());
        assert!(!make_dataset(&mut first, &cache, keep_going).unwrap().is_cancelled());
        assert!(!make_dataset(&mut second, &cache, keep_going).unwrap().is_cancelled());
        assert_eq!(first, second);
    }
}
