// MelodyPool: the server's authoritative reservoir of melodies.
//
// All state (the melodies, the sampling RNG, the optional store and file
// producer) sits behind one mutex, and every public operation holds it for
// its whole duration. Concurrent `merge` calls, or a `merge` racing a
// `provide_random_subset`, therefore never interleave. The melody id
// allocator is separate, lock-free process state.
//
// The pool has no size cap and never drops melodies on its own. The only
// way an incoming melody disappears is `merge` finding a structurally equal
// entry (same notes, instrument and genre) and folding its score in.

use std::ops::RangeInclusive;

use parking_lot::Mutex;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use mididermi_music::providers::MelodySource;
use mididermi_music::{Melody, Population};

use crate::producer::FileSetProducer;
use crate::store::MelodyStore;

/// Result of one `merge` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Incoming melodies folded into an existing entry.
    pub folded: usize,
    /// Incoming melodies appended as new entries.
    pub appended: usize,
}

struct PoolState {
    melodies: Vec<Melody>,
    rng: StdRng,
    subset: RangeInclusive<usize>,
    store: Option<Box<dyn MelodyStore>>,
    producer: Option<Box<dyn FileSetProducer>>,
}

pub struct MelodyPool {
    state: Mutex<PoolState>,
}

impl MelodyPool {
    /// An empty pool handing out subsets of `min_subset..=max_subset`
    /// melodies (clamped to the pool size at draw time). An inverted range
    /// collapses to `max_subset`.
    pub fn new(min_subset: usize, max_subset: usize, seed: u64) -> Self {
        MelodyPool {
            state: Mutex::new(PoolState {
                melodies: Vec::new(),
                rng: StdRng::seed_from_u64(seed),
                subset: min_subset.min(max_subset)..=max_subset,
                store: None,
                producer: None,
            }),
        }
    }

    pub fn with_store(self, store: Box<dyn MelodyStore>) -> Self {
        self.state.lock().store = Some(store);
        self
    }

    pub fn with_producer(self, producer: Box<dyn FileSetProducer>) -> Self {
        self.state.lock().producer = Some(producer);
        self
    }

    /// Replace the pool contents with whatever the sources provide, in order.
    /// A failing source contributes nothing. Returns the new pool size.
    pub fn init(&self, sources: &mut [Box<dyn MelodySource>]) -> usize {
        let mut state = self.state.lock();
        state.melodies.clear();
        for source in sources.iter_mut() {
            match source.provide() {
                Ok(melodies) => {
                    info!("{}: {} melodies", source.name(), melodies.len());
                    state.melodies.extend(melodies);
                }
                Err(e) => warn!("{}: unavailable, contributing nothing: {e}", source.name()),
            }
        }
        info!("pool initialised with {} melodies", state.melodies.len());
        state.melodies.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().melodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().melodies.is_empty()
    }

    /// Deep copy of the whole pool.
    pub fn snapshot(&self) -> Vec<Melody> {
        self.state.lock().melodies.clone()
    }

    /// A population of deep copies of distinct, randomly chosen entries, in
    /// pool order. The copies keep their pool ids; the target size equals the
    /// number of melodies drawn.
    pub fn provide_random_subset(&self) -> Population {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let len = state.melodies.len();
        let wanted = state
            .rng
            .random_range(state.subset.clone())
            .min(len);

        // Rejection sampling: redraw until an unused index comes up.
        let mut taken = vec![false; len];
        let mut remaining = wanted;
        while remaining > 0 {
            let index = state.rng.random_range(0..len);
            if !taken[index] {
                taken[index] = true;
                remaining -= 1;
            }
        }

        let members: Vec<Melody> = state
            .melodies
            .iter()
            .zip(&taken)
            .filter(|&(_, &t)| t)
            .map(|(m, _)| m.clone())
            .collect();
        debug!("subset of {} out of {len}", members.len());
        Population::from_members(members)
    }

    /// Fold returned melodies into the pool.
    ///
    /// Each incoming melody equal to an existing entry adds its score to that
    /// entry and is dropped; anything else is appended with its own id. Later
    /// melodies in the same batch see the earlier ones, so a batch can't
    /// introduce two equal entries either.
    pub fn merge(&self, melodies: Vec<Melody>) -> MergeOutcome {
        let mut state = self.state.lock();
        let mut outcome = MergeOutcome::default();
        for incoming in melodies {
            match state.melodies.iter().position(|m| *m == incoming) {
                Some(i) => {
                    state.melodies[i].add_score(incoming.score());
                    outcome.folded += 1;
                }
                None => {
                    state.melodies.push(incoming);
                    outcome.appended += 1;
                }
            }
        }
        info!(
            "merged: {} folded, {} new, pool size {}",
            outcome.folded,
            outcome.appended,
            state.melodies.len()
        );
        outcome
    }

    /// Hand the full pool to the configured store and file producer, if any.
    /// Failures are logged and otherwise ignored.
    pub fn persistent_store(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(store) = state.store.as_mut() {
            if let Err(e) = store.store_melodies(&state.melodies) {
                warn!("storing pool failed: {e}");
            }
        }
        if let Some(producer) = state.producer.as_mut() {
            match producer.produce(&state.melodies) {
                Ok(n) => debug!("wrote {n} midi files"),
                Err(e) => warn!("writing midi files failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use mididermi_music::Note;
    use mididermi_music::providers::SourceError;

    use crate::store::StoreError;

    fn melody(id: u64, pitch: i32, score: i64) -> Melody {
        let mut m = Melody::with_notes(id, 1, vec![Note::new(pitch, 1, 10, 64)]);
        m.set_score(score);
        m
    }

    fn pool_of(pitches: &[i32], min: usize, max: usize) -> MelodyPool {
        let pool = MelodyPool::new(min, max, 7);
        pool.merge(
            pitches
                .iter()
                .enumerate()
                .map(|(i, &p)| melody(i as u64, p, 0))
                .collect(),
        );
        pool
    }

    struct Fixed(Vec<Melody>);

    impl MelodySource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn provide(&mut self) -> Result<Vec<Melody>, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl MelodySource for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn provide(&mut self) -> Result<Vec<Melody>, SourceError> {
            Err(SourceError::Unavailable("offline".into()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        snapshots: Arc<parking_lot::Mutex<Vec<usize>>>,
        fail: bool,
    }

    impl MelodyStore for Recorder {
        fn load_melodies(&mut self) -> Result<Vec<Melody>, StoreError> {
            Ok(Vec::new())
        }
        fn store_melodies(&mut self, melodies: &[Melody]) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.snapshots.lock().push(melodies.len());
            Ok(())
        }
    }

    #[test]
    fn init_concatenates_sources_and_skips_failures() {
        let pool = MelodyPool::new(2, 2, 0);
        let mut sources: Vec<Box<dyn MelodySource>> = vec![
            Box::new(Fixed(vec![melody(1, 60, 0), melody(2, 61, 0)])),
            Box::new(Broken),
            Box::new(Fixed(vec![melody(3, 62, 0)])),
        ];
        assert_eq!(pool.init(&mut sources), 3);
        // Re-init starts from scratch.
        assert_eq!(pool.init(&mut sources[2..]), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn init_with_no_sources_is_empty() {
        let pool = MelodyPool::new(2, 2, 0);
        assert_eq!(pool.init(&mut []), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn subset_is_distinct_members_of_the_pool() {
        let pool = pool_of(&[40, 41, 42, 43, 44, 45, 46, 47], 3, 5);
        let snapshot = pool.snapshot();
        for _ in 0..50 {
            let subset = pool.provide_random_subset();
            assert!((3..=5).contains(&subset.len()));
            assert_eq!(subset.size(), subset.len());
            for m in subset.members() {
                assert!(snapshot.contains(m));
            }
            let mut ids: Vec<u64> = subset.members().iter().map(Melody::id).collect();
            ids.dedup();
            assert_eq!(ids.len(), subset.len());
            // Pool order is preserved.
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn subset_is_clamped_to_pool_size() {
        let pool = pool_of(&[60, 61], 5, 9);
        let subset = pool.provide_random_subset();
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.size(), 2);

        let empty = MelodyPool::new(2, 2, 0);
        assert!(empty.provide_random_subset().is_empty());
    }

    #[test]
    fn subset_copies_are_independent() {
        let pool = pool_of(&[60, 61, 62], 3, 3);
        let mut subset = pool.provide_random_subset().into_melodies();
        subset[0].set_score(100);
        subset[0].notes_mut()[0].set_pitch(0);
        assert!(pool.snapshot().iter().all(|m| m.score() == 0));
        assert!(pool.snapshot().iter().all(|m| m.notes()[0].pitch() >= 60));
    }

    #[test]
    fn merge_folds_equal_melodies_and_appends_new_ones() {
        let pool = pool_of(&[60], 1, 1);
        let outcome = pool.merge(vec![melody(50, 60, 4), melody(51, 70, 2)]);
        assert_eq!(
            outcome,
            MergeOutcome {
                folded: 1,
                appended: 1
            }
        );
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].score(), 4);
        assert_eq!(snapshot[0].id(), 0);
        assert_eq!(snapshot[1].id(), 51);
    }

    #[test]
    fn merging_the_same_value_twice_accumulates_without_duplicates() {
        let pool = MelodyPool::new(1, 1, 0);
        pool.merge(vec![melody(1, 64, 3)]);
        pool.merge(vec![melody(2, 64, 5)]);
        pool.merge(vec![melody(3, 64, -1), melody(4, 64, 1)]);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].score(), 8);
    }

    #[test]
    fn concurrent_merges_and_draws_never_lose_or_duplicate() {
        let pool = Arc::new(pool_of(&[30, 31, 32, 33], 2, 3));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..50 {
                        let subset = pool.provide_random_subset();
                        assert!(subset.len() <= pool.len());
                        // Half of each batch repeats a shared melody, half is unique.
                        pool.merge(vec![melody(0, 30, 1), melody(0, 40 + t, i)]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snapshot = pool.snapshot();
        // 4 seeds + one distinct melody per thread.
        assert_eq!(snapshot.len(), 12);
        let shared = snapshot.iter().find(|m| m.notes()[0].pitch() == 30).unwrap();
        assert_eq!(shared.score(), 8 * 50);
        for t in 0..8 {
            let own = snapshot
                .iter()
                .find(|m| m.notes()[0].pitch() == 40 + t)
                .unwrap();
            assert_eq!(own.score(), (0..50).sum::<i64>());
        }
    }

    #[test]
    fn persistent_store_forwards_full_pool_and_survives_failures() {
        let recorder = Recorder::default();
        let snapshots = Arc::clone(&recorder.snapshots);
        let pool = MelodyPool::new(1, 1, 0).with_store(Box::new(recorder));
        pool.merge(vec![melody(1, 60, 0), melody(2, 61, 0)]);
        pool.persistent_store();
        pool.merge(vec![melody(3, 62, 0)]);
        pool.persistent_store();
        assert_eq!(*snapshots.lock(), vec![2, 3]);

        let failing = MelodyPool::new(1, 1, 0).with_store(Box::new(Recorder {
            fail: true,
            ..Default::default()
        }));
        failing.merge(vec![melody(1, 60, 0)]);
        failing.persistent_store();
        assert_eq!(failing.len(), 1);
    }

    #[test]
    fn persistent_store_without_targets_is_a_noop() {
        let pool = pool_of(&[60], 1, 1);
        pool.persistent_store();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn persistent_store_writes_midi_files() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_of(&[60, 62], 1, 1).with_producer(Box::new(
            crate::producer::MidiFileProducer::new(dir.path()),
        ));
        pool.persistent_store();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
