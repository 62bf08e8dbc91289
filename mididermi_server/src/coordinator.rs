// Coordinator: the server side of the two-operation protocol.
//
// `request` draws an epoch count and a random subset from the pool and wraps
// them in a fresh `Task`. `response` merges the task's population back into
// the pool and triggers persistence. Both are called from many connection
// threads at once; the pool serialises its own state, and the epoch RNG has
// its own small lock.
//
// `build_coordinator` wires a complete server-side stack from a
// `ServerConfig`: id allocator, melody sources, pool with optional SQLite
// store and MIDI file producer.

use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use mididermi_music::MelodyIdAllocator;
use mididermi_music::providers::{
    DescriptorDirectory, FractalMelodies, MelodySource, RandomMelodies,
};
use mididermi_protocol::{Distribution, ProtocolError, Task};

use crate::config::ServerConfig;
use crate::pool::MelodyPool;
use crate::producer::MidiFileProducer;
use crate::store::{SqliteStore, StoreSource};

pub struct Coordinator {
    pool: Arc<MelodyPool>,
    epochs: RangeInclusive<u32>,
    rng: Mutex<StdRng>,
}

impl Coordinator {
    /// An inverted epoch range collapses to `max_epochs`.
    pub fn new(pool: Arc<MelodyPool>, min_epochs: u32, max_epochs: u32, seed: u64) -> Self {
        Coordinator {
            pool,
            epochs: min_epochs.min(max_epochs)..=max_epochs,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn pool(&self) -> &Arc<MelodyPool> {
        &self.pool
    }
}

impl Distribution for Coordinator {
    fn request(&self) -> Result<Task, ProtocolError> {
        let epoch_count = self.rng.lock().random_range(self.epochs.clone());
        let subset = self.pool.provide_random_subset();
        debug!(
            "task: {} melodies, {epoch_count} epochs",
            subset.len()
        );
        Ok(Task::new(&subset, epoch_count))
    }

    fn response(&self, task: Task) -> Result<(), ProtocolError> {
        let melodies = task.into_population().into_melodies();
        self.pool.merge(melodies);
        self.pool.persistent_store();
        Ok(())
    }
}

/// Melody sources enabled in `config`, in loading order.
///
/// The database comes first so its stored ids are reserved in `ids` before
/// any generator allocates new ones.
pub fn configured_sources(
    config: &ServerConfig,
    ids: &Arc<MelodyIdAllocator>,
    seed: u64,
) -> Vec<Box<dyn MelodySource>> {
    let mut sources: Vec<Box<dyn MelodySource>> = Vec::new();
    if config.sources.load_database {
        sources.push(Box::new(StoreSource::new(
            &config.persistence.database_path,
            Arc::clone(ids),
        )));
    }
    if config.sources.random > 0 {
        sources.push(Box::new(RandomMelodies::new(
            Arc::clone(ids),
            Some(config.sources.random),
            seed,
        )));
    }
    if config.sources.fractal > 0 {
        sources.push(Box::new(FractalMelodies::new(
            Arc::clone(ids),
            Some(config.sources.fractal),
            seed.wrapping_add(1),
        )));
    }
    if config.sources.load_files {
        sources.push(Box::new(DescriptorDirectory::new(
            Arc::clone(ids),
            &config.sources.descriptor_dir,
        )));
    }
    sources
}

/// Build and initialise the pool and coordinator described by `config`.
pub fn build_coordinator(config: &ServerConfig) -> Coordinator {
    let seed = config.sources.seed.unwrap_or_else(rand::random);
    let ids = Arc::new(MelodyIdAllocator::new());

    let mut pool = MelodyPool::new(config.pool.min_subset, config.pool.max_subset, seed);
    if config.persistence.store_database {
        match SqliteStore::open(&config.persistence.database_path) {
            Ok(store) => pool = pool.with_store(Box::new(store)),
            Err(e) => warn!(
                "melody store {} unavailable, not storing: {e}",
                config.persistence.database_path.display()
            ),
        }
    }
    if config.persistence.store_files {
        pool = pool.with_producer(Box::new(MidiFileProducer::new(
            &config.persistence.midi_dir,
        )));
    }

    let mut sources = configured_sources(config, &ids, seed);
    let size = pool.init(&mut sources);
    info!(
        "coordinator ready: {size} melodies, subsets {}..={}, epochs {}..={}",
        config.pool.min_subset, config.pool.max_subset, config.epochs.min, config.epochs.max
    );
    Coordinator::new(
        Arc::new(pool),
        config.epochs.min,
        config.epochs.max,
        seed.wrapping_add(2),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mididermi_music::evaluation::EvaluationError;
    use mididermi_music::{Evaluator, Feedback, Melody, Note, ScaledDifference};

    struct AlwaysUp;

    impl Evaluator for AlwaysUp {
        fn audition(&mut self, _m: &Melody, feedback: &Feedback) -> Result<(), EvaluationError> {
            feedback.score_up();
            Ok(())
        }
    }

    fn coordinator_with(melodies: Vec<Melody>, subset: usize, epochs: u32) -> Coordinator {
        let pool = MelodyPool::new(subset, subset, 11);
        pool.merge(melodies);
        Coordinator::new(Arc::new(pool), epochs, epochs, 5)
    }

    fn melody_a() -> Melody {
        let mut a = Melody::with_notes(
            1,
            1,
            vec![Note::new(60, 1, 10, 64), Note::new(64, 11, 10, 64)],
        );
        a.set_score(5);
        a
    }

    #[test]
    fn request_draws_epochs_from_range_and_copies_subset() {
        let pool = MelodyPool::new(2, 2, 1);
        pool.merge(vec![melody_a(), Melody::with_notes(2, 3, vec![Note::new(70, 1, 1, 1)])]);
        let coordinator = Coordinator::new(Arc::new(pool), 1, 3, 9);
        for _ in 0..20 {
            let task = coordinator.request().unwrap();
            assert!((1..=3).contains(&task.epoch_count()));
            assert_eq!(task.result().len(), 2);
        }
        assert_eq!(coordinator.pool().len(), 2);
    }

    #[test]
    fn scenario_single_melody_round_trip() {
        let coordinator = coordinator_with(vec![melody_a()], 1, 1);

        let mut task = coordinator.request().unwrap();
        assert_eq!(task.result().len(), 1);
        assert_eq!(task.result().members()[0], melody_a());
        assert_eq!(task.result().members()[0].score(), 5);

        let mut rng = StdRng::seed_from_u64(0);
        task.calculate(&ScaledDifference::default(), &mut AlwaysUp, &mut rng)
            .unwrap();

        // The lone member's trial is built against itself, so it equals the
        // original and both score 5 + 1. The original wins the tie.
        let survivor = task.result().members()[0].clone();
        assert_eq!(task.result().len(), 1);
        assert_eq!(task.result().size(), 1);
        assert_eq!(survivor.score(), 6);

        // Pool entry untouched until response.
        assert_eq!(coordinator.pool().snapshot()[0].score(), 5);

        let structurally_same = survivor == melody_a();
        coordinator.response(task).unwrap();
        let pool = coordinator.pool().snapshot();
        if structurally_same {
            assert_eq!(pool.len(), 1);
            assert_eq!(pool[0].score(), 11);
        } else {
            assert_eq!(pool.len(), 2);
            assert_eq!(pool[0].score(), 5);
        }
        assert!(structurally_same);
    }

    #[test]
    fn mutated_survivor_is_appended_not_folded() {
        let coordinator = coordinator_with(vec![melody_a()], 1, 0);
        let task = coordinator.request().unwrap();
        let mut melodies = task.into_population().into_melodies();
        melodies[0].notes_mut()[0].set_pitch(61);
        melodies[0].set_score(2);

        let mut returned = mididermi_music::Population::from_members(melodies);
        returned.set_size(1);
        coordinator.response(Task::new(&returned, 0)).unwrap();

        let pool = coordinator.pool().snapshot();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].score(), 5);
        assert_eq!(pool[1].score(), 2);
    }

    #[test]
    fn server_state_is_isolated_from_task_mutation() {
        let coordinator = coordinator_with(vec![melody_a()], 1, 3);
        let mut task = coordinator.request().unwrap();
        task.calculate(
            &ScaledDifference::default(),
            &mut AlwaysUp,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
        assert_eq!(coordinator.pool().snapshot()[0].score(), 5);
        drop(task);
        // A task that is never returned leaves the pool as it was.
        assert_eq!(coordinator.pool().len(), 1);
        assert_eq!(coordinator.pool().snapshot()[0].score(), 5);
    }

    #[test]
    fn sources_follow_plain_boolean_flags() {
        let ids = Arc::new(MelodyIdAllocator::new());
        let mut config = ServerConfig::default();
        assert!(configured_sources(&config, &ids, 0).is_empty());

        config.sources.random = 4;
        config.sources.load_files = true;
        let names: Vec<String> = configured_sources(&config, &ids, 0)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["random", "descriptor files"]);
    }

    #[test]
    fn build_coordinator_degrades_missing_sources_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.sources.seed = Some(3);
        config.sources.random = 3;
        config.sources.fractal = 2;
        config.sources.load_database = true;
        config.sources.load_files = true;
        config.sources.descriptor_dir = dir.path().join("no-such-dir");
        config.persistence.database_path = dir.path().join("absent.sqlite3");

        let coordinator = build_coordinator(&config);
        assert_eq!(coordinator.pool().len(), 5);
    }

    #[test]
    fn build_coordinator_persists_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.sources.seed = Some(8);
        config.sources.random = 4;
        config.persistence.store_database = true;
        config.persistence.database_path = dir.path().join("pool.sqlite3");

        let first = build_coordinator(&config);
        let task = first.request().unwrap();
        first.response(task).unwrap();
        let stored = first.pool().snapshot();

        config.sources.random = 0;
        config.sources.load_database = true;
        let second = build_coordinator(&config);
        assert_eq!(second.pool().snapshot(), stored);
    }
}
