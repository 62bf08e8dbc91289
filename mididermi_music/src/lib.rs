// MIDI-DE music core
//
// Interactive differential evolution of short melodies. Candidates are ordered
// note sequences; their fitness is whatever a human listener says while each
// one plays. This crate holds everything a single process needs to evolve a
// population locally. Distribution across workers lives in
// `mididermi_protocol` and `mididermi_server`.
//
// Architecture:
// - note.rs: Note, the bounded gene (pitch, offset, duration, velocity)
// - melody.rs: Melody chromosome, structural equality, MelodyIdAllocator
// - strategy.rs: MutationStrategy (differential + apply) and the default
//   ScaledDifference operator with index-aligned truncation
// - population.rs: Population, the DE engine (recombine, evaluate, sort,
//   shrink, epoches)
// - evaluation.rs: human judgment contract (Feedback window, Evaluator) and
//   the real-time ListeningEvaluator built on Renderer/Player/Visualizer
// - midi.rs: single-track SMF rendering via `midly`
// - providers.rs: melody sources (random, fractal, descriptor directory)
//
// Everything random takes an explicit `Rng`, so runs are reproducible given a
// seed. The only real-time component is `ListeningEvaluator`.

pub mod evaluation;
pub mod melody;
pub mod midi;
pub mod note;
pub mod population;
pub mod providers;
pub mod strategy;

pub use evaluation::{EvaluationError, Evaluator, Feedback};
pub use melody::{Melody, MelodyIdAllocator};
pub use note::Note;
pub use population::Population;
pub use strategy::{Delta, MutationStrategy, ScaledDifference};
