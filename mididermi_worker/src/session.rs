// Worker session: the request -> calculate -> response cycle.
//
// Each round borrows a task from the distribution, runs its epochs under the
// listener, and hands it back. The session's `Feedback` is attached to every
// task so a keyboard thread started once keeps voting on whichever task is
// current.
//
// A failed `response` is not retried: the merge may already have happened
// on the server.

use rand::Rng;
use tracing::info;

use mididermi_music::{Evaluator, Feedback, MutationStrategy};
use mididermi_protocol::{Distribution, ProtocolError, TaskError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// What a finished round reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSummary {
    pub epochs: u32,
    pub melodies: usize,
    pub best_score: Option<i64>,
}

/// Run one round against `distribution`.
pub fn run_round<R: Rng + ?Sized>(
    distribution: &dyn Distribution,
    strategy: &dyn MutationStrategy,
    evaluator: &mut dyn Evaluator,
    rng: &mut R,
    feedback: &Feedback,
) -> Result<RoundSummary, SessionError> {
    let mut task = distribution.request()?;
    task.attach_feedback(feedback.clone());
    task.calculate(strategy, evaluator, rng)?;

    let population = task.result();
    let summary = RoundSummary {
        epochs: task.epoch_count(),
        melodies: population.len(),
        best_score: population.members().iter().map(|m| m.score()).max(),
    };
    distribution.response(task)?;
    Ok(summary)
}

/// Run `rounds` rounds in sequence, stopping at the first error.
pub fn run_rounds<R: Rng + ?Sized>(
    distribution: &dyn Distribution,
    rounds: u32,
    strategy: &dyn MutationStrategy,
    evaluator: &mut dyn Evaluator,
    rng: &mut R,
    feedback: &Feedback,
) -> Result<Vec<RoundSummary>, SessionError> {
    let mut summaries = Vec::with_capacity(rounds as usize);
    for round in 1..=rounds {
        let summary = run_round(distribution, strategy, evaluator, rng, feedback)?;
        info!(
            "round {round}/{rounds}: {} epochs over {} melodies, best score {:?}",
            summary.epochs, summary.melodies, summary.best_score
        );
        summaries.push(summary);
    }
    Ok(summaries)
}
