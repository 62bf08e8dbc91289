// Differential evolution over melodies, with a human as the fitness function.
//
// A `Population` holds the members plus a target `size`: the steady-state
// member count. One epoch is
//
//   recombine -> evaluate -> sort -> shrink
//
// - `recombine` appends one trial per original member, so the collection
//   grows to at most 2 * size. Trials made this round never become bases or
//   donors in the same round.
// - `evaluate` auditions every member (originals and trials) in order through
//   an `Evaluator`, folding the votes collected in each judgment window into
//   that member's score.
// - `sort` orders by descending score, stable on ties.
// - `shrink` truncates back to `size`. It assumes `sort` ran first; on an
//   unsorted collection it keeps an arbitrary prefix.
//
// Ids: `add` and `recombine` label members with the collection length at the
// moment they are appended. Members built with `from_members` keep their ids.
//
// `Feedback` is not part of the serialized state; a deserialized or cloned
// population gets a fresh, closed window unless one is attached explicitly.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::evaluation::{Evaluator, Feedback};
use crate::melody::Melody;
use crate::strategy::MutationStrategy;

/// Min population size for generated batches.
pub const MIN_RANDOM_POPULATION: usize = 3;

/// Max population size for generated batches.
pub const MAX_RANDOM_POPULATION: usize = 5;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Population {
    members: Vec<Melody>,
    size: usize,
    #[serde(skip)]
    feedback: Feedback,
}

impl Clone for Population {
    /// Deep copy of the members. The copy does not share the judgment window.
    fn clone(&self) -> Self {
        Population {
            members: self.members.clone(),
            size: self.size,
            feedback: Feedback::new(),
        }
    }
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    /// A population over existing melodies, ids untouched, target size equal
    /// to the number of melodies.
    pub fn from_members(members: Vec<Melody>) -> Self {
        let size = members.len();
        Population {
            members,
            size,
            feedback: Feedback::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Melody] {
        &self.members
    }

    /// Deep copy of every member.
    pub fn melodies(&self) -> Vec<Melody> {
        self.members.clone()
    }

    pub fn into_melodies(self) -> Vec<Melody> {
        self.members
    }

    /// Handle for voting on whichever member is currently under evaluation.
    pub fn feedback(&self) -> Feedback {
        self.feedback.clone()
    }

    /// Route judgment votes through an externally owned window (e.g. one a
    /// keyboard thread already holds).
    pub fn attach_feedback(&mut self, feedback: Feedback) {
        self.feedback = feedback;
    }

    /// Append a melody during initial construction. Its id becomes its index
    /// and the target size grows with it.
    pub fn add(&mut self, mut melody: Melody) {
        melody.set_id(self.members.len() as u64);
        self.members.push(melody);
        self.size += 1;
    }

    /// Append one DE trial per current member. Returns how many trials came
    /// from a zero delta and so repeat their base unchanged.
    pub fn recombine<R: Rng + ?Sized>(
        &mut self,
        strategy: &dyn MutationStrategy,
        rng: &mut R,
    ) -> usize {
        let n = self.members.len();
        let mut unchanged = 0;
        for i in 0..n {
            let donor = rng.random_range(0..n);
            let delta = strategy.differential(&self.members[i], &self.members[donor]);
            if delta.is_zero() {
                unchanged += 1;
            }
            let mut trial = strategy.apply(&self.members[i], &delta);
            trial.set_id(self.members.len() as u64);
            self.members.push(trial);
        }
        if unchanged > 0 {
            debug!("{unchanged} of {n} trials repeat their base");
        }
        unchanged
    }

    /// Audition every member in order. A failed audition leaves that member's
    /// score unchanged and moves on to the next one.
    pub fn evaluate(&mut self, evaluator: &mut dyn Evaluator) {
        for i in 0..self.members.len() {
            self.feedback.open();
            let outcome = evaluator.audition(&self.members[i], &self.feedback);
            let votes = self.feedback.close();
            let member = &mut self.members[i];
            match outcome {
                Ok(()) => {
                    member.add_score(votes);
                    debug!("{member}: {votes:+} votes");
                }
                Err(e) => warn!("audition of {member} failed, score unchanged: {e}"),
            }
        }
    }

    /// Stable descending sort by score, by repeated adjacent-swap passes.
    pub fn sort(&mut self) {
        let mut done = false;
        while !done {
            done = true;
            for i in 1..self.members.len() {
                if self.members[i - 1].score() < self.members[i].score() {
                    self.members.swap(i - 1, i);
                    done = false;
                }
            }
        }
    }

    /// Drop everything past the target size. Call `sort` first.
    pub fn shrink(&mut self) {
        self.members.truncate(self.size);
    }

    /// Run `count` full epochs in sequence.
    pub fn epoches<R: Rng + ?Sized>(
        &mut self,
        count: u32,
        strategy: &dyn MutationStrategy,
        evaluator: &mut dyn Evaluator,
        rng: &mut R,
    ) {
        for epoch in 0..count {
            self.recombine(strategy, rng);
            self.evaluate(evaluator);
            self.sort();
            self.shrink();
            debug!(
                "epoch {}/{count} done, best score {:?}",
                epoch + 1,
                self.members.first().map(Melody::score)
            );
        }
    }

    /// Vote the member under evaluation up. No-op when nothing is playing.
    pub fn score_up(&self) -> bool {
        self.feedback.score_up()
    }

    /// Vote the member under evaluation down. No-op when nothing is playing.
    pub fn score_down(&self) -> bool {
        self.feedback.score_down()
    }
}
