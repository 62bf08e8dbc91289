// Task: one self-contained slice of evolution handed to a worker.
//
// A task bundles a private deep copy of a population with the number of
// epochs to run on it. Construction always copies, so the server keeps no
// live reference into the task and nothing a worker does to its population
// reaches the reservoir until the task is handed back through
// `Distribution::response`.
//
// Lifecycle:
//   Created --calculate()--> Computing --(epochs done)--> Completed
// `calculate` runs once. Returning the task consumes it, so a returned task
// can't be reused.

use mididermi_music::{Evaluator, Feedback, MutationStrategy, Population};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Created,
    Computing,
    Completed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task already {0:?}; calculate runs once")]
    AlreadyStarted(TaskStatus),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    population: Population,
    epoch_count: u32,
    status: TaskStatus,
}

impl Task {
    pub fn new(population: &Population, epoch_count: u32) -> Self {
        Task {
            population: population.clone(),
            epoch_count,
            status: TaskStatus::Created,
        }
    }

    pub fn epoch_count(&self) -> u32 {
        self.epoch_count
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Run the task's epochs locally. Blocks for as long as the listener takes
    /// to judge every candidate of every epoch.
    pub fn calculate<R: Rng + ?Sized>(
        &mut self,
        strategy: &dyn MutationStrategy,
        evaluator: &mut dyn Evaluator,
        rng: &mut R,
    ) -> Result<(), TaskError> {
        if self.status != TaskStatus::Created {
            return Err(TaskError::AlreadyStarted(self.status));
        }
        self.status = TaskStatus::Computing;
        info!(
            "calculating {} epochs over {} melodies",
            self.epoch_count,
            self.population.len()
        );
        self.population
            .epoches(self.epoch_count, strategy, evaluator, rng);
        self.status = TaskStatus::Completed;
        Ok(())
    }

    /// The population as it stands now.
    pub fn result(&self) -> &Population {
        &self.population
    }

    pub fn into_population(self) -> Population {
        self.population
    }

    /// Judgment window of the candidate being evaluated during `calculate`.
    pub fn feedback(&self) -> Feedback {
        self.population.feedback()
    }

    pub fn attach_feedback(&mut self, feedback: Feedback) {
        self.population.attach_feedback(feedback);
    }

    pub fn score_up(&self) -> bool {
        self.population.score_up()
    }

    pub fn score_down(&self) -> bool {
        self.population.score_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mididermi_music::evaluation::EvaluationError;
    use mididermi_music::{Melody, Note, ScaledDifference};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct UpVoter;

    impl Evaluator for UpVoter {
        fn audition(&mut self, _m: &Melody, feedback: &Feedback) -> Result<(), EvaluationError> {
            feedback.score_up();
            Ok(())
        }
    }

    fn population() -> Population {
        let mut p = Population::new();
        p.add(Melody::with_notes(0, 1, vec![Note::new(60, 1, 10, 64)]));
        p.add(Melody::with_notes(0, 2, vec![Note::new(72, 5, 20, 90)]));
        p
    }

    #[test]
    fn construction_copies_the_population() {
        let mut source = population();
        let task = Task::new(&source, 2);
        source.evaluate(&mut UpVoter);
        assert!(task.result().members().iter().all(|m| m.score() == 0));
        assert_eq!(task.status(), TaskStatus::Created);
        assert_eq!(task.epoch_count(), 2);
    }

    #[test]
    fn calculate_only_touches_the_private_copy() {
        let source = population();
        let mut task = Task::new(&source, 1);
        task.calculate(
            &ScaledDifference::default(),
            &mut UpVoter,
            &mut StdRng::seed_from_u64(4),
        )
        .unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(source.members().iter().all(|m| m.score() == 0));
        assert_eq!(task.result().len(), 2);
        assert!(task.result().members().iter().all(|m| m.score() >= 1));
    }

    #[test]
    fn calculate_runs_once() {
        let mut task = Task::new(&population(), 0);
        let mut rng = StdRng::seed_from_u64(0);
        task.calculate(&ScaledDifference::default(), &mut UpVoter, &mut rng)
            .unwrap();
        let err = task
            .calculate(&ScaledDifference::default(), &mut UpVoter, &mut rng)
            .unwrap_err();
        assert_eq!(err, TaskError::AlreadyStarted(TaskStatus::Completed));
    }

    #[test]
    fn zero_epoch_task_returns_population_unchanged() {
        let source = population();
        let mut task = Task::new(&source, 0);
        task.calculate(
            &ScaledDifference::default(),
            &mut UpVoter,
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();
        assert_eq!(task.into_population().melodies(), source.melodies());
    }

    #[test]
    fn votes_outside_calculation_are_ignored() {
        let task = Task::new(&population(), 1);
        assert!(!task.score_up());
        assert!(!task.score_down());
    }

    #[test]
    fn serialized_task_keeps_status_and_epochs() {
        let mut task = Task::new(&population(), 3);
        task.status = TaskStatus::Computing;
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status(), TaskStatus::Computing);
        assert_eq!(back.epoch_count(), 3);
        assert_eq!(back.result().melodies(), task.result().melodies());
    }
}
