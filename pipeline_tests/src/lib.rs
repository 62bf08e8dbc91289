// Test-only worker harness for end-to-end pipeline tests.
//
// `TestWorker` wraps the real `WorkerClient` and the real session loop from
// `mididermi_worker`; only the listener is scripted. `ScriptedListener`
// stands in for the human: it decides a vote for each melody it is shown and
// casts it through the open judgment window, with no playback delay.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

use mididermi_music::evaluation::EvaluationError;
use mididermi_music::{Evaluator, Feedback, Melody, ScaledDifference};
use mididermi_server::{
    Coordinator, ServerConfig, ServerHandle, WorkerClient, build_coordinator, start_server,
};
use mididermi_worker::{RoundSummary, run_rounds};

/// Build the configured pool and serve it on a free localhost port.
pub fn start_test_server(config: &ServerConfig) -> (ServerHandle, SocketAddr, Arc<Coordinator>) {
    let coordinator = Arc::new(build_coordinator(config));
    let (handle, addr) =
        start_server(Arc::clone(&coordinator), "127.0.0.1", 0).expect("start_server failed");
    (handle, addr, coordinator)
}

/// A listener that votes `judge(melody)` times on every candidate (negative
/// for down votes).
pub struct ScriptedListener<F> {
    judge: F,
    pub heard: usize,
}

impl<F: FnMut(&Melody) -> i64> ScriptedListener<F> {
    pub fn new(judge: F) -> Self {
        ScriptedListener { judge, heard: 0 }
    }
}

impl<F: FnMut(&Melody) -> i64> Evaluator for ScriptedListener<F> {
    fn audition(&mut self, melody: &Melody, feedback: &Feedback) -> Result<(), EvaluationError> {
        self.heard += 1;
        let votes = (self.judge)(melody);
        for _ in 0..votes.unsigned_abs() {
            let counted = if votes > 0 {
                feedback.score_up()
            } else {
                feedback.score_down()
            };
            assert!(counted, "vote cast outside a judgment window");
        }
        Ok(())
    }
}

/// A connected worker with its own seeded mutation RNG.
pub struct TestWorker {
    client: WorkerClient,
    rng: StdRng,
    feedback: Feedback,
}

impl TestWorker {
    pub fn connect(addr: SocketAddr, name: &str, seed: u64) -> Self {
        let client = WorkerClient::connect(addr, name).expect("TestWorker::connect failed");
        TestWorker {
            client,
            rng: StdRng::seed_from_u64(seed),
            feedback: Feedback::new(),
        }
    }

    /// Run `rounds` full request/calculate/response rounds.
    pub fn run(&mut self, rounds: u32, listener: &mut dyn Evaluator) -> Vec<RoundSummary> {
        run_rounds(
            &self.client,
            rounds,
            &ScaledDifference::default(),
            listener,
            &mut self.rng,
            &self.feedback,
        )
        .expect("session failed")
    }

    pub fn disconnect(self) {
        self.client.close().expect("goodbye failed");
    }
}
