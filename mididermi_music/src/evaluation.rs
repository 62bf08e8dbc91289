// Human-in-the-loop fitness evaluation.
//
// The DE engine has no objective function. For every candidate it opens a
// judgment window on a shared `Feedback`, hands the candidate to an
// `Evaluator`, and when the evaluator returns it closes the window and adds
// the accumulated votes to the candidate's score. Anything holding a clone of
// the `Feedback` (a keyboard thread, a GUI, a test) may vote `+1`/`-1` while
// the window is open. Votes with no window open are dropped.
//
// `ListeningEvaluator` is the real-time implementation of the contract:
//   render -> start playback -> wait for the playback length -> settle delay
//   -> stop -> return.
// The wait is a blocking suspension point owned by the `Playback`
// collaborator. Candidates are strictly sequential; nothing is pipelined.
//
// While a candidate plays, an optional `Visualizer` is redrawn from a scoped
// thread every `REDRAW_INTERVAL`. It is woken and cancelled as soon as
// playback ends, and never influences scoring: a panicking visualizer is
// logged and the audition carries on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::melody::Melody;

/// Delay between visualizer frames.
pub const REDRAW_INTERVAL: Duration = Duration::from_millis(60);

/// Pause after each candidate before the next one starts rendering.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("render failed: {0}")]
    Render(String),
    #[error("playback failed: {0}")]
    Playback(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared vote box for the candidate currently being judged.
///
/// Cloning shares the same window. `Default` creates a fresh, closed one.
#[derive(Debug, Clone, Default)]
pub struct Feedback {
    window: Arc<Mutex<Option<i64>>>,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vote the current candidate up. Returns false if nothing is being judged.
    pub fn score_up(&self) -> bool {
        self.vote(1)
    }

    /// Vote the current candidate down. Returns false if nothing is being judged.
    pub fn score_down(&self) -> bool {
        self.vote(-1)
    }

    pub fn is_open(&self) -> bool {
        self.window.lock().is_some()
    }

    fn vote(&self, delta: i64) -> bool {
        match self.window.lock().as_mut() {
            Some(total) => {
                *total = total.saturating_add(delta);
                true
            }
            None => false,
        }
    }

    pub(crate) fn open(&self) {
        *self.window.lock() = Some(0);
    }

    /// Close the window and return the net votes it collected.
    pub(crate) fn close(&self) -> i64 {
        self.window.lock().take().unwrap_or(0)
    }
}

/// Presents one candidate and blocks until its judgment window should close.
pub trait Evaluator {
    fn audition(&mut self, melody: &Melody, feedback: &Feedback) -> Result<(), EvaluationError>;
}

/// A playable encoding of a melody plus its real-time length.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub bytes: Vec<u8>,
    pub length: Duration,
}

/// Encodes a melody into a playable byte stream (see `midi::MidiRenderer`).
pub trait Renderer {
    fn render(&self, melody: &Melody) -> Result<Rendition, EvaluationError>;
}

/// Starts playback of a rendition.
pub trait Player {
    fn start(&mut self, rendition: &Rendition) -> Result<Box<dyn Playback>, EvaluationError>;
}

/// One running playback.
pub trait Playback {
    fn clock(&self) -> PlaybackClock;

    /// Block until playback has run its full length.
    fn wait(&mut self) -> Result<(), EvaluationError>;

    /// Stop and release resources. Must be safe to call after `wait`.
    fn stop(&mut self);
}

/// Wall-clock view of a playback, cheap to copy into other threads.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    started: Instant,
    length: Duration,
}

impl PlaybackClock {
    pub fn start_now(length: Duration) -> Self {
        PlaybackClock {
            started: Instant::now(),
            length,
        }
    }

    pub fn length(&self) -> Duration {
        self.length
    }

    pub fn remaining(&self) -> Duration {
        self.length.saturating_sub(self.started.elapsed())
    }

    /// Normalised playback position in [0, 1].
    pub fn position(&self) -> f64 {
        if self.length.is_zero() {
            return 1.0;
        }
        (self.started.elapsed().as_secs_f64() / self.length.as_secs_f64()).clamp(0.0, 1.0)
    }
}

/// Best-effort drawing while a candidate plays.
pub trait Visualizer: Sync {
    fn frame(&self, melody: &Melody, position: f64);

    /// Called once after the last frame of a candidate.
    fn finish(&self, _melody: &Melody) {}
}

/// Real-time evaluator: render, play, wait, settle.
pub struct ListeningEvaluator<R, P> {
    renderer: R,
    player: P,
    settle: Duration,
    visualizer: Option<Box<dyn Visualizer + Send>>,
}

impl<R: Renderer, P: Player> ListeningEvaluator<R, P> {
    pub fn new(renderer: R, player: P) -> Self {
        ListeningEvaluator {
            renderer,
            player,
            settle: DEFAULT_SETTLE,
            visualizer: None,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_visualizer(mut self, visualizer: Box<dyn Visualizer + Send>) -> Self {
        self.visualizer = Some(visualizer);
        self
    }
}

impl<R: Renderer, P: Player> Evaluator for ListeningEvaluator<R, P> {
    fn audition(&mut self, melody: &Melody, _feedback: &Feedback) -> Result<(), EvaluationError> {
        let rendition = self.renderer.render(melody)?;
        let mut playback = self.player.start(&rendition)?;
        let clock = playback.clock();
        let cancelled = AtomicBool::new(false);
        let visualizer = self.visualizer.as_deref();

        let waited = thread::scope(|s| {
            let drawer = visualizer.map(|vis| {
                let cancelled = &cancelled;
                s.spawn(move || {
                    while !cancelled.load(Ordering::Acquire) {
                        vis.frame(melody, clock.position());
                        thread::park_timeout(REDRAW_INTERVAL);
                    }
                    vis.finish(melody);
                })
            });
            let waited = playback.wait();
            cancelled.store(true, Ordering::Release);
            if let Some(drawer) = drawer {
                drawer.thread().unpark();
                if drawer.join().is_err() {
                    warn!("visualizer panicked while drawing {melody}, ignored");
                }
            }
            waited
        });

        if waited.is_ok() {
            thread::sleep(self.settle);
        }
        playback.stop();
        waited
    }
}
