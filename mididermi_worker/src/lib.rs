// mididermi_worker — the listening side of MIDI-DE.
//
// A worker borrows tasks from the pool server, plays every candidate to a
// human, collects `+`/`-` votes from the console, and returns the evolved
// population.
//
// Module overview:
// - `session.rs`:  the request -> calculate -> response round loop.
// - `player.rs`:   `CommandPlayer` (external MIDI player) and `SilentPlayer`.
// - `keyboard.rs`: stdin vote reader.
// - `visual.rs`:   `ConsoleMeter`, a one-line playback visualizer.

pub mod keyboard;
pub mod player;
pub mod session;
pub mod visual;

pub use player::{CommandPlayer, SilentPlayer};
pub use session::{RoundSummary, SessionError, run_round, run_rounds};
pub use visual::ConsoleMeter;
