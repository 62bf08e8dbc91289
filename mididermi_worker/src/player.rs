// Players for rendered melodies.
//
// `CommandPlayer` hands each rendition to an external MIDI player (e.g.
// `timidity`) through a temporary `.mid` file. `SilentPlayer` plays nothing
// and only keeps time, which is enough for scripted listeners and for
// scoring from the visualizer alone.
//
// Either way the playback clock is the rendition length, not the child
// process: a player that exits early still leaves the listener the full
// length to vote, and one that lingers is killed on `stop`.

use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use mididermi_music::evaluation::{EvaluationError, Playback, PlaybackClock, Player, Rendition};

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Runs `program [args..] <file.mid>` for every rendition.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>) -> Self {
        CommandPlayer {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Split a command line such as `"timidity -Os"` on whitespace.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(CommandPlayer::new(program).with_args(parts))
    }
}

impl Player for CommandPlayer {
    fn start(&mut self, rendition: &Rendition) -> Result<Box<dyn Playback>, EvaluationError> {
        let mut file = tempfile::Builder::new()
            .prefix("mididermi-")
            .suffix(".mid")
            .tempfile()?;
        file.write_all(&rendition.bytes)?;
        file.flush()?;

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EvaluationError::Playback(format!("{}: {e}", self.program)))?;
        debug!("spawned {} for {:?}", self.program, rendition.length);

        Ok(Box::new(CommandPlayback {
            child: Some(child),
            _file: file,
            clock: PlaybackClock::start_now(rendition.length),
        }))
    }
}

struct CommandPlayback {
    child: Option<Child>,
    // Removed from disk on drop, after the child is gone.
    _file: NamedTempFile,
    clock: PlaybackClock,
}

impl Playback for CommandPlayback {
    fn clock(&self) -> PlaybackClock {
        self.clock
    }

    fn wait(&mut self) -> Result<(), EvaluationError> {
        while !self.clock.remaining().is_zero() {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.child = None;
                    if !status.success() {
                        return Err(EvaluationError::Playback(format!(
                            "player exited with {status}"
                        )));
                    }
                }
            }
            thread::sleep(self.clock.remaining().min(EXIT_POLL));
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("player already gone: {e}");
            }
            if let Err(e) = child.wait() {
                warn!("failed to reap player: {e}");
            }
        }
    }
}

impl Drop for CommandPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Keeps time without producing sound.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentPlayer;

impl Player for SilentPlayer {
    fn start(&mut self, rendition: &Rendition) -> Result<Box<dyn Playback>, EvaluationError> {
        Ok(Box::new(SilentPlayback {
            clock: PlaybackClock::start_now(rendition.length),
        }))
    }
}

struct SilentPlayback {
    clock: PlaybackClock,
}

impl Playback for SilentPlayback {
    fn clock(&self) -> PlaybackClock {
        self.clock
    }

    fn wait(&mut self) -> Result<(), EvaluationError> {
        thread::sleep(self.clock.remaining());
        Ok(())
    }

    fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn rendition(millis: u64) -> Rendition {
        Rendition {
            bytes: b"MThd".to_vec(),
            length: Duration::from_millis(millis),
        }
    }

    #[test]
    fn silent_player_waits_for_the_full_length() {
        let begin = Instant::now();
        let mut playback = SilentPlayer.start(&rendition(40)).unwrap();
        playback.wait().unwrap();
        playback.stop();
        assert!(begin.elapsed() >= Duration::from_millis(40));
        assert_eq!(playback.clock().remaining(), Duration::ZERO);
    }

    #[test]
    fn command_line_is_split_into_program_and_args() {
        let player = CommandPlayer::from_command_line("  timidity -Os  -q ").unwrap();
        assert_eq!(player.program, "timidity");
        assert_eq!(player.args, vec!["-Os", "-q"]);
        assert!(CommandPlayer::from_command_line("   ").is_none());
    }

    #[test]
    fn missing_program_is_a_playback_error() {
        let mut player = CommandPlayer::new("mididermi-no-such-player-binary");
        let err = player.start(&rendition(10)).err().unwrap();
        assert!(matches!(err, EvaluationError::Playback(_)));
    }

    #[cfg(unix)]
    #[test]
    fn early_exit_still_paces_to_the_rendition_length() {
        let mut player = CommandPlayer::new("true");
        let begin = Instant::now();
        let mut playback = player.start(&rendition(60)).unwrap();
        playback.wait().unwrap();
        playback.stop();
        assert!(begin.elapsed() >= Duration::from_millis(60));
    }

    #[cfg(unix)]
    #[test]
    fn failing_player_is_reported() {
        let mut player = CommandPlayer::new("false");
        let mut playback = player.start(&rendition(2_000)).unwrap();
        let err = playback.wait().unwrap_err();
        assert!(matches!(err, EvaluationError::Playback(_)));
        playback.stop();
    }

    #[cfg(unix)]
    #[test]
    fn stop_kills_a_lingering_player() {
        let mut player = CommandPlayer::new("sh").with_args(["-c".to_string(), "sleep 30".to_string()]);
        let mut playback = player.start(&rendition(10)).unwrap();
        playback.wait().unwrap();
        let begin = Instant::now();
        playback.stop();
        assert!(begin.elapsed() < Duration::from_secs(5));
    }
}
