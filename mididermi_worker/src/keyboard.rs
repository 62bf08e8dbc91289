// Console scoring: `+` and `-` typed while a melody plays.
//
// A background thread reads lines from stdin (or any `BufRead`) and turns
// every `+` into an up vote and every `-` into a down vote on the shared
// `Feedback`. Other characters are ignored. Votes typed between candidates
// fall outside any judgment window and are dropped by `Feedback` itself.

use std::io::BufRead;
use std::thread;

use tracing::debug;

use mididermi_music::Feedback;

/// Apply the votes in one line. Returns how many were counted.
pub fn apply_line(line: &str, feedback: &Feedback) -> usize {
    line.chars()
        .filter_map(|c| match c {
            '+' => Some(feedback.score_up()),
            '-' => Some(feedback.score_down()),
            _ => None,
        })
        .filter(|&counted| counted)
        .count()
}

/// Read votes from `input` until it ends. The thread is detached by callers
/// that read stdin, since a blocked read can't be interrupted.
pub fn spawn_keyboard<R>(input: R, feedback: Feedback) -> thread::JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("keyboard input ended: {e}");
                    return;
                }
            };
            let counted = apply_line(&line, &feedback);
            if counted == 0 && line.contains(['+', '-']) {
                debug!("votes ignored, nothing is playing");
            }
        }
    })
}
