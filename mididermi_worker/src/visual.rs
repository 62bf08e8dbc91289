// Console meter shown while a candidate plays.
//
// Each frame rewrites one terminal line: a progress bar for the playback
// position, then the pitch currently sounding drawn as a marker on a
// keyboard-wide strip. Output errors are swallowed; drawing never affects
// the session.

use std::io::Write;

use parking_lot::Mutex;

use mididermi_music::Melody;
use mididermi_music::evaluation::Visualizer;
use mididermi_music::note::MAX_PITCH;

const DEFAULT_WIDTH: usize = 32;

pub struct ConsoleMeter<W> {
    out: Mutex<W>,
    width: usize,
}

impl<W: Write + Send> ConsoleMeter<W> {
    pub fn new(out: W) -> Self {
        ConsoleMeter {
            out: Mutex::new(out),
            width: DEFAULT_WIDTH,
        }
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(1);
        self
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn line(&self, melody: &Melody, position: f64) -> String {
        let filled = ((position.clamp(0.0, 1.0) * self.width as f64).round() as usize).min(self.width);
        let mut line = format!(
            "#{:<4} [{}{}] ",
            melody.id(),
            "=".repeat(filled),
            " ".repeat(self.width - filled)
        );
        match melody.note_at(position) {
            Some(note) => {
                let col = (note.pitch() as usize * (self.width - 1)) / MAX_PITCH as usize;
                line.push_str(&" ".repeat(col));
                line.push('*');
                line.push_str(&" ".repeat(self.width - 1 - col));
                line.push_str(&format!(" {:>3}", note.pitch()));
            }
            None => line.push_str(&" ".repeat(self.width + 4)),
        }
        line
    }
}

impl<W: Write + Send> Visualizer for ConsoleMeter<W> {
    fn frame(&self, melody: &Melody, position: f64) {
        let line = self.line(melody, position);
        let mut out = self.out.lock();
        let _ = write!(out, "\r{line}");
        let _ = out.flush();
    }

    fn finish(&self, melody: &Melody) {
        let mut out = self.out.lock();
        let _ = writeln!(out, "\r{}  score {}", self.line(melody, 1.0), melody.score());
        let _ = out.flush();
    }
}
