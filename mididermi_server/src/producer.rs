// MIDI file output of the pool.
//
// Every call writes one `.mid` file per melody into the target directory,
// named `<id>_<genre>_<instrument>_<millis>.mid`, where `millis` is the wall
// clock at the time of writing. Files from earlier calls are left alone, so
// the directory accumulates a history of the pool.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use mididermi_music::Melody;
use mididermi_music::midi::write_midi;

use crate::store::StoreError;

pub trait FileSetProducer: Send {
    /// Write the melodies out. Returns how many files were written.
    fn produce(&mut self, melodies: &[Melody]) -> Result<usize, StoreError>;
}

pub struct MidiFileProducer {
    dir: PathBuf,
}

impl MidiFileProducer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        MidiFileProducer { dir: dir.into() }
    }

    pub fn file_name(melody: &Melody, millis: u128) -> String {
        format!(
            "{}_{}_{}_{millis}.mid",
            melody.id(),
            melody.genre(),
            melody.instrument()
        )
    }
}

impl FileSetProducer for MidiFileProducer {
    fn produce(&mut self, melodies: &[Melody]) -> Result<usize, StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut written = 0;
        for melody in melodies {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            let path = self.dir.join(Self::file_name(melody, millis));
            match write_midi(melody, &path) {
                Ok(()) => written += 1,
                Err(e) => warn!("failed to write {}: {e}", path.display()),
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mididermi_music::Note;

    #[test]
    fn file_name_carries_id_genre_and_instrument() {
        let mut m = Melody::new(17, 33);
        m.set_genre(2);
        assert_eq!(MidiFileProducer::file_name(&m, 1234), "17_2_33_1234.mid");
    }

    #[test]
    fn writes_one_file_per_melody() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("midis");
        let melodies = vec![
            Melody::with_notes(1, 1, vec![Note::new(60, 1, 10, 64)]),
            Melody::with_notes(2, 5, vec![Note::new(62, 1, 10, 64)]),
        ];
        let written = MidiFileProducer::new(&out).produce(&melodies).unwrap();
        assert_eq!(written, 2);

        let mut names: Vec<String> = std::fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert!(names[0].starts_with("1_0_1_"));
        assert!(names[1].starts_with("2_0_5_"));
        assert!(names.iter().all(|n| n.ends_with(".mid")));
    }
}
