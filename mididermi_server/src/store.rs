// SQLite persistence for the melody pool.
//
// The store keeps one snapshot of the whole pool: every `store_melodies`
// replaces the table contents inside a single transaction, so a crash mid-write
// leaves the previous snapshot intact. Notes are kept in the flat
// "pitch offset duration velocity ..." text form (`Melody::notes_in_numbers`).
//
// Schema (user_version 1):
//   melodies(position PK, system_id, sequence, instrument, score, genre)
// `system_id` is not unique: merged melodies keep their worker-side ids.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info};

use mididermi_music::melody::{Melody, MelodyIdAllocator};
use mididermi_music::providers::{MelodySource, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where the full pool goes on `persistent_store`.
pub trait MelodyStore: Send {
    fn load_melodies(&mut self) -> Result<Vec<Melody>, StoreError>;

    fn store_melodies(&mut self, melodies: &[Melody]) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        migrate(&conn)?;
        debug!("opened melody store {}", path.display());
        Ok(SqliteStore { conn })
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS melodies (
            position   INTEGER PRIMARY KEY,
            system_id  INTEGER NOT NULL,
            sequence   TEXT NOT NULL,
            instrument INTEGER NOT NULL,
            score      INTEGER NOT NULL,
            genre      INTEGER NOT NULL
        );
        PRAGMA user_version = 1;",
    )
}

impl MelodyStore for SqliteStore {
    fn load_melodies(&mut self) -> Result<Vec<Melody>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT system_id, sequence, instrument, score, genre
             FROM melodies ORDER BY position",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let sequence: String = row.get(1)?;
            let instrument: i64 = row.get(2)?;
            let mut melody = Melody::with_notes(
                u64::try_from(id).unwrap_or(0),
                i32::try_from(instrument).unwrap_or(1),
                Melody::parse_notes_in_numbers(&sequence),
            );
            melody.set_score(row.get(3)?);
            melody.set_genre(row.get(4)?);
            Ok(melody)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn store_melodies(&mut self, melodies: &[Melody]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM melodies", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO melodies (system_id, sequence, instrument, score, genre)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for melody in melodies {
                insert.execute(params![
                    i64::try_from(melody.id()).unwrap_or(i64::MAX),
                    melody.notes_in_numbers(),
                    melody.instrument(),
                    melody.score(),
                    melody.genre(),
                ])?;
            }
        }
        tx.commit()?;
        debug!("stored {} melodies", melodies.len());
        Ok(())
    }
}

/// Melody source reading the last stored snapshot.
///
/// Loaded melodies keep their stored ids; the allocator is advanced past the
/// largest one so later generated melodies don't reuse them.
pub struct StoreSource {
    path: PathBuf,
    ids: Arc<MelodyIdAllocator>,
}

impl StoreSource {
    pub fn new(path: impl Into<PathBuf>, ids: Arc<MelodyIdAllocator>) -> Self {
        StoreSource {
            path: path.into(),
            ids,
        }
    }
}

impl MelodySource for StoreSource {
    fn name(&self) -> &str {
        "database"
    }

    fn provide(&mut self) -> Result<Vec<Melody>, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::Unavailable(format!(
                "{} does not exist",
                self.path.display()
            )));
        }
        let melodies = SqliteStore::open(&self.path)
            .and_then(|mut store| store.load_melodies())
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        if let Some(max) = melodies.iter().map(Melody::id).max() {
            self.ids.observe(max);
        }
        info!("loaded {} melodies from {}", melodies.len(), self.path.display());
        Ok(melodies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mididermi_music::Note;

    fn melody(id: u64, pitch: i32, score: i64) -> Melody {
        let mut m = Melody::with_notes(
            id,
            12,
            vec![Note::new(pitch, 1, 10, 64), Note::new(pitch + 2, 11, 5, 90)],
        );
        m.set_score(score);
        m.set_genre(3);
        m
    }

    #[test]
    fn snapshot_roundtrips_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(&dir.path().join("pool.sqlite3")).unwrap();
        let melodies = vec![melody(4, 60, -3), melody(9, 70, 12)];
        store.store_melodies(&melodies).unwrap();

        let loaded = store.load_melodies().unwrap();
        assert_eq!(loaded, melodies);
        assert_eq!(loaded[0].id(), 4);
        assert_eq!(loaded[0].score(), -3);
        assert_eq!(loaded[1].score(), 12);
        assert_eq!(loaded[1].genre(), 3);
    }

    #[test]
    fn storing_replaces_the_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(&dir.path().join("pool.sqlite3")).unwrap();
        store
            .store_melodies(&[melody(1, 60, 0), melody(2, 61, 0)])
            .unwrap();
        store.store_melodies(&[melody(3, 62, 5)]).unwrap();
        let loaded = store.load_melodies().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id(), 3);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/pool.sqlite3");
        SqliteStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn store_source_advances_id_allocator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.sqlite3");
        SqliteStore::open(&path)
            .unwrap()
            .store_melodies(&[melody(40, 60, 1), melody(7, 61, 2)])
            .unwrap();

        let ids = Arc::new(MelodyIdAllocator::new());
        let mut source = StoreSource::new(&path, Arc::clone(&ids));
        let loaded = source.provide().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(ids.next(), 41);
    }

    #[test]
    fn missing_database_is_unavailable_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sqlite3");
        let mut source = StoreSource::new(&path, Arc::new(MelodyIdAllocator::new()));
        assert!(matches!(source.provide(), Err(SourceError::Unavailable(_))));
        assert!(!path.exists());
    }
}
