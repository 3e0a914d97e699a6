//! Single-file JSON backend.
//!
//! The whole state lives in `<data_dir>/dominion.json`. Writes go to an
//! in-memory [`MemoryRepository`]; [`flush`](Repository::flush) serializes
//! it to `dominion.json.tmp` and renames over the real file, so a crash
//! mid-write leaves the previous file intact. A file that fails to load
//! can be moved aside with [`JsonFileRepository::quarantine`] before the
//! engine starts over.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use dominion_types::{CellKey, ClaimedCell, Faction, FactionId, PlayerPowerRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DbError;
use crate::repository::{MemoryRepository, Repository, Snapshot};

/// File name inside the data directory.
const DATA_FILE: &str = "dominion.json";

/// Current document layout.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: u32,
    #[serde(default)]
    factions: Vec<Faction>,
    #[serde(default)]
    cells: Vec<ClaimedCell>,
    #[serde(default)]
    players: Vec<PlayerPowerRecord>,
}

/// Stores engine state in one JSON document.
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    tables: MemoryRepository,
    dirty: bool,
}

impl JsonFileRepository {
    /// Use `data_dir`, creating it if needed. Nothing is read until
    /// [`load_all`](Repository::load_all).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Io`] if the directory cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self, DbError> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(DATA_FILE),
            tables: MemoryRepository::new(),
            dirty: false,
        })
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename an unreadable data file to `dominion.json.corrupt-<timestamp>`
    /// so the next flush cannot overwrite it. Returns the new path, or
    /// `None` if there was no file.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Io`] if the rename fails.
    pub fn quarantine(&self) -> Result<Option<PathBuf>, DbError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let target = self.path.with_extension(format!("json.corrupt-{stamp}"));
        fs::rename(&self.path, &target)?;
        warn!(
            from = %self.path.display(),
            to = %target.display(),
            "Moved unreadable data file aside"
        );
        Ok(Some(target))
    }

    fn touch(&mut self) {
        self.dirty = true;
    }
}

impl Repository for JsonFileRepository {
    fn load_all(&mut self) -> Result<Snapshot, DbError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No data file, starting empty");
            return Ok(Snapshot::default());
        }
        let bytes = fs::read(&self.path)?;
        let document: Document = serde_json::from_slice(&bytes)?;
        if document.version != FORMAT_VERSION {
            return Err(DbError::Config(format!(
                "unsupported data file version {} (expected {FORMAT_VERSION})",
                document.version
            )));
        }
        let snapshot = Snapshot {
            factions: document.factions,
            cells: document.cells,
            players: document.players,
        };
        info!(
            path = %self.path.display(),
            factions = snapshot.factions.len(),
            cells = snapshot.cells.len(),
            players = snapshot.players.len(),
            "Loaded data file"
        );
        self.tables.replace(snapshot.clone());
        self.dirty = false;
        Ok(snapshot)
    }

    fn create_faction(&mut self, faction: &Faction) -> Result<(), DbError> {
        self.touch();
        self.tables.create_faction(faction)
    }

    fn update_faction(&mut self, faction: &Faction) -> Result<(), DbError> {
        self.touch();
        self.tables.update_faction(faction)
    }

    fn delete_faction(&mut self, id: FactionId) -> Result<(), DbError> {
        self.touch();
        self.tables.delete_faction(id)
    }

    fn create_cell(&mut self, cell: &ClaimedCell) -> Result<(), DbError> {
        self.touch();
        self.tables.create_cell(cell)
    }

    fn delete_cell(&mut self, key: &CellKey) -> Result<(), DbError> {
        self.touch();
        self.tables.delete_cell(key)
    }

    fn create_player_record(&mut self, record: &PlayerPowerRecord) -> Result<(), DbError> {
        self.touch();
        self.tables.create_player_record(record)
    }

    fn update_player_record(&mut self, record: &PlayerPowerRecord) -> Result<(), DbError> {
        self.touch();
        self.tables.update_player_record(record)
    }

    fn flush(&mut self) -> Result<(), DbError> {
        if !self.dirty {
            return Ok(());
        }
        let snapshot = self.tables.snapshot();
        let document = Document {
            version: FORMAT_VERSION,
            factions: snapshot.factions,
            cells: snapshot.cells,
            players: snapshot.players,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Flushed data file");
        Ok(())
    }
}
