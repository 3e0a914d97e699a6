//! The repository contract and the in-memory backend.

use std::collections::BTreeMap;

use dominion_types::{CellKey, ClaimedCell, Faction, FactionId, PlayerId, PlayerPowerRecord, PowerChange};

use crate::error::DbError;

/// Everything persisted, as returned by [`Repository::load_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// All factions.
    pub factions: Vec<Faction>,
    /// All claimed cells.
    pub cells: Vec<ClaimedCell>,
    /// All player power records.
    pub players: Vec<PlayerPowerRecord>,
}

impl Snapshot {
    /// Whether nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.factions.is_empty() && self.cells.is_empty() && self.players.is_empty()
    }
}

/// Storage backend for engine state.
///
/// Calls are synchronous and made inline with each mutation, so
/// implementations must not block on network I/O. Backends that talk to a
/// server queue the write and return.
///
/// `create_*` and `update_*` are upserts on every backend shipped here; the
/// split exists so a backend can use cheaper inserts for new records.
pub trait Repository: Send {
    /// Read all stored state. Called once at startup.
    fn load_all(&mut self) -> Result<Snapshot, DbError>;

    /// Store a new faction.
    fn create_faction(&mut self, faction: &Faction) -> Result<(), DbError>;

    /// Store a modified faction.
    fn update_faction(&mut self, faction: &Faction) -> Result<(), DbError>;

    /// Forget a faction.
    fn delete_faction(&mut self, id: FactionId) -> Result<(), DbError>;

    /// Store a claimed cell, replacing any previous holder.
    fn create_cell(&mut self, cell: &ClaimedCell) -> Result<(), DbError>;

    /// Forget a claimed cell.
    fn delete_cell(&mut self, key: &CellKey) -> Result<(), DbError>;

    /// Store a new player record.
    fn create_player_record(&mut self, record: &PlayerPowerRecord) -> Result<(), DbError>;

    /// Store a modified player record.
    fn update_player_record(&mut self, record: &PlayerPowerRecord) -> Result<(), DbError>;

    /// Append entries to the power change log. Backends without a log
    /// ignore them.
    fn append_power_changes(&mut self, _changes: &[PowerChange]) -> Result<(), DbError> {
        Ok(())
    }

    /// Make every write so far durable.
    fn flush(&mut self) -> Result<(), DbError>;
}

/// Keeps everything in maps. Used by tests and as the working set of the
/// JSON file backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    factions: BTreeMap<FactionId, Faction>,
    cells: BTreeMap<CellKey, FactionId>,
    players: BTreeMap<PlayerId, PlayerPowerRecord>,
    power_changes: Vec<PowerChange>,
    writes: u64,
    flushes: u64,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-filled with `snapshot`.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let mut repo = Self::new();
        repo.replace(snapshot);
        repo
    }

    pub(crate) fn replace(&mut self, snapshot: Snapshot) {
        self.factions = snapshot.factions.into_iter().map(|f| (f.id, f)).collect();
        self.cells = snapshot.cells.into_iter().map(|c| (c.key, c.holder)).collect();
        self.players = snapshot
            .players
            .into_iter()
            .map(|p| (p.player_id, p))
            .collect();
    }

    /// Current contents as a snapshot.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            factions: self.factions.values().cloned().collect(),
            cells: self
                .cells
                .iter()
                .map(|(key, holder)| ClaimedCell {
                    key: key.clone(),
                    holder: *holder,
                })
                .collect(),
            players: self.players.values().cloned().collect(),
        }
    }

    /// A stored faction.
    pub fn faction(&self, id: FactionId) -> Option<&Faction> {
        self.factions.get(&id)
    }

    /// The stored holder of a cell.
    pub fn cell_holder(&self, key: &CellKey) -> Option<FactionId> {
        self.cells.get(key).copied()
    }

    /// A stored player record.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerPowerRecord> {
        self.players.get(&id)
    }

    /// The power change log.
    pub fn power_changes(&self) -> &[PowerChange] {
        &self.power_changes
    }

    /// Number of write calls received.
    pub const fn writes(&self) -> u64 {
        self.writes
    }

    /// Number of flushes received.
    pub const fn flushes(&self) -> u64 {
        self.flushes
    }

    fn wrote(&mut self) {
        self.writes = self.writes.saturating_add(1);
    }
}

impl Repository for MemoryRepository {
    fn load_all(&mut self) -> Result<Snapshot, DbError> {
        Ok(self.snapshot())
    }

    fn create_faction(&mut self, faction: &Faction) -> Result<(), DbError> {
        self.wrote();
        self.factions.insert(faction.id, faction.clone());
        Ok(())
    }

    fn update_faction(&mut self, faction: &Faction) -> Result<(), DbError> {
        self.create_faction(faction)
    }

    fn delete_faction(&mut self, id: FactionId) -> Result<(), DbError> {
        self.wrote();
        self.factions.remove(&id);
        self.cells.retain(|_, holder| *holder != id);
        Ok(())
    }

    fn create_cell(&mut self, cell: &ClaimedCell) -> Result<(), DbError> {
        self.wrote();
        self.cells.insert(cell.key.clone(), cell.holder);
        Ok(())
    }

    fn delete_cell(&mut self, key: &CellKey) -> Result<(), DbError> {
        self.wrote();
        self.cells.remove(key);
        Ok(())
    }

    fn create_player_record(&mut self, record: &PlayerPowerRecord) -> Result<(), DbError> {
        self.wrote();
        self.players.insert(record.player_id, record.clone());
        Ok(())
    }

    fn update_player_record(&mut self, record: &PlayerPowerRecord) -> Result<(), DbError> {
        self.create_player_record(record)
    }

    fn append_power_changes(&mut self, changes: &[PowerChange]) -> Result<(), DbError> {
        self.wrote();
        self.power_changes.extend_from_slice(changes);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DbError> {
        self.flushes = self.flushes.saturating_add(1);
        Ok(())
    }
}
