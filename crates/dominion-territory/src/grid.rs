//! The cell -> holder map.
//!
//! [`TerritoryGrid`] keeps a forward map from [`CellKey`] to holder and a
//! reverse index from faction to its cells. Both are updated together on
//! every mutation, so `all_for_faction` never needs a full scan.

use std::collections::{BTreeMap, BTreeSet};

use dominion_factions::TerritoryRelease;
use dominion_types::{CellKey, ClaimedCell, Direction, FactionId};
use tracing::{debug, warn};

/// Cell writes accumulated since the last drain.
///
/// A conquered cell shows up in `claimed` with its new holder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellChanges {
    /// Cells that now have a (new) holder.
    pub claimed: Vec<ClaimedCell>,
    /// Cells that became unclaimed.
    pub released: Vec<CellKey>,
}

impl CellChanges {
    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty() && self.released.is_empty()
    }
}

/// Authoritative map of claimed cells.
#[derive(Debug, Clone, Default)]
pub struct TerritoryGrid {
    cells: BTreeMap<CellKey, FactionId>,
    by_faction: BTreeMap<FactionId, BTreeSet<CellKey>>,
    /// Last write per cell since the drain. `None` means released.
    pending: BTreeMap<CellKey, Option<FactionId>>,
}

impl TerritoryGrid {
    /// Create an empty grid.
    pub const fn new() -> Self {
        Self {
            cells: BTreeMap::new(),
            by_faction: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Replace the grid contents with persisted cells.
    ///
    /// Cells whose holder fails `is_live` are dropped and queued as releases
    /// so the repository forgets them too.
    pub fn load(
        &mut self,
        cells: impl IntoIterator<Item = ClaimedCell>,
        is_live: impl Fn(FactionId) -> bool,
    ) {
        *self = Self::new();
        for cell in cells {
            if is_live(cell.holder) {
                self.insert(cell.key, cell.holder);
            } else {
                warn!(cell = %cell.key, holder = %cell.holder, "Dropping cell held by unknown faction");
                self.pending.insert(cell.key, None);
            }
        }
    }

    fn insert(&mut self, key: CellKey, faction: FactionId) -> Option<FactionId> {
        let previous = self.cells.insert(key.clone(), faction);
        if let Some(previous) = previous {
            self.unindex(previous, &key);
        }
        self.by_faction.entry(faction).or_default().insert(key);
        previous
    }

    fn unindex(&mut self, faction: FactionId, key: &CellKey) {
        if let Some(set) = self.by_faction.get_mut(&faction) {
            set.remove(key);
            if set.is_empty() {
                self.by_faction.remove(&faction);
            }
        }
    }

    /// Number of claimed cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no cell is claimed.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The holder of `key`, if claimed.
    pub fn holder(&self, key: &CellKey) -> Option<FactionId> {
        self.cells.get(key).copied()
    }

    /// The claimed cell at `key`, if any.
    pub fn get(&self, key: &CellKey) -> Option<ClaimedCell> {
        self.holder(key).map(|holder| ClaimedCell {
            key: key.clone(),
            holder,
        })
    }

    /// Set the holder of `key`. Returns the previous holder.
    pub fn claim(&mut self, key: CellKey, faction: FactionId) -> Option<FactionId> {
        self.pending.insert(key.clone(), Some(faction));
        let previous = self.insert(key.clone(), faction);
        debug!(cell = %key, faction = %faction, previous = ?previous, "Cell claimed");
        previous
    }

    /// Remove the holder of `key`. Returns the previous holder.
    pub fn release(&mut self, key: &CellKey) -> Option<FactionId> {
        let previous = self.cells.remove(key)?;
        self.unindex(previous, key);
        self.pending.insert(key.clone(), None);
        debug!(cell = %key, faction = %previous, "Cell released");
        Some(previous)
    }

    /// Every cell held by `faction`.
    pub fn all_for_faction(&self, faction: FactionId) -> BTreeSet<CellKey> {
        self.by_faction.get(&faction).cloned().unwrap_or_default()
    }

    /// Number of cells held by `faction`.
    pub fn count_for_faction(&self, faction: FactionId) -> usize {
        self.by_faction.get(&faction).map_or(0, BTreeSet::len)
    }

    /// The claimed neighbour of `key` in `direction`, if any.
    pub fn neighbor(&self, key: &CellKey, direction: Direction) -> Option<ClaimedCell> {
        let (dx, dz) = direction.offset();
        key.offset(dx, dz).and_then(|next| self.get(&next))
    }

    /// Whether all four cardinal neighbours of `key` are held by `holder`.
    pub fn is_surrounded_by(&self, key: &CellKey, holder: FactionId) -> bool {
        Direction::ALL
            .iter()
            .all(|direction| self.neighbor(key, *direction).is_some_and(|n| n.holder == holder))
    }

    /// Drop every cell held by `faction`, bypassing the unclaim flow.
    ///
    /// Returns the released keys.
    pub fn remove_all_for_faction(&mut self, faction: FactionId) -> Vec<CellKey> {
        let keys: Vec<CellKey> = self
            .by_faction
            .remove(&faction)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for key in &keys {
            self.cells.remove(key);
            self.pending.insert(key.clone(), None);
        }
        if !keys.is_empty() {
            debug!(faction = %faction, cells = keys.len(), "Released all cells of faction");
        }
        keys
    }

    /// Iterate over claimed cells in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&CellKey, FactionId)> {
        self.cells.iter().map(|(key, holder)| (key, *holder))
    }

    /// Take the writes accumulated since the last call.
    pub fn drain_changes(&mut self) -> CellChanges {
        let mut changes = CellChanges::default();
        for (key, holder) in std::mem::take(&mut self.pending) {
            match holder {
                Some(holder) => changes.claimed.push(ClaimedCell { key, holder }),
                None => changes.released.push(key),
            }
        }
        changes
    }
}

impl TerritoryRelease for TerritoryGrid {
    fn release_all(&mut self, faction: FactionId) -> usize {
        self.remove_all_for_faction(faction).len()
    }
}
