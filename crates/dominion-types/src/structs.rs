//! Core entity structs for the Dominion territory engine.
//!
//! Covers the cell grid key, block positions, the faction record with its
//! relation map, claimed cells, and per-player power bookkeeping.
//!
//! These are plain data records. Invariants that span several records
//! (inverse feudal edges, name uniqueness, the cell reverse index) are
//! enforced by the registries that own them, not by the structs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::{FlagValue, PowerChangeReason, RelationType};
use crate::ids::{FactionId, GateId, PlayerId};

/// Number of bits to shift a block coordinate to obtain its cell coordinate.
///
/// Cells are 16x16 block columns.
pub const CELL_SHIFT: u32 = 4;

// ---------------------------------------------------------------------------
// CellKey
// ---------------------------------------------------------------------------

/// Key of a discrete territory cell: a world name plus cell coordinates.
///
/// Cells are opaque keys. Adjacency is the only spatial relationship the
/// engine relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    /// Name of the world the cell belongs to.
    pub world: String,
    /// Cell x coordinate.
    pub x: i32,
    /// Cell z coordinate.
    pub z: i32,
}

impl CellKey {
    /// Create a cell key.
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }

    /// The cell containing the given block column.
    pub fn containing(world: impl Into<String>, block_x: i32, block_z: i32) -> Self {
        Self::new(world, block_x >> CELL_SHIFT, block_z >> CELL_SHIFT)
    }

    /// The cell `dx`, `dz` steps away in the same world.
    ///
    /// Returns `None` if the offset leaves the representable coordinate
    /// range.
    pub fn offset(&self, dx: i32, dz: i32) -> Option<Self> {
        Some(Self {
            world: self.world.clone(),
            x: self.x.checked_add(dx)?,
            z: self.z.checked_add(dz)?,
        })
    }

    /// All cells in the square block `-radius..=radius` around this cell,
    /// row by row from the north-west corner. Cells whose coordinates would
    /// overflow are skipped.
    pub fn square(&self, radius: i32) -> Vec<Self> {
        let radius = radius.max(0);
        let mut cells = Vec::new();
        for dz in -radius..=radius {
            for dx in -radius..=radius {
                if let Some(cell) = self.offset(dx, dz) {
                    cells.push(cell);
                }
            }
        }
        cells
    }
}

impl core::fmt::Display for CellKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@({}, {})", self.world, self.x, self.z)
    }
}

// ---------------------------------------------------------------------------
// BlockPos
// ---------------------------------------------------------------------------

/// An integer block position in a world.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    /// Name of the world.
    pub world: String,
    /// Block x coordinate.
    pub x: i32,
    /// Block y coordinate.
    pub y: i32,
    /// Block z coordinate.
    pub z: i32,
}

impl BlockPos {
    /// Create a block position.
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// The cell this block lies in.
    pub fn cell(&self) -> CellKey {
        CellKey::containing(self.world.clone(), self.x, self.z)
    }
}

// ---------------------------------------------------------------------------
// Locks and gates
// ---------------------------------------------------------------------------

/// A block locked by a faction member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockedBlock {
    /// Position of the locked block.
    pub position: BlockPos,
    /// Player who placed the lock.
    pub owner: PlayerId,
}

/// A gate structure registered by a faction, spanning an axis-aligned box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    /// Gate identifier.
    pub id: GateId,
    /// Display name.
    pub name: String,
    /// One corner of the gate's bounding box.
    pub corner_a: BlockPos,
    /// The opposite corner of the gate's bounding box.
    pub corner_b: BlockPos,
    /// Whether the gate is currently open.
    pub open: bool,
}

impl Gate {
    /// Whether any block of the gate lies inside `cell`.
    pub fn touches_cell(&self, cell: &CellKey) -> bool {
        if self.corner_a.world != cell.world || self.corner_b.world != cell.world {
            return false;
        }
        let a = self.corner_a.cell();
        let b = self.corner_b.cell();
        let (min_x, max_x) = (a.x.min(b.x), a.x.max(b.x));
        let (min_z, max_z) = (a.z.min(b.z), a.z.max(b.z));
        (min_x..=max_x).contains(&cell.x) && (min_z..=max_z).contains(&cell.z)
    }
}

// ---------------------------------------------------------------------------
// Faction
// ---------------------------------------------------------------------------

/// A player faction.
///
/// Relations are keyed by [`FactionId`] only; the display `name` may change
/// at any time without affecting the relation graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faction {
    /// Stable identifier.
    pub id: FactionId,
    /// Unique (case-insensitive) display name.
    pub name: String,
    /// Chat prefix.
    pub prefix: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// The owning player. Always also a member.
    pub owner: PlayerId,
    /// Players with officer rights. Always a subset of `members`.
    #[serde(default)]
    pub officers: BTreeSet<PlayerId>,
    /// All members, including the owner.
    pub members: BTreeSet<PlayerId>,
    /// Power granted by administrators or events, added to cumulative power.
    #[serde(default)]
    pub bonus_power: Decimal,
    /// Outbound relation edges: target faction -> role the target plays.
    #[serde(default)]
    pub relations: BTreeMap<FactionId, RelationType>,
    /// Typed per-faction settings.
    #[serde(default)]
    pub flags: BTreeMap<String, FlagValue>,
    /// Faction home, if set. Must lie inside the faction's own land.
    #[serde(default)]
    pub home: Option<BlockPos>,
    /// Whether moving into unclaimed land claims it automatically.
    #[serde(default)]
    pub autoclaim: bool,
    /// Blocks locked by members of this faction.
    #[serde(default)]
    pub locked_blocks: BTreeSet<LockedBlock>,
    /// Gates registered by this faction.
    #[serde(default)]
    pub gates: BTreeMap<GateId, Gate>,
    /// Factions this faction has offered to take as vassals.
    #[serde(default)]
    pub vassalization_offers: BTreeSet<FactionId>,
    /// When the faction was founded.
    pub created_at: DateTime<Utc>,
}

impl Faction {
    /// Create a faction with a single member, its owner.
    pub fn new(id: FactionId, name: impl Into<String>, owner: PlayerId, now: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            id,
            prefix: name.clone(),
            name,
            description: String::new(),
            owner,
            officers: BTreeSet::new(),
            members: BTreeSet::from([owner]),
            bonus_power: Decimal::ZERO,
            relations: BTreeMap::new(),
            flags: BTreeMap::new(),
            home: None,
            autoclaim: false,
            locked_blocks: BTreeSet::new(),
            gates: BTreeMap::new(),
            vassalization_offers: BTreeSet::new(),
            created_at: now,
        }
    }

    /// The relation this faction holds toward `other`, if any.
    pub fn relation_to(&self, other: FactionId) -> Option<RelationType> {
        self.relations.get(&other).copied()
    }

    /// This faction's liege, if it has one.
    pub fn liege(&self) -> Option<FactionId> {
        self.relations
            .iter()
            .find(|(_, r)| **r == RelationType::Liege)
            .map(|(id, _)| *id)
    }

    /// Direct vassals of this faction.
    pub fn vassals(&self) -> impl Iterator<Item = FactionId> + '_ {
        self.relations
            .iter()
            .filter(|(_, r)| **r == RelationType::Vassal)
            .map(|(id, _)| *id)
    }

    /// Whether the faction has at least one vassal.
    pub fn has_vassals(&self) -> bool {
        self.vassals().next().is_some()
    }

    /// Whether `player` is a member.
    pub fn is_member(&self, player: PlayerId) -> bool {
        self.members.contains(&player)
    }

    /// Whether `player` is the owner or an officer.
    pub fn is_officer(&self, player: PlayerId) -> bool {
        self.owner == player || self.officers.contains(&player)
    }

    /// Look up a flag by key.
    pub fn flag(&self, key: &str) -> Option<&FlagValue> {
        self.flags.get(key)
    }

    /// Whether the home lies inside `cell`.
    pub fn home_in(&self, cell: &CellKey) -> bool {
        self.home.as_ref().is_some_and(|home| home.cell() == *cell)
    }
}

// ---------------------------------------------------------------------------
// ClaimedCell
// ---------------------------------------------------------------------------

/// A cell held by a faction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedCell {
    /// The cell.
    pub key: CellKey,
    /// The faction holding it.
    pub holder: FactionId,
}

// ---------------------------------------------------------------------------
// Power records
// ---------------------------------------------------------------------------

/// A player's power bookkeeping.
///
/// Records persist indefinitely: decay keeps applying to players who never
/// come back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPowerRecord {
    /// The player.
    pub player_id: PlayerId,
    /// Current power, never negative.
    pub power: Decimal,
    /// Number of observed logins. Input to the max-power policy.
    pub login_count: u32,
    /// When the record was created.
    pub first_seen: DateTime<Utc>,
    /// Last login or logout observed.
    pub last_seen: DateTime<Utc>,
}

impl PlayerPowerRecord {
    /// Create a record with the given starting power.
    pub const fn new(player_id: PlayerId, power: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            player_id,
            power,
            login_count: 0,
            first_seen: now,
            last_seen: now,
        }
    }
}

/// One entry in the power change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerChange {
    /// The affected player.
    pub player_id: PlayerId,
    /// Power before the change.
    pub before: Decimal,
    /// Power after the change.
    pub after: Decimal,
    /// What caused it.
    pub reason: PowerChangeReason,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl PowerChange {
    /// Signed difference `after - before`.
    pub fn delta(&self) -> Decimal {
        self.after.saturating_sub(self.before)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn cell_containing_floors_negative_blocks() {
        assert_eq!(CellKey::containing("w", 0, 15), CellKey::new("w", 0, 0));
        assert_eq!(CellKey::containing("w", 16, -1), CellKey::new("w", 1, -1));
        assert_eq!(CellKey::containing("w", -16, -17), CellKey::new("w", -1, -2));
    }

    #[test]
    fn square_of_radius_one_has_nine_cells() {
        let origin = CellKey::new("w", 0, 0);
        let cells = origin.square(1);
        assert_eq!(cells.len(), 9);
        assert!(cells.contains(&CellKey::new("w", -1, -1)));
        assert!(cells.contains(&CellKey::new("w", 1, 1)));
        assert!(cells.contains(&origin));
    }

    #[test]
    fn square_of_radius_zero_is_origin() {
        let origin = CellKey::new("w", 4, -2);
        assert_eq!(origin.square(0), vec![origin]);
    }

    #[test]
    fn offset_overflow_is_none() {
        let edge = CellKey::new("w", i32::MAX, 0);
        assert!(edge.offset(1, 0).is_none());
        assert_eq!(edge.square(1).len(), 6);
    }

    #[test]
    fn gate_touches_only_spanned_cells() {
        let gate = Gate {
            id: GateId::new(),
            name: "east".to_owned(),
            corner_a: BlockPos::new("w", 14, 64, 3),
            corner_b: BlockPos::new("w", 18, 68, 3),
            open: false,
        };
        assert!(gate.touches_cell(&CellKey::new("w", 0, 0)));
        assert!(gate.touches_cell(&CellKey::new("w", 1, 0)));
        assert!(!gate.touches_cell(&CellKey::new("w", 2, 0)));
        assert!(!gate.touches_cell(&CellKey::new("nether", 0, 0)));
    }

    #[test]
    fn new_faction_has_owner_as_member() {
        let owner = PlayerId::new();
        let faction = Faction::new(FactionId::new(), "Avalon", owner, Utc::now());
        assert!(faction.is_member(owner));
        assert!(faction.is_officer(owner));
        assert_eq!(faction.prefix, "Avalon");
        assert!(faction.liege().is_none());
        assert!(!faction.has_vassals());
    }

    #[test]
    fn liege_and_vassals_read_relation_map() {
        let mut faction = Faction::new(FactionId::new(), "Avalon", PlayerId::new(), Utc::now());
        let liege = FactionId::new();
        let vassal = FactionId::new();
        faction.relations.insert(liege, RelationType::Liege);
        faction.relations.insert(vassal, RelationType::Vassal);
        assert_eq!(faction.liege(), Some(liege));
        assert_eq!(faction.vassals().collect::<Vec<_>>(), vec![vassal]);
    }

    #[test]
    fn power_change_delta_is_signed() {
        let change = PowerChange {
            player_id: PlayerId::new(),
            before: dec!(10),
            after: dec!(7.5),
            reason: PowerChangeReason::Death,
            at: Utc::now(),
        };
        assert_eq!(change.delta(), dec!(-2.5));
    }
}
