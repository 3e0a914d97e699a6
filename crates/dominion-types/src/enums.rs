//! Enumeration types for the Dominion territory engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Relation kinds
// ---------------------------------------------------------------------------

/// The role a target faction plays from the point of view of a source
/// faction.
///
/// `relation(A, B) == Vassal` reads "B is A's vassal", and is always paired
/// with `relation(B, A) == Liege` ("A is B's liege"). Ally and Enemy edges
/// are directed declarations; an alliance is only in force when both sides
/// have declared it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationType {
    /// The target is (or has been asked to be) an ally.
    Ally,
    /// The target is an enemy; conquest of its land is permitted.
    Enemy,
    /// The target is a vassal of the source.
    Vassal,
    /// The target is the liege of the source.
    Liege,
}

impl RelationType {
    /// The edge that must exist in the opposite direction, if any.
    ///
    /// Only the feudal pair is structurally linked.
    pub const fn inverse(self) -> Option<Self> {
        match self {
            Self::Vassal => Some(Self::Liege),
            Self::Liege => Some(Self::Vassal),
            Self::Ally | Self::Enemy => None,
        }
    }

    /// Whether this relation belongs to the liege/vassal subgraph.
    pub const fn is_feudal(self) -> bool {
        matches!(self, Self::Vassal | Self::Liege)
    }
}

// ---------------------------------------------------------------------------
// Directions
// ---------------------------------------------------------------------------

/// A cardinal direction on the cell grid.
///
/// North is negative z and east is positive x, matching the host world's
/// axis convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Toward negative z.
    North,
    /// Toward positive x.
    East,
    /// Toward positive z.
    South,
    /// Toward negative x.
    West,
}

impl Direction {
    /// All four cardinal directions, clockwise from north.
    pub const ALL: [Self; 4] = [Self::North, Self::East, Self::South, Self::West];

    /// The `(dx, dz)` step for one cell in this direction.
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Self::North => (0, -1),
            Self::East => (1, 0),
            Self::South => (0, 1),
            Self::West => (-1, 0),
        }
    }
}

// ---------------------------------------------------------------------------
// Faction flags
// ---------------------------------------------------------------------------

/// A typed value stored in a faction's flag set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagValue {
    /// A boolean toggle.
    Bool(bool),
    /// A numeric setting.
    Number(Decimal),
    /// Free text.
    Text(String),
}

impl FlagValue {
    /// Return the boolean value, if this flag is a boolean.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(_) | Self::Text(_) => None,
        }
    }

    /// Return the numeric value, if this flag is a number.
    pub const fn as_number(&self) -> Option<Decimal> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// Return the text value, if this flag is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            Self::Bool(_) | Self::Number(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Power change reasons
// ---------------------------------------------------------------------------

/// Why a player's power changed. Recorded on every [`PowerChange`].
///
/// [`PowerChange`]: crate::structs::PowerChange
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PowerChangeReason {
    /// Scheduled regeneration while online.
    Regeneration,
    /// Scheduled decay while offline past the inactivity threshold.
    Decay,
    /// Power granted for killing another player.
    Kill,
    /// Power lost on death.
    Death,
    /// Set directly by an administrator.
    Admin,
}

/// Why a faction was disbanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisbandReason {
    /// Explicitly disbanded by its owner or an administrator.
    Command,
    /// Disbanded by the scheduler because its cumulative power reached zero.
    ZeroPower,
}
