//! Claim failures.

use dominion_types::{CellKey, FactionId};
use rust_decimal::Decimal;

/// Broad class of a [`ClaimError`], used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before looking at state.
    Validation,
    /// The request conflicts with current ownership or power.
    Conflict,
    /// A referenced entity does not exist.
    NotFound,
}

/// Reasons a claim or unclaim is refused. No state changes on any of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// The requested radius is outside `0..=max`.
    #[error("radius {requested} exceeds the maximum of {max}")]
    RadiusExceeded {
        /// Requested radius.
        requested: i32,
        /// Configured maximum.
        max: i32,
    },

    /// Radius unclaims need a strictly positive radius.
    #[error("radius must be positive, got {0}")]
    InvalidRadius(i32),

    /// The faction already holds as many cells as its power allows.
    #[error("faction {faction} holds {held} cells with a limit of {limit}")]
    LimitReached {
        /// The claiming faction.
        faction: FactionId,
        /// Cells it holds.
        held: usize,
        /// Its demesne limit.
        limit: Decimal,
    },

    /// The faction already holds the cell.
    #[error("{0} is already claimed by this faction")]
    AlreadyClaimed(CellKey),

    /// Conquest needs an Enemy relation with the holder.
    #[error("faction {faction} is not at war with holder {holder}")]
    NotEnemy {
        /// The claiming faction.
        faction: FactionId,
        /// The current holder.
        holder: FactionId,
    },

    /// The cell is enclosed on all four sides by its holder's land.
    #[error("{0} is surrounded by its holder's land")]
    SurroundedChunkProtected(CellKey),

    /// The holder is within its demesne limit.
    #[error("holder {holder} holds {held} cells within its limit of {limit}")]
    TargetNotOverClaiming {
        /// The current holder.
        holder: FactionId,
        /// Cells it holds.
        held: usize,
        /// Its demesne limit.
        limit: Decimal,
    },

    /// The cell belongs to someone else.
    #[error("{cell} is held by {holder}")]
    NotYourLand {
        /// The cell.
        cell: CellKey,
        /// Its actual holder.
        holder: FactionId,
    },

    /// The acting faction does not exist.
    #[error("faction not found: {0}")]
    FactionNotFound(FactionId),
}

impl ClaimError {
    /// Classify the error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RadiusExceeded { .. } | Self::InvalidRadius(_) => ErrorKind::Validation,
            Self::FactionNotFound(_) => ErrorKind::NotFound,
            Self::LimitReached { .. }
            | Self::AlreadyClaimed(_)
            | Self::NotEnemy { .. }
            | Self::SurroundedChunkProtected(_)
            | Self::TargetNotOverClaiming { .. }
            | Self::NotYourLand { .. } => ErrorKind::Conflict,
        }
    }
}
