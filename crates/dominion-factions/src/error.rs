//! Error types for the faction registry.

use dominion_types::{FactionId, PlayerId};

/// Errors that can occur when mutating factions or their relations.
#[derive(Debug, thiserror::Error)]
pub enum FactionError {
    /// Another faction already uses this name (case-insensitive).
    #[error("faction name already taken: {0}")]
    NameTaken(String),

    /// Faction names must contain at least one non-whitespace character.
    #[error("faction name must not be blank")]
    InvalidName,

    /// No faction with this id exists.
    #[error("faction not found: {0}")]
    FactionNotFound(FactionId),

    /// The player already belongs to a faction.
    #[error("player {player} already belongs to faction {faction}")]
    AlreadyInFaction {
        /// The player.
        player: PlayerId,
        /// Their current faction.
        faction: FactionId,
    },

    /// The player is not a member of the faction.
    #[error("player {player} is not a member of faction {faction}")]
    NotAMember {
        /// The player.
        player: PlayerId,
        /// The faction.
        faction: FactionId,
    },

    /// The owner must transfer ownership or disband instead of leaving.
    #[error("the owner of faction {0} cannot leave it")]
    OwnerCannotLeave(FactionId),

    /// A faction cannot hold a relation toward itself.
    #[error("faction {0} cannot relate to itself")]
    SelfRelation(FactionId),

    /// The vassal already has a different liege.
    #[error("faction {vassal} already has liege {liege}")]
    AlreadyHasLiege {
        /// The would-be vassal.
        vassal: FactionId,
        /// Its current liege.
        liege: FactionId,
    },

    /// Creating the edge would close a cycle in the feudal tree.
    #[error("making {vassal} a vassal of {liege} would create a feudal cycle")]
    FeudalCycle {
        /// The would-be liege.
        liege: FactionId,
        /// The would-be vassal.
        vassal: FactionId,
    },

    /// The liege has not offered vassalization to this faction.
    #[error("faction {liege} has not offered vassalization to {vassal}")]
    NoVassalizationOffer {
        /// The liege that would have made the offer.
        liege: FactionId,
        /// The faction trying to swear fealty.
        vassal: FactionId,
    },

    /// The faction is not a vassal of the given liege.
    #[error("faction {vassal} is not a vassal of {liege}")]
    NotAVassal {
        /// The supposed liege.
        liege: FactionId,
        /// The supposed vassal.
        vassal: FactionId,
    },

    /// The factions are allied; the alliance must be broken first.
    #[error("factions {0} and {1} are allied")]
    Allied(FactionId, FactionId),

    /// The factions are at war.
    #[error("factions {0} and {1} are at war")]
    AtWar(FactionId, FactionId),

    /// Liege and vassal cannot go to war with each other.
    #[error("factions {0} and {1} are bound by fealty")]
    BoundByFealty(FactionId, FactionId),
}
