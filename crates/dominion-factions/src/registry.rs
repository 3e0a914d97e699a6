//! The canonical faction store and relation graph.
//!
//! [`FactionRegistry`] owns every [`Faction`] plus two lookup indexes: a
//! case-insensitive name index and a member index. Relation edges are keyed
//! by [`FactionId`] only, so renames never touch the graph.
//!
//! Every mutation marks the touched faction dirty; persistence drains the
//! accumulated [`FactionChanges`] after each operation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use dominion_types::{
    BlockPos, CellKey, Faction, FactionId, FlagValue, Gate, GateId, LockedBlock, PlayerId,
    RelationType,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::FactionError;
use crate::vassalage::liege_chain;

/// Releases every cell held by a faction. Implemented by the territory grid
/// so the registry can run the disband cascade without owning territory.
pub trait TerritoryRelease {
    /// Drop every cell held by `faction`. Returns how many were released.
    fn release_all(&mut self, faction: FactionId) -> usize;
}

/// Result of a successful disband.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisbandOutcome {
    /// The removed faction record.
    pub faction: Faction,
    /// Cells released by the cascade.
    pub cells_released: usize,
    /// Other factions whose relation maps were edited.
    pub touched: BTreeSet<FactionId>,
}

/// Faction records that need writing to the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactionChanges {
    /// Factions created since the last drain.
    pub created: Vec<Faction>,
    /// Pre-existing factions modified since the last drain.
    pub updated: Vec<Faction>,
    /// Factions deleted since the last drain.
    pub deleted: Vec<FactionId>,
}

impl FactionChanges {
    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Canonical faction store with membership and relation graph.
#[derive(Debug, Clone, Default)]
pub struct FactionRegistry {
    /// All live factions.
    factions: BTreeMap<FactionId, Faction>,
    /// Lower-cased trimmed name -> id.
    by_name: BTreeMap<String, FactionId>,
    /// Player -> the faction they belong to.
    by_member: BTreeMap<PlayerId, FactionId>,
    /// Created since the last drain.
    created: BTreeSet<FactionId>,
    /// Modified since the last drain.
    dirty: BTreeSet<FactionId>,
    /// Deleted since the last drain.
    deleted: BTreeSet<FactionId>,
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl FactionRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            factions: BTreeMap::new(),
            by_name: BTreeMap::new(),
            by_member: BTreeMap::new(),
            created: BTreeSet::new(),
            dirty: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    /// Replace the registry contents with persisted factions.
    ///
    /// Indexes are rebuilt. Inconsistent data is repaired rather than
    /// rejected: self edges, edges to unknown factions, and feudal edges
    /// without their inverse are dropped, and a warning is logged for each.
    /// Repaired factions are marked dirty so the fix is written back.
    pub fn load(&mut self, factions: impl IntoIterator<Item = Faction>) {
        *self = Self::new();
        for faction in factions {
            let key = name_key(&faction.name);
            if let Some(existing) = self.by_name.get(&key) {
                warn!(faction = %faction.id, existing = %existing, name = %faction.name, "Duplicate faction name on load, skipping");
                continue;
            }
            self.by_name.insert(key, faction.id);
            for member in &faction.members {
                self.by_member.insert(*member, faction.id);
            }
            self.factions.insert(faction.id, faction);
        }
        self.repair_relations();
    }

    fn repair_relations(&mut self) {
        let snapshot: BTreeMap<FactionId, BTreeMap<FactionId, RelationType>> = self
            .factions
            .iter()
            .map(|(id, f)| (*id, f.relations.clone()))
            .collect();
        for (id, faction) in &mut self.factions {
            let before = faction.relations.len();
            faction.relations.retain(|target, relation| {
                if target == id {
                    return false;
                }
                let Some(back) = snapshot.get(target) else {
                    return false;
                };
                match relation.inverse() {
                    Some(inverse) => back.get(id) == Some(&inverse),
                    None => true,
                }
            });
            if faction.relations.len() != before {
                warn!(faction = %id, dropped = before.saturating_sub(faction.relations.len()), "Dropped inconsistent relation edges on load");
                self.dirty.insert(*id);
            }
        }
    }

    // -------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------

    /// Number of live factions.
    pub fn len(&self) -> usize {
        self.factions.len()
    }

    /// Whether there are no factions.
    pub fn is_empty(&self) -> bool {
        self.factions.is_empty()
    }

    /// Whether a faction with this id exists.
    pub fn contains(&self, id: FactionId) -> bool {
        self.factions.contains_key(&id)
    }

    /// Look up a faction by id.
    pub fn get(&self, id: FactionId) -> Option<&Faction> {
        self.factions.get(&id)
    }

    /// Look up a faction by name, ignoring case and surrounding whitespace.
    pub fn get_by_name(&self, name: &str) -> Option<&Faction> {
        self.by_name.get(&name_key(name)).and_then(|id| self.factions.get(id))
    }

    /// The faction `player` belongs to.
    pub fn get_by_member(&self, player: PlayerId) -> Option<&Faction> {
        self.by_member.get(&player).and_then(|id| self.factions.get(id))
    }

    /// The id of the faction `player` belongs to.
    pub fn faction_of(&self, player: PlayerId) -> Option<FactionId> {
        self.by_member.get(&player).copied()
    }

    /// Iterate over all factions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Faction> {
        self.factions.values()
    }

    /// All faction ids in id order.
    pub fn ids(&self) -> Vec<FactionId> {
        self.factions.keys().copied().collect()
    }

    fn tracked(&mut self, id: FactionId) -> Result<&mut Faction, FactionError> {
        let faction = self
            .factions
            .get_mut(&id)
            .ok_or(FactionError::FactionNotFound(id))?;
        self.dirty.insert(id);
        Ok(faction)
    }

    fn require(&self, id: FactionId) -> Result<&Faction, FactionError> {
        self.factions.get(&id).ok_or(FactionError::FactionNotFound(id))
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Found a new faction owned by `owner`.
    ///
    /// # Errors
    ///
    /// - [`FactionError::InvalidName`] if the name is blank.
    /// - [`FactionError::NameTaken`] if the name is in use (any case).
    /// - [`FactionError::AlreadyInFaction`] if the owner already has a faction.
    pub fn create(
        &mut self,
        name: &str,
        owner: PlayerId,
        now: DateTime<Utc>,
    ) -> Result<FactionId, FactionError> {
        let key = name_key(name);
        if key.is_empty() {
            return Err(FactionError::InvalidName);
        }
        if self.by_name.contains_key(&key) {
            return Err(FactionError::NameTaken(name.trim().to_owned()));
        }
        if let Some(faction) = self.faction_of(owner) {
            return Err(FactionError::AlreadyInFaction {
                player: owner,
                faction,
            });
        }

        let id = FactionId::new();
        let faction = Faction::new(id, name.trim(), owner, now);
        self.by_name.insert(key, id);
        self.by_member.insert(owner, id);
        self.factions.insert(id, faction);
        self.created.insert(id);
        info!(faction = %id, name = name.trim(), owner = %owner, "Faction created");
        Ok(id)
    }

    /// Change a faction's display name. Relations are untouched.
    ///
    /// # Errors
    ///
    /// - [`FactionError::FactionNotFound`] if the faction does not exist.
    /// - [`FactionError::InvalidName`] if the name is blank.
    /// - [`FactionError::NameTaken`] if another faction uses the name.
    pub fn rename(&mut self, id: FactionId, new_name: &str) -> Result<(), FactionError> {
        let new_key = name_key(new_name);
        if new_key.is_empty() {
            return Err(FactionError::InvalidName);
        }
        let old_key = name_key(&self.require(id)?.name);
        if self.by_name.get(&new_key).is_some_and(|holder| *holder != id) {
            return Err(FactionError::NameTaken(new_name.trim().to_owned()));
        }
        self.by_name.remove(&old_key);
        self.by_name.insert(new_key, id);
        let faction = self.tracked(id)?;
        let old_name = std::mem::replace(&mut faction.name, new_name.trim().to_owned());
        info!(faction = %id, from = %old_name, to = new_name.trim(), "Faction renamed");
        Ok(())
    }

    /// Disband a faction.
    ///
    /// Removes every relation edge and vassalization offer referencing it
    /// from all other factions, asks `territory` to release its cells, then
    /// drops the record and its index entries. The steps are not rolled back
    /// if a later one misbehaves.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn disband(
        &mut self,
        id: FactionId,
        territory: &mut dyn TerritoryRelease,
    ) -> Result<DisbandOutcome, FactionError> {
        self.require(id)?;

        let mut touched = BTreeSet::new();
        for (other_id, other) in &mut self.factions {
            if *other_id == id {
                continue;
            }
            let had_edge = other.relations.remove(&id).is_some();
            let had_offer = other.vassalization_offers.remove(&id);
            if had_edge || had_offer {
                touched.insert(*other_id);
            }
        }
        self.dirty.extend(touched.iter().copied());

        let cells_released = territory.release_all(id);

        let faction = self
            .factions
            .remove(&id)
            .ok_or(FactionError::FactionNotFound(id))?;
        self.by_name.remove(&name_key(&faction.name));
        for member in &faction.members {
            self.by_member.remove(member);
        }
        self.dirty.remove(&id);
        if !self.created.remove(&id) {
            self.deleted.insert(id);
        }

        info!(
            faction = %id,
            name = %faction.name,
            cells_released,
            relations_cleared = touched.len(),
            "Faction disbanded"
        );
        Ok(DisbandOutcome {
            faction,
            cells_released,
            touched,
        })
    }

    // -------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------

    /// Add `player` to a faction.
    ///
    /// # Errors
    ///
    /// - [`FactionError::FactionNotFound`] if the faction does not exist.
    /// - [`FactionError::AlreadyInFaction`] if the player has a faction.
    pub fn add_member(&mut self, id: FactionId, player: PlayerId) -> Result<(), FactionError> {
        self.require(id)?;
        if let Some(faction) = self.faction_of(player) {
            return Err(FactionError::AlreadyInFaction { player, faction });
        }
        self.tracked(id)?.members.insert(player);
        self.by_member.insert(player, id);
        debug!(faction = %id, player = %player, "Member joined");
        Ok(())
    }

    /// Remove `player` from a faction.
    ///
    /// # Errors
    ///
    /// - [`FactionError::FactionNotFound`] if the faction does not exist.
    /// - [`FactionError::NotAMember`] if the player is not a member.
    /// - [`FactionError::OwnerCannotLeave`] if the player owns the faction.
    pub fn remove_member(&mut self, id: FactionId, player: PlayerId) -> Result<(), FactionError> {
        let faction = self.require(id)?;
        if !faction.is_member(player) {
            return Err(FactionError::NotAMember {
                player,
                faction: id,
            });
        }
        if faction.owner == player {
            return Err(FactionError::OwnerCannotLeave(id));
        }
        let faction = self.tracked(id)?;
        faction.members.remove(&player);
        faction.officers.remove(&player);
        self.by_member.remove(&player);
        debug!(faction = %id, player = %player, "Member left");
        Ok(())
    }

    /// Hand ownership to another member. The previous owner stays a member.
    ///
    /// # Errors
    ///
    /// - [`FactionError::FactionNotFound`] if the faction does not exist.
    /// - [`FactionError::NotAMember`] if `new_owner` is not a member.
    pub fn transfer_ownership(
        &mut self,
        id: FactionId,
        new_owner: PlayerId,
    ) -> Result<(), FactionError> {
        let faction = self.tracked(id)?;
        if !faction.is_member(new_owner) {
            return Err(FactionError::NotAMember {
                player: new_owner,
                faction: id,
            });
        }
        faction.officers.remove(&new_owner);
        faction.owner = new_owner;
        Ok(())
    }

    /// Grant or revoke officer rights.
    ///
    /// # Errors
    ///
    /// - [`FactionError::FactionNotFound`] if the faction does not exist.
    /// - [`FactionError::NotAMember`] if the player is not a member.
    pub fn set_officer(
        &mut self,
        id: FactionId,
        player: PlayerId,
        officer: bool,
    ) -> Result<(), FactionError> {
        let faction = self.tracked(id)?;
        if !faction.is_member(player) {
            return Err(FactionError::NotAMember {
                player,
                faction: id,
            });
        }
        if officer {
            faction.officers.insert(player);
        } else {
            faction.officers.remove(&player);
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------

    /// Set the chat prefix.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn set_prefix(&mut self, id: FactionId, prefix: &str) -> Result<(), FactionError> {
        prefix.clone_into(&mut self.tracked(id)?.prefix);
        Ok(())
    }

    /// Set the description.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn set_description(&mut self, id: FactionId, description: &str) -> Result<(), FactionError> {
        description.clone_into(&mut self.tracked(id)?.description);
        Ok(())
    }

    /// Set the administrator-granted bonus power.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn set_bonus_power(&mut self, id: FactionId, bonus: Decimal) -> Result<(), FactionError> {
        self.tracked(id)?.bonus_power = bonus;
        Ok(())
    }

    /// Set or clear a flag.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn set_flag(
        &mut self,
        id: FactionId,
        key: &str,
        value: Option<FlagValue>,
    ) -> Result<(), FactionError> {
        let faction = self.tracked(id)?;
        match value {
            Some(value) => {
                faction.flags.insert(key.to_owned(), value);
            }
            None => {
                faction.flags.remove(key);
            }
        }
        Ok(())
    }

    /// Set or clear the faction home.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn set_home(&mut self, id: FactionId, home: Option<BlockPos>) -> Result<(), FactionError> {
        self.tracked(id)?.home = home;
        Ok(())
    }

    /// Clear the home if it lies in `cell`. Returns whether it was cleared.
    pub fn clear_home_in(&mut self, id: FactionId, cell: &CellKey) -> bool {
        if !self.get(id).is_some_and(|f| f.home_in(cell)) {
            return false;
        }
        self.tracked(id).map(|faction| faction.home = None).is_ok()
    }

    /// Turn autoclaim on or off.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn set_autoclaim(&mut self, id: FactionId, enabled: bool) -> Result<(), FactionError> {
        self.tracked(id)?.autoclaim = enabled;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Locks and gates
    // -------------------------------------------------------------------

    /// Record a locked block. Returns `false` if it was already locked.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn add_lock(
        &mut self,
        id: FactionId,
        position: BlockPos,
        owner: PlayerId,
    ) -> Result<bool, FactionError> {
        let faction = self.tracked(id)?;
        if faction.locked_blocks.iter().any(|l| l.position == position) {
            return Ok(false);
        }
        Ok(faction.locked_blocks.insert(LockedBlock { position, owner }))
    }

    /// Remove a lock. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn remove_lock(&mut self, id: FactionId, position: &BlockPos) -> Result<bool, FactionError> {
        let faction = self.tracked(id)?;
        let before = faction.locked_blocks.len();
        faction.locked_blocks.retain(|l| l.position != *position);
        Ok(faction.locked_blocks.len() != before)
    }

    /// Register a gate.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn add_gate(&mut self, id: FactionId, gate: Gate) -> Result<(), FactionError> {
        self.tracked(id)?.gates.insert(gate.id, gate);
        Ok(())
    }

    /// Remove a gate. Returns the removed gate, if any.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::FactionNotFound`] if the faction does not exist.
    pub fn remove_gate(&mut self, id: FactionId, gate: GateId) -> Result<Option<Gate>, FactionError> {
        Ok(self.tracked(id)?.gates.remove(&gate))
    }

    /// Drop every lock and gate the faction has inside `cell`.
    ///
    /// Returns `(locks_removed, gates_removed)`; `(0, 0)` if the faction is
    /// unknown.
    pub fn remove_structures_in(&mut self, id: FactionId, cell: &CellKey) -> (usize, usize) {
        let has_any = self.get(id).is_some_and(|f| {
            f.locked_blocks.iter().any(|l| l.position.cell() == *cell)
                || f.gates.values().any(|g| g.touches_cell(cell))
        });
        if !has_any {
            return (0, 0);
        }
        let Ok(faction) = self.tracked(id) else {
            return (0, 0);
        };
        let locks_before = faction.locked_blocks.len();
        faction.locked_blocks.retain(|l| l.position.cell() != *cell);
        let gates_before = faction.gates.len();
        faction.gates.retain(|_, g| !g.touches_cell(cell));
        (
            locks_before.saturating_sub(faction.locked_blocks.len()),
            gates_before.saturating_sub(faction.gates.len()),
        )
    }

    // -------------------------------------------------------------------
    // Relations
    // -------------------------------------------------------------------

    /// The role `target` plays for `source`, if any.
    pub fn relation(&self, source: FactionId, target: FactionId) -> Option<RelationType> {
        self.get(source).and_then(|f| f.relation_to(target))
    }

    /// Whether both factions have declared each other allies.
    pub fn are_allied(&self, a: FactionId, b: FactionId) -> bool {
        self.relation(a, b) == Some(RelationType::Ally) && self.relation(b, a) == Some(RelationType::Ally)
    }

    /// Whether either faction has declared the other an enemy.
    pub fn are_enemies(&self, a: FactionId, b: FactionId) -> bool {
        self.relation(a, b) == Some(RelationType::Enemy) || self.relation(b, a) == Some(RelationType::Enemy)
    }

    /// Whether `vassal` is a direct vassal of `liege`.
    pub fn is_vassal_of(&self, vassal: FactionId, liege: FactionId) -> bool {
        self.relation(liege, vassal) == Some(RelationType::Vassal)
    }

    /// Set the edge `source -> target`.
    ///
    /// Any existing feudal link between the two is cleared first. Setting
    /// `Vassal` (or `Liege`) writes the inverse edge in the same call.
    ///
    /// # Errors
    ///
    /// - [`FactionError::SelfRelation`] if `source == target`.
    /// - [`FactionError::FactionNotFound`] if either faction is missing.
    /// - [`FactionError::AlreadyHasLiege`] / [`FactionError::FeudalCycle`]
    ///   if a feudal edge would break the forest shape.
    pub fn upsert_relation(
        &mut self,
        source: FactionId,
        target: FactionId,
        relation: RelationType,
    ) -> Result<(), FactionError> {
        if source == target {
            return Err(FactionError::SelfRelation(source));
        }
        self.require(source)?;
        self.require(target)?;

        if relation.is_feudal() {
            let (liege, vassal) = if relation == RelationType::Vassal {
                (source, target)
            } else {
                (target, source)
            };
            self.check_fealty(liege, vassal)?;
        }

        self.clear_feudal_link(source, target);
        self.tracked(source)?.relations.insert(target, relation);
        if let Some(inverse) = relation.inverse() {
            self.tracked(target)?.relations.insert(source, inverse);
        }
        debug!(source = %source, target = %target, relation = ?relation, "Relation set");
        Ok(())
    }

    /// Remove the edges between two factions in both directions.
    ///
    /// Returns whether any edge existed.
    pub fn remove_relation(&mut self, source: FactionId, target: FactionId) -> bool {
        let mut removed = false;
        for (from, to) in [(source, target), (target, source)] {
            if !self.get(from).is_some_and(|f| f.relations.contains_key(&to)) {
                continue;
            }
            if let Ok(faction) = self.tracked(from) {
                faction.relations.remove(&to);
                removed = true;
            }
        }
        if removed {
            debug!(source = %source, target = %target, "Relation removed");
        }
        removed
    }

    /// Drop a Vassal/Liege pair between the two factions, if present.
    fn clear_feudal_link(&mut self, a: FactionId, b: FactionId) {
        let feudal = self.relation(a, b).is_some_and(RelationType::is_feudal)
            || self.relation(b, a).is_some_and(RelationType::is_feudal);
        if feudal {
            self.remove_relation(a, b);
        }
    }

    /// Validate that `vassal` may become a vassal of `liege`.
    fn check_fealty(&self, liege: FactionId, vassal: FactionId) -> Result<(), FactionError> {
        let current = self.get(vassal).and_then(Faction::liege);
        if let Some(current) = current.filter(|current| *current != liege) {
            return Err(FactionError::AlreadyHasLiege {
                vassal,
                liege: current,
            });
        }
        if liege_chain(self, liege).contains(&vassal) {
            return Err(FactionError::FeudalCycle { liege, vassal });
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Diplomacy
    // -------------------------------------------------------------------

    /// Put two factions at war: both sides get an Enemy edge.
    ///
    /// # Errors
    ///
    /// - [`FactionError::Allied`] if they are allied.
    /// - [`FactionError::BoundByFealty`] if one is the other's liege.
    /// - Any error from [`upsert_relation`](Self::upsert_relation).
    pub fn declare_war(&mut self, aggressor: FactionId, target: FactionId) -> Result<(), FactionError> {
        if self.are_allied(aggressor, target) {
            return Err(FactionError::Allied(aggressor, target));
        }
        if self.relation(aggressor, target).is_some_and(RelationType::is_feudal) {
            return Err(FactionError::BoundByFealty(aggressor, target));
        }
        self.upsert_relation(aggressor, target, RelationType::Enemy)?;
        self.upsert_relation(target, aggressor, RelationType::Enemy)?;
        info!(aggressor = %aggressor, target = %target, "War declared");
        Ok(())
    }

    /// End a war. Returns whether the factions were at war.
    pub fn make_peace(&mut self, a: FactionId, b: FactionId) -> bool {
        if !self.are_enemies(a, b) {
            return false;
        }
        self.remove_relation(a, b);
        info!(a = %a, b = %b, "Peace made");
        true
    }

    /// Declare `target` an ally of `requester`. Returns whether the alliance
    /// is now mutual.
    ///
    /// # Errors
    ///
    /// - [`FactionError::AtWar`] if either side holds an Enemy edge.
    /// - [`FactionError::BoundByFealty`] if they are liege and vassal.
    /// - Any error from [`upsert_relation`](Self::upsert_relation).
    pub fn request_alliance(
        &mut self,
        requester: FactionId,
        target: FactionId,
    ) -> Result<bool, FactionError> {
        if self.are_enemies(requester, target) {
            return Err(FactionError::AtWar(requester, target));
        }
        if self.relation(requester, target).is_some_and(RelationType::is_feudal) {
            return Err(FactionError::BoundByFealty(requester, target));
        }
        self.upsert_relation(requester, target, RelationType::Ally)?;
        let mutual = self.are_allied(requester, target);
        if mutual {
            info!(a = %requester, b = %target, "Alliance formed");
        }
        Ok(mutual)
    }

    /// Dissolve an alliance or withdraw a request. Returns whether anything
    /// changed.
    pub fn break_alliance(&mut self, a: FactionId, b: FactionId) -> bool {
        let allied = self.relation(a, b) == Some(RelationType::Ally)
            || self.relation(b, a) == Some(RelationType::Ally);
        if allied {
            self.remove_relation(a, b);
        }
        allied
    }

    // -------------------------------------------------------------------
    // Vassalization
    // -------------------------------------------------------------------

    /// Record that `liege` offers to take `target` as a vassal.
    ///
    /// # Errors
    ///
    /// Same validation as a feudal [`upsert_relation`](Self::upsert_relation).
    pub fn offer_vassalization(&mut self, liege: FactionId, target: FactionId) -> Result<(), FactionError> {
        if liege == target {
            return Err(FactionError::SelfRelation(liege));
        }
        self.require(target)?;
        self.require(liege)?;
        self.check_fealty(liege, target)?;
        self.tracked(liege)?.vassalization_offers.insert(target);
        Ok(())
    }

    /// Accept `liege`'s offer: `vassal` becomes its vassal.
    ///
    /// # Errors
    ///
    /// - [`FactionError::NoVassalizationOffer`] if no offer is pending.
    /// - Any error from [`upsert_relation`](Self::upsert_relation).
    pub fn swear_fealty(&mut self, vassal: FactionId, liege: FactionId) -> Result<(), FactionError> {
        let offered = self
            .require(liege)?
            .vassalization_offers
            .contains(&vassal);
        if !offered {
            return Err(FactionError::NoVassalizationOffer { liege, vassal });
        }
        self.upsert_relation(liege, vassal, RelationType::Vassal)?;
        self.tracked(liege)?.vassalization_offers.remove(&vassal);
        info!(liege = %liege, vassal = %vassal, "Fealty sworn");
        Ok(())
    }

    /// Break away from the current liege. Returns the former liege.
    pub fn declare_independence(&mut self, vassal: FactionId) -> Option<FactionId> {
        let liege = self.get(vassal).and_then(Faction::liege)?;
        self.remove_relation(vassal, liege);
        info!(vassal = %vassal, former_liege = %liege, "Independence declared");
        Some(liege)
    }

    /// Release a vassal from fealty.
    ///
    /// # Errors
    ///
    /// Returns [`FactionError::NotAVassal`] if `vassal` is not a direct
    /// vassal of `liege`.
    pub fn release_vassal(&mut self, liege: FactionId, vassal: FactionId) -> Result<(), FactionError> {
        if !self.is_vassal_of(vassal, liege) {
            return Err(FactionError::NotAVassal { liege, vassal });
        }
        self.remove_relation(liege, vassal);
        Ok(())
    }

    // -------------------------------------------------------------------
    // Persistence support
    // -------------------------------------------------------------------

    /// Take the changes accumulated since the last call.
    pub fn drain_changes(&mut self) -> FactionChanges {
        let created = std::mem::take(&mut self.created);
        let dirty = std::mem::take(&mut self.dirty);
        let deleted = std::mem::take(&mut self.deleted);
        FactionChanges {
            created: created
                .iter()
                .filter_map(|id| self.factions.get(id).cloned())
                .collect(),
            updated: dirty
                .difference(&created)
                .filter_map(|id| self.factions.get(id).cloned())
                .collect(),
            deleted: deleted.into_iter().collect(),
        }
    }
}
