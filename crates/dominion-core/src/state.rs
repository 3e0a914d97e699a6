//! The engine's in-memory state and the operations the runner exposes.
//!
//! [`DominionState`] owns the power ledger, the faction registry, and the
//! territory grid. It is the only place those three are mutated together,
//! and it is owned by exactly one task (see [`crate::runner`]).
//!
//! After each operation the runner calls [`DominionState::sync`], which
//! drains the change trackers of all three stores into the repository.

use chrono::{DateTime, Utc};
use dominion_db::{DbError, Repository, Snapshot};
use dominion_factions::{FactionError, FactionRegistry};
use dominion_power::PowerLedger;
use dominion_territory::{
    BatchReport, ClaimContext, ClaimCoordinator, ClaimError, ClaimOutcome, MessageSink,
    NotificationBus, TerritoryGrid, UnclaimOutcome,
};
use dominion_types::{
    BlockPos, CellKey, DisbandReason, FactionDisbanded, FactionId, PlayerId, PlayerJoined,
    RelationType,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::DominionConfig;

/// A faction's power figures, for display and admin tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactionPower {
    /// Sum of member power.
    pub own: Decimal,
    /// Sum of member max power.
    pub max_member: Decimal,
    /// Own power plus vassal contributions.
    pub with_vassals: Decimal,
    /// The aggregate score used as the demesne limit.
    pub cumulative: Decimal,
    /// Own power below half of max member power.
    pub weakened: bool,
    /// Cells currently held.
    pub held: usize,
}

/// A diplomatic or feudal action between two factions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diplomacy {
    /// `aggressor` and `target` become enemies.
    DeclareWar {
        /// Declaring faction.
        aggressor: FactionId,
        /// Target faction.
        target: FactionId,
    },
    /// End a war between `a` and `b`.
    MakePeace {
        /// One side.
        a: FactionId,
        /// The other side.
        b: FactionId,
    },
    /// `requester` declares `target` an ally.
    RequestAlliance {
        /// Requesting faction.
        requester: FactionId,
        /// Target faction.
        target: FactionId,
    },
    /// Dissolve an alliance between `a` and `b`.
    BreakAlliance {
        /// One side.
        a: FactionId,
        /// The other side.
        b: FactionId,
    },
    /// `liege` offers to take `target` as vassal.
    OfferVassalization {
        /// Would-be liege.
        liege: FactionId,
        /// Would-be vassal.
        target: FactionId,
    },
    /// `vassal` accepts `liege`'s offer.
    SwearFealty {
        /// Accepting faction.
        vassal: FactionId,
        /// Offering faction.
        liege: FactionId,
    },
    /// `vassal` breaks from its liege.
    DeclareIndependence {
        /// The vassal.
        vassal: FactionId,
    },
    /// `liege` frees `vassal`.
    ReleaseVassal {
        /// The liege.
        liege: FactionId,
        /// The vassal.
        vassal: FactionId,
    },
    /// Administrative override of a single edge. `None` removes it.
    SetRelation {
        /// Source faction.
        source: FactionId,
        /// Target faction.
        target: FactionId,
        /// Role `target` plays for `source`.
        relation: Option<RelationType>,
    },
}

/// Counts of records written by one [`DominionState::sync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Faction creates, updates, and deletes.
    pub factions: usize,
    /// Cell claims and releases.
    pub cells: usize,
    /// Player record creates and updates.
    pub players: usize,
    /// Power change log entries.
    pub power_changes: usize,
}

impl SyncSummary {
    /// Whether nothing was written.
    pub const fn is_empty(&self) -> bool {
        self.factions == 0 && self.cells == 0 && self.players == 0 && self.power_changes == 0
    }
}

/// All engine state.
#[derive(Debug)]
pub struct DominionState {
    ledger: PowerLedger,
    registry: FactionRegistry,
    grid: TerritoryGrid,
    coordinator: ClaimCoordinator,
}

impl DominionState {
    /// Empty state configured from `config`.
    pub fn new(config: &DominionConfig) -> Self {
        Self {
            ledger: PowerLedger::new(
                config.power.to_power_config(),
                Box::new(config.power.max_power_policy()),
            ),
            registry: FactionRegistry::new(),
            grid: TerritoryGrid::new(),
            coordinator: ClaimCoordinator::new(config.territory.to_claim_config()),
        }
    }

    /// Replace all state with a persisted snapshot.
    ///
    /// Factions are loaded first so cells can be checked against them;
    /// cells held by unknown factions are dropped.
    pub fn load(&mut self, snapshot: Snapshot) {
        let Snapshot {
            factions,
            cells,
            players,
        } = snapshot;
        self.registry.load(factions);
        let registry = &self.registry;
        self.grid.load(cells, |id| registry.contains(id));
        self.ledger.load(players);
        info!(
            factions = self.registry.len(),
            cells = self.grid.len(),
            players = self.ledger.len(),
            "State loaded"
        );
    }

    /// The power ledger.
    pub const fn ledger(&self) -> &PowerLedger {
        &self.ledger
    }

    /// The faction registry.
    pub const fn registry(&self) -> &FactionRegistry {
        &self.registry
    }

    /// The territory grid.
    pub const fn grid(&self) -> &TerritoryGrid {
        &self.grid
    }

    /// The claim coordinator.
    pub const fn coordinator(&self) -> &ClaimCoordinator {
        &self.coordinator
    }

    pub(crate) const fn ledger_mut(&mut self) -> &mut PowerLedger {
        &mut self.ledger
    }

    fn ctx<'a>(
        &'a mut self,
        bus: &'a mut dyn NotificationBus,
        sink: &'a mut dyn MessageSink,
    ) -> ClaimContext<'a> {
        ClaimContext {
            grid: &mut self.grid,
            registry: &mut self.registry,
            power: &self.ledger,
            bus,
            sink,
        }
    }

    // -------------------------------------------------------------------
    // Players
    // -------------------------------------------------------------------

    /// A player logged in. Fires `PlayerJoined` on first sight.
    pub fn login(&mut self, player: PlayerId, now: DateTime<Utc>, bus: &mut dyn NotificationBus) -> bool {
        let is_new = self.ledger.record_login(player, now);
        if is_new {
            bus.player_joined(&PlayerJoined { player });
            info!(player = %player, "Player joined");
        }
        is_new
    }

    /// A player logged out.
    pub fn logout(&mut self, player: PlayerId, now: DateTime<Utc>) {
        self.ledger.record_logout(player, now);
    }

    /// Apply kill and death power transfers. Returns `(gained, lost)`.
    pub fn kill(&mut self, killer: PlayerId, victim: PlayerId, now: DateTime<Utc>) -> (Decimal, Decimal) {
        let gained = self.ledger.grant_power_on_kill(killer, now);
        let lost = self.ledger.revoke_power_on_death(victim, now);
        debug!(killer = %killer, victim = %victim, gained = %gained, lost = %lost, "Kill recorded");
        (gained, lost)
    }

    /// Set a player's power directly. Returns the clamped value stored.
    pub fn set_power(&mut self, player: PlayerId, value: Decimal, now: DateTime<Utc>) -> Decimal {
        self.ledger.set_power(player, value, now)
    }

    // -------------------------------------------------------------------
    // Factions
    // -------------------------------------------------------------------

    /// Found a faction.
    ///
    /// # Errors
    ///
    /// See [`FactionRegistry::create`].
    pub fn create_faction(
        &mut self,
        name: &str,
        owner: PlayerId,
        now: DateTime<Utc>,
    ) -> Result<FactionId, FactionError> {
        self.registry.create(name, owner, now)
    }

    /// Add a player to a faction.
    ///
    /// # Errors
    ///
    /// See [`FactionRegistry::add_member`].
    pub fn join(&mut self, faction: FactionId, player: PlayerId) -> Result<(), FactionError> {
        self.registry.add_member(faction, player)
    }

    /// Remove a player from a faction.
    ///
    /// # Errors
    ///
    /// See [`FactionRegistry::remove_member`].
    pub fn leave(&mut self, faction: FactionId, player: PlayerId) -> Result<(), FactionError> {
        self.registry.remove_member(faction, player)
    }

    /// Set administrator bonus power.
    ///
    /// # Errors
    ///
    /// See [`FactionRegistry::set_bonus_power`].
    pub fn set_bonus_power(&mut self, faction: FactionId, bonus: Decimal) -> Result<(), FactionError> {
        self.registry.set_bonus_power(faction, bonus)
    }

    /// Set or clear the faction home.
    ///
    /// # Errors
    ///
    /// See [`FactionRegistry::set_home`].
    pub fn set_home(&mut self, faction: FactionId, home: Option<BlockPos>) -> Result<(), FactionError> {
        self.registry.set_home(faction, home)
    }

    /// Toggle autoclaim.
    ///
    /// # Errors
    ///
    /// See [`FactionRegistry::set_autoclaim`].
    pub fn set_autoclaim(&mut self, faction: FactionId, enabled: bool) -> Result<(), FactionError> {
        self.registry.set_autoclaim(faction, enabled)
    }

    /// Rename a faction.
    ///
    /// # Errors
    ///
    /// See [`FactionRegistry::rename`].
    pub fn rename(&mut self, faction: FactionId, name: &str) -> Result<(), FactionError> {
        self.registry.rename(faction, name)
    }

    /// Run a diplomatic action. The boolean is action-specific: whether an
    /// alliance became mutual, whether peace or a break changed anything,
    /// whether independence had a liege to leave; `true` otherwise.
    ///
    /// # Errors
    ///
    /// Propagates the registry's validation errors.
    pub fn diplomacy(&mut self, action: Diplomacy) -> Result<bool, FactionError> {
        let registry = &mut self.registry;
        match action {
            Diplomacy::DeclareWar { aggressor, target } => {
                registry.declare_war(aggressor, target).map(|()| true)
            }
            Diplomacy::MakePeace { a, b } => Ok(registry.make_peace(a, b)),
            Diplomacy::RequestAlliance { requester, target } => {
                registry.request_alliance(requester, target)
            }
            Diplomacy::BreakAlliance { a, b } => Ok(registry.break_alliance(a, b)),
            Diplomacy::OfferVassalization { liege, target } => {
                registry.offer_vassalization(liege, target).map(|()| true)
            }
            Diplomacy::SwearFealty { vassal, liege } => {
                registry.swear_fealty(vassal, liege).map(|()| true)
            }
            Diplomacy::DeclareIndependence { vassal } => {
                Ok(registry.declare_independence(vassal).is_some())
            }
            Diplomacy::ReleaseVassal { liege, vassal } => {
                registry.release_vassal(liege, vassal).map(|()| true)
            }
            Diplomacy::SetRelation {
                source,
                target,
                relation: Some(relation),
            } => registry.upsert_relation(source, target, relation).map(|()| true),
            Diplomacy::SetRelation {
                source,
                target,
                relation: None,
            } => Ok(registry.remove_relation(source, target)),
        }
    }

    /// Power figures for a faction. `None` if it does not exist.
    pub fn faction_power(&self, faction: FactionId) -> Option<FactionPower> {
        if !self.registry.contains(faction) {
            return None;
        }
        let aggregator = dominion_factions::PowerAggregator::new(
            &self.registry,
            &self.ledger,
            self.coordinator.config().vassal_contribution,
        );
        Some(FactionPower {
            own: aggregator.power_without_vassals(faction),
            max_member: aggregator.max_member_power(faction),
            with_vassals: aggregator.power_with_vassals(faction),
            cumulative: aggregator.cumulative_power(faction),
            weakened: aggregator.is_weakened(faction),
            held: self.grid.count_for_faction(faction),
        })
    }

    // -------------------------------------------------------------------
    // Territory
    // -------------------------------------------------------------------

    /// See [`ClaimCoordinator::claim`].
    ///
    /// # Errors
    ///
    /// Any [`ClaimError`] the coordinator returns.
    pub fn claim(
        &mut self,
        actor: PlayerId,
        cell: &CellKey,
        faction: FactionId,
        bus: &mut dyn NotificationBus,
        sink: &mut dyn MessageSink,
    ) -> Result<ClaimOutcome, ClaimError> {
        let coordinator = self.coordinator;
        coordinator.claim(&mut self.ctx(bus, sink), actor, cell, faction)
    }

    /// See [`ClaimCoordinator::radius_claim`].
    ///
    /// # Errors
    ///
    /// Validation errors only; per-cell failures are in the report.
    pub fn radius_claim(
        &mut self,
        actor: PlayerId,
        center: &CellKey,
        depth: i32,
        faction: FactionId,
        bus: &mut dyn NotificationBus,
        sink: &mut dyn MessageSink,
    ) -> Result<BatchReport, ClaimError> {
        let coordinator = self.coordinator;
        coordinator.radius_claim(&mut self.ctx(bus, sink), actor, center, depth, faction)
    }

    /// See [`ClaimCoordinator::unclaim`].
    ///
    /// # Errors
    ///
    /// Any [`ClaimError`] the coordinator returns.
    pub fn unclaim(
        &mut self,
        actor: PlayerId,
        cell: &CellKey,
        faction: FactionId,
        bus: &mut dyn NotificationBus,
        sink: &mut dyn MessageSink,
    ) -> Result<UnclaimOutcome, ClaimError> {
        let coordinator = self.coordinator;
        coordinator.unclaim(&mut self.ctx(bus, sink), actor, cell, faction)
    }

    /// See [`ClaimCoordinator::radius_unclaim`].
    ///
    /// # Errors
    ///
    /// Validation errors only; per-cell failures are in the report.
    pub fn radius_unclaim(
        &mut self,
        actor: PlayerId,
        center: &CellKey,
        radius: i32,
        faction: FactionId,
        bus: &mut dyn NotificationBus,
        sink: &mut dyn MessageSink,
    ) -> Result<BatchReport, ClaimError> {
        let coordinator = self.coordinator;
        coordinator.radius_unclaim(&mut self.ctx(bus, sink), actor, center, radius, faction)
    }

    /// See [`ClaimCoordinator::unclaim_all`].
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::FactionNotFound`] for an unknown faction.
    pub fn unclaim_all(
        &mut self,
        actor: PlayerId,
        faction: FactionId,
        bus: &mut dyn NotificationBus,
        sink: &mut dyn MessageSink,
    ) -> Result<BatchReport, ClaimError> {
        let coordinator = self.coordinator;
        coordinator.unclaim_all(&mut self.ctx(bus, sink), actor, faction)
    }

    /// A player walked into `cell`; claim it if their faction autoclaims.
    pub fn player_moved(
        &mut self,
        actor: PlayerId,
        cell: &CellKey,
        bus: &mut dyn NotificationBus,
        sink: &mut dyn MessageSink,
    ) -> Option<Result<ClaimOutcome, ClaimError>> {
        let coordinator = self.coordinator;
        coordinator.autoclaim(&mut self.ctx(bus, sink), actor, cell)
    }

    /// Disband a faction and release its land.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::FactionNotFound`] for an unknown faction.
    pub fn disband(
        &mut self,
        faction: FactionId,
        reason: DisbandReason,
        bus: &mut dyn NotificationBus,
        sink: &mut dyn MessageSink,
    ) -> Result<FactionDisbanded, ClaimError> {
        ClaimCoordinator::disband(&mut self.ctx(bus, sink), faction, reason)
    }

    // -------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------

    /// Push every pending change to `repo`.
    ///
    /// Faction upserts go before cell writes so a new holder exists before
    /// its cells; faction deletes go last.
    ///
    /// # Errors
    ///
    /// Returns the first [`DbError`]. Changes drained before the failure
    /// are not re-queued.
    pub fn sync(&mut self, repo: &mut dyn Repository) -> Result<SyncSummary, DbError> {
        let factions = self.registry.drain_changes();
        let cells = self.grid.drain_changes();
        let players = self.ledger.drain_dirty();
        let changes = self.ledger.drain_changes();

        let mut summary = SyncSummary::default();
        for faction in &factions.created {
            repo.create_faction(faction)?;
        }
        for faction in &factions.updated {
            repo.update_faction(faction)?;
        }
        for cell in &cells.claimed {
            repo.create_cell(cell)?;
        }
        for key in &cells.released {
            repo.delete_cell(key)?;
        }
        for id in &factions.deleted {
            repo.delete_faction(*id)?;
        }
        summary.factions = factions
            .created
            .len()
            .saturating_add(factions.updated.len())
            .saturating_add(factions.deleted.len());
        summary.cells = cells.claimed.len().saturating_add(cells.released.len());

        for record in &players.created {
            repo.create_player_record(record)?;
        }
        for record in &players.updated {
            repo.update_player_record(record)?;
        }
        summary.players = players.created.len().saturating_add(players.updated.len());

        repo.append_power_changes(&changes)?;
        summary.power_changes = changes.len();

        if !summary.is_empty() {
            debug!(
                factions = summary.factions,
                cells = summary.cells,
                players = summary.players,
                power_changes = summary.power_changes,
                "Synced state to repository"
            );
        }
        Ok(summary)
    }
}
