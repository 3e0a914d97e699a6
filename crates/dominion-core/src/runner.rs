//! Serial command runner.
//!
//! All engine state is owned by a single task. Callers talk to it through a
//! [`RunnerHandle`], which sends a [`Command`] over an mpsc channel and
//! awaits the reply on a oneshot. The task interleaves commands with three
//! timers:
//!
//! - **Regeneration** -- [`PowerScheduler::regeneration_tick`]
//! - **Decay** -- [`PowerScheduler::decay_tick`], including the zero-power
//!   disband sweep
//! - **Save** -- flush the repository
//!
//! After every command and every tick the pending changes are synced into
//! the repository, so a flush always sees a consistent state. Because only
//! one task mutates state, no claim can interleave with another claim, a
//! disband, or a scheduler pass.

use chrono::Utc;
use dominion_db::{DbError, Repository};
use dominion_factions::FactionError;
use dominion_territory::{
    BatchReport, ClaimError, ClaimOutcome, MessageSink, NotificationBus, NullBus, NullSink,
    UnclaimOutcome,
};
use dominion_types::{CellKey, DisbandReason, FactionDisbanded, FactionId, PlayerId};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SchedulerSection;
use crate::scheduler::{PowerScheduler, TickSummary};
use crate::state::{Diplomacy, DominionState, FactionPower, SyncSummary};

/// Errors surfaced by the runner.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The runner task has stopped and can no longer take commands.
    #[error("runner is not running")]
    Closed,

    /// The repository rejected a write or flush.
    #[error("persistence error: {source}")]
    Persistence {
        /// The underlying storage error.
        #[from]
        source: DbError,
    },
}

type Reply<T> = oneshot::Sender<T>;

/// A request to the runner task.
#[derive(Debug)]
pub enum Command {
    /// A player logged in. Replies whether they were new.
    Login {
        /// The player.
        player: PlayerId,
        /// Reply channel.
        reply: Reply<bool>,
    },
    /// A player logged out.
    Logout {
        /// The player.
        player: PlayerId,
    },
    /// A kill. Replies `(gained, lost)`.
    Kill {
        /// The killer.
        killer: PlayerId,
        /// The victim.
        victim: PlayerId,
        /// Reply channel.
        reply: Reply<(Decimal, Decimal)>,
    },
    /// Found a faction.
    CreateFaction {
        /// Display name.
        name: String,
        /// Founding owner.
        owner: PlayerId,
        /// Reply channel.
        reply: Reply<Result<FactionId, FactionError>>,
    },
    /// Add a member.
    Join {
        /// The faction.
        faction: FactionId,
        /// The player.
        player: PlayerId,
        /// Reply channel.
        reply: Reply<Result<(), FactionError>>,
    },
    /// Remove a member.
    Leave {
        /// The faction.
        faction: FactionId,
        /// The player.
        player: PlayerId,
        /// Reply channel.
        reply: Reply<Result<(), FactionError>>,
    },
    /// Set administrator bonus power.
    SetBonusPower {
        /// The faction.
        faction: FactionId,
        /// New bonus.
        bonus: Decimal,
        /// Reply channel.
        reply: Reply<Result<(), FactionError>>,
    },
    /// Toggle autoclaim.
    SetAutoclaim {
        /// The faction.
        faction: FactionId,
        /// Whether to autoclaim.
        enabled: bool,
        /// Reply channel.
        reply: Reply<Result<(), FactionError>>,
    },
    /// A diplomatic or feudal action.
    Diplomacy {
        /// The action.
        action: Diplomacy,
        /// Reply channel.
        reply: Reply<Result<bool, FactionError>>,
    },
    /// Claim one cell.
    Claim {
        /// Acting player.
        actor: PlayerId,
        /// Target cell.
        cell: CellKey,
        /// Claiming faction.
        faction: FactionId,
        /// Reply channel.
        reply: Reply<Result<ClaimOutcome, ClaimError>>,
    },
    /// Claim a square around a cell.
    RadiusClaim {
        /// Acting player.
        actor: PlayerId,
        /// Center cell.
        center: CellKey,
        /// Square depth.
        depth: i32,
        /// Claiming faction.
        faction: FactionId,
        /// Reply channel.
        reply: Reply<Result<BatchReport, ClaimError>>,
    },
    /// Release one cell.
    Unclaim {
        /// Acting player.
        actor: PlayerId,
        /// Target cell.
        cell: CellKey,
        /// Releasing faction.
        faction: FactionId,
        /// Reply channel.
        reply: Reply<Result<UnclaimOutcome, ClaimError>>,
    },
    /// Release a square around a cell.
    RadiusUnclaim {
        /// Acting player.
        actor: PlayerId,
        /// Center cell.
        center: CellKey,
        /// Square radius.
        radius: i32,
        /// Releasing faction.
        faction: FactionId,
        /// Reply channel.
        reply: Reply<Result<BatchReport, ClaimError>>,
    },
    /// Release every cell of a faction.
    UnclaimAll {
        /// Acting player.
        actor: PlayerId,
        /// Releasing faction.
        faction: FactionId,
        /// Reply channel.
        reply: Reply<Result<BatchReport, ClaimError>>,
    },
    /// A player entered a cell. Triggers autoclaim.
    Moved {
        /// The player.
        actor: PlayerId,
        /// The cell entered.
        cell: CellKey,
        /// Reply channel.
        reply: Reply<Option<Result<ClaimOutcome, ClaimError>>>,
    },
    /// Disband a faction.
    Disband {
        /// The faction.
        faction: FactionId,
        /// Reply channel.
        reply: Reply<Result<FactionDisbanded, ClaimError>>,
    },
    /// Read a faction's power figures.
    FactionPower {
        /// The faction.
        faction: FactionId,
        /// Reply channel.
        reply: Reply<Option<FactionPower>>,
    },
    /// Read who holds a cell.
    Holder {
        /// The cell.
        cell: CellKey,
        /// Reply channel.
        reply: Reply<Option<FactionId>>,
    },
    /// Sync and flush now.
    Save {
        /// Reply channel.
        reply: Reply<Result<(), DbError>>,
    },
    /// Stop the runner after a final sync and flush.
    Shutdown,
}

/// Timer periods for the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Periods {
    /// Regeneration interval.
    pub regeneration: Duration,
    /// Decay interval.
    pub decay: Duration,
    /// Flush interval.
    pub save: Duration,
}

impl From<&SchedulerSection> for Periods {
    fn from(section: &SchedulerSection) -> Self {
        Self {
            regeneration: section.increase_period(),
            decay: section.decrease_period(),
            save: section.save_period(),
        }
    }
}

/// Join handle of a spawned runner. Yields the state and the repository
/// after shutdown.
pub type RunnerTask<R> = JoinHandle<Result<(DominionState, R), RunnerError>>;

/// Owns the state and the repository and processes commands serially.
pub struct Runner<R> {
    state: DominionState,
    repo: R,
    scheduler: PowerScheduler,
    periods: Periods,
    bus: Box<dyn NotificationBus + Send>,
    sink: Box<dyn MessageSink + Send>,
}

impl<R> core::fmt::Debug for Runner<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runner")
            .field("scheduler", &self.scheduler)
            .field("periods", &self.periods)
            .finish_non_exhaustive()
    }
}

impl<R: Repository + 'static> Runner<R> {
    /// Create a runner with no-op notification hooks.
    pub fn new(state: DominionState, repo: R, scheduler: &SchedulerSection) -> Self {
        Self {
            state,
            repo,
            scheduler: PowerScheduler::new(scheduler.zero_power_factions_get_disbanded),
            periods: Periods::from(scheduler),
            bus: Box::new(NullBus),
            sink: Box::new(NullSink),
        }
    }

    /// Install the veto and lifecycle hooks.
    #[must_use]
    pub fn with_bus(mut self, bus: Box<dyn NotificationBus + Send>) -> Self {
        self.bus = bus;
        self
    }

    /// Install the player and faction message sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn MessageSink + Send>) -> Self {
        self.sink = sink;
        self
    }

    /// Override the timer periods.
    #[must_use]
    pub const fn with_periods(mut self, periods: Periods) -> Self {
        self.periods = periods;
        self
    }

    /// Spawn the runner task.
    pub fn spawn(self) -> (RunnerHandle, RunnerTask<R>) {
        let (tx, rx) = mpsc::channel(256);
        let task = tokio::spawn(self.run(rx));
        (RunnerHandle { tx }, task)
    }

    /// Process commands and timers until [`Command::Shutdown`] arrives or
    /// every handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Persistence`] if the final sync or flush
    /// fails. Failures during the run are logged and retried on the next
    /// save.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
    ) -> Result<(DominionState, R), RunnerError> {
        let mut regeneration = interval(self.periods.regeneration);
        let mut decay = interval(self.periods.decay);
        let mut save = interval(self.periods.save);

        info!(
            regeneration_secs = self.periods.regeneration.as_secs(),
            decay_secs = self.periods.decay.as_secs(),
            save_secs = self.periods.save.as_secs(),
            disband_zero_power = self.scheduler.disbands_zero_power(),
            "Runner starting"
        );

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = regeneration.tick() => {
                    let summary = self.scheduler.regeneration_tick(&mut self.state, Utc::now());
                    log_tick(&summary);
                }
                _ = decay.tick() => {
                    let summary = self.scheduler.decay_tick(
                        &mut self.state,
                        Utc::now(),
                        self.bus.as_mut(),
                        self.sink.as_mut(),
                    );
                    log_tick(&summary);
                }
                _ = save.tick() => {
                    if let Err(e) = self.save() {
                        warn!(error = %e, "Periodic save failed");
                    }
                    continue;
                }
            }
            self.sync();
        }

        self.save()?;
        info!(
            factions = self.state.registry().len(),
            cells = self.state.grid().len(),
            players = self.state.ledger().len(),
            "Runner stopped"
        );
        Ok((self.state, self.repo))
    }

    fn handle(&mut self, command: Command) {
        let now = Utc::now();
        let state = &mut self.state;
        let bus = self.bus.as_mut();
        let sink = self.sink.as_mut();
        // A dropped reply receiver means the caller gave up; the command
        // has still been applied.
        match command {
            Command::Login { player, reply } => {
                let _ = reply.send(state.login(player, now, bus));
            }
            Command::Logout { player } => state.logout(player, now),
            Command::Kill {
                killer,
                victim,
                reply,
            } => {
                let _ = reply.send(state.kill(killer, victim, now));
            }
            Command::CreateFaction { name, owner, reply } => {
                let _ = reply.send(state.create_faction(&name, owner, now));
            }
            Command::Join {
                faction,
                player,
                reply,
            } => {
                let _ = reply.send(state.join(faction, player));
            }
            Command::Leave {
                faction,
                player,
                reply,
            } => {
                let _ = reply.send(state.leave(faction, player));
            }
            Command::SetBonusPower {
                faction,
                bonus,
                reply,
            } => {
                let _ = reply.send(state.set_bonus_power(faction, bonus));
            }
            Command::SetAutoclaim {
                faction,
                enabled,
                reply,
            } => {
                let _ = reply.send(state.set_autoclaim(faction, enabled));
            }
            Command::Diplomacy { action, reply } => {
                let _ = reply.send(state.diplomacy(action));
            }
            Command::Claim {
                actor,
                cell,
                faction,
                reply,
            } => {
                let _ = reply.send(state.claim(actor, &cell, faction, bus, sink));
            }
            Command::RadiusClaim {
                actor,
                center,
                depth,
                faction,
                reply,
            } => {
                let _ = reply.send(state.radius_claim(actor, &center, depth, faction, bus, sink));
            }
            Command::Unclaim {
                actor,
                cell,
                faction,
                reply,
            } => {
                let _ = reply.send(state.unclaim(actor, &cell, faction, bus, sink));
            }
            Command::RadiusUnclaim {
                actor,
                center,
                radius,
                faction,
                reply,
            } => {
                let _ =
                    reply.send(state.radius_unclaim(actor, &center, radius, faction, bus, sink));
            }
            Command::UnclaimAll {
                actor,
                faction,
                reply,
            } => {
                let _ = reply.send(state.unclaim_all(actor, faction, bus, sink));
            }
            Command::Moved { actor, cell, reply } => {
                let _ = reply.send(state.player_moved(actor, &cell, bus, sink));
            }
            Command::Disband { faction, reply } => {
                let _ = reply.send(state.disband(faction, DisbandReason::Command, bus, sink));
            }
            Command::FactionPower { faction, reply } => {
                let _ = reply.send(state.faction_power(faction));
            }
            Command::Holder { cell, reply } => {
                let _ = reply.send(state.grid().holder(&cell));
            }
            Command::Save { reply } => {
                let _ = reply.send(self.save());
            }
            Command::Shutdown => {}
        }
    }

    fn sync(&mut self) {
        if let Err(e) = self.state.sync(&mut self.repo) {
            warn!(error = %e, "Failed to sync changes to repository");
        }
    }

    fn save(&mut self) -> Result<(), DbError> {
        let summary: SyncSummary = self.state.sync(&mut self.repo)?;
        self.repo.flush()?;
        debug!(power_changes = summary.power_changes, "Repository flushed");
        Ok(())
    }
}

fn interval(period: Duration) -> tokio::time::Interval {
    let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn log_tick(summary: &TickSummary) {
    if summary.players_affected > 0 || !summary.disbanded.is_empty() {
        info!(
            kind = ?summary.kind,
            players = summary.players_affected,
            total = %summary.total_amount,
            disbanded = summary.disbanded.len(),
            "Power tick"
        );
    }
}

/// Cloneable sender side of the runner.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    tx: mpsc::Sender<Command>,
}

impl RunnerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, RunnerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_closed| RunnerError::Closed)?;
        rx.await.map_err(|_dropped| RunnerError::Closed)
    }

    /// See [`DominionState::login`].
    pub async fn login(&self, player: PlayerId) -> Result<bool, RunnerError> {
        self.request(|reply| Command::Login { player, reply }).await
    }

    /// See [`DominionState::logout`].
    pub async fn logout(&self, player: PlayerId) -> Result<(), RunnerError> {
        self.tx
            .send(Command::Logout { player })
            .await
            .map_err(|_closed| RunnerError::Closed)
    }

    /// See [`DominionState::kill`].
    pub async fn kill(
        &self,
        killer: PlayerId,
        victim: PlayerId,
    ) -> Result<(Decimal, Decimal), RunnerError> {
        self.request(|reply| Command::Kill {
            killer,
            victim,
            reply,
        })
        .await
    }

    /// See [`DominionState::create_faction`].
    pub async fn create_faction(
        &self,
        name: impl Into<String>,
        owner: PlayerId,
    ) -> Result<Result<FactionId, FactionError>, RunnerError> {
        let name = name.into();
        self.request(|reply| Command::CreateFaction { name, owner, reply })
            .await
    }

    /// See [`DominionState::join`].
    pub async fn join(
        &self,
        faction: FactionId,
        player: PlayerId,
    ) -> Result<Result<(), FactionError>, RunnerError> {
        self.request(|reply| Command::Join {
            faction,
            player,
            reply,
        })
        .await
    }

    /// See [`DominionState::leave`].
    pub async fn leave(
        &self,
        faction: FactionId,
        player: PlayerId,
    ) -> Result<Result<(), FactionError>, RunnerError> {
        self.request(|reply| Command::Leave {
            faction,
            player,
            reply,
        })
        .await
    }

    /// See [`DominionState::set_bonus_power`].
    pub async fn set_bonus_power(
        &self,
        faction: FactionId,
        bonus: Decimal,
    ) -> Result<Result<(), FactionError>, RunnerError> {
        self.request(|reply| Command::SetBonusPower {
            faction,
            bonus,
            reply,
        })
        .await
    }

    /// See [`DominionState::set_autoclaim`].
    pub async fn set_autoclaim(
        &self,
        faction: FactionId,
        enabled: bool,
    ) -> Result<Result<(), FactionError>, RunnerError> {
        self.request(|reply| Command::SetAutoclaim {
            faction,
            enabled,
            reply,
        })
        .await
    }

    /// See [`DominionState::diplomacy`].
    pub async fn diplomacy(
        &self,
        action: Diplomacy,
    ) -> Result<Result<bool, FactionError>, RunnerError> {
        self.request(|reply| Command::Diplomacy { action, reply })
            .await
    }

    /// See [`DominionState::claim`].
    pub async fn claim(
        &self,
        actor: PlayerId,
        cell: CellKey,
        faction: FactionId,
    ) -> Result<Result<ClaimOutcome, ClaimError>, RunnerError> {
        self.request(|reply| Command::Claim {
            actor,
            cell,
            faction,
            reply,
        })
        .await
    }

    /// See [`DominionState::radius_claim`].
    pub async fn radius_claim(
        &self,
        actor: PlayerId,
        center: CellKey,
        depth: i32,
        faction: FactionId,
    ) -> Result<Result<BatchReport, ClaimError>, RunnerError> {
        self.request(|reply| Command::RadiusClaim {
            actor,
            center,
            depth,
            faction,
            reply,
        })
        .await
    }

    /// See [`DominionState::unclaim`].
    pub async fn unclaim(
        &self,
        actor: PlayerId,
        cell: CellKey,
        faction: FactionId,
    ) -> Result<Result<UnclaimOutcome, ClaimError>, RunnerError> {
        self.request(|reply| Command::Unclaim {
            actor,
            cell,
            faction,
            reply,
        })
        .await
    }

    /// See [`DominionState::radius_unclaim`].
    pub async fn radius_unclaim(
        &self,
        actor: PlayerId,
        center: CellKey,
        radius: i32,
        faction: FactionId,
    ) -> Result<Result<BatchReport, ClaimError>, RunnerError> {
        self.request(|reply| Command::RadiusUnclaim {
            actor,
            center,
            radius,
            faction,
            reply,
        })
        .await
    }

    /// See [`DominionState::unclaim_all`].
    pub async fn unclaim_all(
        &self,
        actor: PlayerId,
        faction: FactionId,
    ) -> Result<Result<BatchReport, ClaimError>, RunnerError> {
        self.request(|reply| Command::UnclaimAll {
            actor,
            faction,
            reply,
        })
        .await
    }

    /// See [`DominionState::player_moved`].
    pub async fn moved(
        &self,
        actor: PlayerId,
        cell: CellKey,
    ) -> Result<Option<Result<ClaimOutcome, ClaimError>>, RunnerError> {
        self.request(|reply| Command::Moved { actor, cell, reply })
            .await
    }

    /// See [`DominionState::disband`].
    pub async fn disband(
        &self,
        faction: FactionId,
    ) -> Result<Result<FactionDisbanded, ClaimError>, RunnerError> {
        self.request(|reply| Command::Disband { faction, reply })
            .await
    }

    /// See [`DominionState::faction_power`].
    pub async fn faction_power(
        &self,
        faction: FactionId,
    ) -> Result<Option<FactionPower>, RunnerError> {
        self.request(|reply| Command::FactionPower { faction, reply })
            .await
    }

    /// Current holder of `cell`.
    pub async fn holder(&self, cell: CellKey) -> Result<Option<FactionId>, RunnerError> {
        self.request(|reply| Command::Holder { cell, reply }).await
    }

    /// Sync and flush immediately.
    pub async fn save(&self) -> Result<(), RunnerError> {
        self.request(|reply| Command::Save { reply }).await??;
        Ok(())
    }

    /// Ask the runner to stop. Await the join handle for the result.
    pub async fn shutdown(&self) -> Result<(), RunnerError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_closed| RunnerError::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dominion_db::MemoryRepository;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::config::DominionConfig;

    fn spawn() -> (RunnerHandle, RunnerTask<MemoryRepository>) {
        let config = DominionConfig::default();
        Runner::new(
            DominionState::new(&config),
            MemoryRepository::new(),
            &config.scheduler,
        )
        .spawn()
    }

    #[tokio::test]
    async fn commands_are_applied_and_persisted_on_shutdown() {
        let (handle, task) = spawn();
        let owner = PlayerId::new();
        assert!(handle.login(owner).await.unwrap());
        let faction = handle.create_faction("Avalon", owner).await.unwrap().unwrap();
        let cell = CellKey::new("overworld", 3, 4);
        assert_eq!(
            handle.claim(owner, cell.clone(), faction).await.unwrap(),
            Ok(ClaimOutcome::Claimed)
        );
        assert_eq!(handle.holder(cell.clone()).await.unwrap(), Some(faction));

        handle.shutdown().await.unwrap();
        let (state, repo) = task.await.unwrap().unwrap();
        assert_eq!(state.grid().holder(&cell), Some(faction));
        assert_eq!(repo.cell_holder(&cell), Some(faction));
        assert!(repo.flushes() >= 1);
    }

    #[tokio::test]
    async fn handle_reports_closed_after_shutdown() {
        let (handle, task) = spawn();
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(matches!(handle.login(PlayerId::new()).await, Err(RunnerError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn regeneration_timer_fires() {
        let config = DominionConfig::default();
        let (handle, task) = Runner::new(
            DominionState::new(&config),
            MemoryRepository::new(),
            &config.scheduler,
        )
        .with_periods(Periods {
            regeneration: Duration::from_secs(10),
            decay: Duration::from_secs(3600),
            save: Duration::from_secs(3600),
        })
        .spawn();

        let player = PlayerId::new();
        handle.login(player).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.save().await.unwrap();

        handle.shutdown().await.unwrap();
        let (state, _repo) = task.await.unwrap().unwrap();
        assert_eq!(state.ledger().get_power(player), dec!(7));
    }
}
