//! `PostgreSQL` backend with a write-behind queue.
//!
//! [`PgRepository::open`] loads the full snapshot up front, then spawns a
//! writer task. Repository calls serialize the record, push a [`WriteOp`]
//! onto an unbounded channel, and return immediately. The writer buffers
//! ops and commits them in one transaction each time it sees a flush
//! marker, and once more when the channel closes.
//!
//! The in-memory engine state stays the source of truth. A failed commit
//! rolls back and its ops stay queued ahead of anything sent later, so the
//! next flush retries them in their original order. Ops still uncommitted
//! when the queue closes are reported by [`PgRepository::shutdown`].
//!
//! # Tables
//!
//! | Table | Key | Contents |
//! |-------|-----|----------|
//! | `factions` | `id` | JSON-serialized [`Faction`] plus its name |
//! | `claimed_cells` | `(world, x, z)` | holder id |
//! | `player_power` | `player_id` | power, login count, timestamps |
//! | `power_changes` | serial | append-only power change log |

use chrono::{DateTime, Utc};
use dominion_types::{
    CellKey, ClaimedCell, Faction, FactionId, PlayerId, PlayerPowerRecord, PowerChange,
    PowerChangeReason,
};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::DbError;
use crate::postgres::PostgresPool;
use crate::repository::{Repository, Snapshot};

/// A queued write.
#[derive(Debug)]
enum WriteOp {
    UpsertFaction { id: Uuid, name: String, record: String },
    DeleteFaction(Uuid),
    UpsertCell { world: String, x: i32, z: i32, holder: Uuid },
    DeleteCell { world: String, x: i32, z: i32 },
    UpsertPlayer(PlayerRow),
    AppendChanges(Vec<PowerChange>),
    Flush,
}

/// A row of the `player_power` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct PlayerRow {
    player_id: Uuid,
    power: Decimal,
    login_count: i64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl From<&PlayerPowerRecord> for PlayerRow {
    fn from(record: &PlayerPowerRecord) -> Self {
        Self {
            player_id: record.player_id.into_inner(),
            power: record.power,
            login_count: i64::from(record.login_count),
            first_seen: record.first_seen,
            last_seen: record.last_seen,
        }
    }
}

impl From<PlayerRow> for PlayerPowerRecord {
    fn from(row: PlayerRow) -> Self {
        Self {
            player_id: PlayerId::from(row.player_id),
            power: row.power.max(Decimal::ZERO),
            login_count: u32::try_from(row.login_count.max(0)).unwrap_or(u32::MAX),
            first_seen: row.first_seen,
            last_seen: row.last_seen,
        }
    }
}

/// Map a [`PowerChangeReason`] to its stored text.
const fn reason_to_db(reason: PowerChangeReason) -> &'static str {
    match reason {
        PowerChangeReason::Regeneration => "regeneration",
        PowerChangeReason::Decay => "decay",
        PowerChangeReason::Kill => "kill",
        PowerChangeReason::Death => "death",
        PowerChangeReason::Admin => "admin",
    }
}

// =========================================================================
// Loading
// =========================================================================

/// Read every table into a [`Snapshot`].
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if a query fails and
/// [`DbError::Serialization`] if a faction record does not parse.
pub async fn load_snapshot(pool: &PgPool) -> Result<Snapshot, DbError> {
    let faction_rows: Vec<(String,)> =
        sqlx::query_as(r"SELECT record::TEXT FROM factions ORDER BY id")
            .fetch_all(pool)
            .await?;
    let factions = faction_rows
        .into_iter()
        .map(|(record,)| serde_json::from_str::<Faction>(&record))
        .collect::<Result<Vec<_>, _>>()?;

    let cell_rows: Vec<(String, i32, i32, Uuid)> =
        sqlx::query_as(r"SELECT world, x, z, holder FROM claimed_cells ORDER BY world, x, z")
            .fetch_all(pool)
            .await?;
    let cells = cell_rows
        .into_iter()
        .map(|(world, x, z, holder)| ClaimedCell {
            key: CellKey::new(world, x, z),
            holder: FactionId::from(holder),
        })
        .collect();

    let players = sqlx::query_as::<_, PlayerRow>(
        r"SELECT player_id, power, login_count, first_seen, last_seen FROM player_power",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(PlayerPowerRecord::from)
    .collect();

    Ok(Snapshot {
        factions,
        cells,
        players,
    })
}

// =========================================================================
// Writer task
// =========================================================================

async fn apply(tx: &mut Transaction<'_, Postgres>, op: &WriteOp) -> Result<(), DbError> {
    match op {
        WriteOp::UpsertFaction { id, name, record } => {
            sqlx::query(
                r"INSERT INTO factions (id, name, record, updated_at)
                  VALUES ($1, $2, $3::JSONB, now())
                  ON CONFLICT (id) DO UPDATE
                  SET name = EXCLUDED.name, record = EXCLUDED.record, updated_at = now()",
            )
            .bind(id)
            .bind(name)
            .bind(record)
            .execute(&mut **tx)
            .await?;
        }
        WriteOp::DeleteFaction(id) => {
            sqlx::query(r"DELETE FROM factions WHERE id = $1")
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }
        WriteOp::UpsertCell { world, x, z, holder } => {
            sqlx::query(
                r"INSERT INTO claimed_cells (world, x, z, holder) VALUES ($1, $2, $3, $4)
                  ON CONFLICT (world, x, z) DO UPDATE SET holder = EXCLUDED.holder",
            )
            .bind(world)
            .bind(x)
            .bind(z)
            .bind(holder)
            .execute(&mut **tx)
            .await?;
        }
        WriteOp::DeleteCell { world, x, z } => {
            sqlx::query(r"DELETE FROM claimed_cells WHERE world = $1 AND x = $2 AND z = $3")
                .bind(world)
                .bind(x)
                .bind(z)
                .execute(&mut **tx)
                .await?;
        }
        WriteOp::UpsertPlayer(row) => {
            sqlx::query(
                r"INSERT INTO player_power (player_id, power, login_count, first_seen, last_seen)
                  VALUES ($1, $2, $3, $4, $5)
                  ON CONFLICT (player_id) DO UPDATE
                  SET power = EXCLUDED.power, login_count = EXCLUDED.login_count,
                      last_seen = EXCLUDED.last_seen",
            )
            .bind(row.player_id)
            .bind(row.power)
            .bind(row.login_count)
            .bind(row.first_seen)
            .bind(row.last_seen)
            .execute(&mut **tx)
            .await?;
        }
        WriteOp::AppendChanges(changes) => {
            let len = changes.len();
            let mut players = Vec::with_capacity(len);
            let mut befores = Vec::with_capacity(len);
            let mut afters = Vec::with_capacity(len);
            let mut reasons = Vec::with_capacity(len);
            let mut timestamps = Vec::with_capacity(len);
            for change in changes {
                players.push(change.player_id.into_inner());
                befores.push(change.before);
                afters.push(change.after);
                reasons.push(reason_to_db(change.reason).to_owned());
                timestamps.push(change.at);
            }
            sqlx::query(
                r"INSERT INTO power_changes (player_id, before, after, reason, changed_at)
                  SELECT * FROM UNNEST($1::UUID[], $2::NUMERIC[], $3::NUMERIC[], $4::TEXT[], $5::TIMESTAMPTZ[])",
            )
            .bind(&players)
            .bind(&befores)
            .bind(&afters)
            .bind(&reasons)
            .bind(&timestamps)
            .execute(&mut **tx)
            .await?;
        }
        WriteOp::Flush => {}
    }
    Ok(())
}

async fn commit_batch(pool: &PgPool, batch: &[WriteOp]) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    for op in batch {
        apply(&mut tx, op).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Ops waiting for a successful commit.
///
/// A batch that fails to commit stays queued, and ops that arrive later are
/// appended behind it, so the next attempt replays everything in order.
#[derive(Debug, Default)]
struct PendingOps {
    ops: Vec<WriteOp>,
    failed_attempts: u32,
}

impl PendingOps {
    fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn len(&self) -> usize {
        self.ops.len()
    }

    fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Forget the committed ops. Returns how many there were.
    fn committed(&mut self) -> usize {
        let len = self.ops.len();
        self.ops.clear();
        self.failed_attempts = 0;
        len
    }

    /// Keep the ops for the next attempt. Returns the consecutive failure count.
    fn failed(&mut self) -> u32 {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.failed_attempts
    }
}

/// What the writer did before exiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WriterReport {
    committed: u64,
    abandoned: usize,
}

/// Drain the queue until every sender is gone.
async fn run_writer(pool: PgPool, mut rx: mpsc::UnboundedReceiver<WriteOp>) -> WriterReport {
    let mut pending = PendingOps::default();
    let mut report = WriterReport::default();

    loop {
        let op = rx.recv().await;
        let closing = op.is_none();
        match op {
            Some(WriteOp::Flush) | None => {}
            Some(other) => {
                pending.push(other);
                continue;
            }
        }

        if !pending.is_empty() {
            match commit_batch(&pool, pending.ops()).await {
                Ok(()) => {
                    let len = pending.committed();
                    report.committed = report
                        .committed
                        .saturating_add(u64::try_from(len).unwrap_or(u64::MAX));
                    debug!(ops = len, "Committed write-behind batch");
                }
                Err(e) => {
                    let attempt = pending.failed();
                    warn!(
                        error = %e,
                        ops = pending.len(),
                        attempt,
                        "Write-behind batch failed, keeping it for the next flush"
                    );
                }
            }
        }
        if closing {
            if !pending.is_empty() {
                report.abandoned = pending.len();
                error!(ops = report.abandoned, "Write-behind queue closed with uncommitted ops");
            }
            return report;
        }
    }
}

// =========================================================================
// Repository
// =========================================================================

/// `PostgreSQL` repository. Reads once at open, then writes behind.
#[derive(Debug)]
pub struct PgRepository {
    initial: Option<Snapshot>,
    tx: mpsc::UnboundedSender<WriteOp>,
    writer: JoinHandle<WriterReport>,
}

impl PgRepository {
    /// Run migrations, load every table, and start the writer task.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if migrations or the initial load fail.
    pub async fn open(pool: &PostgresPool) -> Result<Self, DbError> {
        pool.run_migrations().await?;
        let snapshot = load_snapshot(pool.pool()).await?;
        info!(
            factions = snapshot.factions.len(),
            cells = snapshot.cells.len(),
            players = snapshot.players.len(),
            "Loaded state from PostgreSQL"
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(pool.pool().clone(), rx));
        Ok(Self {
            initial: Some(snapshot),
            tx,
            writer,
        })
    }

    fn send(&self, op: WriteOp) -> Result<(), DbError> {
        self.tx
            .send(op)
            .map_err(|e| DbError::WriterClosed(format!("dropped {:?}", e.0)))
    }

    /// Close the queue and wait for the writer to commit what is left.
    /// Returns the total number of ops committed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::WriterClosed`] if the writer task panicked, or
    /// [`DbError::Uncommitted`] if the final commit failed.
    pub async fn shutdown(self) -> Result<u64, DbError> {
        let Self { tx, writer, .. } = self;
        drop(tx);
        let report = writer
            .await
            .map_err(|e| DbError::WriterClosed(e.to_string()))?;
        if report.abandoned > 0 {
            return Err(DbError::Uncommitted(report.abandoned));
        }
        info!(committed = report.committed, "Write-behind queue drained");
        Ok(report.committed)
    }
}

impl Repository for PgRepository {
    /// Returns the snapshot read by [`PgRepository::open`]. Later calls
    /// return an empty snapshot.
    fn load_all(&mut self) -> Result<Snapshot, DbError> {
        Ok(self.initial.take().unwrap_or_default())
    }

    fn create_faction(&mut self, faction: &Faction) -> Result<(), DbError> {
        self.update_faction(faction)
    }

    fn update_faction(&mut self, faction: &Faction) -> Result<(), DbError> {
        let record = serde_json::to_string(faction)?;
        self.send(WriteOp::UpsertFaction {
            id: faction.id.into_inner(),
            name: faction.name.clone(),
            record,
        })
    }

    fn delete_faction(&mut self, id: FactionId) -> Result<(), DbError> {
        self.send(WriteOp::DeleteFaction(id.into_inner()))
    }

    fn create_cell(&mut self, cell: &ClaimedCell) -> Result<(), DbError> {
        self.send(WriteOp::UpsertCell {
            world: cell.key.world.clone(),
            x: cell.key.x,
            z: cell.key.z,
            holder: cell.holder.into_inner(),
        })
    }

    fn delete_cell(&mut self, key: &CellKey) -> Result<(), DbError> {
        self.send(WriteOp::DeleteCell {
            world: key.world.clone(),
            x: key.x,
            z: key.z,
        })
    }

    fn create_player_record(&mut self, record: &PlayerPowerRecord) -> Result<(), DbError> {
        self.update_player_record(record)
    }

    fn update_player_record(&mut self, record: &PlayerPowerRecord) -> Result<(), DbError> {
        self.send(WriteOp::UpsertPlayer(PlayerRow::from(record)))
    }

    fn append_power_changes(&mut self, changes: &[PowerChange]) -> Result<(), DbError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.send(WriteOp::AppendChanges(changes.to_vec()))
    }

    fn flush(&mut self) -> Result<(), DbError> {
        self.send(WriteOp::Flush)
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn player_row_round_trip_clamps_bad_values() {
        let row = PlayerRow {
            player_id: Uuid::now_v7(),
            power: dec!(-2),
            login_count: -5,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
        };
        let record = PlayerPowerRecord::from(row);
        assert_eq!(record.power, Decimal::ZERO);
        assert_eq!(record.login_count, 0);

        let back = PlayerRow::from(&record);
        assert_eq!(back.login_count, 0);
        assert_eq!(back.player_id, record.player_id.into_inner());
    }

    fn cell_op(x: i32) -> WriteOp {
        WriteOp::UpsertCell {
            world: "overworld".to_owned(),
            x,
            z: 0,
            holder: Uuid::now_v7(),
        }
    }

    fn cell_x(op: &WriteOp) -> Option<i32> {
        match op {
            WriteOp::UpsertCell { x, .. } => Some(*x),
            _ => None,
        }
    }

    #[test]
    fn failed_batch_is_kept_ahead_of_later_ops() {
        let mut pending = PendingOps::default();
        let faction = Uuid::now_v7();
        pending.push(WriteOp::UpsertFaction {
            id: faction,
            name: "North".to_owned(),
            record: "{}".to_owned(),
        });
        pending.push(cell_op(1));

        assert_eq!(pending.failed(), 1);
        assert_eq!(pending.len(), 2);

        pending.push(cell_op(2));
        assert_eq!(pending.failed(), 2);

        let ops = pending.ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], WriteOp::UpsertFaction { id, .. } if *id == faction));
        assert_eq!(cell_x(&ops[1]), Some(1));
        assert_eq!(cell_x(&ops[2]), Some(2));

        assert_eq!(pending.committed(), 3);
        assert!(pending.is_empty());
        assert_eq!(pending.failed(), 1);
    }

    #[test]
    fn reasons_have_distinct_names() {
        let names = [
            PowerChangeReason::Regeneration,
            PowerChangeReason::Decay,
            PowerChangeReason::Kill,
            PowerChangeReason::Death,
            PowerChangeReason::Admin,
        ]
        .map(reason_to_db);
        let unique: std::collections::BTreeSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
