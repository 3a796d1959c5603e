//! SQLite-backed state store
//!
//! Writes are serialized through `write_lock` so change events leave the
//! process in the same order the rows were committed. Reads go straight to
//! the pool.

use super::{Promotion, StateStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdj_common::events::{ChangeEvent, EventBus, RemovalReason};
use rdj_common::{
    EntryId, HistoryEntry, PlaySource, PlaybackState, QueueEntry, SourceType, Track, TrackId,
    Versioned,
};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tokio::sync::{broadcast, Mutex};
use tracing::info;
use uuid::Uuid;

/// Durable `StateStore` on a SQLite database
pub struct SqliteStore {
    pool: SqlitePool,
    bus: EventBus,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file
    pub async fn open(db_path: &Path) -> Result<Self> {
        let newly_created = !db_path.exists();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&db_url)
            .await?;

        if newly_created {
            info!("Initialized new database: {}", db_path.display());
        } else {
            info!("Opened existing database: {}", db_path.display());
        }

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database (one connection, lives as long as the store)
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        create_tables(&pool).await?;
        Ok(Self {
            pool,
            bus: EventBus::default(),
            write_lock: Mutex::new(()),
        })
    }

    fn state_changed(&self, stored: &Versioned<PlaybackState>) {
        self.bus.emit_lossy(ChangeEvent::PlaybackStateChanged {
            room_id: stored.record.room_id.clone(),
            version: stored.version,
            state: stored.record.clone(),
            timestamp: Utc::now(),
        });
    }
}

async fn create_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playback_state (
            room_id TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            track_id TEXT,
            paused INTEGER NOT NULL,
            started_at TEXT,
            seek_base_ms INTEGER NOT NULL DEFAULT 0,
            updated_by TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            source_type TEXT NOT NULL,
            media_ref TEXT NOT NULL,
            thumbnail TEXT,
            duration_ms INTEGER,
            submitter_id TEXT,
            dedication TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            track_id TEXT NOT NULL REFERENCES tracks(id),
            position INTEGER NOT NULL,
            submitter_id TEXT NOT NULL,
            added_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_room_position ON queue(room_id, position)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            track_id TEXT NOT NULL,
            submitter_id TEXT,
            started_at TEXT NOT NULL,
            source TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_room ON history(room_id, started_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS suspensions (
            room_id TEXT NOT NULL,
            submitter_id TEXT NOT NULL,
            until TEXT NOT NULL,
            PRIMARY KEY (room_id, submitter_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("bad {} '{}': {}", column, raw, e)))
}

fn state_from_row(row: &SqliteRow) -> Result<Versioned<PlaybackState>> {
    let track_id = row
        .try_get::<Option<String>, _>("track_id")?
        .map(|s| parse_uuid(&s, "track_id"))
        .transpose()?;
    Ok(Versioned {
        version: row.try_get::<i64, _>("version")? as u64,
        record: PlaybackState {
            room_id: row.try_get("room_id")?,
            track_id,
            paused: row.try_get("paused")?,
            started_at: row.try_get("started_at")?,
            seek_base_ms: row.try_get::<i64, _>("seek_base_ms")?.max(0) as u64,
            updated_by: row.try_get("updated_by")?,
            updated_at: row.try_get("updated_at")?,
        },
    })
}

fn track_from_row(row: &SqliteRow) -> Result<Track> {
    let source: String = row.try_get("source_type")?;
    Ok(Track {
        id: parse_uuid(&row.try_get::<String, _>("id")?, "id")?,
        title: row.try_get("title")?,
        source_type: SourceType::parse_str(&source)
            .ok_or_else(|| Error::Internal(format!("unknown source type '{}'", source)))?,
        media_ref: row.try_get("media_ref")?,
        thumbnail: row.try_get("thumbnail")?,
        duration_ms: row.try_get::<Option<i64>, _>("duration_ms")?.map(|d| d.max(0) as u64),
        submitter_id: row.try_get("submitter_id")?,
        dedication: row.try_get("dedication")?,
        created_at: row.try_get("created_at")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<QueueEntry> {
    Ok(QueueEntry {
        id: parse_uuid(&row.try_get::<String, _>("id")?, "id")?,
        room_id: row.try_get("room_id")?,
        track_id: parse_uuid(&row.try_get::<String, _>("track_id")?, "track_id")?,
        position: row.try_get("position")?,
        submitter_id: row.try_get("submitter_id")?,
        added_at: row.try_get("added_at")?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<HistoryEntry> {
    let source: String = row.try_get("source")?;
    Ok(HistoryEntry {
        id: parse_uuid(&row.try_get::<String, _>("id")?, "id")?,
        room_id: row.try_get("room_id")?,
        track_id: parse_uuid(&row.try_get::<String, _>("track_id")?, "track_id")?,
        submitter_id: row.try_get("submitter_id")?,
        started_at: row.try_get("started_at")?,
        source: PlaySource::parse_str(&source)
            .ok_or_else(|| Error::Internal(format!("unknown play source '{}'", source)))?,
    })
}

/// Versioned write; `Ok(None)` when the stored version is not `expected_version`
async fn write_state(
    conn: &mut SqliteConnection,
    expected_version: u64,
    state: &PlaybackState,
) -> Result<Option<Versioned<PlaybackState>>> {
    let next = expected_version + 1;
    let track_id = state.track_id.map(|id| id.to_string());

    let affected = if expected_version == 0 {
        sqlx::query(
            r#"
            INSERT INTO playback_state
                (room_id, version, track_id, paused, started_at, seek_base_ms, updated_by, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(room_id) DO NOTHING
            "#,
        )
        .bind(&state.room_id)
        .bind(next as i64)
        .bind(track_id)
        .bind(state.paused)
        .bind(state.started_at)
        .bind(state.seek_base_ms as i64)
        .bind(&state.updated_by)
        .bind(state.updated_at)
        .execute(&mut *conn)
        .await?
        .rows_affected()
    } else {
        sqlx::query(
            r#"
            UPDATE playback_state
            SET version = ?, track_id = ?, paused = ?, started_at = ?,
                seek_base_ms = ?, updated_by = ?, updated_at = ?
            WHERE room_id = ? AND version = ?
            "#,
        )
        .bind(next as i64)
        .bind(track_id)
        .bind(state.paused)
        .bind(state.started_at)
        .bind(state.seek_base_ms as i64)
        .bind(&state.updated_by)
        .bind(state.updated_at)
        .bind(&state.room_id)
        .bind(expected_version as i64)
        .execute(&mut *conn)
        .await?
        .rows_affected()
    };

    if affected == 0 {
        return Ok(None);
    }
    Ok(Some(Versioned {
        version: next,
        record: state.clone(),
    }))
}

async fn insert_history_row(conn: &mut SqliteConnection, entry: &HistoryEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO history (id, room_id, track_id, submitter_id, started_at, source)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(&entry.room_id)
    .bind(entry.track_id.to_string())
    .bind(&entry.submitter_id)
    .bind(entry.started_at)
    .bind(entry.source.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn version_conflict(room_id: &str, expected_version: u64) -> Error {
    Error::Conflict(format!(
        "playback state for {} moved past version {}",
        room_id, expected_version
    ))
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load_state(&self, room_id: &str) -> Result<Versioned<PlaybackState>> {
        let row = sqlx::query("SELECT * FROM playback_state WHERE room_id = ?")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => state_from_row(&row),
            None => Ok(Versioned {
                version: 0,
                record: PlaybackState::idle(room_id, Utc::now()),
            }),
        }
    }

    async fn compare_and_set_state(
        &self,
        expected_version: u64,
        state: PlaybackState,
    ) -> Result<Versioned<PlaybackState>> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        let stored = write_state(&mut conn, expected_version, &state)
            .await?
            .ok_or_else(|| version_conflict(&state.room_id, expected_version))?;
        self.state_changed(&stored);
        Ok(stored)
    }

    async fn insert_track(&self, track: &Track) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let affected = sqlx::query(
            r#"
            INSERT INTO tracks
                (id, title, source_type, media_ref, thumbnail, duration_ms, submitter_id, dedication, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(track.id.to_string())
        .bind(&track.title)
        .bind(track.source_type.as_str())
        .bind(&track.media_ref)
        .bind(&track.thumbnail)
        .bind(track.duration_ms.map(|d| d as i64))
        .bind(&track.submitter_id)
        .bind(&track.dedication)
        .bind(track.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(Error::Conflict(format!("track {} already exists", track.id)));
        }
        self.bus.emit_lossy(ChangeEvent::TrackCreated {
            track: track.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn get_track(&self, track_id: TrackId) -> Result<Option<Track>> {
        let row = sqlx::query("SELECT * FROM tracks WHERE id = ?")
            .bind(track_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(track_from_row).transpose()
    }

    async fn list_queue(&self, room_id: &str) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query("SELECT * FROM queue WHERE room_id = ? ORDER BY position, added_at")
            .bind(room_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn insert_queue_entry(&self, entry: &QueueEntry, shift_from: Option<i64>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let track_exists: Option<(String,)> = sqlx::query_as("SELECT id FROM tracks WHERE id = ?")
            .bind(entry.track_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if track_exists.is_none() {
            return Err(Error::NotFound(format!("track {}", entry.track_id)));
        }

        if let Some(from) = shift_from {
            sqlx::query("UPDATE queue SET position = position + 1 WHERE room_id = ? AND position >= ?")
                .bind(&entry.room_id)
                .bind(from)
                .execute(&mut *tx)
                .await?;
        }

        let occupied: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue WHERE room_id = ? AND position = ?")
                .bind(&entry.room_id)
                .bind(entry.position)
                .fetch_one(&mut *tx)
                .await?;
        if occupied > 0 {
            // Dropping the transaction rolls back the shift
            return Err(Error::Conflict(format!(
                "queue position {} already taken in {}",
                entry.position, entry.room_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO queue (id, room_id, track_id, position, submitter_id, added_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.room_id)
        .bind(entry.track_id.to_string())
        .bind(entry.position)
        .bind(&entry.submitter_id)
        .bind(entry.added_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Some(from) = shift_from {
            self.bus.emit_lossy(ChangeEvent::QueueReordered {
                room_id: entry.room_id.clone(),
                from_position: from,
                timestamp: Utc::now(),
            });
        }
        self.bus.emit_lossy(ChangeEvent::QueueEntryAdded {
            room_id: entry.room_id.clone(),
            entry: entry.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn delete_queue_entry(
        &self,
        room_id: &str,
        entry_id: EntryId,
        reason: RemovalReason,
    ) -> Result<Option<QueueEntry>> {
        let _guard = self.write_lock.lock().await;
        let row = sqlx::query("DELETE FROM queue WHERE room_id = ? AND id = ? RETURNING *")
            .bind(room_id)
            .bind(entry_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let removed = entry_from_row(&row)?;
        self.bus.emit_lossy(ChangeEvent::QueueEntryRemoved {
            room_id: room_id.to_string(),
            entry_id,
            track_id: removed.track_id,
            reason,
            timestamp: Utc::now(),
        });
        Ok(Some(removed))
    }

    async fn promote(&self, promotion: Promotion) -> Result<Versioned<PlaybackState>> {
        let Promotion {
            entry_id,
            expected_version,
            state,
            history,
        } = promotion;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("DELETE FROM queue WHERE room_id = ? AND id = ? RETURNING *")
            .bind(&state.room_id)
            .bind(entry_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(Error::RaceLost(format!("queue entry {} already consumed", entry_id)));
        };
        let removed = entry_from_row(&row)?;

        let Some(stored) = write_state(&mut tx, expected_version, &state).await? else {
            return Err(version_conflict(&state.room_id, expected_version));
        };
        insert_history_row(&mut tx, &history).await?;
        tx.commit().await?;

        self.bus.emit_lossy(ChangeEvent::QueueEntryRemoved {
            room_id: state.room_id.clone(),
            entry_id,
            track_id: removed.track_id,
            reason: RemovalReason::Promoted,
            timestamp: Utc::now(),
        });
        self.state_changed(&stored);
        self.bus.emit_lossy(ChangeEvent::HistoryAppended {
            room_id: state.room_id,
            entry: history,
            timestamp: Utc::now(),
        });
        Ok(stored)
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        insert_history_row(&mut conn, entry).await?;
        self.bus.emit_lossy(ChangeEvent::HistoryAppended {
            room_id: entry.room_id.clone(),
            entry: entry.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn recent_history(&self, room_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM history WHERE room_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(room_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(history_from_row).collect()
    }

    async fn played_count(&self, room_id: &str, submitter_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM history WHERE room_id = ? AND submitter_id = ?")
                .bind(room_id)
                .bind(submitter_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn get_suspension(&self, room_id: &str, submitter_id: &str) -> Result<Option<DateTime<Utc>>> {
        let until: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT until FROM suspensions WHERE room_id = ? AND submitter_id = ?",
        )
        .bind(room_id)
        .bind(submitter_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(until)
    }

    async fn set_suspension(
        &self,
        room_id: &str,
        submitter_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match until {
            Some(until) => {
                sqlx::query(
                    r#"
                    INSERT INTO suspensions (room_id, submitter_id, until) VALUES (?, ?, ?)
                    ON CONFLICT(room_id, submitter_id) DO UPDATE SET until = excluded.until
                    "#,
                )
                .bind(room_id)
                .bind(submitter_id)
                .bind(until)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM suspensions WHERE room_id = ? AND submitter_id = ?")
                    .bind(room_id)
                    .bind(submitter_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        self.bus.emit_lossy(ChangeEvent::SuspensionChanged {
            room_id: room_id.to_string(),
            submitter_id: submitter_id.to_string(),
            until,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.bus.subscribe()
    }
}
