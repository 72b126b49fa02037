//! Per-thread reply watermarks backed by SQLite.
//!
//! A watermark is the reply count last seen on the thread index. The
//! watermark is written as soon as the new count is observed, before the
//! replies are actually scanned, so a crash mid-scan skips those replies on
//! the next run (at-most-once).

mod reported;

pub use reported::{ReportedCount, DEFAULT_FINISHED_SENTINEL};

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("tracker connection lock poisoned")]
    Poisoned,
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Stored state for one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadWatermark {
    pub thread_id: u64,
    pub reply_count: u32,
    /// The index reported the thread as closed.
    pub finished: bool,
    pub updated_at: DateTime<Utc>,
}

/// Result of comparing an index count with the stored watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diff {
    /// Replies that appeared since the last observation.
    pub delta: u32,
    /// No watermark existed before this call.
    pub is_new_thread: bool,
    /// Count stored before this call (0 for new threads).
    pub previous_count: u32,
}

/// Aggregate numbers for the `status` command.
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    pub threads: u64,
    pub finished: u64,
    pub oldest_update: Option<DateTime<Utc>>,
    pub newest_update: Option<DateTime<Utc>>,
}

/// SQLite-backed watermark store. Single writer.
pub struct ReplyTracker {
    conn: Mutex<Connection>,
    finished_sentinel: u32,
}

fn to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

impl ReplyTracker {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: &Path) -> TrackerResult<Self> {
        let conn = Connection::open(db_path)?;

        // Survive being killed mid-write
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Self::with_connection(conn)
    }

    /// Store that lives only as long as the value does.
    pub fn in_memory() -> TrackerResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> TrackerResult<Self> {
        let tracker = Self {
            conn: Mutex::new(conn),
            finished_sentinel: DEFAULT_FINISHED_SENTINEL,
        };
        tracker.init_tables()?;
        Ok(tracker)
    }

    /// Count recorded for threads the index reports as closed.
    pub fn with_finished_sentinel(mut self, sentinel: u32) -> Self {
        self.finished_sentinel = sentinel;
        self
    }

    pub fn finished_sentinel(&self) -> u32 {
        self.finished_sentinel
    }

    fn init_tables(&self) -> TrackerResult<()> {
        let conn = self.conn.lock().map_err(|_| TrackerError::Poisoned)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS thread_watermarks (
                thread_id INTEGER PRIMARY KEY,
                reply_count INTEGER NOT NULL,
                finished INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_watermarks_updated
                ON thread_watermarks(updated_at);
        "#,
        )?;

        Ok(())
    }

    fn row_to_watermark(row: &rusqlite::Row) -> rusqlite::Result<ThreadWatermark> {
        Ok(ThreadWatermark {
            thread_id: row.get::<_, i64>(0)? as u64,
            reply_count: row.get::<_, i64>(1)? as u32,
            finished: row.get::<_, i32>(2)? != 0,
            updated_at: to_datetime(row.get(3)?),
        })
    }

    /// Compare `reported` with the stored watermark and upsert it.
    pub fn diff(&self, thread_id: u64, reported: ReportedCount) -> TrackerResult<Diff> {
        self.diff_at(thread_id, reported, Utc::now())
    }

    /// [`diff`](Self::diff) with an explicit clock.
    pub fn diff_at(
        &self,
        thread_id: u64,
        reported: ReportedCount,
        now: DateTime<Utc>,
    ) -> TrackerResult<Diff> {
        let conn = self.conn.lock().map_err(|_| TrackerError::Poisoned)?;
        let now_ms = now.timestamp_millis();

        let (count, finished) = match reported {
            ReportedCount::Count(n) => (n, false),
            ReportedCount::Finished => (self.finished_sentinel, true),
        };

        let stored: Option<(i64, i32)> = conn
            .query_row(
                "SELECT reply_count, finished FROM thread_watermarks WHERE thread_id = ?",
                params![thread_id as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let diff = match stored {
            None => {
                conn.execute(
                    "INSERT INTO thread_watermarks (thread_id, reply_count, finished, updated_at)
                     VALUES (?, ?, ?, ?)",
                    params![thread_id as i64, count as i64, finished as i32, now_ms],
                )?;
                Diff {
                    delta: count,
                    is_new_thread: true,
                    previous_count: 0,
                }
            }
            Some((previous, was_finished)) => {
                let previous = previous as u32;
                // Replies are append-only; a lower count never moves the watermark back
                let next = previous.max(count);
                conn.execute(
                    "UPDATE thread_watermarks SET reply_count = ?, finished = ?, updated_at = ?
                     WHERE thread_id = ?",
                    params![
                        next as i64,
                        (finished || was_finished != 0) as i32,
                        now_ms,
                        thread_id as i64
                    ],
                )?;
                Diff {
                    delta: next - previous,
                    is_new_thread: false,
                    previous_count: previous,
                }
            }
        };

        if diff.delta > 0 {
            debug!(
                "Thread {}: {} -> {} ({} new)",
                thread_id,
                diff.previous_count,
                diff.previous_count + diff.delta,
                diff.delta
            );
        }
        Ok(diff)
    }

    /// Point lookup.
    pub fn get(&self, thread_id: u64) -> TrackerResult<Option<ThreadWatermark>> {
        let conn = self.conn.lock().map_err(|_| TrackerError::Poisoned)?;
        let row = conn
            .query_row(
                "SELECT thread_id, reply_count, finished, updated_at
                 FROM thread_watermarks WHERE thread_id = ?",
                params![thread_id as i64],
                Self::row_to_watermark,
            )
            .optional()?;
        Ok(row)
    }

    /// Remove watermarks not updated within `retention`. Returns the number removed.
    ///
    /// Every [`diff`](Self::diff) refreshes `updated_at`, even with a zero
    /// delta, so retention counts from when a thread was last seen on the
    /// index rather than from its last new reply. A finished thread that
    /// stays listed is kept until it drops off the index.
    pub fn delete_expired(&self, retention: Duration) -> TrackerResult<u64> {
        self.delete_expired_at(retention, Utc::now())
    }

    /// [`delete_expired`](Self::delete_expired) with an explicit clock. The
    /// cutoff is `now - retention` against the last sighting.
    pub fn delete_expired_at(&self, retention: Duration, now: DateTime<Utc>) -> TrackerResult<u64> {
        let conn = self.conn.lock().map_err(|_| TrackerError::Poisoned)?;
        let cutoff_ms = now.timestamp_millis() - retention.as_millis() as i64;

        let deleted = conn.execute(
            "DELETE FROM thread_watermarks WHERE updated_at < ?",
            params![cutoff_ms],
        )?;

        if deleted > 0 {
            info!("Removed {} expired thread watermarks", deleted);
        }
        Ok(deleted as u64)
    }

    pub fn stats(&self) -> TrackerResult<TrackerStats> {
        let conn = self.conn.lock().map_err(|_| TrackerError::Poisoned)?;
        let (threads, finished, oldest, newest): (i64, Option<i64>, Option<i64>, Option<i64>) =
            conn.query_row(
                "SELECT COUNT(*), SUM(finished), MIN(updated_at), MAX(updated_at)
                 FROM thread_watermarks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        Ok(TrackerStats {
            threads: threads as u64,
            finished: finished.unwrap_or(0) as u64,
            oldest_update: oldest.map(to_datetime),
            newest_update: newest.map(to_datetime),
        })
    }
}
