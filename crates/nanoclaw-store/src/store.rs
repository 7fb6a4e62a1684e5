use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use nanoclaw_core::current_unix_timestamp_ms;

use crate::run_types::{
    CompletionArtifacts, ContextIntent, CreateRunOutcome, DeadLetterRecord, MessageRecord,
    NewMessage, NewWorkerRun, RunState, SessionResumeStatus, SteerEventRecord, SteerStatus,
    TransitionOutcome, WorkerRunRecord,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    ingest_seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    group_folder     TEXT NOT NULL,
    chat_jid         TEXT NOT NULL,
    body             TEXT NOT NULL,
    received_unix_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_group_seq
    ON messages (group_folder, ingest_seq);

CREATE TABLE IF NOT EXISTS group_cursors (
    group_folder    TEXT PRIMARY KEY,
    last_ingest_seq INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS worker_runs (
    run_id                   TEXT PRIMARY KEY,
    state                    TEXT NOT NULL,
    retry_count              INTEGER NOT NULL DEFAULT 0,
    target_group             TEXT NOT NULL,
    task_type                TEXT NOT NULL,
    dispatch_repo            TEXT NOT NULL,
    dispatch_branch          TEXT NOT NULL,
    context_intent           TEXT NOT NULL,
    parent_run_id            TEXT,
    dispatch_session_id      TEXT,
    selected_session_id      TEXT,
    effective_session_id     TEXT,
    session_selection_source TEXT,
    session_resume_status    TEXT,
    session_resume_error     TEXT,
    completion_branch        TEXT,
    completion_commit_sha    TEXT,
    completion_files_changed TEXT,
    completion_test_result   TEXT,
    completion_risk          TEXT,
    completion_pr_url        TEXT,
    completion_pr_skipped    TEXT,
    failure_reason           TEXT,
    last_progress_summary    TEXT,
    last_progress_unix_ms    INTEGER,
    steer_count              INTEGER NOT NULL DEFAULT 0,
    created_unix_ms          INTEGER NOT NULL,
    updated_unix_ms          INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_worker_runs_group_state
    ON worker_runs (target_group, state);

CREATE TABLE IF NOT EXISTS worker_steering_events (
    steer_id         TEXT PRIMARY KEY,
    run_id           TEXT NOT NULL,
    from_group       TEXT NOT NULL,
    message          TEXT NOT NULL,
    sent_at_unix_ms  INTEGER NOT NULL,
    acked_at_unix_ms INTEGER,
    status           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dead_letters (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    group_folder     TEXT NOT NULL,
    body             TEXT NOT NULL,
    first_ingest_seq INTEGER NOT NULL,
    last_ingest_seq  INTEGER NOT NULL,
    reason           TEXT NOT NULL,
    created_unix_ms  INTEGER NOT NULL
);
";

/// Typed store boundary error. Expected alternative outcomes (duplicate
/// run, rejected transition) are enum return values, not errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("worker run '{0}' was not found")]
    RunNotFound(String),
    #[error("steering event '{0}' was not found")]
    SteerNotFound(String),
    #[error("invalid stored {column} value '{value}'")]
    InvalidColumn { column: &'static str, value: String },
}

/// Single-writer serializable store over one SQLite connection.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if needed) the store at `path` and applies the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store; used by tests and dry-run tooling.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Inserts a message and returns its allocated monotonic `ingest_seq`.
    /// AUTOINCREMENT keeps the sequence strictly increasing and durable
    /// across restarts.
    pub fn insert_message(&self, message: &NewMessage) -> Result<u64, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO messages (group_folder, chat_jid, body, received_unix_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                message.group_folder,
                message.chat_jid,
                message.body,
                to_i64(message.received_unix_ms),
            ],
        )?;
        Ok(conn.last_insert_rowid().unsigned_abs())
    }

    /// Returns up to `limit` messages for `group` with `ingest_seq` strictly
    /// greater than `after_seq`, in sequence order.
    pub fn messages_after(
        &self,
        group: &str,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT ingest_seq, group_folder, chat_jid, body, received_unix_ms
             FROM messages
             WHERE group_folder = ?1 AND ingest_seq > ?2
             ORDER BY ingest_seq ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![group, to_i64(after_seq), limit as i64],
            |row| {
                Ok(MessageRecord {
                    ingest_seq: row.get::<_, i64>(0)?.unsigned_abs(),
                    group_folder: row.get(1)?,
                    chat_jid: row.get(2)?,
                    body: row.get(3)?,
                    received_unix_ms: row.get::<_, i64>(4)?.unsigned_abs(),
                })
            },
        )?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Returns the per-group high-watermark over `ingest_seq` (0 when the
    /// group has never advanced).
    pub fn cursor(&self, group: &str) -> Result<u64, StoreError> {
        let conn = self.lock();
        let seq: Option<i64> = conn
            .query_row(
                "SELECT last_ingest_seq FROM group_cursors WHERE group_folder = ?1",
                params![group],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq.map(i64::unsigned_abs).unwrap_or(0))
    }

    /// Advances the group's cursor. The cursor only moves forward; a stale
    /// caller cannot rewind it.
    pub fn advance_cursor(&self, group: &str, seq: u64) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO group_cursors (group_folder, last_ingest_seq) VALUES (?1, ?2)
             ON CONFLICT(group_folder) DO UPDATE SET last_ingest_seq = excluded.last_ingest_seq
             WHERE excluded.last_ingest_seq > group_cursors.last_ingest_seq",
            params![group, to_i64(seq)],
        )?;
        Ok(())
    }

    /// Creates a `queued` worker run row, or resolves the dispatch against
    /// an existing row with the same `run_id`.
    pub fn create_run(&self, run: &NewWorkerRun) -> Result<CreateRunOutcome, StoreError> {
        let now = to_i64(current_unix_timestamp_ms());
        let conn = self.lock();
        let existing: Option<(String, i64)> = conn
            .query_row(
                "SELECT state, retry_count FROM worker_runs WHERE run_id = ?1",
                params![run.run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO worker_runs (
                        run_id, state, retry_count, target_group, task_type,
                        dispatch_repo, dispatch_branch, context_intent, parent_run_id,
                        dispatch_session_id, created_unix_ms, updated_unix_ms
                    ) VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                    params![
                        run.run_id,
                        RunState::Queued.as_str(),
                        run.target_group,
                        run.task_type,
                        run.dispatch_repo,
                        run.dispatch_branch,
                        run.context_intent.as_str(),
                        run.parent_run_id,
                        run.dispatch_session_id,
                        now,
                    ],
                )?;
                Ok(CreateRunOutcome::Created)
            }
            Some((state_raw, retry_count)) => {
                let state = parse_state(&state_raw)?;
                if !state.is_retryable() {
                    return Ok(CreateRunOutcome::DuplicateBlocked { state });
                }
                let next_retry = retry_count.saturating_add(1);
                conn.execute(
                    "UPDATE worker_runs SET
                        state = ?2, retry_count = ?3, target_group = ?4, task_type = ?5,
                        dispatch_repo = ?6, dispatch_branch = ?7, context_intent = ?8,
                        parent_run_id = ?9, dispatch_session_id = ?10,
                        selected_session_id = NULL, effective_session_id = NULL,
                        session_selection_source = NULL, session_resume_status = NULL,
                        session_resume_error = NULL,
                        completion_branch = NULL, completion_commit_sha = NULL,
                        completion_files_changed = NULL, completion_test_result = NULL,
                        completion_risk = NULL, completion_pr_url = NULL,
                        completion_pr_skipped = NULL, failure_reason = NULL,
                        updated_unix_ms = ?11
                     WHERE run_id = ?1",
                    params![
                        run.run_id,
                        RunState::Queued.as_str(),
                        next_retry,
                        run.target_group,
                        run.task_type,
                        run.dispatch_repo,
                        run.dispatch_branch,
                        run.context_intent.as_str(),
                        run.parent_run_id,
                        run.dispatch_session_id,
                        now,
                    ],
                )?;
                Ok(CreateRunOutcome::RetryAccepted {
                    retry_count: next_retry.unsigned_abs() as u32,
                })
            }
        }
    }

    /// Applies a guarded state transition. The `WHERE state = current` clause
    /// makes the check-and-set atomic; a rejected outcome means the caller
    /// lost a race or holds a stale view.
    pub fn transition_run(
        &self,
        run_id: &str,
        from_states: &[RunState],
        to_state: RunState,
        artifacts: Option<&CompletionArtifacts>,
        failure_reason: Option<&str>,
    ) -> Result<TransitionOutcome, StoreError> {
        let now = to_i64(current_unix_timestamp_ms());
        let conn = self.lock();
        let current_raw: Option<String> = conn
            .query_row(
                "SELECT state FROM worker_runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current_raw) = current_raw else {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        };
        let current = parse_state(&current_raw)?;
        if !from_states.contains(&current) {
            return Ok(TransitionOutcome::Rejected { current });
        }

        let files_changed_json = match artifacts {
            Some(artifacts) => Some(
                serde_json::to_string(&artifacts.files_changed).map_err(|_| {
                    StoreError::InvalidColumn {
                        column: "completion_files_changed",
                        value: format!("{:?}", artifacts.files_changed),
                    }
                })?,
            ),
            None => None,
        };
        let changed = conn.execute(
            "UPDATE worker_runs SET
                state = ?3,
                completion_branch = ?4, completion_commit_sha = ?5,
                completion_files_changed = ?6, completion_test_result = ?7,
                completion_risk = ?8, completion_pr_url = ?9,
                completion_pr_skipped = ?10, failure_reason = ?11,
                updated_unix_ms = ?12
             WHERE run_id = ?1 AND state = ?2",
            params![
                run_id,
                current.as_str(),
                to_state.as_str(),
                artifacts.map(|a| a.branch.as_str()),
                artifacts.map(|a| a.commit_sha.as_str()),
                files_changed_json,
                artifacts.map(|a| a.test_result.as_str()),
                artifacts.map(|a| a.risk.as_str()),
                artifacts.and_then(|a| a.pr_url.as_deref()),
                artifacts.and_then(|a| a.pr_skipped_reason.as_deref()),
                failure_reason,
                now,
            ],
        )?;
        if changed == 1 {
            Ok(TransitionOutcome::Applied)
        } else {
            Ok(TransitionOutcome::Rejected { current })
        }
    }

    /// Records the session telemetry the agent reported for a turn.
    pub fn record_session_outcome(
        &self,
        run_id: &str,
        effective_session_id: Option<&str>,
        selection_source: &str,
        resume_status: SessionResumeStatus,
        resume_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = to_i64(current_unix_timestamp_ms());
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE worker_runs SET
                selected_session_id = COALESCE(selected_session_id, dispatch_session_id),
                effective_session_id = ?2, session_selection_source = ?3,
                session_resume_status = ?4, session_resume_error = ?5,
                updated_unix_ms = ?6
             WHERE run_id = ?1",
            params![
                run_id,
                effective_session_id,
                selection_source,
                resume_status.as_str(),
                resume_error,
                now,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    /// Mirrors the latest progress event onto the run row.
    pub fn record_progress(
        &self,
        run_id: &str,
        summary: &str,
        ts_unix_ms: u64,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE worker_runs SET
                last_progress_summary = ?2, last_progress_unix_ms = ?3, updated_unix_ms = ?3
             WHERE run_id = ?1",
            params![run_id, summary, to_i64(ts_unix_ms)],
        )?;
        if changed == 0 {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    /// Records a pending steering event and bumps the run's steer counter.
    pub fn record_steer(&self, event: &SteerEventRecord) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO worker_steering_events
                (steer_id, run_id, from_group, message, sent_at_unix_ms, acked_at_unix_ms, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.steer_id,
                event.run_id,
                event.from_group,
                event.message,
                to_i64(event.sent_at_unix_ms),
                event.acked_at_unix_ms.map(to_i64),
                event.status.as_str(),
            ],
        )?;
        conn.execute(
            "UPDATE worker_runs SET steer_count = steer_count + 1 WHERE run_id = ?1",
            params![event.run_id],
        )?;
        Ok(())
    }

    /// Marks a pending steering event acked. Returns false when the event
    /// was already acked or expired (at-most-once semantics).
    pub fn ack_steer(&self, steer_id: &str, ts_unix_ms: u64) -> Result<bool, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE worker_steering_events
             SET status = ?2, acked_at_unix_ms = ?3
             WHERE steer_id = ?1 AND status = ?4",
            params![
                steer_id,
                SteerStatus::Acked.as_str(),
                to_i64(ts_unix_ms),
                SteerStatus::Pending.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Expires a pending steering event that was never consumed.
    pub fn expire_steer(&self, steer_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE worker_steering_events SET status = ?2
             WHERE steer_id = ?1 AND status = ?3",
            params![
                steer_id,
                SteerStatus::Expired.as_str(),
                SteerStatus::Pending.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn steer(&self, steer_id: &str) -> Result<SteerEventRecord, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT steer_id, run_id, from_group, message, sent_at_unix_ms,
                    acked_at_unix_ms, status
             FROM worker_steering_events WHERE steer_id = ?1",
            params![steer_id],
            steer_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::SteerNotFound(steer_id.to_string()))
    }

    pub fn run(&self, run_id: &str) -> Result<WorkerRunRecord, StoreError> {
        let conn = self.lock();
        conn.query_row(
            &format!("{RUN_SELECT} WHERE run_id = ?1"),
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    /// Used by reconciliation sweeps over `(target_group, state)`.
    pub fn runs_in_state(
        &self,
        group: &str,
        state: RunState,
    ) -> Result<Vec<WorkerRunRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("{RUN_SELECT} WHERE target_group = ?1 AND state = ?2"))?;
        let rows = stmt.query_map(params![group, state.as_str()], run_from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Finds the most recent run that owns a model session id, either by
    /// dispatch or by the agent's reported effective session. Used to keep
    /// `continue` dispatches from crossing worker groups.
    pub fn run_for_session(&self, session_id: &str) -> Result<Option<WorkerRunRecord>, StoreError> {
        let conn = self.lock();
        let record = conn
            .query_row(
                &format!(
                    "{RUN_SELECT}
                     WHERE effective_session_id = ?1 OR dispatch_session_id = ?1
                     ORDER BY updated_unix_ms DESC LIMIT 1"
                ),
                params![session_id],
                run_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Returns true when a run row exists for `run_id`.
    pub fn run_exists(&self, run_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM worker_runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Records an exhausted batch so it is never silently dropped.
    pub fn record_dead_letter(
        &self,
        group: &str,
        body: &str,
        first_ingest_seq: u64,
        last_ingest_seq: u64,
        reason: &str,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO dead_letters
                (group_folder, body, first_ingest_seq, last_ingest_seq, reason, created_unix_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                group,
                body,
                to_i64(first_ingest_seq),
                to_i64(last_ingest_seq),
                reason,
                to_i64(current_unix_timestamp_ms()),
            ],
        )?;
        Ok(())
    }

    pub fn dead_letters(&self, group: &str) -> Result<Vec<DeadLetterRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, group_folder, body, first_ingest_seq, last_ingest_seq, reason,
                    created_unix_ms
             FROM dead_letters WHERE group_folder = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![group], |row| {
            Ok(DeadLetterRecord {
                id: row.get::<_, i64>(0)?.unsigned_abs(),
                group_folder: row.get(1)?,
                body: row.get(2)?,
                first_ingest_seq: row.get::<_, i64>(3)?.unsigned_abs(),
                last_ingest_seq: row.get::<_, i64>(4)?.unsigned_abs(),
                reason: row.get(5)?,
                created_unix_ms: row.get::<_, i64>(6)?.unsigned_abs(),
            })
        })?;
        let mut letters = Vec::new();
        for row in rows {
            letters.push(row?);
        }
        Ok(letters)
    }
}

const RUN_SELECT: &str = "SELECT
    run_id, state, retry_count, target_group, task_type,
    dispatch_repo, dispatch_branch, context_intent, parent_run_id,
    dispatch_session_id, selected_session_id, effective_session_id,
    session_selection_source, session_resume_status, session_resume_error,
    completion_branch, completion_commit_sha, completion_files_changed,
    completion_test_result, completion_risk, completion_pr_url,
    completion_pr_skipped, failure_reason, last_progress_summary,
    last_progress_unix_ms, steer_count, created_unix_ms, updated_unix_ms
 FROM worker_runs";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<WorkerRunRecord> {
    let state_raw: String = row.get(1)?;
    let intent_raw: String = row.get(7)?;
    let resume_raw: Option<String> = row.get(13)?;
    let completion_branch: Option<String> = row.get(15)?;
    let completion = match completion_branch {
        Some(branch) => {
            let files_raw: Option<String> = row.get(17)?;
            let files_changed = files_raw
                .as_deref()
                .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
                .unwrap_or_default();
            Some(CompletionArtifacts {
                branch,
                commit_sha: row.get::<_, Option<String>>(16)?.unwrap_or_default(),
                files_changed,
                test_result: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
                risk: row.get::<_, Option<String>>(19)?.unwrap_or_default(),
                pr_url: row.get(20)?,
                pr_skipped_reason: row.get(21)?,
            })
        }
        None => None,
    };
    Ok(WorkerRunRecord {
        run_id: row.get(0)?,
        state: RunState::parse(&state_raw).unwrap_or(RunState::Failed),
        retry_count: row.get::<_, i64>(2)?.unsigned_abs() as u32,
        target_group: row.get(3)?,
        task_type: row.get(4)?,
        dispatch_repo: row.get(5)?,
        dispatch_branch: row.get(6)?,
        context_intent: ContextIntent::parse(&intent_raw).unwrap_or(ContextIntent::Fresh),
        parent_run_id: row.get(8)?,
        dispatch_session_id: row.get(9)?,
        selected_session_id: row.get(10)?,
        effective_session_id: row.get(11)?,
        session_selection_source: row.get(12)?,
        session_resume_status: resume_raw.as_deref().and_then(SessionResumeStatus::parse),
        session_resume_error: row.get(14)?,
        completion,
        failure_reason: row.get(22)?,
        last_progress_summary: row.get(23)?,
        last_progress_unix_ms: row.get::<_, Option<i64>>(24)?.map(i64::unsigned_abs),
        steer_count: row.get::<_, i64>(25)?.unsigned_abs() as u32,
        created_unix_ms: row.get::<_, i64>(26)?.unsigned_abs(),
        updated_unix_ms: row.get::<_, i64>(27)?.unsigned_abs(),
    })
}

fn steer_from_row(row: &Row<'_>) -> rusqlite::Result<SteerEventRecord> {
    let status_raw: String = row.get(6)?;
    Ok(SteerEventRecord {
        steer_id: row.get(0)?,
        run_id: row.get(1)?,
        from_group: row.get(2)?,
        message: row.get(3)?,
        sent_at_unix_ms: row.get::<_, i64>(4)?.unsigned_abs(),
        acked_at_unix_ms: row.get::<_, Option<i64>>(5)?.map(i64::unsigned_abs),
        status: SteerStatus::parse(&status_raw).unwrap_or(SteerStatus::Expired),
    })
}

fn parse_state(raw: &str) -> Result<RunState, StoreError> {
    RunState::parse(raw).ok_or_else(|| StoreError::InvalidColumn {
        column: "state",
        value: raw.to_string(),
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
