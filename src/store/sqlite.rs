//! SQLite-backed store.
//!
//! One database file holds submissions, the agent roster and results.
//! Findings are stored as a JSON column on the result row.

use super::AnalysisStore;
use crate::error::{AnalysisError, EngineResult};
use crate::models::{
    Agent, AgentStatus, AnalysisResult, CodeSubmission, Finding, Specialty, SubmissionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Store persisting to a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open_at<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AnalysisError::Store(format!(
                    "cannot create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// A private in-memory database (useful for testing).
    pub fn open_in_memory() -> EngineResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> EngineResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        store.seed_agents()?;
        Ok(store)
    }

    fn conn(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> EngineResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&*lock(&conn)?))
            .await
            .map_err(|e| AnalysisError::Store(format!("store task failed: {}", e)))?
    }

    /// Run schema migrations
    fn run_migrations(&self) -> EngineResult<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current_version < 1 {
            migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
            info!("Analysis store initialized with schema version {}", SCHEMA_VERSION);
        }

        Ok(())
    }

    /// Insert one agent per specialty if the roster is empty.
    fn seed_agents(&self) -> EngineResult<()> {
        let conn = self.conn()?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM agents", [], |row| row.get(0))?;
        if count > 0 {
            debug!("Agent roster already seeded ({} agents)", count);
            return Ok(());
        }

        for (position, specialty) in Specialty::ALL.into_iter().enumerate() {
            let agent = Agent::new(specialty);
            conn.execute(
                "INSERT INTO agents (id, name, specialty, status, position) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    agent.id,
                    agent.name,
                    specialty.as_str(),
                    agent.status.as_str(),
                    position as i64
                ],
            )?;
        }

        info!("Seeded {} agents", Specialty::ALL.len());
        Ok(())
    }
}

fn lock(conn: &Mutex<Connection>) -> EngineResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| AnalysisError::Store(format!("Lock error: {}", e)))
}

/// Migration to version 1 - complete schema
fn migrate_v1(conn: &Connection) -> EngineResult<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            language TEXT NOT NULL,
            filename TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            submitted_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            specialty TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'idle',
            position INTEGER NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id TEXT NOT NULL REFERENCES submissions(id),
            agent_id TEXT NOT NULL REFERENCES agents(id),
            agent_name TEXT NOT NULL,
            specialty TEXT NOT NULL,
            fork_id TEXT NOT NULL,
            findings_json TEXT NOT NULL DEFAULT '[]',
            confidence REAL NOT NULL,
            execution_time_ms INTEGER NOT NULL,
            pattern_matches INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (submission_id, agent_id)
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_submission ON analysis_results(submission_id)",
        [],
    )?;

    Ok(())
}

fn parse_time(value: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AnalysisError::Store(format!("bad timestamp {:?}: {}", value, e)))
}

fn parse_enum<T: std::str::FromStr<Err = String>>(value: &str) -> EngineResult<T> {
    value.parse().map_err(AnalysisError::Store)
}

/// Raw submission columns, converted outside the row callback.
struct SubmissionRow {
    id: String,
    code: String,
    language: String,
    filename: Option<String>,
    status: String,
    submitted_at: String,
    completed_at: Option<String>,
}

impl SubmissionRow {
    fn into_submission(self) -> EngineResult<CodeSubmission> {
        Ok(CodeSubmission {
            id: self.id,
            code: self.code,
            language: self.language,
            filename: self.filename,
            status: parse_enum(&self.status)?,
            submitted_at: parse_time(&self.submitted_at)?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

struct ResultRow {
    submission_id: String,
    agent_id: String,
    agent_name: String,
    specialty: String,
    fork_id: String,
    findings_json: String,
    confidence: f64,
    execution_time_ms: i64,
    pattern_matches: i64,
    created_at: String,
}

impl ResultRow {
    fn into_result(self) -> EngineResult<AnalysisResult> {
        let findings: Vec<Finding> = serde_json::from_str(&self.findings_json)?;
        Ok(AnalysisResult {
            submission_id: self.submission_id,
            agent_id: self.agent_id,
            agent_name: self.agent_name,
            specialty: parse_enum(&self.specialty)?,
            fork_id: self.fork_id,
            findings,
            confidence: self.confidence,
            execution_time_ms: self.execution_time_ms.max(0) as u64,
            pattern_matches: self.pattern_matches.max(0) as usize,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[async_trait]
impl AnalysisStore for SqliteStore {
    async fn create_submission(&self, submission: &CodeSubmission) -> EngineResult<()> {
        let submission = submission.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO submissions (id, code, language, filename, status, submitted_at, completed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    submission.id,
                    submission.code,
                    submission.language,
                    submission.filename,
                    submission.status.as_str(),
                    submission.submitted_at.to_rfc3339(),
                    submission.completed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_submission(&self, id: &str) -> EngineResult<CodeSubmission> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT id, code, language, filename, status, submitted_at, completed_at
                    FROM submissions WHERE id = ?1
                    "#,
                    params![id],
                    |row| {
                        Ok(SubmissionRow {
                            id: row.get(0)?,
                            code: row.get(1)?,
                            language: row.get(2)?,
                            filename: row.get(3)?,
                            status: row.get(4)?,
                            submitted_at: row.get(5)?,
                            completed_at: row.get(6)?,
                        })
                    },
                )
                .optional()?;

            row.ok_or_else(|| AnalysisError::NotFound(format!("submission {}", id)))?
                .into_submission()
        })
        .await
    }

    async fn update_submission_status(
        &self,
        id: &str,
        status: SubmissionStatus,
    ) -> EngineResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM submissions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;

            let current: SubmissionStatus = match current {
                Some(value) => parse_enum(&value)?,
                None => return Err(AnalysisError::NotFound(format!("submission {}", id))),
            };

            if !current.can_transition_to(status) {
                return Err(AnalysisError::InvalidTransition {
                    from: current,
                    to: status,
                });
            }

            let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
            conn.execute(
                "UPDATE submissions SET status = ?1, completed_at = COALESCE(?2, completed_at) WHERE id = ?3",
                params![status.as_str(), completed_at, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_agents(&self) -> EngineResult<Vec<Agent>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, specialty, status FROM agents ORDER BY position")?;
            let rows: Vec<(String, String, String, String)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, name, specialty, status)| {
                    Ok(Agent {
                        id,
                        name,
                        specialty: parse_enum(&specialty)?,
                        status: parse_enum(&status)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> EngineResult<()> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE agents SET status = ?1 WHERE id = ?2",
                params![status.as_str(), agent_id],
            )?;

            if updated == 0 {
                return Err(AnalysisError::NotFound(format!("agent {}", agent_id)));
            }
            Ok(())
        })
        .await
    }

    async fn save_result(&self, result: &AnalysisResult) -> EngineResult<()> {
        let findings_json = serde_json::to_string(&result.findings)?;
        let result = result.clone();

        self.with_conn(move |conn| {
            let outcome = conn.execute(
                r#"
                INSERT INTO analysis_results (
                    submission_id, agent_id, agent_name, specialty, fork_id, findings_json,
                    confidence, execution_time_ms, pattern_matches, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    result.submission_id,
                    result.agent_id,
                    result.agent_name,
                    result.specialty.as_str(),
                    result.fork_id,
                    findings_json,
                    result.confidence,
                    result.execution_time_ms as i64,
                    result.pattern_matches as i64,
                    result.created_at.to_rfc3339(),
                ],
            );

            match outcome {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(AnalysisError::DuplicateResult {
                        submission: result.submission_id,
                        agent: result.agent_name,
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn results_for(&self, submission_id: &str) -> EngineResult<Vec<AnalysisResult>> {
        let submission_id = submission_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT submission_id, agent_id, agent_name, specialty, fork_id, findings_json,
                       confidence, execution_time_ms, pattern_matches, created_at
                FROM analysis_results
                WHERE submission_id = ?1
                ORDER BY id
                "#,
            )?;
            let rows: Vec<ResultRow> = stmt
                .query_map(params![submission_id], |row| {
                    Ok(ResultRow {
                        submission_id: row.get(0)?,
                        agent_id: row.get(1)?,
                        agent_name: row.get(2)?,
                        specialty: row.get(3)?,
                        fork_id: row.get(4)?,
                        findings_json: row.get(5)?,
                        confidence: row.get(6)?,
                        execution_time_ms: row.get(7)?,
                        pattern_matches: row.get(8)?,
                        created_at: row.get(9)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(ResultRow::into_result).collect()
        })
        .await
    }
}
