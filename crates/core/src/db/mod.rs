//! Database seam.
//!
//! The core services talk to the database through two traits:
//!
//! - [`SessionSource`]: owns connection pools for every environment and hands out sessions.
//!   One instance is constructed at startup and injected into the application state.
//! - [`Session`]: one connection and one unit of work. Writes stay invisible to other
//!   sessions until [`Session::commit`].
//!
//! Two implementations ship with the crate: [`oracle::OraclePools`] for real environments and
//! [`memory::MemoryDatabase`] for local runs and tests.

pub mod memory;
pub mod oracle;

use crate::constants::UNIQUE_VIOLATION_CODE;
use crate::intake::IntakeCandidate;
use crate::query::JoinQuery;
use crate::TestDataResult;
use api_shared::ColumnMeta;
use std::fmt;
use tdm_types::{Environment, Identifier};

/// One result row keyed by column name, in projection order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A driver error with its Oracle error code, when one was reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    pub code: Option<i32>,
    pub message: String,
}

impl DbError {
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True for ORA-00001, the only error class the intake creator retries.
    pub fn is_unique_violation(&self) -> bool {
        self.code == Some(UNIQUE_VIOLATION_CODE)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) if !self.message.starts_with("ORA-") => {
                write!(f, "ORA-{code:05}: {}", self.message)
            }
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DbError {}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// A single connection with an open unit of work.
pub trait Session: Send {
    /// Catalog columns of `table`, in column order. Empty when the table does not exist.
    fn table_columns(&mut self, table: &Identifier) -> DbResult<Vec<ColumnMeta>>;

    /// First row of the fixed service join, or `None`.
    fn select_first(&mut self, query: &JoinQuery) -> DbResult<Option<Row>>;

    fn insert_patient(&mut self, candidate: &IntakeCandidate) -> DbResult<()>;
    fn insert_intake_plan(&mut self, candidate: &IntakeCandidate) -> DbResult<()>;
    fn insert_intake(&mut self, candidate: &IntakeCandidate) -> DbResult<()>;

    fn commit(&mut self) -> DbResult<()>;
    fn rollback(&mut self) -> DbResult<()>;

    /// The joined patient/intake row for exactly this key pair.
    fn read_back(&mut self, patient_number: &str, intake_id: &str) -> DbResult<Option<Row>>;

    /// Return the connection to its pool. Uncommitted work is discarded.
    fn release(&mut self) -> DbResult<()> {
        Ok(())
    }
}

/// Hands out sessions per environment. Constructed once per process.
pub trait SessionSource: Send + Sync {
    fn open(&self, environment: Environment) -> TestDataResult<Box<dyn Session>>;

    /// Close pooled connections. Called once at shutdown.
    fn shutdown(&self) {}
}

/// Run `work` on a fresh session and release it afterwards, whatever the outcome.
///
/// A failed release is logged and never replaces the result of `work`.
pub fn with_session<T, F>(
    source: &dyn SessionSource,
    environment: Environment,
    work: F,
) -> TestDataResult<T>
where
    F: FnOnce(&mut dyn Session) -> TestDataResult<T>,
{
    let mut session = source.open(environment)?;
    let result = work(session.as_mut());
    if let Err(e) = session.release() {
        tracing::warn!("failed to release {} session: {}", environment, e);
    }
    result
}
