//! # TDM Core
//!
//! Core business logic for the test data management service.
//!
//! This crate contains the data operations behind the REST surface:
//! - Schema inspection over the database catalog
//! - Synthetic value generation and output formatting
//! - A single-row query executor over the patient/intake join
//! - Retrying intake creation with read-back verification
//! - A proxy for the external intake API
//!
//! **No HTTP concerns**: routing, status codes and request parsing belong in `api-rest`.
//! Database access goes through the [`db::SessionSource`] seam so callers can swap Oracle for
//! the in-memory backend.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod external;
pub mod fields;
pub mod formats;
pub mod generator;
pub mod intake;
pub mod query;
pub mod schema;

pub use config::{CoreConfig, DatabaseConfig, DbBackend, ExternalApiConfig};
pub use db::memory::MemoryDatabase;
pub use db::oracle::OraclePools;
pub use db::{with_session, DbError, Row, Session, SessionSource};
pub use error::{TestDataError, TestDataResult};
pub use external::{ExternalApiClient, ExternalApiType, ExternalResponse};
pub use formats::{render, OutputFormat};
pub use generator::{generate_rows, generate_value, Dataset};
pub use intake::{CreatedIntake, IntakeCandidate, IntakeCreator, IntakeOverrides};
pub use query::execute_service_query;
pub use schema::{service_schema, table_schema, SchemaMode};
