//! # API Shared
//!
//! Shared wire types for the test-data service.
//!
//! Contains:
//! - Request and response bodies (`models` module), annotated for OpenAPI
//! - Form descriptions (`Field`, `FieldType`) and catalog rows (`ColumnMeta`) that the core
//!   crate produces directly
//! - Shared services like `HealthService`
//!
//! Used by `tdm-core` and `api-rest`.

pub mod health;
pub mod models;

pub use health::HealthService;
pub use models::*;
