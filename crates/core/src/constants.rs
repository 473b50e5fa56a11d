//! Constants used throughout the core crate.
//!
//! Table and column names live here so the SQL builders, the in-memory database and the
//! tests all agree on one spelling.

/// Patient master table.
pub const PATIENT_TABLE: &str = "TBLPATIENT";

/// Intake plan table, one row per (patient, intake).
pub const INTAKE_PLAN_TABLE: &str = "TBLPATINTAKEPLAN";

/// Intake table, joined to the patient table by patient number.
pub const INTAKE_TABLE: &str = "TBLPATINTAKE";

pub const PATIENT_ALIAS: &str = "P";
pub const INTAKE_ALIAS: &str = "I";

pub const COL_PATIENT_NUMBER: &str = "PATIENTNUMBER";
pub const COL_FIRST_NAME: &str = "FIRSTNAME";
pub const COL_LAST_NAME: &str = "LASTNAME";
pub const COL_PHONE: &str = "PHONE";
pub const COL_DOB: &str = "DOB";
pub const COL_INTAKE_ID: &str = "INTAKEID";
pub const COL_OPERATION_CENTER_CODE: &str = "OPERATIONCENTERCODE";
pub const COL_PLAN_LEVEL_CODE: &str = "PLANLEVELCODE";

/// Operation-center code stamped on every synthetic intake.
pub const OPERATION_CENTER_CODE: &str = "001";

/// Plan-level code stamped on every synthetic intake and intake plan.
pub const PLAN_LEVEL_CODE: &str = "01";

/// Digits in a generated patient number.
pub const PATIENT_NUMBER_DIGITS: usize = 10;

/// Intake id width used when the catalog reports no precision.
pub const DEFAULT_INTAKE_ID_PRECISION: u32 = 10;

/// Widest intake id we generate; keeps the value inside an `i64`.
pub const MAX_INTAKE_ID_PRECISION: u32 = 18;

/// Attempt bound for `/api/create-intake-data`.
pub const DEFAULT_INTAKE_MAX_ATTEMPTS: u32 = 50;

/// Attempt bound for the simplified `/api/service-create`.
pub const DEFAULT_SERVICE_CREATE_MAX_ATTEMPTS: u32 = 5;

pub const DEFAULT_POOL_MIN: u32 = 2;
pub const DEFAULT_POOL_MAX: u32 = 10;

/// ORA-00001: unique constraint violated.
pub const UNIQUE_VIOLATION_CODE: i32 = 1;

/// ORA-02291: integrity constraint violated, parent key not found.
pub const PARENT_KEY_NOT_FOUND_CODE: i32 = 2291;

/// Upper bound on rows per `/api/generate` call.
pub const MAX_GENERATED_ROWS: u32 = 1000;

/// Message returned alongside `data: null` when a query matches nothing.
pub const NO_DATA_MESSAGE: &str = "No data found";
