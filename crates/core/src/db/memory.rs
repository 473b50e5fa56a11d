//! In-memory implementation of the database seam.
//!
//! Mirrors the three intake tables with their key constraints so local runs and tests see the
//! same error classes as Oracle: ORA-00001 for duplicate keys, ORA-02291 for a missing parent
//! patient, ORA-01722 for non-numeric keys. Uncommitted rows are visible only to the session
//! that wrote them, but they already claim their keys.

use super::{DbError, DbResult, Row, Session, SessionSource};
use crate::constants::{
    COL_DOB, COL_FIRST_NAME, COL_INTAKE_ID, COL_LAST_NAME, COL_OPERATION_CENTER_CODE,
    COL_PATIENT_NUMBER, COL_PHONE, COL_PLAN_LEVEL_CODE, INTAKE_ALIAS, INTAKE_PLAN_TABLE,
    INTAKE_TABLE, PARENT_KEY_NOT_FOUND_CODE, PATIENT_ALIAS, PATIENT_TABLE, UNIQUE_VIOLATION_CODE,
};
use crate::intake::IntakeCandidate;
use crate::query::JoinQuery;
use crate::TestDataResult;
use api_shared::ColumnMeta;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tdm_types::{Environment, Identifier};

const INVALID_NUMBER_CODE: i32 = 1722;
const PRECISION_EXCEEDED_CODE: i32 = 1438;
const INVALID_DATE_CODE: i32 = 1858;

const PATIENT_NUMBER_PRECISION: usize = 10;
const INTAKE_ID_PRECISION: usize = 10;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Parse `DD-MON-RR` (or `DD-MON-YYYY`). Two-digit years below 50 land in the 2000s.
pub(crate) fn parse_rr_date(text: &str) -> Option<NaiveDate> {
    let mut parts = text.trim().split('-');
    let day: u32 = parts.next()?.parse().ok()?;
    let month_name = parts.next()?.to_ascii_uppercase();
    let year_text = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let month = MONTHS.iter().position(|m| *m == month_name)? as u32 + 1;
    let year: i32 = year_text.parse().ok()?;
    let year = match year_text.len() {
        2 if year < 50 => 2000 + year,
        2 => 1900 + year,
        4 => year,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn column(
    name: &str,
    data_type: &str,
    precision: Option<i64>,
    length: i64,
    nullable: bool,
) -> ColumnMeta {
    ColumnMeta {
        column_name: name.to_string(),
        data_type: data_type.to_string(),
        data_length: Some(length),
        data_precision: precision,
        is_nullable: nullable,
    }
}

fn catalog(table: &str) -> Vec<ColumnMeta> {
    match table {
        PATIENT_TABLE => vec![
            column(COL_PATIENT_NUMBER, "NUMBER", Some(10), 22, false),
            column(COL_FIRST_NAME, "VARCHAR2", None, 50, true),
            column(COL_LAST_NAME, "VARCHAR2", None, 50, true),
            column(COL_PHONE, "VARCHAR2", None, 20, true),
            column(COL_DOB, "DATE", None, 7, true),
        ],
        INTAKE_PLAN_TABLE => vec![
            column(COL_PATIENT_NUMBER, "NUMBER", Some(10), 22, false),
            column(COL_INTAKE_ID, "NUMBER", Some(10), 22, false),
            column(COL_PLAN_LEVEL_CODE, "VARCHAR2", None, 2, true),
        ],
        INTAKE_TABLE => vec![
            column(COL_PATIENT_NUMBER, "NUMBER", Some(10), 22, false),
            column(COL_INTAKE_ID, "NUMBER", Some(10), 22, false),
            column(COL_OPERATION_CENTER_CODE, "VARCHAR2", None, 3, true),
            column(COL_PLAN_LEVEL_CODE, "VARCHAR2", None, 2, true),
        ],
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone)]
struct PatientRow {
    patient_number: i64,
    first_name: String,
    last_name: String,
    phone: String,
    dob: String,
}

#[derive(Debug, Clone)]
struct PlanRow {
    patient_number: i64,
    intake_id: i64,
}

#[derive(Debug, Clone)]
struct IntakeRow {
    patient_number: i64,
    intake_id: i64,
    operation_center_code: String,
    plan_level_code: String,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    patients: Vec<PatientRow>,
    plans: Vec<PlanRow>,
    intakes: Vec<IntakeRow>,
}

impl Tables {
    fn append(&mut self, other: Tables) {
        self.patients.extend(other.patients);
        self.plans.extend(other.plans);
        self.intakes.extend(other.intakes);
    }
}

#[derive(Debug, Default)]
struct EnvState {
    committed: Tables,
    pending: HashMap<u64, Tables>,
}

impl EnvState {
    /// Committed rows plus every session's uncommitted rows; keys are claimed by both.
    fn all_tables(&self) -> impl Iterator<Item = &Tables> {
        std::iter::once(&self.committed).chain(self.pending.values())
    }

    /// Rows a given session can read.
    fn visible_to(&self, session: u64) -> impl Iterator<Item = &Tables> {
        std::iter::once(&self.committed).chain(self.pending.get(&session))
    }

    fn pending_mut(&mut self, session: u64) -> &mut Tables {
        self.pending.entry(session).or_default()
    }
}

type Shared = Arc<Mutex<HashMap<Environment, EnvState>>>;

/// A process-local database with one independent schema per environment.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Shared,
    next_session: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionSource for MemoryDatabase {
    fn open(&self, environment: Environment) -> TestDataResult<Box<dyn Session>> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            environment,
            id,
        }))
    }
}

/// One unit of work against a [`MemoryDatabase`]. Dropping it rolls back.
pub struct MemorySession {
    state: Shared,
    environment: Environment,
    id: u64,
}

fn lock(state: &Shared) -> MutexGuard<'_, HashMap<Environment, EnvState>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn unique_violation(constraint: &str) -> DbError {
    DbError::new(
        Some(UNIQUE_VIOLATION_CODE),
        format!("unique constraint (TDM.{constraint}) violated"),
    )
}

fn parent_missing(constraint: &str) -> DbError {
    DbError::new(
        Some(PARENT_KEY_NOT_FOUND_CODE),
        format!("integrity constraint (TDM.{constraint}) violated - parent key not found"),
    )
}

/// Parse a numeric key the way a `NUMBER(p)` column would accept it.
fn number(value: &str, precision: usize) -> DbResult<i64> {
    let digits = value.trim();
    let parsed: i64 = digits
        .parse()
        .map_err(|_| DbError::new(Some(INVALID_NUMBER_CODE), "invalid number"))?;
    if parsed.unsigned_abs().to_string().len() > precision {
        return Err(DbError::new(
            Some(PRECISION_EXCEEDED_CODE),
            "value larger than specified precision allowed for this column",
        ));
    }
    Ok(parsed)
}

/// A flattened join row: column values keyed by `(alias, column)`.
struct JoinRow<'a> {
    patient: &'a PatientRow,
    intake: &'a IntakeRow,
}

impl JoinRow<'_> {
    fn value(&self, alias: &str, column: &str) -> Option<Value> {
        let p = self.patient;
        let i = self.intake;
        let value = match (alias, column) {
            (PATIENT_ALIAS, COL_PATIENT_NUMBER) => Value::from(p.patient_number),
            (PATIENT_ALIAS, COL_FIRST_NAME) => Value::from(p.first_name.as_str()),
            (PATIENT_ALIAS, COL_LAST_NAME) => Value::from(p.last_name.as_str()),
            (PATIENT_ALIAS, COL_PHONE) => Value::from(p.phone.as_str()),
            (PATIENT_ALIAS, COL_DOB) => Value::from(p.dob.as_str()),
            (INTAKE_ALIAS, COL_PATIENT_NUMBER) => Value::from(i.patient_number),
            (INTAKE_ALIAS, COL_INTAKE_ID) => Value::from(i.intake_id),
            (INTAKE_ALIAS, COL_OPERATION_CENTER_CODE) => {
                Value::from(i.operation_center_code.as_str())
            }
            (INTAKE_ALIAS, COL_PLAN_LEVEL_CODE) => Value::from(i.plan_level_code.as_str()),
            _ => return None,
        };
        match &value {
            Value::String(s) if s.is_empty() => Some(Value::Null),
            _ => Some(value),
        }
    }

    fn text(&self, alias: &str, column: &str) -> Option<String> {
        match self.value(alias, column)? {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}

impl MemorySession {
    fn with_env<T>(&self, work: impl FnOnce(&mut EnvState) -> DbResult<T>) -> DbResult<T> {
        let mut envs = lock(&self.state);
        work(envs.entry(self.environment).or_default())
    }

    fn has_patient(env: &EnvState, session: u64, patient_number: i64) -> bool {
        env.visible_to(session)
            .any(|t| t.patients.iter().any(|p| p.patient_number == patient_number))
    }
}

impl Session for MemorySession {
    fn table_columns(&mut self, table: &Identifier) -> DbResult<Vec<ColumnMeta>> {
        Ok(catalog(table.as_str()))
    }

    fn select_first(&mut self, query: &JoinQuery) -> DbResult<Option<Row>> {
        let session = self.id;
        self.with_env(|env| {
            let tables: Vec<&Tables> = env.visible_to(session).collect();
            let patients = tables.iter().flat_map(|t| t.patients.iter());

            let mut matches: Vec<JoinRow<'_>> = Vec::new();
            for patient in patients {
                for intake in tables
                    .iter()
                    .flat_map(|t| t.intakes.iter())
                    .filter(|i| i.patient_number == patient.patient_number)
                {
                    let row = JoinRow { patient, intake };
                    let eligible = crate::query::BASE_NOT_NULL
                        .iter()
                        .all(|(alias, column)| row.text(alias, column).is_some());
                    let filtered = query.filters.iter().all(|(column, wanted)| {
                        row.text(column.alias, column.column.as_str()).as_deref()
                            == Some(wanted.trim())
                    });
                    if eligible && filtered {
                        matches.push(row);
                    }
                }
            }

            // ORDER BY DOB DESC puts NULLs first in Oracle; the base predicate excludes them.
            matches.sort_by_key(|row| std::cmp::Reverse(parse_rr_date(&row.patient.dob)));

            Ok(matches.first().map(|row| {
                query
                    .projection
                    .iter()
                    .map(|c| {
                        let value = row
                            .value(c.alias, c.column.as_str())
                            .unwrap_or(Value::Null);
                        (c.column.to_string(), value)
                    })
                    .collect()
            }))
        })
    }

    fn insert_patient(&mut self, c: &IntakeCandidate) -> DbResult<()> {
        let patient_number = number(&c.patient_number, PATIENT_NUMBER_PRECISION)?;
        if !c.date_of_birth.trim().is_empty() && parse_rr_date(&c.date_of_birth).is_none() {
            return Err(DbError::new(
                Some(INVALID_DATE_CODE),
                "a non-numeric character was found where a numeric was expected",
            ));
        }
        let session = self.id;
        self.with_env(|env| {
            if env
                .all_tables()
                .any(|t| t.patients.iter().any(|p| p.patient_number == patient_number))
            {
                return Err(unique_violation("PK_TBLPATIENT"));
            }
            env.pending_mut(session).patients.push(PatientRow {
                patient_number,
                first_name: c.first_name.clone(),
                last_name: c.last_name.clone(),
                phone: c.phone.clone(),
                dob: c.date_of_birth.trim().to_ascii_uppercase(),
            });
            Ok(())
        })
    }

    fn insert_intake_plan(&mut self, c: &IntakeCandidate) -> DbResult<()> {
        let patient_number = number(&c.patient_number, PATIENT_NUMBER_PRECISION)?;
        let intake_id = number(&c.intake_id, INTAKE_ID_PRECISION)?;
        let session = self.id;
        self.with_env(|env| {
            if env.all_tables().any(|t| {
                t.plans
                    .iter()
                    .any(|p| p.patient_number == patient_number && p.intake_id == intake_id)
            }) {
                return Err(unique_violation("PK_TBLPATINTAKEPLAN"));
            }
            if !Self::has_patient(env, session, patient_number) {
                return Err(parent_missing("FK_PATINTAKEPLAN_PATIENT"));
            }
            env.pending_mut(session).plans.push(PlanRow {
                patient_number,
                intake_id,
            });
            Ok(())
        })
    }

    fn insert_intake(&mut self, c: &IntakeCandidate) -> DbResult<()> {
        let patient_number = number(&c.patient_number, PATIENT_NUMBER_PRECISION)?;
        let intake_id = number(&c.intake_id, INTAKE_ID_PRECISION)?;
        let session = self.id;
        self.with_env(|env| {
            if env
                .all_tables()
                .any(|t| t.intakes.iter().any(|i| i.intake_id == intake_id))
            {
                return Err(unique_violation("PK_TBLPATINTAKE"));
            }
            if !Self::has_patient(env, session, patient_number) {
                return Err(parent_missing("FK_PATINTAKE_PATIENT"));
            }
            env.pending_mut(session).intakes.push(IntakeRow {
                patient_number,
                intake_id,
                operation_center_code: c.operation_center_code.clone(),
                plan_level_code: c.plan_level_code.clone(),
            });
            Ok(())
        })
    }

    fn commit(&mut self) -> DbResult<()> {
        let session = self.id;
        self.with_env(|env| {
            if let Some(pending) = env.pending.remove(&session) {
                env.committed.append(pending);
            }
            Ok(())
        })
    }

    fn rollback(&mut self) -> DbResult<()> {
        let session = self.id;
        self.with_env(|env| {
            env.pending.remove(&session);
            Ok(())
        })
    }

    fn read_back(&mut self, patient_number: &str, intake_id: &str) -> DbResult<Option<Row>> {
        let patient_number = number(patient_number, PATIENT_NUMBER_PRECISION)?;
        let intake_id = number(intake_id, INTAKE_ID_PRECISION)?;
        let session = self.id;
        self.with_env(|env| {
            let tables: Vec<&Tables> = env.visible_to(session).collect();
            let patient = tables
                .iter()
                .flat_map(|t| t.patients.iter())
                .find(|p| p.patient_number == patient_number);
            let intake = tables.iter().flat_map(|t| t.intakes.iter()).find(|i| {
                i.patient_number == patient_number && i.intake_id == intake_id
            });
            let (Some(patient), Some(intake)) = (patient, intake) else {
                return Ok(None);
            };

            let mut row = Row::new();
            row.insert(
                COL_PATIENT_NUMBER.into(),
                Value::from(patient.patient_number.to_string()),
            );
            row.insert(COL_FIRST_NAME.into(), Value::from(patient.first_name.as_str()));
            row.insert(COL_LAST_NAME.into(), Value::from(patient.last_name.as_str()));
            row.insert(COL_PHONE.into(), Value::from(patient.phone.as_str()));
            row.insert(COL_DOB.into(), Value::from(patient.dob.as_str()));
            row.insert(COL_INTAKE_ID.into(), Value::from(intake.intake_id));
            row.insert(
                COL_OPERATION_CENTER_CODE.into(),
                Value::from(intake.operation_center_code.as_str()),
            );
            row.insert(
                COL_PLAN_LEVEL_CODE.into(),
                Value::from(intake.plan_level_code.as_str()),
            );
            Ok(Some(row))
        })
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut envs = lock(&self.state);
        if let Some(env) = envs.get_mut(&self.environment) {
            env.pending.remove(&self.id);
        }
    }
}
