//! Retrying intake creation.
//!
//! One call inserts a synthetic patient, intake plan and intake in a single unit of work,
//! commits, and reads the joined row back as evidence. Random keys can collide with rows that
//! already exist (or with a concurrent caller), so a unique-constraint violation rolls back and
//! retries with fresh values. Every other failure is returned immediately.

use crate::constants::{
    COL_DOB, COL_FIRST_NAME, COL_INTAKE_ID, COL_LAST_NAME, COL_PATIENT_NUMBER, COL_PHONE,
    DEFAULT_INTAKE_ID_PRECISION, INTAKE_TABLE, MAX_INTAKE_ID_PRECISION, OPERATION_CENTER_CODE,
    PATIENT_NUMBER_DIGITS, PLAN_LEVEL_CODE,
};
use crate::db::{DbError, DbResult, Row, Session};
use crate::generator::{generate_value, random_digits, random_letters};
use crate::{TestDataError, TestDataResult};
use api_shared::FieldType;
use chrono::{Duration, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use tdm_types::Identifier;
use uuid::Uuid;

/// Columns a caller may pin to a literal value.
pub const OVERRIDABLE_COLUMNS: [&str; 6] = [
    COL_PATIENT_NUMBER,
    COL_FIRST_NAME,
    COL_LAST_NAME,
    COL_PHONE,
    COL_DOB,
    COL_INTAKE_ID,
];

const MIN_AGE_YEARS: i64 = 18;
const MAX_AGE_YEARS: i64 = 75;

/// Validated caller overrides, keyed by canonical column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeOverrides {
    values: BTreeMap<&'static str, String>,
}

impl IntakeOverrides {
    /// Validate `(property name, literal)` pairs. Blank literals are dropped.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a property name outside [`OVERRIDABLE_COLUMNS`].
    pub fn new<I, K, V>(pairs: I) -> TestDataResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut values = BTreeMap::new();
        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let column = OVERRIDABLE_COLUMNS
                .iter()
                .find(|c| c.eq_ignore_ascii_case(key))
                .ok_or_else(|| {
                    TestDataError::InvalidInput(format!(
                        "'{key}' cannot be overridden; allowed fields are {}",
                        OVERRIDABLE_COLUMNS.join(", ")
                    ))
                })?;
            let value = value.as_ref().trim();
            if !value.is_empty() {
                values.insert(*column, value.to_string());
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Values for one insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeCandidate {
    pub patient_number: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub date_of_birth: String,
    pub intake_id: String,
    pub operation_center_code: String,
    pub plan_level_code: String,
}

impl IntakeCandidate {
    /// Fresh random values. `intake_id_digits` sets the exact width of the intake id.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, intake_id_digits: usize) -> Self {
        let age_days = rng.gen_range(MIN_AGE_YEARS * 365 + 5..=MAX_AGE_YEARS * 365);
        let dob = (Utc::now() - Duration::days(age_days)).date_naive();

        Self {
            patient_number: random_digits(rng, PATIENT_NUMBER_DIGITS),
            first_name: format!("TEST{}", random_letters(rng, 5)),
            last_name: format!("AUTO{}", random_letters(rng, 5)),
            phone: generate_value(FieldType::Phone, "", rng),
            date_of_birth: dob.format("%d-%b-%y").to_string().to_uppercase(),
            intake_id: random_digits(rng, intake_id_digits),
            operation_center_code: OPERATION_CENTER_CODE.to_string(),
            plan_level_code: PLAN_LEVEL_CODE.to_string(),
        }
    }

    pub fn apply(&mut self, overrides: &IntakeOverrides) {
        let slots: [(&str, &mut String); 6] = [
            (COL_PATIENT_NUMBER, &mut self.patient_number),
            (COL_FIRST_NAME, &mut self.first_name),
            (COL_LAST_NAME, &mut self.last_name),
            (COL_PHONE, &mut self.phone),
            (COL_DOB, &mut self.date_of_birth),
            (COL_INTAKE_ID, &mut self.intake_id),
        ];
        for (column, slot) in slots {
            if let Some(value) = overrides.get(column) {
                *slot = value.to_string();
            }
        }
    }
}

/// A committed and verified intake.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedIntake {
    pub patient_number: String,
    pub intake_id: String,
    pub attempts: u32,
    /// The joined row as read back after commit.
    pub record: Row,
}

/// Width of generated intake ids, from the catalog precision of `TBLPATINTAKE.INTAKEID`.
pub fn intake_id_precision<S: Session + ?Sized>(session: &mut S) -> TestDataResult<usize> {
    let table = Identifier::new(INTAKE_TABLE)?;
    let precision = session
        .table_columns(&table)?
        .into_iter()
        .find(|c| c.column_name.eq_ignore_ascii_case(COL_INTAKE_ID))
        .and_then(|c| c.data_precision)
        .and_then(|p| u32::try_from(p).ok())
        .filter(|p| *p > 0)
        .unwrap_or(DEFAULT_INTAKE_ID_PRECISION)
        .min(MAX_INTAKE_ID_PRECISION);
    Ok(precision as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertStep {
    Patient,
    IntakePlan,
    Intake,
    Commit,
}

fn insert_and_commit<S: Session + ?Sized>(
    session: &mut S,
    c: &IntakeCandidate,
) -> Result<(), (InsertStep, DbError)> {
    session
        .insert_patient(c)
        .map_err(|e| (InsertStep::Patient, e))?;
    session
        .insert_intake_plan(c)
        .map_err(|e| (InsertStep::IntakePlan, e))?;
    session
        .insert_intake(c)
        .map_err(|e| (InsertStep::Intake, e))?;
    session.commit().map_err(|e| (InsertStep::Commit, e))
}

/// The pinned key that a unique violation at `step` must have hit, if any.
///
/// `TBLPATIENT` is keyed on the patient number, `TBLPATINTAKE` on the intake id and
/// `TBLPATINTAKEPLAN` on both. A collision on a pinned key repeats on every attempt.
fn pinned_collision(step: InsertStep, overrides: &IntakeOverrides) -> Option<&'static str> {
    let patient = overrides.get(COL_PATIENT_NUMBER).is_some();
    let intake = overrides.get(COL_INTAKE_ID).is_some();
    match step {
        InsertStep::Patient if patient => Some(COL_PATIENT_NUMBER),
        InsertStep::Intake if intake => Some(COL_INTAKE_ID),
        InsertStep::IntakePlan if patient && intake => Some(COL_INTAKE_ID),
        _ => None,
    }
}

/// Bounded retry loop around the three inserts.
#[derive(Debug, Clone, Copy)]
pub struct IntakeCreator {
    max_attempts: u32,
}

impl IntakeCreator {
    /// # Errors
    ///
    /// `InvalidInput` when `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> TestDataResult<Self> {
        if max_attempts == 0 {
            return Err(TestDataError::InvalidInput(
                "max attempts must be at least 1".into(),
            ));
        }
        Ok(Self { max_attempts })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Insert, commit and verify one intake, retrying on unique-constraint violations.
    ///
    /// # Errors
    ///
    /// - `RetriesExhausted` when every attempt collided.
    /// - `KeyAlreadyExists` when a caller-pinned key collided, without further attempts.
    /// - `Database` for any other driver error, after rolling back.
    /// - `VerificationFailed` when the committed row cannot be read back.
    pub fn create<S, R>(
        &self,
        session: &mut S,
        rng: &mut R,
        overrides: &IntakeOverrides,
    ) -> TestDataResult<CreatedIntake>
    where
        S: Session + ?Sized,
        R: Rng + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "create_intake",
            %run_id,
            max_attempts = self.max_attempts
        );
        let _enter = span.enter();

        let precision = intake_id_precision(session)?;

        for attempt in 1..=self.max_attempts {
            let mut candidate = IntakeCandidate::generate(rng, precision);
            candidate.apply(overrides);

            if let Err((step, err)) = insert_and_commit(session, &candidate) {
                if let Err(rollback_err) = session.rollback() {
                    tracing::error!("rollback after failed attempt {}: {}", attempt, rollback_err);
                }
                if err.is_unique_violation() {
                    if let Some(column) = pinned_collision(step, overrides) {
                        tracing::warn!(
                            "attempt {} collided on pinned {}; not retrying: {}",
                            attempt,
                            column,
                            err
                        );
                        let value = match column {
                            COL_PATIENT_NUMBER => candidate.patient_number,
                            _ => candidate.intake_id,
                        };
                        return Err(TestDataError::KeyAlreadyExists { column, value });
                    }
                    tracing::warn!(
                        "attempt {}/{} collided on an existing key: {}",
                        attempt,
                        self.max_attempts,
                        err
                    );
                    continue;
                }
                return Err(err.into());
            }

            let record = session
                .read_back(&candidate.patient_number, &candidate.intake_id)?
                .ok_or_else(|| TestDataError::VerificationFailed {
                    patient_number: candidate.patient_number.clone(),
                    intake_id: candidate.intake_id.clone(),
                })?;

            tracing::info!(
                "++ Created intake {} for patient {} on attempt {}",
                candidate.intake_id,
                candidate.patient_number,
                attempt
            );
            return Ok(CreatedIntake {
                patient_number: candidate.patient_number,
                intake_id: candidate.intake_id,
                attempts: attempt,
                record,
            });
        }

        Err(TestDataError::RetriesExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDatabase;
    use crate::db::SessionSource;
    use crate::query::JoinQuery;
    use api_shared::ColumnMeta;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tdm_types::Environment;

    /// Session whose inserts fail with scripted errors, one per attempt.
    #[derive(Default)]
    struct ScriptedSession {
        insert_failures: VecDeque<DbError>,
        intake_failures: VecDeque<DbError>,
        rollback_fails: bool,
        read_back_missing: bool,
        intake_precision: Option<i64>,
        commits: u32,
        rollbacks: u32,
        read_back_keys: Vec<(String, String)>,
    }

    impl Session for ScriptedSession {
        fn table_columns(&mut self, _table: &Identifier) -> DbResult<Vec<ColumnMeta>> {
            Ok(vec![ColumnMeta {
                column_name: "INTAKEID".into(),
                data_type: "NUMBER".into(),
                data_length: Some(22),
                data_precision: self.intake_precision,
                is_nullable: false,
            }])
        }

        fn select_first(&mut self, _query: &JoinQuery) -> DbResult<Option<Row>> {
            Ok(None)
        }

        fn insert_patient(&mut self, _c: &IntakeCandidate) -> DbResult<()> {
            match self.insert_failures.pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn insert_intake_plan(&mut self, _c: &IntakeCandidate) -> DbResult<()> {
            Ok(())
        }

        fn insert_intake(&mut self, _c: &IntakeCandidate) -> DbResult<()> {
            match self.intake_failures.pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn commit(&mut self) -> DbResult<()> {
            self.commits += 1;
            Ok(())
        }

        fn rollback(&mut self) -> DbResult<()> {
            self.rollbacks += 1;
            if self.rollback_fails {
                return Err(DbError::new(Some(3113), "end-of-file on communication channel"));
            }
            Ok(())
        }

        fn read_back(&mut self, patient_number: &str, intake_id: &str) -> DbResult<Option<Row>> {
            self.read_back_keys
                .push((patient_number.to_string(), intake_id.to_string()));
            if self.read_back_missing {
                return Ok(None);
            }
            let mut row = Row::new();
            row.insert("PATIENTNUMBER".into(), patient_number.into());
            Ok(Some(row))
        }
    }

    fn unique() -> DbError {
        DbError::new(Some(1), "unique constraint (TDM.PK_TBLPATIENT) violated")
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn generated_candidate_has_the_expected_shape() {
        let c = IntakeCandidate::generate(&mut rng(), 12);
        assert_eq!(c.patient_number.len(), 10);
        assert!(!c.patient_number.starts_with('0'));
        assert!(c.first_name.starts_with("TEST") && c.first_name.len() == 9);
        assert!(c.last_name.starts_with("AUTO") && c.last_name.len() == 9);
        assert_eq!(c.intake_id.len(), 12);
        assert_eq!(c.operation_center_code, "001");
        assert_eq!(c.plan_level_code, "01");

        let dob = crate::db::memory::parse_rr_date(&c.date_of_birth).unwrap();
        let age = Utc::now().date_naive().years_since(dob).unwrap();
        assert!((18..=75).contains(&age), "age {age}");
    }

    #[test]
    fn overrides_are_case_insensitive_and_blank_means_generate() {
        let overrides = IntakeOverrides::new([
            ("patientNumber", "1234567890"),
            ("FirstName", "  "),
            ("DOB", "01-JAN-80"),
        ])
        .unwrap();
        assert_eq!(overrides.get("PATIENTNUMBER"), Some("1234567890"));
        assert_eq!(overrides.get("FIRSTNAME"), None);

        let mut c = IntakeCandidate::generate(&mut rng(), 10);
        c.apply(&overrides);
        assert_eq!(c.patient_number, "1234567890");
        assert_eq!(c.date_of_birth, "01-JAN-80");
        assert!(c.first_name.starts_with("TEST"));
    }

    #[test]
    fn unknown_override_is_rejected() {
        let err = IntakeOverrides::new([("SSN", "123")]).unwrap_err();
        assert!(matches!(err, TestDataError::InvalidInput(_)));
    }

    #[test]
    fn precision_comes_from_the_catalog_with_default_and_cap() {
        let mut session = ScriptedSession::default();
        assert_eq!(intake_id_precision(&mut session).unwrap(), 10);
        session.intake_precision = Some(12);
        assert_eq!(intake_id_precision(&mut session).unwrap(), 12);
        session.intake_precision = Some(38);
        assert_eq!(intake_id_precision(&mut session).unwrap(), 18);
    }

    #[test]
    fn retries_unique_violations_then_succeeds() {
        let mut session = ScriptedSession {
            insert_failures: VecDeque::from([unique(), unique()]),
            ..Default::default()
        };
        let created = IntakeCreator::new(5)
            .unwrap()
            .create(&mut session, &mut rng(), &IntakeOverrides::default())
            .unwrap();

        assert_eq!(created.attempts, 3);
        assert_eq!(session.rollbacks, 2);
        assert_eq!(session.commits, 1);
        assert_eq!(
            session.read_back_keys,
            vec![(created.patient_number.clone(), created.intake_id.clone())]
        );
        assert_eq!(created.record["PATIENTNUMBER"], created.patient_number.as_str());
    }

    #[test]
    fn stops_at_the_attempt_bound() {
        let mut session = ScriptedSession {
            insert_failures: (0..10).map(|_| unique()).collect(),
            ..Default::default()
        };
        let err = IntakeCreator::new(5)
            .unwrap()
            .create(&mut session, &mut rng(), &IntakeOverrides::default())
            .unwrap_err();

        assert!(matches!(err, TestDataError::RetriesExhausted { attempts: 5 }));
        assert_eq!(err.to_string(), "Failed to create intake data after 5 attempts");
        assert_eq!(session.rollbacks, 5);
        assert_eq!(session.commits, 0);
    }

    #[test]
    fn other_errors_fail_fast_and_survive_a_failed_rollback() {
        let mut session = ScriptedSession {
            insert_failures: VecDeque::from([DbError::new(Some(1400), "cannot insert NULL")]),
            rollback_fails: true,
            ..Default::default()
        };
        let err = IntakeCreator::new(50)
            .unwrap()
            .create(&mut session, &mut rng(), &IntakeOverrides::default())
            .unwrap_err();

        match err {
            TestDataError::Database(db) => assert_eq!(db.code, Some(1400)),
            other => panic!("expected database error, got {other:?}"),
        }
        assert_eq!(session.rollbacks, 1);
    }

    #[test]
    fn missing_read_back_is_a_verification_failure() {
        let mut session = ScriptedSession {
            read_back_missing: true,
            ..Default::default()
        };
        let err = IntakeCreator::new(5)
            .unwrap()
            .create(&mut session, &mut rng(), &IntakeOverrides::default())
            .unwrap_err();
        assert!(matches!(err, TestDataError::VerificationFailed { .. }));
    }

    #[test]
    fn collision_on_a_pinned_key_is_not_retried() {
        let mut session = ScriptedSession {
            intake_failures: (0..10)
                .map(|_| DbError::new(Some(1), "unique constraint (TDM.PK_TBLPATINTAKE) violated"))
                .collect(),
            ..Default::default()
        };
        let overrides = IntakeOverrides::new([("INTAKEID", "1234567890")]).unwrap();
        let err = IntakeCreator::new(50)
            .unwrap()
            .create(&mut session, &mut rng(), &overrides)
            .unwrap_err();

        match err {
            TestDataError::KeyAlreadyExists { column, value } => {
                assert_eq!(column, "INTAKEID");
                assert_eq!(value, "1234567890");
            }
            other => panic!("expected pinned key conflict, got {other:?}"),
        }
        assert_eq!(session.rollbacks, 1);
        assert_eq!(session.intake_failures.len(), 9);
    }

    #[test]
    fn collision_on_a_generated_key_still_retries_when_another_is_pinned() {
        let mut session = ScriptedSession {
            insert_failures: VecDeque::from([unique()]),
            ..Default::default()
        };
        let overrides = IntakeOverrides::new([("INTAKEID", "1234567890")]).unwrap();
        let created = IntakeCreator::new(50)
            .unwrap()
            .create(&mut session, &mut rng(), &overrides)
            .unwrap();

        assert_eq!(created.attempts, 2);
        assert_eq!(created.intake_id, "1234567890");
    }

    #[test]
    fn pinned_intake_id_conflicts_against_the_memory_database() {
        let db = MemoryDatabase::new();
        let overrides = IntakeOverrides::new([("INTAKEID", "1234567890")]).unwrap();
        let creator = IntakeCreator::new(50).unwrap();

        let mut session = db.open(Environment::Q2).unwrap();
        creator
            .create(session.as_mut(), &mut rng(), &overrides)
            .unwrap();

        let mut session = db.open(Environment::Q2).unwrap();
        let err = creator
            .create(session.as_mut(), &mut StdRng::seed_from_u64(7), &overrides)
            .unwrap_err();
        assert_eq!(err.to_string(), "INTAKEID 1234567890 already exists");
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(IntakeCreator::new(0).is_err());
    }

    #[test]
    fn concurrent_callers_with_identical_seeds_get_distinct_records() {
        let db = Arc::new(MemoryDatabase::new());
        let creator = IntakeCreator::new(50).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || {
                    let mut session = db.open(Environment::Q4).unwrap();
                    let mut rng = StdRng::seed_from_u64(99);
                    creator
                        .create(session.as_mut(), &mut rng, &IntakeOverrides::default())
                        .unwrap()
                })
            })
            .collect();
        let created: Vec<CreatedIntake> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_ne!(created[0].patient_number, created[1].patient_number);
        assert!(created.iter().any(|c| c.attempts == 1));
        assert!(created.iter().any(|c| c.attempts >= 2));

        let mut session = db.open(Environment::Q4).unwrap();
        for c in &created {
            assert!(session
                .read_back(&c.patient_number, &c.intake_id)
                .unwrap()
                .is_some());
        }
    }

    #[test]
    fn creates_against_the_memory_database_with_overrides() {
        let db = MemoryDatabase::new();
        let mut session = db.open(Environment::Q1).unwrap();
        let overrides = IntakeOverrides::new([("LASTNAME", "AUTOFIXED")]).unwrap();
        let created = IntakeCreator::new(50)
            .unwrap()
            .create(session.as_mut(), &mut rng(), &overrides)
            .unwrap();

        assert_eq!(created.attempts, 1);
        assert_eq!(created.record["LASTNAME"], "AUTOFIXED");
        assert_eq!(created.record["PATIENTNUMBER"], created.patient_number.as_str());
        assert!(created.record["INTAKEID"].is_i64());
    }
}
