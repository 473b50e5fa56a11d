//! Oracle implementation of the database seam.
//!
//! One session pool per environment is built on first use and kept until shutdown. Every SQL
//! statement is parameterized; identifiers that reach SQL text come either from constants or
//! from the catalog allow-list in [`crate::schema::ServiceCatalog`].

use super::{DbError, DbResult, Row, Session, SessionSource};
use crate::config::DatabaseConfig;
use crate::intake::IntakeCandidate;
use crate::query::JoinQuery;
use crate::{TestDataError, TestDataResult};
use ::oracle::pool::{CloseMode, Pool, PoolBuilder};
use ::oracle::sql_type::{OracleType, ToSql};
use ::oracle::Connection;
use api_shared::ColumnMeta;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tdm_types::{Environment, Identifier};

const CATALOG_SQL: &str = "SELECT COLUMN_NAME, DATA_TYPE, DATA_LENGTH, DATA_PRECISION, NULLABLE \
     FROM ALL_TAB_COLUMNS WHERE TABLE_NAME = :1 ORDER BY COLUMN_ID";

const CATALOG_BY_OWNER_SQL: &str =
    "SELECT COLUMN_NAME, DATA_TYPE, DATA_LENGTH, DATA_PRECISION, NULLABLE \
     FROM ALL_TAB_COLUMNS WHERE TABLE_NAME = :1 AND OWNER = :2 ORDER BY COLUMN_ID";

const INSERT_PATIENT_SQL: &str = "INSERT INTO TBLPATIENT \
     (PATIENTNUMBER, FIRSTNAME, LASTNAME, PHONE, DOB) \
     VALUES (:1, :2, :3, :4, TO_DATE(:5, 'DD-MON-RR'))";

const INSERT_INTAKE_PLAN_SQL: &str = "INSERT INTO TBLPATINTAKEPLAN \
     (PATIENTNUMBER, INTAKEID, PLANLEVELCODE) VALUES (:1, :2, :3)";

const INSERT_INTAKE_SQL: &str = "INSERT INTO TBLPATINTAKE \
     (PATIENTNUMBER, INTAKEID, OPERATIONCENTERCODE, PLANLEVELCODE) VALUES (:1, :2, :3, :4)";

const READ_BACK_SQL: &str = "SELECT TO_CHAR(P.PATIENTNUMBER) AS PATIENTNUMBER, \
     P.FIRSTNAME, P.LASTNAME, P.PHONE, TO_CHAR(P.DOB, 'DD-MON-RR') AS DOB, \
     I.INTAKEID, I.OPERATIONCENTERCODE, I.PLANLEVELCODE \
     FROM TBLPATIENT P JOIN TBLPATINTAKE I ON P.PATIENTNUMBER = I.PATIENTNUMBER \
     WHERE P.PATIENTNUMBER = :1 AND I.INTAKEID = :2";

impl From<::oracle::Error> for DbError {
    fn from(err: ::oracle::Error) -> Self {
        let code = err.db_error().map(|db| db.code());
        DbError::new(code, err.to_string())
    }
}

/// Session pools keyed by environment.
pub struct OraclePools {
    cfg: DatabaseConfig,
    pools: Mutex<HashMap<Environment, Arc<Pool>>>,
}

impl OraclePools {
    pub fn new(cfg: DatabaseConfig) -> Self {
        Self {
            cfg,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pool(&self, environment: Environment) -> TestDataResult<Arc<Pool>> {
        let descriptor = self
            .cfg
            .connect_descriptor(environment)
            .ok_or(TestDataError::EnvironmentNotConfigured(environment))?;

        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pool) = pools.get(&environment) {
            return Ok(pool.clone());
        }

        tracing::info!(
            "++ Building {} pool (min {}, max {})",
            environment,
            self.cfg.pool_min,
            self.cfg.pool_max
        );
        let pool = PoolBuilder::new(
            self.cfg.user.as_str(),
            self.cfg.password.as_str(),
            descriptor,
        )
        .min_connections(self.cfg.pool_min)
        .max_connections(self.cfg.pool_max)
        .build()
        .map_err(DbError::from)?;

        let pool = Arc::new(pool);
        pools.insert(environment, pool.clone());
        Ok(pool)
    }
}

impl SessionSource for OraclePools {
    fn open(&self, environment: Environment) -> TestDataResult<Box<dyn Session>> {
        let pool = self.pool(environment)?;
        let conn = pool.get().map_err(DbError::from)?;
        Ok(Box::new(OracleSession {
            conn,
            owner: self.cfg.owner.clone(),
        }))
    }

    fn shutdown(&self) {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        for (environment, pool) in pools.drain() {
            if let Err(e) = pool.close(&CloseMode::Default) {
                tracing::warn!("failed to close {} pool: {}", environment, e);
            }
        }
    }
}

/// A pooled connection. Dropping it returns the connection to its pool.
pub struct OracleSession {
    conn: Connection,
    owner: Option<Identifier>,
}

impl OracleSession {
    fn execute(&self, sql: &str, params: &[&str]) -> DbResult<()> {
        let binds: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        self.conn.execute(sql, &binds)?;
        Ok(())
    }

    fn query_rows(&self, sql: &str, params: &[String]) -> DbResult<Vec<Row>> {
        let binds: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let mut rows = Vec::new();
        for row in self.conn.query(sql, &binds)? {
            rows.push(row_to_json(&row?)?);
        }
        Ok(rows)
    }
}

impl Session for OracleSession {
    fn table_columns(&mut self, table: &Identifier) -> DbResult<Vec<ColumnMeta>> {
        let (sql, params) = match &self.owner {
            Some(owner) => (
                CATALOG_BY_OWNER_SQL,
                vec![table.to_string(), owner.to_string()],
            ),
            None => (CATALOG_SQL, vec![table.to_string()]),
        };
        let binds: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        let mut columns = Vec::new();
        for row in self.conn.query(sql, &binds)? {
            let row = row?;
            let nullable: String = row.get(4)?;
            columns.push(ColumnMeta {
                column_name: row.get(0)?,
                data_type: row.get(1)?,
                data_length: row.get(2)?,
                data_precision: row.get(3)?,
                is_nullable: nullable == "Y",
            });
        }
        Ok(columns)
    }

    fn select_first(&mut self, query: &JoinQuery) -> DbResult<Option<Row>> {
        let (sql, params) = query.to_sql();
        Ok(self.query_rows(&sql, &params)?.into_iter().next())
    }

    fn insert_patient(&mut self, c: &IntakeCandidate) -> DbResult<()> {
        self.execute(
            INSERT_PATIENT_SQL,
            &[
                c.patient_number.as_str(),
                c.first_name.as_str(),
                c.last_name.as_str(),
                c.phone.as_str(),
                c.date_of_birth.as_str(),
            ],
        )
    }

    fn insert_intake_plan(&mut self, c: &IntakeCandidate) -> DbResult<()> {
        self.execute(
            INSERT_INTAKE_PLAN_SQL,
            &[c.patient_number.as_str(), c.intake_id.as_str(), c.plan_level_code.as_str()],
        )
    }

    fn insert_intake(&mut self, c: &IntakeCandidate) -> DbResult<()> {
        self.execute(
            INSERT_INTAKE_SQL,
            &[
                c.patient_number.as_str(),
                c.intake_id.as_str(),
                c.operation_center_code.as_str(),
                c.plan_level_code.as_str(),
            ],
        )
    }

    fn commit(&mut self) -> DbResult<()> {
        Ok(self.conn.commit()?)
    }

    fn rollback(&mut self) -> DbResult<()> {
        Ok(self.conn.rollback()?)
    }

    fn read_back(&mut self, patient_number: &str, intake_id: &str) -> DbResult<Option<Row>> {
        let params = [patient_number.to_string(), intake_id.to_string()];
        Ok(self.query_rows(READ_BACK_SQL, &params)?.into_iter().next())
    }

    fn release(&mut self) -> DbResult<()> {
        // Pooled connections go back to the pool on close; pending work is rolled back.
        Ok(self.conn.close()?)
    }
}

/// Integral NUMBER columns become JSON numbers; everything else is rendered as text.
fn row_to_json(row: &::oracle::Row) -> DbResult<Row> {
    let mut out = Row::new();
    for (idx, info) in row.column_info().iter().enumerate() {
        let value = match info.oracle_type() {
            OracleType::Number(_, 0) | OracleType::Int64 => {
                row.get::<usize, Option<i64>>(idx)?.map(Value::from)
            }
            _ => row.get::<usize, Option<String>>(idx)?.map(Value::String),
        };
        out.insert(info.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(out)
}
