//! Query executor for the fixed service join.
//!
//! Callers pick the projection and equality filters by column name. Every name is resolved
//! through the service's catalog allow-list before it reaches SQL; values are always bound
//! parameters. At most one row comes back.

use crate::constants::{
    COL_DOB, COL_FIRST_NAME, COL_INTAKE_ID, COL_LAST_NAME, COL_PATIENT_NUMBER, INTAKE_ALIAS,
    INTAKE_TABLE, PATIENT_ALIAS, PATIENT_TABLE,
};
use crate::db::{Row, Session};
use crate::schema::ServiceCatalog;
use crate::{TestDataError, TestDataResult};
use std::collections::BTreeMap;
use tdm_types::{Identifier, ServiceType};

/// A catalog column qualified by its table alias in the join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub alias: &'static str,
    pub column: Identifier,
}

impl ColumnRef {
    pub fn new(alias: &'static str, column: Identifier) -> Self {
        Self { alias, column }
    }

    /// `ALIAS.COLUMN`, safe to splice into SQL text.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.alias, self.column)
    }
}

/// Columns that must be non-null for a join row to be eligible.
pub const BASE_NOT_NULL: [(&str, &str); 5] = [
    (PATIENT_ALIAS, COL_PATIENT_NUMBER),
    (PATIENT_ALIAS, COL_FIRST_NAME),
    (PATIENT_ALIAS, COL_LAST_NAME),
    (PATIENT_ALIAS, COL_DOB),
    (INTAKE_ALIAS, COL_INTAKE_ID),
];

/// A single-row SELECT over `TBLPATIENT P JOIN TBLPATINTAKE I`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinQuery {
    pub projection: Vec<ColumnRef>,
    pub filters: Vec<(ColumnRef, String)>,
}

impl JoinQuery {
    /// Render the statement text and its positional bind values.
    pub fn to_sql(&self) -> (String, Vec<String>) {
        let projection = self
            .projection
            .iter()
            .map(ColumnRef::qualified)
            .collect::<Vec<_>>()
            .join(", ");

        let mut predicates: Vec<String> = BASE_NOT_NULL
            .iter()
            .map(|(alias, column)| format!("{alias}.{column} IS NOT NULL"))
            .collect();
        let mut params = Vec::with_capacity(self.filters.len());
        for (idx, (column, value)) in self.filters.iter().enumerate() {
            predicates.push(format!("{} = :{}", column.qualified(), idx + 1));
            params.push(value.clone());
        }

        let sql = format!(
            "SELECT {projection} FROM {PATIENT_TABLE} {PATIENT_ALIAS} \
             JOIN {INTAKE_TABLE} {INTAKE_ALIAS} \
             ON {PATIENT_ALIAS}.{COL_PATIENT_NUMBER} = {INTAKE_ALIAS}.{COL_PATIENT_NUMBER} \
             WHERE {} ORDER BY {PATIENT_ALIAS}.{COL_DOB} DESC FETCH FIRST 1 ROWS ONLY",
            predicates.join(" AND ")
        );
        (sql, params)
    }
}

/// Resolve caller-supplied names into a [`JoinQuery`].
///
/// Duplicate projection names are collapsed. Filters with blank values are skipped.
///
/// # Errors
///
/// - `InvalidInput` when no column is selected.
/// - `UnknownColumn` when a projection or filter name is not in the catalog.
pub fn build_service_query(
    catalog: &ServiceCatalog,
    selected: &[String],
    filters: &BTreeMap<String, String>,
) -> TestDataResult<JoinQuery> {
    if selected.iter().all(|name| name.trim().is_empty()) {
        return Err(TestDataError::InvalidInput(
            "selectedColumnNames must contain at least one column".into(),
        ));
    }

    let mut projection: Vec<ColumnRef> = Vec::new();
    for name in selected.iter().filter(|name| !name.trim().is_empty()) {
        let column = catalog.resolve(name)?;
        if !projection.contains(column) {
            projection.push(column.clone());
        }
    }

    let mut resolved_filters = Vec::new();
    for (name, value) in filters {
        if value.trim().is_empty() {
            continue;
        }
        resolved_filters.push((catalog.resolve(name)?.clone(), value.clone()));
    }

    Ok(JoinQuery {
        projection,
        filters: resolved_filters,
    })
}

/// Execute a caller-built query for `service`. `Ok(None)` means the filtered join is empty.
pub fn execute_service_query<S: Session + ?Sized>(
    session: &mut S,
    service: ServiceType,
    selected: &[String],
    filters: &BTreeMap<String, String>,
) -> TestDataResult<Option<Row>> {
    let catalog = ServiceCatalog::load(session, service)?;
    let query = build_service_query(&catalog, selected, filters)?;
    Ok(session.select_first(&query)?)
}
