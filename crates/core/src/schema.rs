//! Schema inspector.
//!
//! Reads column metadata from the database catalog and turns it into form descriptions for
//! the browser client. The same catalog read doubles as the allow-list for the query
//! executor, so only columns that actually exist can ever be named in SQL.

use crate::constants::{INTAKE_ALIAS, INTAKE_TABLE, PATIENT_ALIAS, PATIENT_TABLE};
use crate::db::Session;
use crate::fields::{infer_field, intake_override_fields};
use crate::query::ColumnRef;
use crate::{TestDataError, TestDataResult};
use api_shared::{ColumnMeta, Field};
use std::str::FromStr;
use tdm_types::{Identifier, ServiceType};

/// Which form the client wants for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// Join columns, used to build query projections and filters.
    #[default]
    Query,
    /// The literals that may override generated intake values.
    CreateIntake,
}

impl FromStr for SchemaMode {
    type Err = TestDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "query" => Ok(SchemaMode::Query),
            "create-intake" | "create" => Ok(SchemaMode::CreateIntake),
            other => Err(TestDataError::InvalidInput(format!(
                "mode must be 'query' or 'create-intake', got '{other}'"
            ))),
        }
    }
}

/// Tables behind a service join, with their aliases. The first table wins for shared names.
pub fn join_tables(service: ServiceType) -> [(&'static str, &'static str); 2] {
    match service {
        ServiceType::PatientRestServices => {
            [(PATIENT_TABLE, PATIENT_ALIAS), (INTAKE_TABLE, INTAKE_ALIAS)]
        }
    }
}

/// Catalog columns of one table.
///
/// # Errors
///
/// - `Types` when `table_name` is not a plain identifier.
/// - `TableNotFound` when the catalog has no columns for it.
pub fn table_schema<S: Session + ?Sized>(
    session: &mut S,
    table_name: &str,
) -> TestDataResult<Vec<ColumnMeta>> {
    let table = Identifier::new(table_name)?;
    let columns = session.table_columns(&table)?;
    if columns.is_empty() {
        return Err(TestDataError::TableNotFound(table.to_string()));
    }
    Ok(columns)
}

#[derive(Debug, Clone)]
struct CatalogColumn {
    column: ColumnRef,
    meta: ColumnMeta,
}

/// The column allow-list of a service join.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    columns: Vec<CatalogColumn>,
}

impl ServiceCatalog {
    /// Read the catalog for every table of `service`.
    pub fn load<S: Session + ?Sized>(session: &mut S, service: ServiceType) -> TestDataResult<Self> {
        let mut columns: Vec<CatalogColumn> = Vec::new();
        for (table, alias) in join_tables(service) {
            let table = Identifier::new(table)?;
            for meta in session.table_columns(&table)? {
                let name = match Identifier::new(&meta.column_name) {
                    Ok(name) => name,
                    Err(e) => {
                        tracing::warn!("skipping {} column from the catalog: {}", table, e);
                        continue;
                    }
                };
                if columns.iter().any(|c| c.column.column == name) {
                    continue;
                }
                columns.push(CatalogColumn {
                    column: ColumnRef::new(alias, name),
                    meta,
                });
            }
        }
        Ok(Self { columns })
    }

    /// Look a caller-supplied name up, case-insensitively.
    pub fn resolve(&self, name: &str) -> TestDataResult<&ColumnRef> {
        let unknown = || TestDataError::UnknownColumn(name.trim().to_string());
        let wanted = Identifier::new(name).map_err(|_| unknown())?;
        self.columns
            .iter()
            .map(|c| &c.column)
            .find(|c| c.column == wanted)
            .ok_or_else(unknown)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// One checked form field per column, ids numbered from 1.
    pub fn fields(&self) -> Vec<Field> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, c)| infer_field(idx + 1, &c.meta))
            .collect()
    }
}

/// Form description for `service` in the requested mode.
pub fn service_schema<S: Session + ?Sized>(
    session: &mut S,
    service: ServiceType,
    mode: SchemaMode,
) -> TestDataResult<Vec<Field>> {
    match mode {
        SchemaMode::Query => Ok(ServiceCatalog::load(session, service)?.fields()),
        SchemaMode::CreateIntake => Ok(intake_override_fields()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDatabase;
    use crate::db::{DbResult, Row, SessionSource};
    use crate::intake::IntakeCandidate;
    use crate::query::JoinQuery;
    use api_shared::FieldType;
    use tdm_types::Environment;

    /// Catalog whose patient table carries a quoted mixed-case column.
    struct OddCatalogSession;

    fn column(name: &str) -> ColumnMeta {
        ColumnMeta {
            column_name: name.into(),
            data_type: "VARCHAR2".into(),
            data_length: Some(40),
            data_precision: None,
            is_nullable: true,
        }
    }

    impl Session for OddCatalogSession {
        fn table_columns(&mut self, table: &Identifier) -> DbResult<Vec<ColumnMeta>> {
            Ok(match table.as_str() {
                "TBLPATIENT" => vec![column("LASTNAME"), column("Patient Notes")],
                _ => vec![column("OPERATIONCENTERCODE")],
            })
        }
        fn select_first(&mut self, _query: &JoinQuery) -> DbResult<Option<Row>> {
            Ok(None)
        }
        fn insert_patient(&mut self, _c: &IntakeCandidate) -> DbResult<()> {
            Ok(())
        }
        fn insert_intake_plan(&mut self, _c: &IntakeCandidate) -> DbResult<()> {
            Ok(())
        }
        fn insert_intake(&mut self, _c: &IntakeCandidate) -> DbResult<()> {
            Ok(())
        }
        fn commit(&mut self) -> DbResult<()> {
            Ok(())
        }
        fn rollback(&mut self) -> DbResult<()> {
            Ok(())
        }
        fn read_back(&mut self, _patient_number: &str, _intake_id: &str) -> DbResult<Option<Row>> {
            Ok(None)
        }
    }

    #[test]
    fn table_schema_upper_cases_and_reports_missing_tables() {
        let db = MemoryDatabase::new();
        let mut session = db.open(Environment::Q2).unwrap();

        let columns = table_schema(session.as_mut(), "tblpatintakeplan").unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.column_name.as_str()).collect();
        assert_eq!(names, ["PATIENTNUMBER", "INTAKEID", "PLANLEVELCODE"]);

        let err = table_schema(session.as_mut(), "TBLNOPE").unwrap_err();
        assert!(matches!(err, TestDataError::TableNotFound(t) if t == "TBLNOPE"));

        let err = table_schema(session.as_mut(), "x; drop table y").unwrap_err();
        assert!(matches!(err, TestDataError::Types(_)));
    }

    #[test]
    fn service_schema_lists_each_join_column_once_with_inferred_types() {
        let db = MemoryDatabase::new();
        let mut session = db.open(Environment::Q1).unwrap();

        let fields = service_schema(
            session.as_mut(),
            ServiceType::PatientRestServices,
            SchemaMode::Query,
        )
        .unwrap();

        let names: Vec<_> = fields.iter().map(|f| f.property_name.as_str()).collect();
        assert_eq!(
            names.iter().filter(|n| **n == "PATIENTNUMBER").count(),
            1,
            "shared join column appears once"
        );
        assert!(names.contains(&"OPERATIONCENTERCODE"));

        let phone = fields.iter().find(|f| f.property_name == "PHONE").unwrap();
        assert_eq!(phone.field_type, FieldType::Phone);
        let dob = fields.iter().find(|f| f.property_name == "DOB").unwrap();
        assert_eq!(dob.field_type, FieldType::Date);
        assert_eq!(fields[0].id, "1");
        assert!(fields.iter().all(|f| f.checked));
    }

    #[test]
    fn catalog_columns_that_are_not_plain_identifiers_are_skipped() {
        let catalog =
            ServiceCatalog::load(&mut OddCatalogSession, ServiceType::PatientRestServices).unwrap();
        let names: Vec<_> = catalog
            .fields()
            .into_iter()
            .map(|f| f.property_name)
            .collect();
        assert_eq!(names, ["LASTNAME", "OPERATIONCENTERCODE"]);
        assert!(catalog.resolve("Patient Notes").is_err());
        assert!(catalog.resolve("lastname").is_ok());
    }

    #[test]
    fn create_intake_mode_lists_override_fields() {
        let db = MemoryDatabase::new();
        let mut session = db.open(Environment::Q1).unwrap();
        let fields = service_schema(
            session.as_mut(),
            ServiceType::PatientRestServices,
            SchemaMode::CreateIntake,
        )
        .unwrap();
        assert_eq!(fields.len(), 6);
        assert!(fields.iter().all(|f| f.example.is_some()));
    }

    #[test]
    fn schema_mode_parses_client_values() {
        assert_eq!("".parse::<SchemaMode>().unwrap(), SchemaMode::Query);
        assert_eq!(
            "create-intake".parse::<SchemaMode>().unwrap(),
            SchemaMode::CreateIntake
        );
        assert!("bulk".parse::<SchemaMode>().is_err());
    }
}
