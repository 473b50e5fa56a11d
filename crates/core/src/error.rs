use crate::db::DbError;
use tdm_types::{Environment, TypesError};

#[derive(Debug, thiserror::Error)]
pub enum TestDataError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error(transparent)]
    Types(#[from] TypesError),
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("no database connection configured for environment {0}")]
    EnvironmentNotConfigured(Environment),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("Failed to create intake data after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("{column} {value} already exists")]
    KeyAlreadyExists { column: &'static str, value: String },
    #[error(
        "intake {intake_id} for patient {patient_number} was committed but could not be read back"
    )]
    VerificationFailed {
        patient_number: String,
        intake_id: String,
    },
    #[error("failed to render output: {0}")]
    Render(String),

    #[error("External API is not configured")]
    ExternalNotConfigured,
    #[error("external API request failed: {0}")]
    External(#[source] reqwest::Error),
}

pub type TestDataResult<T> = std::result::Result<T, TestDataError>;
