//! Validated value types shared across the test-data workspace.
//!
//! Everything in here is parsed once at the edge (HTTP query strings, JSON bodies, environment
//! variables) so the core crate never handles a raw environment tag or an unchecked SQL
//! identifier.

use std::fmt;
use std::str::FromStr;

/// Errors that can occur when parsing validated types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypesError {
    /// The tag is not one of Q1-Q5 or PROD
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),
    /// The service type has no fixed join behind it
    #[error("unknown service type: {0}")]
    UnknownServiceType(String),
    /// The text is not a plain Oracle identifier
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}

/// Target environment for a request.
///
/// Selects both the database connection descriptor and the external API host prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Environment {
    Q1,
    Q2,
    Q3,
    Q4,
    Q5,
    Prod,
}

impl Environment {
    /// Every environment, in display order.
    pub const ALL: [Environment; 6] = [
        Environment::Q1,
        Environment::Q2,
        Environment::Q3,
        Environment::Q4,
        Environment::Q5,
        Environment::Prod,
    ];

    /// The canonical upper-case tag, e.g. `Q1` or `PROD`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Q1 => "Q1",
            Environment::Q2 => "Q2",
            Environment::Q3 => "Q3",
            Environment::Q4 => "Q4",
            Environment::Q5 => "Q5",
            Environment::Prod => "PROD",
        }
    }

    /// Lower-case prefix used in external API host names (`q1-<domain>`).
    pub fn host_prefix(&self) -> &'static str {
        match self {
            Environment::Q1 => "q1",
            Environment::Q2 => "q2",
            Environment::Q3 => "q3",
            Environment::Q4 => "q4",
            Environment::Q5 => "q5",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Environment::ALL
            .into_iter()
            .find(|env| env.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| TypesError::UnknownEnvironment(tag.to_owned()))
    }
}

impl serde::Serialize for Environment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Environment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A service whose data lives behind a fixed table join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    /// Patient and intake rows (`TBLPATIENT` joined to `TBLPATINTAKE`).
    PatientRestServices,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::PatientRestServices => "patient-rest-services",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "patient-rest-services" => Ok(ServiceType::PatientRestServices),
            other => Err(TypesError::UnknownServiceType(other.to_owned())),
        }
    }
}

/// An unquoted Oracle identifier, normalised to upper case.
///
/// Must start with an ASCII letter, continue with letters, digits, `_`, `$` or `#`, and be at
/// most 128 bytes long. Surrounding whitespace is trimmed before validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    const MAX_LEN: usize = 128;

    /// Parses and upper-cases `input`.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidIdentifier`] for empty input, over-long input, or any
    /// character outside the unquoted identifier set.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TypesError> {
        let trimmed = input.as_ref().trim();
        let mut bytes = trimmed.bytes();
        let starts_with_letter = matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic());
        let rest_ok = bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'$' | b'#'));

        if !starts_with_letter || !rest_ok || trimmed.len() > Self::MAX_LEN {
            return Err(TypesError::InvalidIdentifier(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Identifier::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("q3".parse::<Environment>().unwrap(), Environment::Q3);
        assert_eq!(" Prod ".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!(Environment::Prod.host_prefix(), "prod");
    }

    #[test]
    fn environment_rejects_unknown_tags() {
        let err = "Q9".parse::<Environment>().unwrap_err();
        assert_eq!(err, TypesError::UnknownEnvironment("Q9".into()));
    }

    #[test]
    fn environment_round_trips_through_json() {
        let env: Environment = serde_json::from_str("\"q1\"").unwrap();
        assert_eq!(serde_json::to_string(&env).unwrap(), "\"Q1\"");
    }

    #[test]
    fn service_type_only_knows_patient_rest_services() {
        assert_eq!(
            "patient-rest-services".parse::<ServiceType>().unwrap(),
            ServiceType::PatientRestServices
        );
        assert!("billing".parse::<ServiceType>().is_err());
    }

    #[test]
    fn identifier_upper_cases_valid_input() {
        let id = Identifier::new(" tblPatIntakePlan ").unwrap();
        assert_eq!(id.as_str(), "TBLPATINTAKEPLAN");
    }

    #[test]
    fn identifier_rejects_injection_attempts() {
        for bad in ["", "1ABC", "A B", "X;DROP", "P.NAME", "NAME'--"] {
            assert!(Identifier::new(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(Identifier::new("A".repeat(129)).is_err());
    }
}
