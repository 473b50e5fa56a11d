//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services.
//! Request handlers never read process environment variables; they receive an
//! `Arc<CoreConfig>` through application state.

use crate::constants::{
    DEFAULT_INTAKE_MAX_ATTEMPTS, DEFAULT_POOL_MAX, DEFAULT_POOL_MIN,
    DEFAULT_SERVICE_CREATE_MAX_ATTEMPTS,
};
use crate::{TestDataError, TestDataResult};
use std::collections::HashMap;
use std::fmt;
use tdm_types::{Environment, Identifier};

/// Which implementation backs [`crate::db::SessionSource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbBackend {
    Oracle,
    Memory,
}

impl DbBackend {
    fn parse(value: &str) -> TestDataResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "oracle" => Ok(DbBackend::Oracle),
            "memory" => Ok(DbBackend::Memory),
            other => Err(TestDataError::InvalidInput(format!(
                "TDM_DB_BACKEND must be 'oracle' or 'memory', got '{other}'"
            ))),
        }
    }
}

/// Database settings: credentials, per-environment connect descriptors and pool bounds.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub backend: DbBackend,
    pub user: String,
    pub password: String,
    pub connect_descriptors: HashMap<Environment, String>,
    pub owner: Option<Identifier>,
    pub pool_min: u32,
    pub pool_max: u32,
}

impl DatabaseConfig {
    pub fn connect_descriptor(&self, environment: Environment) -> Option<&str> {
        self.connect_descriptors
            .get(&environment)
            .map(String::as_str)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("backend", &self.backend)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("connect_descriptors", &self.connect_descriptors)
            .field("owner", &self.owner)
            .field("pool_min", &self.pool_min)
            .field("pool_max", &self.pool_max)
            .finish()
    }
}

/// Settings for the external case-management API. All three must be present to forward calls.
#[derive(Clone, Default)]
pub struct ExternalApiConfig {
    pub domain: Option<String>,
    pub user_id: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ExternalApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalApiConfig")
            .field("domain", &self.domain)
            .field("user_id", &self.user_id)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database: DatabaseConfig,
    external: ExternalApiConfig,
    intake_max_attempts: u32,
    service_create_max_attempts: u32,
}

impl CoreConfig {
    /// Resolve configuration from a key lookup.
    ///
    /// `lookup` is normally `|key| std::env::var(key).ok()`; tests pass a map instead. Blank
    /// values are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns `TestDataError::InvalidInput` if:
    /// - a numeric setting does not parse or an attempt bound is zero,
    /// - `TDM_POOL_MIN` exceeds `TDM_POOL_MAX`,
    /// - the oracle backend is selected without `DB_USER`/`DB_PASSWORD`,
    /// - `TDM_DB_OWNER` is not a plain identifier.
    pub fn from_lookup<F>(lookup: F) -> TestDataResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend = get("TDM_DB_BACKEND")
            .map(|v| DbBackend::parse(&v))
            .transpose()?
            .unwrap_or(DbBackend::Oracle);

        let user = get("DB_USER").unwrap_or_default();
        let password = get("DB_PASSWORD").unwrap_or_default();
        if backend == DbBackend::Oracle && (user.is_empty() || password.is_empty()) {
            return Err(TestDataError::InvalidInput(
                "DB_USER and DB_PASSWORD are required for the oracle backend".into(),
            ));
        }

        let connect_descriptors = Environment::ALL
            .into_iter()
            .filter_map(|env| {
                get(&format!("TDM_DB_CONNECT_{}", env.as_str())).map(|descriptor| (env, descriptor))
            })
            .collect();

        let owner = get("TDM_DB_OWNER").map(Identifier::new).transpose()?;

        let pool_min = u32_setting("TDM_POOL_MIN", get("TDM_POOL_MIN"), DEFAULT_POOL_MIN)?;
        let pool_max = u32_setting("TDM_POOL_MAX", get("TDM_POOL_MAX"), DEFAULT_POOL_MAX)?;
        if pool_max == 0 || pool_min > pool_max {
            return Err(TestDataError::InvalidInput(format!(
                "pool bounds are invalid (min {pool_min}, max {pool_max})"
            )));
        }

        let intake_max_attempts = attempts_setting(
            "TDM_INTAKE_MAX_ATTEMPTS",
            get("TDM_INTAKE_MAX_ATTEMPTS"),
            DEFAULT_INTAKE_MAX_ATTEMPTS,
        )?;
        let service_create_max_attempts = attempts_setting(
            "TDM_SERVICE_CREATE_MAX_ATTEMPTS",
            get("TDM_SERVICE_CREATE_MAX_ATTEMPTS"),
            DEFAULT_SERVICE_CREATE_MAX_ATTEMPTS,
        )?;

        Ok(Self {
            database: DatabaseConfig {
                backend,
                user,
                password,
                connect_descriptors,
                owner,
                pool_min,
                pool_max,
            },
            external: ExternalApiConfig {
                domain: get("EXTERNAL_API_DOMAIN_CORE"),
                user_id: get("API_USER_ID"),
                password: get("API_PASSWORD"),
            },
            intake_max_attempts,
            service_create_max_attempts,
        })
    }

    /// Configuration for the in-memory backend with default bounds and no external API.
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig {
                backend: DbBackend::Memory,
                user: String::new(),
                password: String::new(),
                connect_descriptors: HashMap::new(),
                owner: None,
                pool_min: DEFAULT_POOL_MIN,
                pool_max: DEFAULT_POOL_MAX,
            },
            external: ExternalApiConfig::default(),
            intake_max_attempts: DEFAULT_INTAKE_MAX_ATTEMPTS,
            service_create_max_attempts: DEFAULT_SERVICE_CREATE_MAX_ATTEMPTS,
        }
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    pub fn external(&self) -> &ExternalApiConfig {
        &self.external
    }

    pub fn intake_max_attempts(&self) -> u32 {
        self.intake_max_attempts
    }

    pub fn service_create_max_attempts(&self) -> u32 {
        self.service_create_max_attempts
    }
}

fn u32_setting(name: &str, value: Option<String>, default: u32) -> TestDataResult<u32> {
    value
        .map(|v| {
            v.parse::<u32>().map_err(|_| {
                TestDataError::InvalidInput(format!("{name} must be a non-negative integer"))
            })
        })
        .transpose()
        .map(|parsed| parsed.unwrap_or(default))
}

fn attempts_setting(name: &str, value: Option<String>, default: u32) -> TestDataResult<u32> {
    match u32_setting(name, value, default)? {
        0 => Err(TestDataError::InvalidInput(format!(
            "{name} must be at least 1"
        ))),
        n => Ok(n),
    }
}
