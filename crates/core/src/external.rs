//! Proxy to the external intake API.
//!
//! Requests are forwarded unchanged as JSON with Basic auth; the downstream status and body
//! are handed back to the caller as they came.

use crate::config::ExternalApiConfig;
use crate::{TestDataError, TestDataResult};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tdm_types::Environment;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which intake endpoint to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalApiType {
    Initial,
    Cos,
    Edit,
}

impl ExternalApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalApiType::Initial => "initial",
            ExternalApiType::Cos => "cos",
            ExternalApiType::Edit => "edit",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            ExternalApiType::Initial => "/intake/v1/initial-request",
            ExternalApiType::Cos => "/intake/v1/cos-request",
            ExternalApiType::Edit => "/intake/v1/edit-request",
        }
    }
}

impl fmt::Display for ExternalApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExternalApiType {
    type Err = TestDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initial" => Ok(ExternalApiType::Initial),
            "cos" => Ok(ExternalApiType::Cos),
            "edit" => Ok(ExternalApiType::Edit),
            other => Err(TestDataError::InvalidInput(format!(
                "apiType must be one of initial, cos, edit; got '{other}'"
            ))),
        }
    }
}

/// Status and body relayed from the downstream API.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalResponse {
    pub status: u16,
    /// Parsed JSON, or the raw text as a JSON string when the body is not JSON.
    pub body: Value,
}

impl ExternalResponse {
    /// Wrap a downstream status and raw body text.
    pub fn relay(status: u16, text: String) -> Self {
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Self { status, body }
    }
}

#[derive(Clone)]
struct Credentials {
    domain: String,
    user_id: String,
    password: String,
}

/// HTTP client for the external intake API. Cheap to clone.
#[derive(Clone)]
pub struct ExternalApiClient {
    http: reqwest::Client,
    credentials: Option<Credentials>,
}

impl fmt::Debug for ExternalApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalApiClient")
            .field(
                "domain",
                &self.credentials.as_ref().map(|c| c.domain.as_str()),
            )
            .finish()
    }
}

impl ExternalApiClient {
    /// Build a client. Missing settings are reported when a call is made, not here.
    pub fn new(cfg: &ExternalApiConfig) -> TestDataResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TestDataError::External)?;

        let credentials = match (&cfg.domain, &cfg.user_id, &cfg.password) {
            (Some(domain), Some(user_id), Some(password)) => Some(Credentials {
                domain: domain.clone(),
                user_id: user_id.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        Ok(Self { http, credentials })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn credentials(&self) -> TestDataResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or(TestDataError::ExternalNotConfigured)
    }

    /// `https://{env}-{domain}{path}` with the environment lower-cased.
    pub fn endpoint(
        &self,
        environment: Environment,
        api_type: ExternalApiType,
    ) -> TestDataResult<String> {
        let creds = self.credentials()?;
        Ok(format!(
            "https://{}-{}{}",
            environment.host_prefix(),
            creds.domain,
            api_type.path()
        ))
    }

    pub fn build_request(
        &self,
        environment: Environment,
        api_type: ExternalApiType,
        body: &Value,
    ) -> TestDataResult<reqwest::Request> {
        let creds = self.credentials()?;
        self.http
            .post(self.endpoint(environment, api_type)?)
            .basic_auth(&creds.user_id, Some(&creds.password))
            .json(body)
            .build()
            .map_err(TestDataError::External)
    }

    /// Send `body` and relay whatever comes back, including non-2xx statuses.
    pub async fn forward(
        &self,
        environment: Environment,
        api_type: ExternalApiType,
        body: &Value,
    ) -> TestDataResult<ExternalResponse> {
        let request = self.build_request(environment, api_type, body)?;
        tracing::info!("-- Forwarding {} request to {}", api_type, request.url());

        let response = self
            .http
            .execute(request)
            .await
            .map_err(TestDataError::External)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(TestDataError::External)?;

        Ok(ExternalResponse::relay(status, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configured() -> ExternalApiClient {
        ExternalApiClient::new(&ExternalApiConfig {
            domain: Some("api.example.test".into()),
            user_id: Some("user".into()),
            password: Some("pass".into()),
        })
        .unwrap()
    }

    #[test]
    fn api_types_map_to_paths() {
        assert_eq!("COS".parse::<ExternalApiType>().unwrap().path(), "/intake/v1/cos-request");
        assert_eq!(ExternalApiType::Edit.path(), "/intake/v1/edit-request");
        assert!("delete".parse::<ExternalApiType>().is_err());
    }

    #[test]
    fn endpoint_uses_lower_case_environment_prefix() {
        let url = configured()
            .endpoint(Environment::Q3, ExternalApiType::Initial)
            .unwrap();
        assert_eq!(url, "https://q3-api.example.test/intake/v1/initial-request");
    }

    #[test]
    fn request_carries_basic_auth_and_json_body() {
        let request = configured()
            .build_request(Environment::Q1, ExternalApiType::Cos, &json!({"id": 7}))
            .unwrap();
        assert_eq!(*request.method(), reqwest::Method::POST);
        assert_eq!(request.headers()["authorization"], "Basic dXNlcjpwYXNz");
        assert_eq!(request.headers()["content-type"], "application/json");
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(body).unwrap(), json!({"id": 7}));
    }

    #[test]
    fn json_bodies_are_parsed() {
        let relayed = ExternalResponse::relay(201, r#"{"intakeId": 42, "ok": true}"#.into());
        assert_eq!(relayed.status, 201);
        assert_eq!(relayed.body, json!({"intakeId": 42, "ok": true}));
    }

    #[test]
    fn non_json_bodies_become_strings_and_keep_their_status() {
        let relayed = ExternalResponse::relay(404, "Not Found".into());
        assert_eq!(relayed.status, 404);
        assert_eq!(relayed.body, Value::String("Not Found".into()));

        let empty = ExternalResponse::relay(204, String::new());
        assert_eq!(empty.status, 204);
        assert_eq!(empty.body, Value::String(String::new()));
    }

    #[tokio::test]
    async fn missing_settings_are_reported_at_call_time() {
        let client = ExternalApiClient::new(&ExternalApiConfig {
            domain: Some("api.example.test".into()),
            user_id: None,
            password: Some("pass".into()),
        })
        .unwrap();
        assert!(!client.is_configured());

        let err = client
            .forward(Environment::Q1, ExternalApiType::Initial, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TestDataError::ExternalNotConfigured));
        assert_eq!(err.to_string(), "External API is not configured");
    }
}
