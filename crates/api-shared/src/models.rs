//! Request and response bodies for the REST API.
//!
//! Field names follow the browser client: camelCase for request/response envelopes,
//! snake_case for catalog rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Error envelope returned with every 4xx/5xx status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Kind of synthetic value a form field produces.
///
/// Unrecognised tags deserialize to [`FieldType::Unknown`], which generates an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Names,
    Phone,
    Email,
    Text,
    Address,
    Postal,
    Region,
    Country,
    Alphanumeric,
    SubscriberId,
    Number,
    Currency,
    Date,
    Constant,
    CreditCard,
    Password,
    Unknown,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Names => "names",
            FieldType::Phone => "phone",
            FieldType::Email => "email",
            FieldType::Text => "text",
            FieldType::Address => "address",
            FieldType::Postal => "postal",
            FieldType::Region => "region",
            FieldType::Country => "country",
            FieldType::Alphanumeric => "alphanumeric",
            FieldType::SubscriberId => "subscriber_id",
            FieldType::Number => "number",
            FieldType::Currency => "currency",
            FieldType::Date => "date",
            FieldType::Constant => "constant",
            FieldType::CreditCard => "creditcard",
            FieldType::Password => "password",
            FieldType::Unknown => "unknown",
        }
    }

    /// Maps a client tag to a type, falling back to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "names" => FieldType::Names,
            "phone" => FieldType::Phone,
            "email" => FieldType::Email,
            "text" => FieldType::Text,
            "address" => FieldType::Address,
            "postal" => FieldType::Postal,
            "region" => FieldType::Region,
            "country" => FieldType::Country,
            "alphanumeric" => FieldType::Alphanumeric,
            "subscriber_id" => FieldType::SubscriberId,
            "number" => FieldType::Number,
            "currency" => FieldType::Currency,
            "date" => FieldType::Date,
            "constant" => FieldType::Constant,
            "creditcard" => FieldType::CreditCard,
            "password" => FieldType::Password,
            _ => FieldType::Unknown,
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(FieldType::from_tag(&tag))
    }
}

/// One row of an editable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "phone")]
    pub field_type: FieldType,
    #[serde(default)]
    pub property_name: String,
    #[serde(default)]
    pub option: String,
    #[serde(default = "default_checked")]
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

fn default_checked() -> bool {
    true
}

/// A column as reported by the database catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ColumnMeta {
    pub column_name: String,
    pub data_type: String,
    pub data_length: Option<i64>,
    pub data_precision: Option<i64>,
    pub is_nullable: bool,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TableSchemaQuery {
    pub environment: Option<String>,
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableSchemaRes {
    pub environment: String,
    pub table_name: String,
    pub schema: Vec<ColumnMeta>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ServiceSchemaQuery {
    pub environment: Option<String>,
    pub service_type: Option<String>,
    /// `query` (default) or `create-intake`
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSchemaRes {
    pub environment: String,
    pub service_type: String,
    pub schema: Vec<Field>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceExecuteReq {
    pub environment: Option<String>,
    pub service_type: Option<String>,
    #[serde(default)]
    pub selected_column_names: Vec<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceExecuteRes {
    pub environment: String,
    pub service_type: String,
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Caller-supplied literals for intake creation.
///
/// The browser sends a list of single-key objects; other clients may send a flat object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataFields {
    Map(BTreeMap<String, Value>),
    List(Vec<BTreeMap<String, Value>>),
}

impl DataFields {
    /// Flattens either shape into `(property, literal)` pairs.
    ///
    /// Strings are taken as-is, numbers and booleans are rendered, nulls are dropped.
    pub fn into_pairs(self) -> Vec<(String, String)> {
        let maps = match self {
            DataFields::Map(map) => vec![map],
            DataFields::List(list) => list,
        };
        maps.into_iter()
            .flatten()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key, s)),
                other => Some((key, other.to_string())),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntakeReq {
    pub environment: Option<String>,
    pub service_type: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub data_fields: Option<DataFields>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntakeRes {
    pub message: String,
    #[schema(value_type = Object)]
    pub data: Value,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReq {
    pub fields: Vec<Field>,
    #[serde(default = "default_rows")]
    pub rows: u32,
    #[serde(default)]
    pub format: String,
}

fn default_rows() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRes {
    pub format: String,
    pub rows: u32,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCallReq {
    /// `initial`, `cos` or `edit`
    pub api_type: Option<String>,
    pub environment: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub request_body: Option<Value>,
}
