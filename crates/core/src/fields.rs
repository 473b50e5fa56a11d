//! Form field descriptions derived from column names.

use crate::constants::{
    COL_DOB, COL_FIRST_NAME, COL_INTAKE_ID, COL_LAST_NAME, COL_PATIENT_NUMBER, COL_PHONE,
};
use api_shared::{ColumnMeta, Field, FieldType};

/// Guess a generator type and default option from a column name.
pub fn infer_field_type(column_name: &str) -> (FieldType, &'static str) {
    let name = column_name.to_ascii_uppercase();
    let has = |needle: &str| name.contains(needle);

    if has("PHONE") || has("FAX") {
        (FieldType::Phone, "(###) ###-####")
    } else if has("EMAIL") {
        (FieldType::Email, "Standard")
    } else if name == "DOB" || has("DATE") || name.ends_with("_DT") {
        (FieldType::Date, "DD-MON-YY")
    } else if has("FIRST") {
        (FieldType::Names, "First name")
    } else if has("LAST") {
        (FieldType::Names, "Last name")
    } else if has("NAME") {
        (FieldType::Names, "Full name")
    } else if has("ZIP") || has("POSTAL") {
        (FieldType::Postal, "")
    } else if has("ADDR") || has("STREET") {
        (FieldType::Address, "")
    } else if has("STATE") || has("REGION") {
        (FieldType::Region, "")
    } else if has("COUNTRY") {
        (FieldType::Country, "")
    } else if ["AMOUNT", "AMT", "COST", "PRICE", "BALANCE"]
        .iter()
        .any(|n| has(n))
    {
        (FieldType::Currency, "USD")
    } else if has("NUMBER") || has("COUNT") || has("CODE") || has("_ID") || name.ends_with("ID") {
        (FieldType::Number, "1-1000")
    } else {
        (FieldType::Text, "")
    }
}

/// A checked form field for a catalog column.
pub fn infer_field(id: usize, meta: &ColumnMeta) -> Field {
    let (field_type, option) = infer_field_type(&meta.column_name);
    Field {
        id: id.to_string(),
        field_type,
        property_name: meta.column_name.clone(),
        option: option.to_string(),
        checked: true,
        value: None,
        example: None,
    }
}

/// Fields a caller may override when creating intake data, with example literals.
pub fn intake_override_fields() -> Vec<Field> {
    [
        (COL_PATIENT_NUMBER, FieldType::Number, "1234567890"),
        (COL_FIRST_NAME, FieldType::Names, "TESTQWERT"),
        (COL_LAST_NAME, FieldType::Names, "AUTOASDFG"),
        (COL_PHONE, FieldType::Phone, "(555) 123-4567"),
        (COL_DOB, FieldType::Date, "04-JUL-81"),
        (COL_INTAKE_ID, FieldType::Number, "4820175536"),
    ]
    .into_iter()
    .enumerate()
    .map(|(idx, (column, field_type, example))| Field {
        id: (idx + 1).to_string(),
        field_type,
        property_name: column.to_string(),
        option: String::new(),
        checked: true,
        value: Some(String::new()),
        example: Some(example.to_string()),
    })
    .collect()
}
