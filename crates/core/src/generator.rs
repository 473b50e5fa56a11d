//! Synthetic value generator.
//!
//! Every function takes the RNG as a parameter so callers decide between entropy seeding
//! (requests) and fixed seeds (tests).

use crate::constants::MAX_GENERATED_ROWS;
use crate::{TestDataError, TestDataResult};
use api_shared::{Field, FieldType};
use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

const FIRST_NAMES: &[&str] = &[
    "James", "Mary", "Robert", "Patricia", "John", "Jennifer", "Michael", "Linda", "David",
    "Elizabeth", "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica", "Thomas",
    "Sarah", "Charles", "Karen",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin",
];

const EMAIL_DOMAINS: &[&str] = &["example.com", "test.org", "mailinator.com", "sample.net"];

const LOREM: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua",
];

const STREETS: &[&str] = &[
    "Main St", "Oak Ave", "Maple Dr", "Cedar Ln", "Pine St", "Elm St", "Washington Blvd",
    "Lake Rd",
];

const CITIES: &[&str] = &[
    "Springfield", "Riverside", "Franklin", "Greenville", "Bristol", "Clinton", "Fairview",
    "Salem",
];

const REGIONS: &[&str] = &[
    "California", "Texas", "Florida", "New York", "Illinois", "Ohio", "Georgia", "Michigan",
];

const COUNTRIES: &[&str] = &[
    "United States", "Canada", "United Kingdom", "Germany", "France", "Australia", "Japan",
    "Mexico",
];

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PASSWORD_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn pick<R: Rng + ?Sized>(rng: &mut R, list: &[&'static str]) -> &'static str {
    list.choose(rng).copied().unwrap_or_default()
}

fn random_chars<R: Rng + ?Sized>(rng: &mut R, alphabet: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// `len` decimal digits. The first digit is non-zero so the value keeps its width as a number.
pub(crate) fn random_digits<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|i| {
            let low = if i == 0 { 1 } else { 0 };
            char::from(b'0' + rng.gen_range(low..10u8))
        })
        .collect()
}

/// `len` uppercase ASCII letters.
pub(crate) fn random_letters<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    random_chars(rng, UPPERCASE, len)
}

/// Replace every `#` in `pattern` with a random digit.
fn fill_pattern<R: Rng + ?Sized>(rng: &mut R, pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| {
            if c == '#' {
                char::from(b'0' + rng.gen_range(0..10u8))
            } else {
                c
            }
        })
        .collect()
}

/// Parse `low-high`, falling back to `1-100`.
fn number_range(option: &str) -> (i64, i64) {
    option
        .split_once('-')
        .and_then(|(low, high)| Some((low.trim().parse().ok()?, high.trim().parse().ok()?)))
        .filter(|(low, high)| low <= high)
        .unwrap_or((1, 100))
}

/// One synthetic value of `field_type`, shaped by its `option`.
pub fn generate_value<R: Rng + ?Sized>(field_type: FieldType, option: &str, rng: &mut R) -> String {
    match field_type {
        FieldType::Names => match option {
            "First name" => pick(rng, FIRST_NAMES).to_string(),
            "Last name" => pick(rng, LAST_NAMES).to_string(),
            _ => format!("{} {}", pick(rng, FIRST_NAMES), pick(rng, LAST_NAMES)),
        },
        FieldType::Phone => match option {
            "+1 ###-###-####" | "+44 #### ######" | "###-####" => fill_pattern(rng, option),
            _ => fill_pattern(rng, "(###) ###-####"),
        },
        FieldType::Email => format!(
            "{}{}@{}",
            pick(rng, FIRST_NAMES).to_lowercase(),
            rng.gen_range(1..1000),
            pick(rng, EMAIL_DOMAINS)
        ),
        FieldType::Text => {
            let words = rng.gen_range(5..=12);
            (0..words)
                .map(|_| pick(rng, LOREM))
                .collect::<Vec<_>>()
                .join(" ")
        }
        FieldType::Address => format!(
            "{} {}, {}",
            rng.gen_range(100..10_000),
            pick(rng, STREETS),
            pick(rng, CITIES)
        ),
        FieldType::Postal => fill_pattern(rng, "#####"),
        FieldType::Region => pick(rng, REGIONS).to_string(),
        FieldType::Country => pick(rng, COUNTRIES).to_string(),
        FieldType::Alphanumeric => random_chars(rng, ALPHANUMERIC, 10),
        FieldType::SubscriberId => {
            format!("{}{}", random_letters(rng, 3), fill_pattern(rng, "#######"))
        }
        FieldType::Number => {
            let (low, high) = number_range(option);
            rng.gen_range(low..=high).to_string()
        }
        FieldType::Currency => {
            let symbol = match option {
                "EUR €" => "€",
                "GBP £" => "£",
                "JPY ¥" => "¥",
                _ => "$",
            };
            let cents: u32 = rng.gen_range(100..=99_999);
            format!("{symbol}{}.{:02}", cents / 100, cents % 100)
        }
        FieldType::Date => {
            let days_back = rng.gen_range(0..5 * 365);
            let date = (Utc::now() - Duration::days(days_back)).date_naive();
            match option {
                "MM/DD/YYYY" => date.format("%m/%d/%Y").to_string(),
                "DD/MM/YYYY" => date.format("%d/%m/%Y").to_string(),
                "YYYY-MM-DD" => date.format("%Y-%m-%d").to_string(),
                _ => date.format("%d-%b-%y").to_string().to_uppercase(),
            }
        }
        FieldType::CreditCard => fill_pattern(rng, "4###-####-####-####"),
        FieldType::Password => {
            let len = match option {
                "12 chars" => 12,
                "16 chars" => 16,
                _ => 8,
            };
            random_chars(rng, PASSWORD_CHARS, len)
        }
        FieldType::Constant | FieldType::Unknown => String::new(),
    }
}

/// Generated rows, every row carrying a value for every column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Generate `rows` rows for the checked `fields`.
///
/// # Errors
///
/// - `InvalidInput` when `rows` is outside `1..=1000` or no field is checked.
pub fn generate_rows<R: Rng + ?Sized>(
    fields: &[Field],
    rows: u32,
    rng: &mut R,
) -> TestDataResult<Dataset> {
    if rows == 0 || rows > MAX_GENERATED_ROWS {
        return Err(TestDataError::InvalidInput(format!(
            "rows must be between 1 and {MAX_GENERATED_ROWS}, got {rows}"
        )));
    }
    let checked: Vec<&Field> = fields.iter().filter(|f| f.checked).collect();
    if checked.is_empty() {
        return Err(TestDataError::InvalidInput(
            "at least one field must be checked".into(),
        ));
    }

    let columns = checked
        .iter()
        .map(|f| {
            let name = f.property_name.trim();
            if name.is_empty() {
                f.field_type.as_str().to_string()
            } else {
                name.to_string()
            }
        })
        .collect();

    let rows = (0..rows)
        .map(|_| {
            checked
                .iter()
                .map(|f| match f.value.as_deref() {
                    Some(literal) if !literal.is_empty() => literal.to_string(),
                    _ => generate_value(f.field_type, &f.option, rng),
                })
                .collect()
        })
        .collect();

    Ok(Dataset { columns, rows })
}
