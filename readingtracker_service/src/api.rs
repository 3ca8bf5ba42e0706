use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Deserializer, Serialize};

pub type UserId = i32;
pub type BookId = i32;
pub type ReadingSessionId = i32;

/// Field name to list of validation messages, returned with 400 responses
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
/// Book owned by a single user
pub struct Book {
    pub id: BookId,
    pub user: UserId,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub description: String,
    pub is_read: bool,
    pub page_count: Option<i32>,
    pub current_page: Option<i32>,
    pub started_reading: Option<NaiveDate>,
    pub finished_reading: Option<NaiveDate>,
    pub language: String,
    pub rating: Option<i16>,
    pub cover_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
/// Single sitting with a book. Open until end_time is set
pub struct ReadingSession {
    pub id: ReadingSessionId,
    pub user: UserId,
    pub book: BookId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub pages_read: Option<i32>,
    pub notes: String,
}

impl ReadingSession {
    /// Time spent reading, None while the session is still open
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end_time| end_time - self.start_time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
/// Integer sent either as a JSON number or as a numeric string, e.g. straight from a form field
pub enum IntegerInput {
    Number(i64),
    Text(String),
}

impl IntegerInput {
    /// None when the text is not an integer. Trailing zero decimals (`"12.0"`) are accepted.
    pub fn parse(&self) -> Option<i64> {
        match self {
            IntegerInput::Number(number) => Some(*number),
            IntegerInput::Text(text) => {
                let text = text.trim();
                let whole = match text.split_once('.') {
                    Some((whole, decimals)) if decimals.chars().all(|c| c == '0') => whole,
                    _ => text,
                };
                whole.parse().ok()
            }
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, IntegerInput::Text(text) if text.trim().is_empty())
    }
}

impl From<i64> for IntegerInput {
    fn from(number: i64) -> Self {
        IntegerInput::Number(number)
    }
}

impl From<i32> for IntegerInput {
    fn from(number: i32) -> Self {
        IntegerInput::Number(i64::from(number))
    }
}

impl std::fmt::Display for IntegerInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegerInput::Number(number) => write!(f, "{number}"),
            IntegerInput::Text(text) => write!(f, "{text}"),
        }
    }
}

impl paperclip::v2::schema::Apiv2Schema for IntegerInput {
    fn raw_schema() -> paperclip::v2::models::DefaultSchemaRaw {
        <i64 as paperclip::v2::schema::Apiv2Schema>::raw_schema()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
/// Boolean sent as a JSON bool, `0`/`1`, or one of the usual words (`"true"`, `"off"`, `"yes"`...)
pub enum BooleanInput {
    Bool(bool),
    Number(i64),
    Text(String),
}

impl BooleanInput {
    pub fn parse(&self) -> Option<bool> {
        match self {
            BooleanInput::Bool(value) => Some(*value),
            BooleanInput::Number(1) => Some(true),
            BooleanInput::Number(0) => Some(false),
            BooleanInput::Number(_) => None,
            BooleanInput::Text(text) => match text.trim().to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

impl From<bool> for BooleanInput {
    fn from(value: bool) -> Self {
        BooleanInput::Bool(value)
    }
}

impl paperclip::v2::schema::Apiv2Schema for BooleanInput {
    fn raw_schema() -> paperclip::v2::models::DefaultSchemaRaw {
        <bool as paperclip::v2::schema::Apiv2Schema>::raw_schema()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Body of create, update and patch requests for books.
/// Absent fields are left untouched on update, explicit nulls clear nullable fields
/// and are rejected for the others.
pub struct BookInput {
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub author: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub genre: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_read: Option<Option<BooleanInput>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub page_count: Option<Option<IntegerInput>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_page: Option<Option<IntegerInput>>,
    /// Date in YYYY-MM-DD format
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_reading: Option<Option<String>>,
    /// Date in YYYY-MM-DD format
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub finished_reading: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub language: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub rating: Option<Option<IntegerInput>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub cover_image: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Body of create, update and patch requests for reading sessions
pub struct ReadingSessionInput {
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub book: Option<Option<IntegerInput>>,
    /// RFC 3339 timestamp, defaults to now on create
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub pages_read: Option<Option<IntegerInput>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct StartReadingSessionRequest {
    #[serde(default)]
    pub book: Option<IntegerInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Body of the end action. An empty body is the same as `{}`.
pub struct EndReadingSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages_read: Option<IntegerInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Query parameters of GET /api/books/
pub struct BookListQuery {
    /// `true` or `false`, anything else is ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_read: Option<String>,
    /// Case insensitive exact match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// Terms matched against title and author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Comma separated list of `title`, `created_at`, prefixed with `-` for descending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Query parameters of GET /api/reading-sessions/
pub struct ReadingSessionListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PaginatedResponse<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
/// Generic error body, e.g. `{"detail": "Not found."}`
pub struct ErrorDetail {
    pub detail: String,
}

impl ErrorDetail {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
/// Error body of the reading session actions, e.g. `{"error": "Book not found"}`
pub struct ActionError {
    pub error: String,
}

impl ActionError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Distinguishes an explicit `null` (Some(None)) from an absent field (None)
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
