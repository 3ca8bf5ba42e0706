//! Validation of request bodies into the changes accepted by the repositories.
//! Every problem is reported under the name of the offending field.

use chrono::{DateTime, NaiveDate, Utc};

use crate::api::{
    BookId, BookInput, BooleanInput, EndReadingSessionRequest, FieldErrors, IntegerInput,
    ReadingSessionInput,
};
use crate::library_repository::{BookChanges, NewBook, NewReadingSession, ReadingSessionChanges};

const REQUIRED: &str = "This field is required.";
const NULL: &str = "This field may not be null.";
const BLANK: &str = "This field may not be blank.";
const NEGATIVE: &str = "Ensure this value is greater than or equal to 0.";
const INVALID_INTEGER: &str = "A valid integer is required.";
const INVALID_BOOLEAN: &str = "Must be a valid boolean.";
const INVALID_PK_TYPE: &str = "Incorrect type. Expected pk value, received str.";
const INVALID_DATE: &str = "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.";
const INVALID_DATETIME: &str = "Datetime has wrong format. Use one of these formats instead: \
     YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z].";
const INVALID_URL: &str = "Enter a valid URL.";

const MAX_POSITIVE_INTEGER: i64 = i32::MAX as i64;
const MAX_POSITIVE_SMALL_INTEGER: i64 = i16::MAX as i64;

const URL_SCHEMES: [&str; 4] = ["http://", "https://", "ftp://", "ftps://"];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FieldPresence {
    /// Create and PUT, required fields have to be present
    Complete,
    /// PATCH, any subset of fields
    Partial,
}

#[derive(Default)]
struct Errors(FieldErrors);

impl Errors {
    fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    fn finish<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self.0)
        }
    }
}

pub fn validate_book(
    input: BookInput,
    presence: FieldPresence,
) -> Result<BookChanges, FieldErrors> {
    let mut errors = Errors::default();

    let changes = BookChanges {
        title: required_text(&mut errors, "title", input.title, 200, presence),
        author: required_text(&mut errors, "author", input.author, 100, presence),
        genre: text(&mut errors, "genre", input.genre, Some(100)),
        description: text(&mut errors, "description", input.description, None),
        is_read: not_null(&mut errors, "is_read", input.is_read)
            .and_then(|value| boolean(&mut errors, "is_read", value)),
        page_count: nullable(input.page_count, |value| {
            number(&mut errors, "page_count", value, MAX_POSITIVE_INTEGER)
        }),
        current_page: nullable(input.current_page, |value| {
            number(&mut errors, "current_page", value, MAX_POSITIVE_INTEGER)
        }),
        started_reading: nullable(input.started_reading, |value| {
            date(&mut errors, "started_reading", &value)
        }),
        finished_reading: nullable(input.finished_reading, |value| {
            date(&mut errors, "finished_reading", &value)
        }),
        language: text(&mut errors, "language", input.language, Some(50)),
        rating: nullable(input.rating, |value| {
            number(&mut errors, "rating", value, MAX_POSITIVE_SMALL_INTEGER)
        }),
        cover_image: nullable(input.cover_image, |value| url(&mut errors, "cover_image", value)),
    };

    errors.finish(changes)
}

/// Validates all fields and fills in defaults for the absent optional ones
pub fn validate_new_book(input: BookInput) -> Result<NewBook, FieldErrors> {
    let changes = validate_book(input, FieldPresence::Complete)?;
    Ok(NewBook {
        title: changes.title.unwrap_or_default(),
        author: changes.author.unwrap_or_default(),
        genre: changes.genre.unwrap_or_default(),
        description: changes.description.unwrap_or_default(),
        is_read: changes.is_read.unwrap_or_default(),
        page_count: changes.page_count.flatten(),
        current_page: changes.current_page.flatten(),
        started_reading: changes.started_reading.flatten(),
        finished_reading: changes.finished_reading.flatten(),
        language: changes.language.unwrap_or_default(),
        rating: changes.rating.flatten(),
        cover_image: changes.cover_image.flatten(),
    })
}

/// Returns the book mentioned in the body (if any) separately, it can only be set on creation
pub fn validate_session(
    input: ReadingSessionInput,
    presence: FieldPresence,
) -> Result<(Option<BookId>, ReadingSessionChanges), FieldErrors> {
    let mut errors = Errors::default();

    let book = match input.book {
        None => {
            if presence == FieldPresence::Complete {
                errors.add("book", REQUIRED);
            }
            None
        }
        Some(None) => {
            errors.add("book", NULL);
            None
        }
        Some(Some(book)) => book_reference(&mut errors, book),
    };

    let changes = ReadingSessionChanges {
        start_time: not_null(&mut errors, "start_time", input.start_time)
            .and_then(|value| datetime(&mut errors, "start_time", &value)),
        end_time: nullable(input.end_time, |value| {
            datetime(&mut errors, "end_time", &value)
        }),
        pages_read: nullable(input.pages_read, |value| {
            number(&mut errors, "pages_read", value, MAX_POSITIVE_INTEGER)
        }),
        notes: not_null(&mut errors, "notes", input.notes)
            .map(|notes| notes.trim().to_string()),
    };

    errors.finish((book, changes))
}

/// start_time defaults to `now`
pub fn validate_new_session(
    input: ReadingSessionInput,
    now: DateTime<Utc>,
) -> Result<NewReadingSession, FieldErrors> {
    let (book, changes) = validate_session(input, FieldPresence::Complete)?;
    let book = book.ok_or_else(|| {
        FieldErrors::from([("book".to_string(), vec![REQUIRED.to_string()])])
    })?;
    Ok(NewReadingSession {
        book,
        start_time: changes.start_time.unwrap_or(now),
        end_time: changes.end_time.flatten(),
        pages_read: changes.pages_read.flatten(),
        notes: changes.notes.unwrap_or_default(),
    })
}

/// Ending always overwrites end time, pages read and notes, absent values clear them.
/// A blank `pages_read` counts as absent.
pub fn validate_session_end(
    request: EndReadingSessionRequest,
    now: DateTime<Utc>,
) -> Result<ReadingSessionChanges, FieldErrors> {
    let mut errors = Errors::default();
    let pages_read = request
        .pages_read
        .filter(|value| !value.is_blank())
        .and_then(|value| number(&mut errors, "pages_read", value, MAX_POSITIVE_INTEGER));

    errors.finish(ReadingSessionChanges {
        start_time: None,
        end_time: Some(Some(now)),
        pages_read: Some(pages_read),
        notes: Some(request.notes.unwrap_or_default()),
    })
}

pub fn invalid_book_reference(book: impl std::fmt::Display) -> FieldErrors {
    FieldErrors::from([(
        "book".to_string(),
        vec![format!("Invalid pk \"{book}\" - object does not exist.")],
    )])
}

fn book_reference(errors: &mut Errors, book: IntegerInput) -> Option<BookId> {
    if book.is_blank() {
        errors.add("book", NULL);
        return None;
    }
    let Some(number) = book.parse() else {
        errors.add("book", INVALID_PK_TYPE);
        return None;
    };
    match BookId::try_from(number) {
        Ok(book_id) if book_id > 0 => Some(book_id),
        _ => {
            errors.0.extend(invalid_book_reference(number));
            None
        }
    }
}

/// Keeps absent (None) and null (Some(None)) apart, validates present values
fn nullable<T, U>(
    value: Option<Option<T>>,
    validate: impl FnOnce(T) -> Option<U>,
) -> Option<Option<U>> {
    match value {
        None => None,
        Some(None) => Some(None),
        Some(Some(value)) => validate(value).map(Some),
    }
}

/// Rejects an explicit null for fields that cannot be cleared
fn not_null<T>(errors: &mut Errors, field: &str, value: Option<Option<T>>) -> Option<T> {
    match value {
        None => None,
        Some(None) => {
            errors.add(field, NULL);
            None
        }
        Some(Some(value)) => Some(value),
    }
}

fn required_text(
    errors: &mut Errors,
    field: &str,
    value: Option<Option<String>>,
    max_length: usize,
    presence: FieldPresence,
) -> Option<String> {
    match value {
        None => {
            if presence == FieldPresence::Complete {
                errors.add(field, REQUIRED);
            }
            None
        }
        Some(Some(value)) if value.trim().is_empty() => {
            errors.add(field, BLANK);
            None
        }
        value => text(errors, field, value, Some(max_length)),
    }
}

fn text(
    errors: &mut Errors,
    field: &str,
    value: Option<Option<String>>,
    max_length: Option<usize>,
) -> Option<String> {
    let value = not_null(errors, field, value)?;
    limited(errors, field, value, max_length)
}

fn limited(
    errors: &mut Errors,
    field: &str,
    value: String,
    max_length: Option<usize>,
) -> Option<String> {
    let value = value.trim().to_string();
    match max_length {
        Some(max_length) if value.chars().count() > max_length => {
            errors.add(
                field,
                format!("Ensure this field has no more than {max_length} characters."),
            );
            None
        }
        _ => Some(value),
    }
}

fn number<T: TryFrom<i64>>(
    errors: &mut Errors,
    field: &str,
    value: IntegerInput,
    max: i64,
) -> Option<T> {
    let Some(value) = value.parse() else {
        errors.add(field, INVALID_INTEGER);
        return None;
    };
    if value < 0 {
        errors.add(field, NEGATIVE);
        return None;
    }
    if value > max {
        errors.add(
            field,
            format!("Ensure this value is less than or equal to {max}."),
        );
        return None;
    }
    T::try_from(value).ok()
}

fn boolean(errors: &mut Errors, field: &str, value: BooleanInput) -> Option<bool> {
    let parsed = value.parse();
    if parsed.is_none() {
        errors.add(field, INVALID_BOOLEAN);
    }
    parsed
}

fn date(errors: &mut Errors, field: &str, value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| errors.add(field, INVALID_DATE))
        .ok()
}

fn datetime(errors: &mut Errors, field: &str, value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|datetime| datetime.with_timezone(&Utc))
        .map_err(|_| errors.add(field, INVALID_DATETIME))
        .ok()
}

fn url(errors: &mut Errors, field: &str, value: String) -> Option<String> {
    let value = limited(errors, field, value, Some(200))?;
    if is_valid_url(&value) {
        Some(value)
    } else {
        errors.add(field, INVALID_URL);
        None
    }
}

fn is_valid_url(value: &str) -> bool {
    let lowercase = value.to_lowercase();
    let Some(rest) = URL_SCHEMES
        .iter()
        .find_map(|scheme| lowercase.strip_prefix(scheme))
    else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    !host.is_empty() && !value.chars().any(char::is_whitespace)
}
