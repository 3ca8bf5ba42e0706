use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

pub use in_memory_library_repository::InMemoryLibraryRepository;
pub use postgres_library_repository::{PostgresLibraryRepository, PostgresLibraryRepositoryConfig};

use crate::api::{Book, BookId, ReadingSession, ReadingSessionId, UserId};
use crate::filters::{BookFilter, ReadingSessionFilter};
use crate::pagination::{Page, PageRequest};

mod in_memory_library_repository;
mod postgres_library_repository;

#[derive(thiserror::Error, Debug)]
pub enum LibraryRepositoryError {
    #[error("Book {0} not found")]
    BookNotFound(BookId),

    #[error("Reading session {0} not found")]
    ReadingSessionNotFound(ReadingSessionId),

    #[error("User {0} already exists")]
    UserAlreadyExists(String),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
/// Validated contents of a book about to be created
pub struct NewBook {
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
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
/// Validated update of a book. None leaves the field untouched,
/// Some(None) clears a nullable field.
pub struct BookChanges {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub is_read: Option<bool>,
    pub page_count: Option<Option<i32>>,
    pub current_page: Option<Option<i32>>,
    pub started_reading: Option<Option<NaiveDate>>,
    pub finished_reading: Option<Option<NaiveDate>>,
    pub language: Option<String>,
    pub rating: Option<Option<i16>>,
    pub cover_image: Option<Option<String>>,
}

impl BookChanges {
    pub fn apply(self, book: &mut Book) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }
        set(&mut book.title, self.title);
        set(&mut book.author, self.author);
        set(&mut book.genre, self.genre);
        set(&mut book.description, self.description);
        set(&mut book.is_read, self.is_read);
        set(&mut book.page_count, self.page_count);
        set(&mut book.current_page, self.current_page);
        set(&mut book.started_reading, self.started_reading);
        set(&mut book.finished_reading, self.finished_reading);
        set(&mut book.language, self.language);
        set(&mut book.rating, self.rating);
        set(&mut book.cover_image, self.cover_image);
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewReadingSession {
    pub book: BookId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub pages_read: Option<i32>,
    pub notes: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
/// Validated update of a reading session, the book is never part of it
pub struct ReadingSessionChanges {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<Option<DateTime<Utc>>>,
    pub pages_read: Option<Option<i32>>,
    pub notes: Option<String>,
}

impl ReadingSessionChanges {
    pub fn apply(self, session: &mut ReadingSession) {
        if let Some(start_time) = self.start_time {
            session.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            session.end_time = end_time;
        }
        if let Some(pages_read) = self.pages_read {
            session.pages_read = pages_read;
        }
        if let Some(notes) = self.notes {
            session.notes = notes;
        }
    }
}

#[async_trait::async_trait]
pub trait UserRepository: Send + Sync {
    /// Registers a user together with a token key issued by the authentication provider
    async fn add_user(
        &self,
        username: &str,
        token: &str,
    ) -> Result<UserId, LibraryRepositoryError>;
    /// Resolves token key to its user, None if the key is unknown
    async fn find_user_by_token(
        &self,
        token: &str,
    ) -> Result<Option<User>, LibraryRepositoryError>;
}

/// All operations are scoped to the owner, books of other users behave as if they did not exist
#[async_trait::async_trait]
pub trait BookRepository: Send + Sync {
    /// Adds book owned by user_id, returns stored book with assigned id and timestamps
    async fn add_book(
        &self,
        user_id: UserId,
        book: NewBook,
    ) -> Result<Book, LibraryRepositoryError>;
    async fn get_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<Book, LibraryRepositoryError>;
    /// Lists books matching the filter, ordered by it, limited to the requested page
    async fn list_books(
        &self,
        user_id: UserId,
        filter: &BookFilter,
        page: PageRequest,
    ) -> Result<Page<Book>, LibraryRepositoryError>;
    /// Applies changes and refreshes updated_at, returns the updated book
    async fn update_book(
        &self,
        user_id: UserId,
        book_id: BookId,
        changes: BookChanges,
    ) -> Result<Book, LibraryRepositoryError>;
    /// Deletes book together with all of its reading sessions
    async fn delete_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<(), LibraryRepositoryError>;
}

#[async_trait::async_trait]
pub trait ReadingSessionRepository: Send + Sync {
    /// Fails with BookNotFound when the book does not exist or belongs to someone else
    async fn add_session(
        &self,
        user_id: UserId,
        session: NewReadingSession,
    ) -> Result<ReadingSession, LibraryRepositoryError>;
    async fn get_session(
        &self,
        user_id: UserId,
        session_id: ReadingSessionId,
    ) -> Result<ReadingSession, LibraryRepositoryError>;
    async fn list_sessions(
        &self,
        user_id: UserId,
        filter: &ReadingSessionFilter,
        page: PageRequest,
    ) -> Result<Page<ReadingSession>, LibraryRepositoryError>;
    async fn update_session(
        &self,
        user_id: UserId,
        session_id: ReadingSessionId,
        changes: ReadingSessionChanges,
    ) -> Result<ReadingSession, LibraryRepositoryError>;
    async fn delete_session(
        &self,
        user_id: UserId,
        session_id: ReadingSessionId,
    ) -> Result<(), LibraryRepositoryError>;
}

#[derive(Clone)]
/// Trait objects handed to the handlers, usually backed by one shared store
pub struct Repositories {
    pub books: Arc<dyn BookRepository>,
    pub reading_sessions: Arc<dyn ReadingSessionRepository>,
    pub users: Arc<dyn UserRepository>,
}

impl Repositories {
    pub fn from_shared<R>(repository: Arc<R>) -> Self
    where
        R: BookRepository + ReadingSessionRepository + UserRepository + 'static,
    {
        Self {
            books: repository.clone(),
            reading_sessions: repository.clone(),
            users: repository,
        }
    }
}
