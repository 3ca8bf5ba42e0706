use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};

use chrono::Utc;

use crate::api::{Book, BookId, ReadingSession, ReadingSessionId, UserId};
use crate::filters::{BookFilter, ReadingSessionFilter};
use crate::library_repository::{
    BookChanges, BookRepository, LibraryRepositoryError, NewBook, NewReadingSession,
    ReadingSessionChanges, ReadingSessionRepository, User, UserRepository,
};
use crate::pagination::{Page, PageRequest};

#[derive(Default)]
struct LibraryTables {
    users: HashMap<UserId, User>,
    tokens: HashMap<String, UserId>,
    books: BTreeMap<BookId, Book>,
    reading_sessions: BTreeMap<ReadingSessionId, ReadingSession>,
}

#[derive(Default)]
/// All tables sit behind one lock, so cascades and ownership checks are atomic
pub struct InMemoryLibraryRepository {
    user_sequence_generator: AtomicI32,
    book_sequence_generator: AtomicI32,
    reading_session_sequence_generator: AtomicI32,
    tables: parking_lot::RwLock<LibraryTables>,
}

/// Ids start from 1 like SERIAL columns
fn next_id(sequence_generator: &AtomicI32) -> i32 {
    sequence_generator.fetch_add(1, Ordering::Relaxed) + 1
}

#[async_trait::async_trait]
impl UserRepository for InMemoryLibraryRepository {
    async fn add_user(
        &self,
        username: &str,
        token: &str,
    ) -> Result<UserId, LibraryRepositoryError> {
        let mut tables = self.tables.write();
        if tables.users.values().any(|user| user.username == username) {
            return Err(LibraryRepositoryError::UserAlreadyExists(
                username.to_string(),
            ));
        }
        if tables.tokens.contains_key(token) {
            return Err(LibraryRepositoryError::Other(
                "Token already assigned".to_string(),
            ));
        }

        let id = next_id(&self.user_sequence_generator);
        tables.users.insert(
            id,
            User {
                id,
                username: username.to_string(),
            },
        );
        tables.tokens.insert(token.to_string(), id);
        Ok(id)
    }

    async fn find_user_by_token(
        &self,
        token: &str,
    ) -> Result<Option<User>, LibraryRepositoryError> {
        let tables = self.tables.read();
        Ok(tables
            .tokens
            .get(token)
            .and_then(|user_id| tables.users.get(user_id))
            .cloned())
    }
}

#[async_trait::async_trait]
impl BookRepository for InMemoryLibraryRepository {
    async fn add_book(
        &self,
        user_id: UserId,
        book: NewBook,
    ) -> Result<Book, LibraryRepositoryError> {
        let id = next_id(&self.book_sequence_generator);
        let now = Utc::now();
        let book = Book {
            id,
            user: user_id,
            title: book.title,
            author: book.author,
            genre: book.genre,
            description: book.description,
            is_read: book.is_read,
            page_count: book.page_count,
            current_page: book.current_page,
            started_reading: book.started_reading,
            finished_reading: book.finished_reading,
            language: book.language,
            rating: book.rating,
            cover_image: book.cover_image,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().books.insert(id, book.clone());
        Ok(book)
    }

    async fn get_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<Book, LibraryRepositoryError> {
        self.tables
            .read()
            .books
            .get(&book_id)
            .filter(|book| book.user == user_id)
            .cloned()
            .ok_or(LibraryRepositoryError::BookNotFound(book_id))
    }

    async fn list_books(
        &self,
        user_id: UserId,
        filter: &BookFilter,
        page: PageRequest,
    ) -> Result<Page<Book>, LibraryRepositoryError> {
        let mut books: Vec<Book> = self
            .tables
            .read()
            .books
            .values()
            .filter(|book| book.user == user_id && filter.matches(book))
            .cloned()
            .collect();
        books.sort_by(|a, b| filter.compare(a, b));
        Ok(Page::from_all(books, page))
    }

    async fn update_book(
        &self,
        user_id: UserId,
        book_id: BookId,
        changes: BookChanges,
    ) -> Result<Book, LibraryRepositoryError> {
        let mut tables = self.tables.write();
        let book = tables
            .books
            .get_mut(&book_id)
            .filter(|book| book.user == user_id)
            .ok_or(LibraryRepositoryError::BookNotFound(book_id))?;
        changes.apply(book);
        book.updated_at = Utc::now();
        Ok(book.clone())
    }

    async fn delete_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<(), LibraryRepositoryError> {
        let mut tables = self.tables.write();
        match tables.books.get(&book_id) {
            Some(book) if book.user == user_id => {
                tables.books.remove(&book_id);
                tables
                    .reading_sessions
                    .retain(|_, session| session.book != book_id);
                Ok(())
            }
            _ => Err(LibraryRepositoryError::BookNotFound(book_id)),
        }
    }
}

#[async_trait::async_trait]
impl ReadingSessionRepository for InMemoryLibraryRepository {
    async fn add_session(
        &self,
        user_id: UserId,
        session: NewReadingSession,
    ) -> Result<ReadingSession, LibraryRepositoryError> {
        let mut tables = self.tables.write();
        let owns_book = tables
            .books
            .get(&session.book)
            .is_some_and(|book| book.user == user_id);
        if !owns_book {
            return Err(LibraryRepositoryError::BookNotFound(session.book));
        }

        let id = next_id(&self.reading_session_sequence_generator);
        let session = ReadingSession {
            id,
            user: user_id,
            book: session.book,
            start_time: session.start_time,
            end_time: session.end_time,
            pages_read: session.pages_read,
            notes: session.notes,
        };
        tables.reading_sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get_session(
        &self,
        user_id: UserId,
        session_id: ReadingSessionId,
    ) -> Result<ReadingSession, LibraryRepositoryError> {
        self.tables
            .read()
            .reading_sessions
            .get(&session_id)
            .filter(|session| session.user == user_id)
            .cloned()
            .ok_or(LibraryRepositoryError::ReadingSessionNotFound(session_id))
    }

    async fn list_sessions(
        &self,
        user_id: UserId,
        filter: &ReadingSessionFilter,
        page: PageRequest,
    ) -> Result<Page<ReadingSession>, LibraryRepositoryError> {
        let sessions: Vec<ReadingSession> = self
            .tables
            .read()
            .reading_sessions
            .values()
            .filter(|session| session.user == user_id && filter.matches(session))
            .cloned()
            .collect();
        Ok(Page::from_all(sessions, page))
    }

    async fn update_session(
        &self,
        user_id: UserId,
        session_id: ReadingSessionId,
        changes: ReadingSessionChanges,
    ) -> Result<ReadingSession, LibraryRepositoryError> {
        let mut tables = self.tables.write();
        let session = tables
            .reading_sessions
            .get_mut(&session_id)
            .filter(|session| session.user == user_id)
            .ok_or(LibraryRepositoryError::ReadingSessionNotFound(session_id))?;
        changes.apply(session);
        Ok(session.clone())
    }

    async fn delete_session(
        &self,
        user_id: UserId,
        session_id: ReadingSessionId,
    ) -> Result<(), LibraryRepositoryError> {
        let mut tables = self.tables.write();
        match tables.reading_sessions.get(&session_id) {
            Some(session) if session.user == user_id => {
                tables.reading_sessions.remove(&session_id);
                Ok(())
            }
            _ => Err(LibraryRepositoryError::ReadingSessionNotFound(session_id)),
        }
    }
}
