use anyhow::Context;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{Book, BookId, ReadingSession, ReadingSessionId, UserId};
use crate::filters::{BookFilter, BookPredicate, ReadingSessionFilter, ReadingSessionPredicate};
use crate::library_repository::{
    BookChanges, BookRepository, LibraryRepositoryError, NewBook, NewReadingSession,
    ReadingSessionChanges, ReadingSessionRepository, User, UserRepository,
};
use crate::pagination::{Page, PageRequest};

const BOOK_COLUMNS: &str = "id, user_id, title, author, genre, description, is_read, \
     page_count, current_page, started_reading, finished_reading, language, rating, \
     cover_image, created_at, updated_at";

const READING_SESSION_COLUMNS: &str =
    "id, user_id, book_id, start_time, end_time, pages_read, notes";

const USERNAME_CONSTRAINT: &str = "users_username_key";

pub struct PostgresLibraryRepository {
    client: Client,
}

pub struct PostgresLibraryRepositoryConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

impl PostgresLibraryRepository {
    pub async fn init(config: PostgresLibraryRepositoryConfig) -> anyhow::Result<Self> {
        let connection_str = format!(
            "postgresql://{}:{}@{}",
            config.username, config.password, config.hostname
        );
        tracing::info!(
            "Connecting to postgres at {} as {}",
            config.hostname,
            config.username
        );
        let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
            .await
            .context("Failed to start postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Postgres connection error: {}", e);
            }
        });

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS users (
            id              SERIAL PRIMARY KEY,
            username        VARCHAR(150) NOT NULL UNIQUE
            );
        CREATE TABLE IF NOT EXISTS auth_tokens (
            key             VARCHAR(64) PRIMARY KEY,
            user_id         INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE
            );
        CREATE TABLE IF NOT EXISTS books (
            id              SERIAL PRIMARY KEY,
            user_id         INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            title           VARCHAR(200) NOT NULL,
            author          VARCHAR(100) NOT NULL,
            genre           VARCHAR(100) NOT NULL DEFAULT '',
            description     TEXT NOT NULL DEFAULT '',
            is_read         BOOLEAN NOT NULL DEFAULT FALSE,
            page_count      INTEGER CHECK (page_count >= 0),
            current_page    INTEGER CHECK (current_page >= 0),
            started_reading DATE,
            finished_reading DATE,
            language        VARCHAR(50) NOT NULL DEFAULT '',
            rating          SMALLINT CHECK (rating >= 0),
            cover_image     VARCHAR(200),
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
            );
        CREATE TABLE IF NOT EXISTS reading_sessions (
            id              SERIAL PRIMARY KEY,
            user_id         INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            book_id         INTEGER NOT NULL REFERENCES books (id) ON DELETE CASCADE,
            start_time      TIMESTAMPTZ NOT NULL,
            end_time        TIMESTAMPTZ,
            pages_read      INTEGER CHECK (pages_read >= 0),
            notes           TEXT NOT NULL DEFAULT ''
            );
        ",
            )
            .await
            .context("Failed to setup tables")?;
        Ok(Self { client })
    }
}

/// Positional parameters of a query built at runtime
#[derive(Default)]
struct SqlParams {
    values: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl SqlParams {
    /// Stores the value and returns its placeholder, e.g. `$3`
    fn push<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> String {
        self.values.push(Box::new(value));
        format!("${}", self.values.len())
    }

    fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values
            .iter()
            .map(|value| value.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }

    /// Adds `column = $n` when the value is present
    fn assign<T: ToSql + Sync + Send + 'static>(
        &mut self,
        assignments: &mut Vec<String>,
        column: &str,
        value: Option<T>,
    ) {
        if let Some(value) = value {
            assignments.push(format!("{} = {}", column, self.push(value)));
        }
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn book_from_row(row: &Row) -> Result<Book, tokio_postgres::Error> {
    Ok(Book {
        id: row.try_get("id")?,
        user: row.try_get("user_id")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        genre: row.try_get("genre")?,
        description: row.try_get("description")?,
        is_read: row.try_get("is_read")?,
        page_count: row.try_get("page_count")?,
        current_page: row.try_get("current_page")?,
        started_reading: row.try_get("started_reading")?,
        finished_reading: row.try_get("finished_reading")?,
        language: row.try_get("language")?,
        rating: row.try_get("rating")?,
        cover_image: row.try_get("cover_image")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn reading_session_from_row(row: &Row) -> Result<ReadingSession, tokio_postgres::Error> {
    Ok(ReadingSession {
        id: row.try_get("id")?,
        user: row.try_get("user_id")?,
        book: row.try_get("book_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        pages_read: row.try_get("pages_read")?,
        notes: row.try_get("notes")?,
    })
}

impl PostgresLibraryRepository {
    /// Counts rows matching the conditions and fetches the requested page of them
    async fn select_page(
        &self,
        table: &str,
        columns: &str,
        conditions: &[String],
        order_by: &str,
        mut params: SqlParams,
        page: PageRequest,
    ) -> Result<(u64, Vec<Row>), LibraryRepositoryError> {
        let where_clause = conditions.join(" AND ");

        let count_row = self
            .client
            .query_one(
                format!("SELECT COUNT(*) FROM {} WHERE {}", table, where_clause).as_str(),
                &params.as_refs(),
            )
            .await?;
        let count: i64 = count_row.try_get(0)?;

        let limit = params.push(page.limit() as i64);
        let offset = params.push(page.offset() as i64);
        let rows = self
            .client
            .query(
                format!(
                    "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
                    columns, table, where_clause, order_by, limit, offset
                )
                .as_str(),
                &params.as_refs(),
            )
            .await?;

        Ok((count as u64, rows))
    }
}

#[async_trait::async_trait]
impl UserRepository for PostgresLibraryRepository {
    async fn add_user(
        &self,
        username: &str,
        token: &str,
    ) -> Result<UserId, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "WITH new_user AS (INSERT INTO users (username) VALUES ($1) RETURNING id) \
                 INSERT INTO auth_tokens (key, user_id) SELECT $2, id FROM new_user \
                 RETURNING user_id",
            )
            .await?;

        let row = match self.client.query_one(&stmt, &[&username, &token]).await {
            Ok(row) => row,
            Err(err)
                if err.code() == Some(&SqlState::UNIQUE_VIOLATION)
                    && err
                        .as_db_error()
                        .and_then(|db_error| db_error.constraint())
                        == Some(USERNAME_CONSTRAINT) =>
            {
                return Err(LibraryRepositoryError::UserAlreadyExists(
                    username.to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        Ok(row.try_get(0)?)
    }

    async fn find_user_by_token(
        &self,
        token: &str,
    ) -> Result<Option<User>, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT users.id, users.username FROM auth_tokens \
                 JOIN users ON users.id = auth_tokens.user_id \
                 WHERE auth_tokens.key = $1",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&token]).await?;
        match rows.first() {
            Some(row) => Ok(Some(User {
                id: row.try_get(0)?,
                username: row.try_get(1)?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl BookRepository for PostgresLibraryRepository {
    async fn add_book(
        &self,
        user_id: UserId,
        book: NewBook,
    ) -> Result<Book, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "INSERT INTO books (user_id, title, author, genre, description, is_read, \
                 page_count, current_page, started_reading, finished_reading, language, \
                 rating, cover_image) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
                 RETURNING {}",
                BOOK_COLUMNS
            ))
            .await?;

        let row = self
            .client
            .query_one(
                &stmt,
                &[
                    &user_id,
                    &book.title,
                    &book.author,
                    &book.genre,
                    &book.description,
                    &book.is_read,
                    &book.page_count,
                    &book.current_page,
                    &book.started_reading,
                    &book.finished_reading,
                    &book.language,
                    &book.rating,
                    &book.cover_image,
                ],
            )
            .await?;

        Ok(book_from_row(&row)?)
    }

    async fn get_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<Book, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT {} FROM books WHERE id = $1 AND user_id = $2",
                BOOK_COLUMNS
            ))
            .await?;

        let rows = self.client.query(&stmt, &[&book_id, &user_id]).await?;
        let row = rows
            .first()
            .ok_or(LibraryRepositoryError::BookNotFound(book_id))?;
        Ok(book_from_row(row)?)
    }

    async fn list_books(
        &self,
        user_id: UserId,
        filter: &BookFilter,
        page: PageRequest,
    ) -> Result<Page<Book>, LibraryRepositoryError> {
        let mut params = SqlParams::default();
        let mut conditions = vec![format!("user_id = {}", params.push(user_id))];
        for predicate in &filter.predicates {
            match predicate {
                BookPredicate::IsRead(is_read) => {
                    conditions.push(format!("is_read = {}", params.push(*is_read)));
                }
                BookPredicate::Genre(genre) => {
                    conditions.push(format!(
                        "UPPER(genre) = UPPER({})",
                        params.push(genre.clone())
                    ));
                }
                BookPredicate::Search(terms) => {
                    for term in terms {
                        let pattern = params.push(format!("%{}%", escape_like(term)));
                        conditions.push(format!(
                            "(title ILIKE {pattern} OR author ILIKE {pattern})"
                        ));
                    }
                }
            }
        }

        let order_by = filter
            .ordering
            .iter()
            .map(|ordering| {
                format!(
                    "{} {}",
                    ordering.field.order_expression(),
                    if ordering.descending { "DESC" } else { "ASC" }
                )
            })
            .chain(std::iter::once("id ASC".to_string()))
            .collect::<Vec<_>>()
            .join(", ");

        let (count, rows) = self
            .select_page("books", BOOK_COLUMNS, &conditions, &order_by, params, page)
            .await?;
        let items = rows
            .iter()
            .map(book_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { count, items })
    }

    async fn update_book(
        &self,
        user_id: UserId,
        book_id: BookId,
        changes: BookChanges,
    ) -> Result<Book, LibraryRepositoryError> {
        let mut params = SqlParams::default();
        let mut assignments = vec!["updated_at = now()".to_string()];
        params.assign(&mut assignments, "title", changes.title);
        params.assign(&mut assignments, "author", changes.author);
        params.assign(&mut assignments, "genre", changes.genre);
        params.assign(&mut assignments, "description", changes.description);
        params.assign(&mut assignments, "is_read", changes.is_read);
        params.assign(&mut assignments, "page_count", changes.page_count);
        params.assign(&mut assignments, "current_page", changes.current_page);
        params.assign(&mut assignments, "started_reading", changes.started_reading);
        params.assign(&mut assignments, "finished_reading", changes.finished_reading);
        params.assign(&mut assignments, "language", changes.language);
        params.assign(&mut assignments, "rating", changes.rating);
        params.assign(&mut assignments, "cover_image", changes.cover_image);

        let id = params.push(book_id);
        let owner = params.push(user_id);
        let rows = self
            .client
            .query(
                format!(
                    "UPDATE books SET {} WHERE id = {} AND user_id = {} RETURNING {}",
                    assignments.join(", "),
                    id,
                    owner,
                    BOOK_COLUMNS
                )
                .as_str(),
                &params.as_refs(),
            )
            .await?;

        let row = rows
            .first()
            .ok_or(LibraryRepositoryError::BookNotFound(book_id))?;
        Ok(book_from_row(row)?)
    }

    async fn delete_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<(), LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("DELETE FROM books WHERE id = $1 AND user_id = $2 RETURNING id")
            .await?;

        let rows = self.client.query(&stmt, &[&book_id, &user_id]).await?;
        if rows.is_empty() {
            return Err(LibraryRepositoryError::BookNotFound(book_id));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReadingSessionRepository for PostgresLibraryRepository {
    async fn add_session(
        &self,
        user_id: UserId,
        session: NewReadingSession,
    ) -> Result<ReadingSession, LibraryRepositoryError> {
        // insert happens only when the book belongs to the user
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "INSERT INTO reading_sessions \
                 (user_id, book_id, start_time, end_time, pages_read, notes) \
                 SELECT user_id, id, $3::TIMESTAMPTZ, $4::TIMESTAMPTZ, $5::INTEGER, $6::TEXT \
                 FROM books WHERE id = $2 AND user_id = $1 \
                 RETURNING {}",
                READING_SESSION_COLUMNS
            ))
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[
                    &user_id,
                    &session.book,
                    &session.start_time,
                    &session.end_time,
                    &session.pages_read,
                    &session.notes,
                ],
            )
            .await?;

        let row = rows
            .first()
            .ok_or(LibraryRepositoryError::BookNotFound(session.book))?;
        Ok(reading_session_from_row(row)?)
    }

    async fn get_session(
        &self,
        user_id: UserId,
        session_id: ReadingSessionId,
    ) -> Result<ReadingSession, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT {} FROM reading_sessions WHERE id = $1 AND user_id = $2",
                READING_SESSION_COLUMNS
            ))
            .await?;

        let rows = self.client.query(&stmt, &[&session_id, &user_id]).await?;
        let row = rows
            .first()
            .ok_or(LibraryRepositoryError::ReadingSessionNotFound(session_id))?;
        Ok(reading_session_from_row(row)?)
    }

    async fn list_sessions(
        &self,
        user_id: UserId,
        filter: &ReadingSessionFilter,
        page: PageRequest,
    ) -> Result<Page<ReadingSession>, LibraryRepositoryError> {
        let mut params = SqlParams::default();
        let mut conditions = vec![format!("user_id = {}", params.push(user_id))];
        for predicate in &filter.predicates {
            match predicate {
                ReadingSessionPredicate::Book(book_id) => {
                    conditions.push(format!("book_id = {}", params.push(*book_id)));
                }
            }
        }

        let (count, rows) = self
            .select_page(
                "reading_sessions",
                READING_SESSION_COLUMNS,
                &conditions,
                "id ASC",
                params,
                page,
            )
            .await?;
        let items = rows
            .iter()
            .map(reading_session_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { count, items })
    }

    async fn update_session(
        &self,
        user_id: UserId,
        session_id: ReadingSessionId,
        changes: ReadingSessionChanges,
    ) -> Result<ReadingSession, LibraryRepositoryError> {
        let mut params = SqlParams::default();
        let mut assignments = Vec::new();
        params.assign(&mut assignments, "start_time", changes.start_time);
        params.assign(&mut assignments, "end_time", changes.end_time);
        params.assign(&mut assignments, "pages_read", changes.pages_read);
        params.assign(&mut assignments, "notes", changes.notes);
        if assignments.is_empty() {
            return self.get_session(user_id, session_id).await;
        }

        let id = params.push(session_id);
        let owner = params.push(user_id);
        let rows = self
            .client
            .query(
                format!(
                    "UPDATE reading_sessions SET {} WHERE id = {} AND user_id = {} RETURNING {}",
                    assignments.join(", "),
                    id,
                    owner,
                    READING_SESSION_COLUMNS
                )
                .as_str(),
                &params.as_refs(),
            )
            .await?;

        let row = rows
            .first()
            .ok_or(LibraryRepositoryError::ReadingSessionNotFound(session_id))?;
        Ok(reading_session_from_row(row)?)
    }

    async fn delete_session(
        &self,
        user_id: UserId,
        session_id: ReadingSessionId,
    ) -> Result<(), LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("DELETE FROM reading_sessions WHERE id = $1 AND user_id = $2 RETURNING id")
            .await?;

        let rows = self.client.query(&stmt, &[&session_id, &user_id]).await?;
        if rows.is_empty() {
            return Err(LibraryRepositoryError::ReadingSessionNotFound(session_id));
        }
        Ok(())
    }
}
