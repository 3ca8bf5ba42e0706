use anyhow::{bail, Context};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;
use serde::de::DeserializeOwned;

use crate::api::{
    Book, BookId, BookInput, BookListQuery, EndReadingSessionRequest, PaginatedResponse,
    ReadingSession, ReadingSessionId, ReadingSessionInput, ReadingSessionListQuery,
    StartReadingSessionRequest,
};

/// Talks to the reading tracker on behalf of the owner of `token`
pub struct ReadingTrackerClient {
    url: String,
    token: String,
    client: ClientWithMiddleware,
}

impl ReadingTrackerClient {
    pub fn new(url: &str, token: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Token {}", self.token))
    }

    /// Calls GET /api/books/ endpoint
    pub async fn list_books(
        &self,
        query: &BookListQuery,
    ) -> anyhow::Result<PaginatedResponse<Book>> {
        let request = self
            .client
            .get(format!("{}/api/books/", self.url))
            .query(query);
        self.send_expecting(request, "list books").await
    }

    /// Calls POST /api/books/ endpoint
    /// Returns the stored book
    pub async fn add_book(&self, book: &BookInput) -> anyhow::Result<Book> {
        let request = self
            .client
            .post(format!("{}/api/books/", self.url))
            .json(book);
        self.send_expecting(request, "add book").await
    }

    /// Calls GET /api/books/{book_id}/ endpoint
    /// None if the book does not exist or belongs to someone else
    pub async fn get_book(&self, book_id: BookId) -> anyhow::Result<Option<Book>> {
        let request = self.client.get(self.book_url(book_id));
        self.send_optional(request, "get book").await
    }

    /// Calls PUT /api/books/{book_id}/ endpoint
    pub async fn update_book(
        &self,
        book_id: BookId,
        book: &BookInput,
    ) -> anyhow::Result<Option<Book>> {
        let request = self.client.put(self.book_url(book_id)).json(book);
        self.send_optional(request, "update book").await
    }

    /// Calls PATCH /api/books/{book_id}/ endpoint
    pub async fn patch_book(
        &self,
        book_id: BookId,
        patch: &BookInput,
    ) -> anyhow::Result<Option<Book>> {
        let request = self.client.patch(self.book_url(book_id)).json(patch);
        self.send_optional(request, "patch book").await
    }

    /// Calls DELETE /api/books/{book_id}/ endpoint
    /// Returns false if there was nothing to delete
    pub async fn delete_book(&self, book_id: BookId) -> anyhow::Result<bool> {
        let request = self.client.delete(self.book_url(book_id));
        self.send_delete(request, "delete book").await
    }

    /// Calls GET /api/reading-sessions/ endpoint
    pub async fn list_reading_sessions(
        &self,
        query: &ReadingSessionListQuery,
    ) -> anyhow::Result<PaginatedResponse<ReadingSession>> {
        let request = self
            .client
            .get(format!("{}/api/reading-sessions/", self.url))
            .query(query);
        self.send_expecting(request, "list reading sessions").await
    }

    /// Calls POST /api/reading-sessions/ endpoint
    pub async fn add_reading_session(
        &self,
        session: &ReadingSessionInput,
    ) -> anyhow::Result<ReadingSession> {
        let request = self
            .client
            .post(format!("{}/api/reading-sessions/", self.url))
            .json(session);
        self.send_expecting(request, "add reading session").await
    }

    /// Calls POST /api/reading-sessions/start/ endpoint
    /// None if the book does not exist or belongs to someone else
    pub async fn start_reading_session(
        &self,
        book_id: BookId,
    ) -> anyhow::Result<Option<ReadingSession>> {
        let request = self
            .client
            .post(format!("{}/api/reading-sessions/start/", self.url))
            .json(&StartReadingSessionRequest {
                book: Some(book_id.into()),
            });
        self.send_optional(request, "start reading session").await
    }

    /// Calls POST /api/reading-sessions/{session_id}/end/ endpoint
    pub async fn end_reading_session(
        &self,
        session_id: ReadingSessionId,
        end: &EndReadingSessionRequest,
    ) -> anyhow::Result<Option<ReadingSession>> {
        let request = self
            .client
            .post(format!("{}end/", self.reading_session_url(session_id)))
            .json(end);
        self.send_optional(request, "end reading session").await
    }

    /// Calls GET /api/reading-sessions/{session_id}/ endpoint
    pub async fn get_reading_session(
        &self,
        session_id: ReadingSessionId,
    ) -> anyhow::Result<Option<ReadingSession>> {
        let request = self.client.get(self.reading_session_url(session_id));
        self.send_optional(request, "get reading session").await
    }

    /// Calls PUT /api/reading-sessions/{session_id}/ endpoint
    pub async fn update_reading_session(
        &self,
        session_id: ReadingSessionId,
        session: &ReadingSessionInput,
    ) -> anyhow::Result<Option<ReadingSession>> {
        let request = self
            .client
            .put(self.reading_session_url(session_id))
            .json(session);
        self.send_optional(request, "update reading session").await
    }

    /// Calls PATCH /api/reading-sessions/{session_id}/ endpoint
    pub async fn patch_reading_session(
        &self,
        session_id: ReadingSessionId,
        patch: &ReadingSessionInput,
    ) -> anyhow::Result<Option<ReadingSession>> {
        let request = self
            .client
            .patch(self.reading_session_url(session_id))
            .json(patch);
        self.send_optional(request, "patch reading session").await
    }

    /// Calls DELETE /api/reading-sessions/{session_id}/ endpoint
    pub async fn delete_reading_session(
        &self,
        session_id: ReadingSessionId,
    ) -> anyhow::Result<bool> {
        let request = self.client.delete(self.reading_session_url(session_id));
        self.send_delete(request, "delete reading session").await
    }

    fn book_url(&self, book_id: BookId) -> String {
        format!("{}/api/books/{}/", self.url, book_id)
    }

    fn reading_session_url(&self, session_id: ReadingSessionId) -> String {
        format!("{}/api/reading-sessions/{}/", self.url, session_id)
    }

    async fn send_expecting<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> anyhow::Result<T> {
        let response = self.authorized(request).send().await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            bail!("Failed to {} ({}) {}", operation, status, error)
        }
    }

    async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> anyhow::Result<Option<T>> {
        let response = self.authorized(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            Ok(None)
        } else if response.status().is_success() {
            Ok(Some(response.json().await?))
        } else {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            bail!("Failed to {} ({}) {}", operation, status, error)
        }
    }

    async fn send_delete(&self, request: RequestBuilder, operation: &str) -> anyhow::Result<bool> {
        let response = self.authorized(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            bail!("Failed to {} ({}) {}", operation, status, error)
        }
    }
}
