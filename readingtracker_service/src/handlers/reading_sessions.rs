use std::sync::Arc;

use actix_web::http::header::LOCATION;
use actix_web::web::{Bytes, Data};
use actix_web::{Error, HttpRequest, HttpResponse};
use chrono::Utc;
use paperclip::actix::{api_v2_operation, web};

use crate::api::{
    ActionError, BookId, EndReadingSessionRequest, ErrorDetail, FieldErrors, IntegerInput,
    ReadingSession, ReadingSessionId, ReadingSessionInput, ReadingSessionListQuery,
    StartReadingSessionRequest,
};
use crate::auth::AuthenticatedUser;
use crate::filters::ReadingSessionFilter;
use crate::handlers::{invalid_page, not_found, repository_failure, validation_failed};
use crate::library_repository::{
    LibraryRepositoryError, NewReadingSession, ReadingSessionRepository,
};
use crate::pagination::{PageRequest, PaginationSettings};
use crate::validation::{
    invalid_book_reference, validate_new_session, validate_session, validate_session_end,
    FieldPresence,
};

const BOOK_CHANGED: &str = "The book of a reading session cannot be changed.";

#[api_v2_operation]
pub async fn list_reading_sessions(
    user: AuthenticatedUser,
    sessions_repository: Data<Arc<dyn ReadingSessionRepository>>,
    pagination: Data<PaginationSettings>,
    query: web::Query<ReadingSessionListQuery>,
    request: HttpRequest,
) -> Result<HttpResponse, Error> {
    let page = match PageRequest::from_query(
        query.page.as_deref(),
        query.page_size.as_deref(),
        &pagination,
    ) {
        Ok(page) => page,
        Err(_) => return Ok(invalid_page()),
    };
    let filter = ReadingSessionFilter::from_query(&query);

    Ok(
        match sessions_repository.list_sessions(user.id, &filter, page).await {
            Ok(sessions) => {
                match sessions.into_response(page, request.path(), request.query_string()) {
                    Ok(response) => HttpResponse::Ok().json(response),
                    Err(_) => invalid_page(),
                }
            }
            Err(err) => repository_failure("List reading sessions", err),
        },
    )
}

#[api_v2_operation]
/// Records a session with any of the user's books, start_time defaults to now
pub async fn add_reading_session(
    user: AuthenticatedUser,
    sessions_repository: Data<Arc<dyn ReadingSessionRepository>>,
    input: web::Json<ReadingSessionInput>,
) -> Result<HttpResponse, Error> {
    let session = match validate_new_session(input.into_inner(), Utc::now()) {
        Ok(session) => session,
        Err(errors) => return Ok(validation_failed(errors)),
    };

    Ok(
        match sessions_repository.add_session(user.id, session).await {
            Ok(session) => created(session),
            Err(LibraryRepositoryError::BookNotFound(book_id)) => {
                validation_failed(invalid_book_reference(book_id))
            }
            Err(err) => repository_failure("Add reading session", err),
        },
    )
}

#[api_v2_operation]
/// Starts reading one of the user's books now
pub async fn start_reading_session(
    user: AuthenticatedUser,
    sessions_repository: Data<Arc<dyn ReadingSessionRepository>>,
    request: web::Json<StartReadingSessionRequest>,
) -> Result<HttpResponse, Error> {
    let book = match &request.book {
        None => return Ok(book_id_required()),
        Some(book) if book.is_blank() || *book == IntegerInput::Number(0) => {
            return Ok(book_id_required())
        }
        Some(book) => book.parse().and_then(|book| BookId::try_from(book).ok()),
    };
    let book = match book {
        Some(book) => book,
        None => return Ok(book_not_found()),
    };

    let session = NewReadingSession {
        book,
        start_time: Utc::now(),
        end_time: None,
        pages_read: None,
        notes: String::new(),
    };
    Ok(
        match sessions_repository.add_session(user.id, session).await {
            Ok(session) => created(session),
            Err(LibraryRepositoryError::BookNotFound(_)) => book_not_found(),
            Err(err) => repository_failure("Start reading session", err),
        },
    )
}

#[api_v2_operation]
/// Ends the session now. Calling it again overwrites the end time, pages read and notes.
pub async fn end_reading_session(
    user: AuthenticatedUser,
    sessions_repository: Data<Arc<dyn ReadingSessionRepository>>,
    session_id: web::Path<ReadingSessionId>,
    body: Bytes,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    if let Err(err) = sessions_repository.get_session(user.id, session_id).await {
        return Ok(session_lookup_failure(err));
    }

    let request = match end_request(&body) {
        Ok(request) => request,
        Err(err) => {
            return Ok(HttpResponse::BadRequest().json(ErrorDetail::new(format!(
                "Json deserialize error: {err}"
            ))))
        }
    };
    let changes = match validate_session_end(request, Utc::now()) {
        Ok(changes) => changes,
        Err(errors) => return Ok(validation_failed(errors)),
    };
    Ok(
        match sessions_repository
            .update_session(user.id, session_id, changes)
            .await
        {
            Ok(session) => HttpResponse::Ok().json(session),
            Err(err) => session_lookup_failure(err),
        },
    )
}

#[api_v2_operation]
pub async fn get_reading_session(
    user: AuthenticatedUser,
    sessions_repository: Data<Arc<dyn ReadingSessionRepository>>,
    session_id: web::Path<ReadingSessionId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match sessions_repository
            .get_session(user.id, session_id.into_inner())
            .await
        {
            Ok(session) => HttpResponse::Ok().json(session),
            Err(err) => session_lookup_failure(err),
        },
    )
}

#[api_v2_operation]
pub async fn update_reading_session(
    user: AuthenticatedUser,
    sessions_repository: Data<Arc<dyn ReadingSessionRepository>>,
    session_id: web::Path<ReadingSessionId>,
    input: web::Json<ReadingSessionInput>,
) -> Result<HttpResponse, Error> {
    Ok(change_reading_session(
        user,
        sessions_repository,
        session_id.into_inner(),
        input.into_inner(),
        FieldPresence::Complete,
    )
    .await)
}

#[api_v2_operation]
pub async fn patch_reading_session(
    user: AuthenticatedUser,
    sessions_repository: Data<Arc<dyn ReadingSessionRepository>>,
    session_id: web::Path<ReadingSessionId>,
    input: web::Json<ReadingSessionInput>,
) -> Result<HttpResponse, Error> {
    Ok(change_reading_session(
        user,
        sessions_repository,
        session_id.into_inner(),
        input.into_inner(),
        FieldPresence::Partial,
    )
    .await)
}

#[api_v2_operation]
pub async fn delete_reading_session(
    user: AuthenticatedUser,
    sessions_repository: Data<Arc<dyn ReadingSessionRepository>>,
    session_id: web::Path<ReadingSessionId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match sessions_repository
            .delete_session(user.id, session_id.into_inner())
            .await
        {
            Ok(()) => HttpResponse::NoContent().finish(),
            Err(err) => session_lookup_failure(err),
        },
    )
}

async fn change_reading_session(
    user: AuthenticatedUser,
    sessions_repository: Data<Arc<dyn ReadingSessionRepository>>,
    session_id: ReadingSessionId,
    input: ReadingSessionInput,
    presence: FieldPresence,
) -> HttpResponse {
    let stored = match sessions_repository.get_session(user.id, session_id).await {
        Ok(stored) => stored,
        Err(err) => return session_lookup_failure(err),
    };

    let (book, changes) = match validate_session(input, presence) {
        Ok(validated) => validated,
        Err(errors) => return validation_failed(errors),
    };
    if book.is_some_and(|book| book != stored.book) {
        return validation_failed(FieldErrors::from([(
            "book".to_string(),
            vec![BOOK_CHANGED.to_string()],
        )]));
    }

    match sessions_repository
        .update_session(user.id, session_id, changes)
        .await
    {
        Ok(session) => HttpResponse::Ok().json(session),
        Err(err) => session_lookup_failure(err),
    }
}

fn created(session: ReadingSession) -> HttpResponse {
    HttpResponse::Created()
        .append_header((LOCATION, format!("/api/reading-sessions/{}/", session.id)))
        .json(session)
}

fn book_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ActionError::new("Book not found"))
}

/// The end action may be posted without a body, or with one that is not marked as JSON
fn end_request(body: &[u8]) -> Result<EndReadingSessionRequest, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(EndReadingSessionRequest::default())
    } else {
        serde_json::from_slice(body)
    }
}

fn book_id_required() -> HttpResponse {
    HttpResponse::BadRequest().json(ActionError::new("book ID required"))
}

fn session_lookup_failure(err: LibraryRepositoryError) -> HttpResponse {
    match err {
        LibraryRepositoryError::ReadingSessionNotFound(_) => not_found(),
        err => repository_failure("Reading session lookup", err),
    }
}

#[cfg(test)]
mod reading_sessions_handlers_tests {
    use actix_web::http::header::AUTHORIZATION;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};

    use crate::handlers::test_support::{ALICE, BOB};

    fn timestamp(value: &Value) -> DateTime<Utc> {
        value
            .as_str()
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc))
            .expect("Not a timestamp")
    }

    macro_rules! add_book {
        ($app:expr, $token:expr, $title:expr) => {{
            let book: Value = test::call_and_read_body_json(
                &$app,
                test::TestRequest::post()
                    .uri("/api/books/")
                    .insert_header((AUTHORIZATION, $token))
                    .set_json(json!({"title": $title, "author": "Frank Herbert"}))
                    .to_request(),
            )
            .await;
            book["id"].as_i64().expect("Book id missing")
        }};
    }

    #[actix_web::test]
    async fn test_start_requires_owned_book() {
        let app = init_test_app!();
        let bobs_book = add_book!(app, BOB, "Dune");

        for body in [
            json!({}),
            json!({"book": null}),
            json!({"book": 0}),
            json!({"book": ""}),
        ] {
            let response = test::call_service(
                &app,
                test::TestRequest::post()
                    .uri("/api/reading-sessions/start/")
                    .insert_header((AUTHORIZATION, ALICE))
                    .set_json(body)
                    .to_request(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(response).await;
            assert_eq!(body, json!({"error": "book ID required"}));
        }

        for book in [json!(20000), json!(bobs_book), json!("dune")] {
            let response = test::call_service(
                &app,
                test::TestRequest::post()
                    .uri("/api/reading-sessions/start/")
                    .insert_header((AUTHORIZATION, ALICE))
                    .set_json(json!({ "book": book }))
                    .to_request(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            let body: Value = test::read_body_json(response).await;
            assert_eq!(body, json!({"error": "Book not found"}));
        }
    }

    #[actix_web::test]
    async fn test_start_and_end_session() {
        let app = init_test_app!();
        let book = add_book!(app, ALICE, "Dune");

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/reading-sessions/start/")
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({ "book": book }))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let started: Value = test::read_body_json(response).await;
        assert_eq!(started["book"], book);
        assert_eq!(started["end_time"], Value::Null);
        assert_eq!(started["notes"], "");
        let end_uri = format!("/api/reading-sessions/{}/end/", started["id"]);

        let as_bob = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&end_uri)
                .insert_header((AUTHORIZATION, BOB))
                .set_json(json!({}))
                .to_request(),
        )
        .await;
        assert_eq!(as_bob.status(), StatusCode::NOT_FOUND);

        let ended: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri(&end_uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({"pages_read": 30, "notes": "Fear is the mind-killer"}))
                .to_request(),
        )
        .await;
        assert!(
            timestamp(&ended["end_time"]) >= timestamp(&ended["start_time"])
        );
        assert_eq!(ended["pages_read"], 30);
        assert_eq!(ended["notes"], "Fear is the mind-killer");

        let ended_again: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri(&end_uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({}))
                .to_request(),
        )
        .await;
        assert_eq!(ended_again["pages_read"], Value::Null);
        assert_eq!(ended_again["notes"], "");
        assert!(
            timestamp(&ended_again["end_time"]) >= timestamp(&ended["end_time"])
        );

        let negative = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&end_uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({"pages_read": -5}))
                .to_request(),
        )
        .await;
        assert_eq!(negative.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_start_accepts_book_id_as_text() {
        let app = init_test_app!();
        let book = add_book!(app, ALICE, "Dune");

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/reading-sessions/start/")
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({ "book": book.to_string() }))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let started: Value = test::read_body_json(response).await;
        assert_eq!(started["book"], book);
    }

    #[actix_web::test]
    async fn test_end_accepts_pages_as_text_and_missing_body() {
        let app = init_test_app!();
        let book = add_book!(app, ALICE, "Dune");
        let started: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/reading-sessions/start/")
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({ "book": book }))
                .to_request(),
        )
        .await;
        let end_uri = format!("/api/reading-sessions/{}/end/", started["id"]);

        let ended: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri(&end_uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({"pages_read": "30", "notes": "n"}))
                .to_request(),
        )
        .await;
        assert_eq!(ended["pages_read"], 30);
        assert_eq!(ended["notes"], "n");

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&end_uri)
                .insert_header((AUTHORIZATION, ALICE))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let ended: Value = test::read_body_json(response).await;
        assert_eq!(ended["pages_read"], Value::Null);
        assert_eq!(ended["notes"], "");

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&end_uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({"pages_read": "thirty"}))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(response).await;
        assert_eq!(
            body,
            json!({"pages_read": ["A valid integer is required."]})
        );

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&end_uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_payload("{\"notes\":")
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(response).await;
        assert!(body["detail"].is_string());
    }

    #[actix_web::test]
    async fn test_add_session_validates_book() {
        let app = init_test_app!();
        let book = add_book!(app, ALICE, "Dune");
        let bobs_book = add_book!(app, BOB, "Solaris");

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/reading-sessions/")
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({ "book": bobs_book }))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(response).await;
        assert_eq!(
            body,
            json!({"book": [format!("Invalid pk \"{bobs_book}\" - object does not exist.")]})
        );

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/reading-sessions/")
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({"notes": "no book"}))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(response).await;
        assert_eq!(body, json!({"book": ["This field is required."]}));

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/reading-sessions/")
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({
                    "book": book,
                    "start_time": "2024-05-01T20:00:00Z",
                    "end_time": "2024-05-01T21:30:00+01:00",
                    "pages_read": 12
                }))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(response).await;
        assert_eq!(
            timestamp(&created["start_time"]),
            timestamp(&json!("2024-05-01T20:00:00Z"))
        );
        assert_eq!(
            timestamp(&created["end_time"]),
            timestamp(&json!("2024-05-01T20:30:00Z"))
        );
        assert_eq!(created["pages_read"], 12);
        assert_eq!(created["notes"], "");
    }

    #[actix_web::test]
    async fn test_update_session_keeps_book() {
        let app = init_test_app!();
        let book = add_book!(app, ALICE, "Dune");
        let other_book = add_book!(app, ALICE, "Dune Messiah");

        let session: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/reading-sessions/")
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({ "book": book }))
                .to_request(),
        )
        .await;
        let uri = format!("/api/reading-sessions/{}/", session["id"]);

        let moved = test::call_service(
            &app,
            test::TestRequest::patch()
                .uri(&uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({ "book": other_book }))
                .to_request(),
        )
        .await;
        assert_eq!(moved.status(), StatusCode::BAD_REQUEST);

        let without_book = test::call_service(
            &app,
            test::TestRequest::put()
                .uri(&uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({"notes": "x"}))
                .to_request(),
        )
        .await;
        assert_eq!(without_book.status(), StatusCode::BAD_REQUEST);

        let replaced: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::put()
                .uri(&uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({"book": book, "notes": "re-read", "pages_read": 3}))
                .to_request(),
        )
        .await;
        assert_eq!(replaced["notes"], "re-read");
        assert_eq!(replaced["pages_read"], 3);

        let patched: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::patch()
                .uri(&uri)
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({"pages_read": null}))
                .to_request(),
        )
        .await;
        assert_eq!(patched["pages_read"], Value::Null);
        assert_eq!(patched["notes"], "re-read");

        let as_bob = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&uri)
                .insert_header((AUTHORIZATION, BOB))
                .to_request(),
        )
        .await;
        assert_eq!(as_bob.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_list_sessions_and_cascade_on_book_delete() {
        let app = init_test_app!();
        let book = add_book!(app, ALICE, "Dune");
        let other_book = add_book!(app, ALICE, "Solaris");
        for book in [book, other_book, book] {
            let response = test::call_service(
                &app,
                test::TestRequest::post()
                    .uri("/api/reading-sessions/start/")
                    .insert_header((AUTHORIZATION, ALICE))
                    .set_json(json!({ "book": book }))
                    .to_request(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let by_book: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/reading-sessions/?book={book}"))
                .insert_header((AUTHORIZATION, ALICE))
                .to_request(),
        )
        .await;
        assert_eq!(by_book["count"], 2);
        assert_eq!(by_book["next"], Value::Null);

        let all: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri("/api/reading-sessions/")
                .insert_header((AUTHORIZATION, ALICE))
                .to_request(),
        )
        .await;
        assert_eq!(all["count"], 3);
        assert_eq!(all["next"], "/api/reading-sessions/?page=2");

        let bobs: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri("/api/reading-sessions/")
                .insert_header((AUTHORIZATION, BOB))
                .to_request(),
        )
        .await;
        assert_eq!(bobs["count"], 0);

        let deleted = test::call_service(
            &app,
            test::TestRequest::delete()
                .uri(&format!("/api/books/{book}/"))
                .insert_header((AUTHORIZATION, ALICE))
                .to_request(),
        )
        .await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let remaining: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri("/api/reading-sessions/")
                .insert_header((AUTHORIZATION, ALICE))
                .to_request(),
        )
        .await;
        assert_eq!(remaining["count"], 1);
        assert_eq!(remaining["results"][0]["book"], other_book);
    }

    #[actix_web::test]
    async fn test_delete_session() {
        let app = init_test_app!();
        let book = add_book!(app, ALICE, "Dune");
        let session: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/reading-sessions/start/")
                .insert_header((AUTHORIZATION, ALICE))
                .set_json(json!({ "book": book }))
                .to_request(),
        )
        .await;
        let uri = format!("/api/reading-sessions/{}/", session["id"]);

        for (token, status) in [
            (BOB, StatusCode::NOT_FOUND),
            (ALICE, StatusCode::NO_CONTENT),
            (ALICE, StatusCode::NOT_FOUND),
        ] {
            let response = test::call_service(
                &app,
                test::TestRequest::delete()
                    .uri(&uri)
                    .insert_header((AUTHORIZATION, token))
                    .to_request(),
            )
            .await;
            assert_eq!(response.status(), status);
        }
    }
}
