use std::sync::Arc;

use actix_web::http::header::LOCATION;
use actix_web::web::Data;
use actix_web::{Error, HttpRequest, HttpResponse};
use paperclip::actix::{api_v2_operation, web};

use crate::api::{BookId, BookInput, BookListQuery};
use crate::auth::AuthenticatedUser;
use crate::filters::BookFilter;
use crate::handlers::{invalid_page, not_found, repository_failure, validation_failed};
use crate::library_repository::{BookRepository, LibraryRepositoryError};
use crate::pagination::{PageRequest, PaginationSettings};
use crate::validation::{validate_book, validate_new_book, FieldPresence};

#[api_v2_operation]
/// Lists books of the user, filtered, ordered and paginated
pub async fn list_books(
    user: AuthenticatedUser,
    books_repository: Data<Arc<dyn BookRepository>>,
    pagination: Data<PaginationSettings>,
    query: web::Query<BookListQuery>,
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
    let filter = BookFilter::from_query(&query);

    Ok(
        match books_repository.list_books(user.id, &filter, page).await {
            Ok(books) => match books.into_response(page, request.path(), request.query_string()) {
                Ok(response) => HttpResponse::Ok().json(response),
                Err(_) => invalid_page(),
            },
            Err(err) => repository_failure("List books", err),
        },
    )
}

#[api_v2_operation]
pub async fn add_book(
    user: AuthenticatedUser,
    books_repository: Data<Arc<dyn BookRepository>>,
    input: web::Json<BookInput>,
) -> Result<HttpResponse, Error> {
    let book = match validate_new_book(input.into_inner()) {
        Ok(book) => book,
        Err(errors) => return Ok(validation_failed(errors)),
    };

    Ok(match books_repository.add_book(user.id, book).await {
        Ok(book) => HttpResponse::Created()
            .append_header((LOCATION, format!("/api/books/{}/", book.id)))
            .json(book),
        Err(err) => repository_failure("Add book", err),
    })
}

#[api_v2_operation]
pub async fn get_book(
    user: AuthenticatedUser,
    books_repository: Data<Arc<dyn BookRepository>>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match books_repository
            .get_book(user.id, book_id.into_inner())
            .await
        {
            Ok(book) => HttpResponse::Ok().json(book),
            Err(LibraryRepositoryError::BookNotFound(_)) => not_found(),
            Err(err) => repository_failure("Get book", err),
        },
    )
}

#[api_v2_operation]
/// Replaces the book, title and author have to be present
pub async fn update_book(
    user: AuthenticatedUser,
    books_repository: Data<Arc<dyn BookRepository>>,
    book_id: web::Path<BookId>,
    input: web::Json<BookInput>,
) -> Result<HttpResponse, Error> {
    Ok(change_book(
        user,
        books_repository,
        book_id.into_inner(),
        input.into_inner(),
        FieldPresence::Complete,
    )
    .await)
}

#[api_v2_operation]
pub async fn patch_book(
    user: AuthenticatedUser,
    books_repository: Data<Arc<dyn BookRepository>>,
    book_id: web::Path<BookId>,
    input: web::Json<BookInput>,
) -> Result<HttpResponse, Error> {
    Ok(change_book(
        user,
        books_repository,
        book_id.into_inner(),
        input.into_inner(),
        FieldPresence::Partial,
    )
    .await)
}

#[api_v2_operation]
/// Deletes the book together with its reading sessions
pub async fn delete_book(
    user: AuthenticatedUser,
    books_repository: Data<Arc<dyn BookRepository>>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match books_repository
            .delete_book(user.id, book_id.into_inner())
            .await
        {
            Ok(()) => HttpResponse::NoContent().finish(),
            Err(LibraryRepositoryError::BookNotFound(_)) => not_found(),
            Err(err) => repository_failure("Delete book", err),
        },
    )
}

async fn change_book(
    user: AuthenticatedUser,
    books_repository: Data<Arc<dyn BookRepository>>,
    book_id: BookId,
    input: BookInput,
    presence: FieldPresence,
) -> HttpResponse {
    // unknown books are reported before invalid bodies
    if let Err(err) = books_repository.get_book(user.id, book_id).await {
        return match err {
            LibraryRepositoryError::BookNotFound(_) => not_found(),
            err => repository_failure("Get book", err),
        };
    }

    let changes = match validate_book(input, presence) {
        Ok(changes) => changes,
        Err(errors) => return validation_failed(errors),
    };

    match books_repository.update_book(user.id, book_id, changes).await {
        Ok(book) => HttpResponse::Ok().json(book),
        Err(LibraryRepositoryError::BookNotFound(_)) => not_found(),
        Err(err) => repository_failure("Update book", err),
    }
}
