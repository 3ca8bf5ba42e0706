use actix_web::{Error, HttpResponse};
use paperclip::actix::api_v2_operation;

use crate::api::{ErrorDetail, FieldErrors};
use crate::library_repository::LibraryRepositoryError;

/// Builds the whole app around the in-memory repository with users alice and bob
#[cfg(test)]
macro_rules! init_test_app {
    () => {{
        let repositories = crate::handlers::test_support::repositories().await;
        actix_web::test::init_service(
            paperclip::actix::OpenApiExt::wrap_api(actix_web::App::new())
                .app_data(actix_web::web::Data::new(repositories.books.clone()))
                .app_data(actix_web::web::Data::new(
                    repositories.reading_sessions.clone(),
                ))
                .app_data(actix_web::web::Data::new(repositories.users.clone()))
                .app_data(actix_web::web::Data::new(
                    crate::handlers::test_support::PAGINATION,
                ))
                .app_data(crate::app_config::json_config())
                .app_data(crate::app_config::query_config())
                .app_data(crate::app_config::path_config())
                .configure(crate::app_config::config_app)
                .with_json_spec_at("/apispec/v2")
                .build(),
        )
        .await
    }};
}

pub mod books;
pub mod reading_sessions;

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorDetail::new("Not found."))
}

fn invalid_page() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorDetail::new("Invalid page."))
}

fn validation_failed(errors: FieldErrors) -> HttpResponse {
    HttpResponse::BadRequest().json(errors)
}

fn repository_failure(operation: &str, err: LibraryRepositoryError) -> HttpResponse {
    tracing::error!("{} failed {}", operation, err);
    HttpResponse::InternalServerError().json(ErrorDetail::new("A server error occurred."))
}
