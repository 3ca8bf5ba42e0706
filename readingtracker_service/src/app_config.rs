use actix_web::error::InternalError;
use actix_web::HttpResponse;
use paperclip::actix::web;

use crate::api::ErrorDetail;
use crate::handlers::{self, books, reading_sessions};

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(
            web::scope("/api")
                .service(
                    web::resource("/books/")
                        .route(web::get().to(books::list_books))
                        .route(web::post().to(books::add_book)),
                )
                .service(
                    web::resource("/books/{id}/")
                        .route(web::get().to(books::get_book))
                        .route(web::put().to(books::update_book))
                        .route(web::patch().to(books::patch_book))
                        .route(web::delete().to(books::delete_book)),
                )
                .service(
                    web::resource("/reading-sessions/")
                        .route(web::get().to(reading_sessions::list_reading_sessions))
                        .route(web::post().to(reading_sessions::add_reading_session)),
                )
                // has to be registered before /{id}/
                .service(
                    web::resource("/reading-sessions/start/")
                        .route(web::post().to(reading_sessions::start_reading_session)),
                )
                .service(
                    web::resource("/reading-sessions/{id}/")
                        .route(web::get().to(reading_sessions::get_reading_session))
                        .route(web::put().to(reading_sessions::update_reading_session))
                        .route(web::patch().to(reading_sessions::patch_reading_session))
                        .route(web::delete().to(reading_sessions::delete_reading_session)),
                )
                .service(
                    web::resource("/reading-sessions/{id}/end/")
                        .route(web::post().to(reading_sessions::end_reading_session)),
                ),
        );
}

/// Malformed bodies are answered with `{"detail": "..."}`
pub fn json_config() -> actix_web::web::JsonConfig {
    actix_web::web::JsonConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(ErrorDetail::new(err.to_string()));
        InternalError::from_response(err, response).into()
    })
}

pub fn query_config() -> actix_web::web::QueryConfig {
    actix_web::web::QueryConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(ErrorDetail::new(err.to_string()));
        InternalError::from_response(err, response).into()
    })
}

/// Ids that are not integers point to nothing
pub fn path_config() -> actix_web::web::PathConfig {
    actix_web::web::PathConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::NotFound().json(ErrorDetail::new("Not found."));
        InternalError::from_response(err, response).into()
    })
}
