use std::sync::Arc;

use actix_web::{App, HttpServer};
use anyhow::Context;
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::runtime::TokioCurrentThread;
use paperclip::actix::{web, OpenApiExt};
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use readingtracker_service::app_config::{config_app, json_config, path_config, query_config};
use readingtracker_service::library_repository::{
    InMemoryLibraryRepository, LibraryRepositoryError, PostgresLibraryRepository, Repositories,
};
use readingtracker_service::settings::Settings;

// Based on https://github.com/LukeMathWalker/tracing-actix-web/blob/main/examples/opentelemetry/src/main.rs#L15
fn init_telemetry(app_name: &str) -> anyhow::Result<()> {
    // Spans are exported to Jaeger in batches
    global::set_text_map_propagator(TraceContextPropagator::new());
    #[allow(deprecated)]
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name(app_name)
        .install_batch(TokioCurrentThread)
        .context("Failed to install OpenTelemetry tracer.")?;

    // Tunable via `RUST_LOG` env variable
    let env_filter = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info"));
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let formatting_layer = BunyanFormattingLayer::new(app_name.into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(telemetry)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install `tracing` subscriber.")
}

async fn init_repositories(settings: &Settings) -> anyhow::Result<Repositories> {
    let repositories = if settings.use_in_memory_db {
        tracing::info!("Using in-memory library repository");
        Repositories::from_shared(Arc::new(InMemoryLibraryRepository::default()))
    } else {
        Repositories::from_shared(Arc::new(
            PostgresLibraryRepository::init(settings.postgres_config())
                .await
                .context("Failed to init postgres")?,
        ))
    };

    for user in settings.seed_users()? {
        match repositories.users.add_user(&user.username, &user.token).await {
            Ok(user_id) => tracing::info!("Registered user {} with id {}", user.username, user_id),
            Err(LibraryRepositoryError::UserAlreadyExists(username)) => {
                tracing::info!("User {} already registered", username)
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to register {}", user.username))
            }
        }
    }

    Ok(repositories)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_telemetry(&settings.service_name)?;
    tracing::info!(
        "starting HTTP server at http://{}:{}",
        settings.host,
        settings.port
    );

    let repositories = init_repositories(&settings).await?;
    let pagination = settings.pagination();

    HttpServer::new(move || {
        App::new()
            .wrap_api()
            .app_data(web::Data::new(repositories.books.clone()))
            .app_data(web::Data::new(repositories.reading_sessions.clone()))
            .app_data(web::Data::new(repositories.users.clone()))
            .app_data(web::Data::new(pagination))
            .app_data(json_config())
            .app_data(query_config())
            .app_data(path_config())
            .wrap(TracingLogger::default())
            .configure(config_app)
            .with_json_spec_at("/apispec/v2")
            .build()
    })
    .bind((settings.host.as_str(), settings.port))?
    .run()
    .await?;

    Ok(())
}
