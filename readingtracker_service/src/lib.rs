pub mod api;

#[cfg(any(feature = "client", test))]
pub mod client;

#[cfg(any(feature = "server", test))]
pub mod app_config;
#[cfg(any(feature = "server", test))]
pub mod auth;
#[cfg(any(feature = "server", test))]
pub mod filters;
#[cfg(any(feature = "server", test))]
mod handlers;
#[cfg(any(feature = "server", test))]
pub mod library_repository;
#[cfg(any(feature = "server", test))]
pub mod pagination;
#[cfg(any(feature = "server", test))]
pub mod settings;
#[cfg(any(feature = "server", test))]
pub mod validation;
