pub mod api;
pub mod clients;
pub mod models;
pub mod outbox;
pub mod reconciler;
pub mod schema;
pub mod service;
pub mod store;
