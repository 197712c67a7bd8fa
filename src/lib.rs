pub mod config;
pub mod db;
pub mod handlers;
pub mod hub;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod utils;

pub use state::AppState;
