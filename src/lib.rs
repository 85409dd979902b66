pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod geo;
pub mod models;
pub mod observability;
pub mod state;
pub mod store;
