pub mod catalog;
pub mod config;
pub mod ingest;
pub mod model;
pub mod processing;
pub mod store;
pub mod streaming;
