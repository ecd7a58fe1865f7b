pub mod app_state;
pub mod http_error;
pub mod routes;
