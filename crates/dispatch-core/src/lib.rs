// Library root: re-exports all modules so the CLI and integration tests can
// reach the crate's public API.

pub mod app;
pub mod config;
pub mod db;
pub mod notify;
pub mod protocol;
pub mod routing;
pub mod shipping;
pub mod ws_server;
