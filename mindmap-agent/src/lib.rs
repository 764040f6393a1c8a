// Library root: re-exports all modules so integration tests and the binary
// share the crate's public API.

pub mod app;
pub mod broadcast;
pub mod config;
pub mod llm;
pub mod mindmap;
pub mod protocol;
pub mod session;
pub mod ws_server;
