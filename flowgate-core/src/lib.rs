pub mod config;
pub mod ipc;
pub mod observability;
pub mod sanitize;
