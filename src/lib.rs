#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod auth;
pub mod config;
pub mod data;
pub mod feed;
pub mod logging;
pub mod models;
pub mod notify;
pub mod query;
pub mod render;
pub mod session;
pub mod storage;
pub mod supabase;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
