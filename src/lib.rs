pub mod app;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod feed;
pub mod logging;
pub mod media;
pub mod merge;
pub mod multipart;
pub mod output;
pub mod parser;
pub mod pool;
pub mod retry;
pub mod store;
pub mod timezone;
pub mod watch;
