pub mod chain;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod db;
pub mod http;
pub mod log;
pub mod models;
pub mod notify;
pub mod scan;

pub use crate::chain::{ChainError, ChainSource};
pub use crate::db::init_db;
pub use crate::scan::{ScanEngine, ScanError, ScanTask};
