#![forbid(unsafe_code)]

//! `paneflow`: plan a task into a subtask DAG and drive terminal panes until
//! every subtask settles.

pub mod agent;
pub mod config;
pub mod driver;
pub mod errors;
pub mod exit_codes;
pub mod models;
pub mod orchestrator;
pub mod profiles;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
