//! Track time against named tasks from a terminal and summarize it by day, week or month.
//! A single background process owns the active session and keeps its state in a small file, so
//! any shell can check on it or stop it.

pub mod cli;
pub mod context;
pub mod daemon;
pub mod error;
pub mod report;
pub mod storage;
pub mod utils;
