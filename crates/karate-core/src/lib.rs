pub mod commands;
pub mod config;
pub mod features;
pub mod history;
pub mod logback;
pub mod output;
pub mod summary;
pub mod tools;
pub mod types;

pub use commands::Command;
pub use config::Config;
pub use history::HistoryStore;
pub use output::{OutputEvent, OutputReducer, OutputSink, ReducerOptions, Reduction};
pub use types::*;
