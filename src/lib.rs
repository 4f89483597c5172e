pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod history;
pub mod ipc;
pub mod launcher;
pub mod scheduler;
pub mod settings;
pub mod snapshot;
pub mod utils;

pub use crate::core::{CoreEvent, DownloaderCore};
pub use crate::error::{DownloaderError, Result};
