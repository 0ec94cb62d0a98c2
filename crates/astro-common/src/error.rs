//! Error types shared by the Astro crates
//!
//! Errors carry structured context (the config file, or the helper that
//! failed) so a failure can be traced without re-running with debug logging.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for shared Astro operations
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or parsed
    #[error("config error{}: {message}", fmt_path(.path))]
    Config {
        /// Description of what failed
        message: String,
        /// The config file involved, if any
        path: Option<PathBuf>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client")
        context: String,
    },
}

fn fmt_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" [{}]", p.display()))
        .unwrap_or_default()
}

impl Error {
    /// Create a config error without a file path
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            path: None,
        }
    }

    /// Create a config error tied to a specific file
    pub fn config_at(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            path: Some(path.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }
}
