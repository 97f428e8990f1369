//! Configuration for the warband client.
//!
//! Settings persist to disk as RON files, can be overridden from the command
//! line via clap, and tolerate missing or unknown fields so that older and
//! newer config files keep loading.

#![warn(missing_docs)]

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE_NAME, Config, DebugConfig, HttpConfig, NetworkConfig, TransportKind,
    default_config_dir,
};
pub use error::ConfigError;
