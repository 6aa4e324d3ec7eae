//! rustonion library crate
//!
//! Create, track and tear down Tor onion services over the control port.
//!
//! # Modules
//!
//! - [`onion`] - Port specs, keys, upload tracking, service variants, client auth
//! - [`tor`] - Control connection, HS_DESC events, hidden service configuration
//! - [`config`] - Configuration loading and validation
//! - [`cli`] - Command-line interface (up, remove, check-ports)
//! - [`error`] - Library error type

#![allow(clippy::doc_markdown)] // Doc formatting is secondary
#![allow(clippy::uninlined_format_args)] // Format string style preference
#![allow(clippy::module_name_repetitions)] // OnionError, OnionService read fine
#![allow(clippy::missing_errors_doc)] // Error variants are documented on OnionError
#![allow(clippy::must_use_candidate)] // Accessors everywhere
#![allow(clippy::format_push_string)] // Clarity over allocation
#![allow(clippy::new_without_default)] // Explicit new() is fine
#![allow(clippy::cast_precision_loss)] // Progress percentages

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod onion;
pub mod tor;

pub use error::{OnionError, Result};
pub use onion::{create_onion_service, OnionService, ServiceKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
