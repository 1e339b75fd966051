//! Reviewer invoice utility library
//!
//! Fetches the monthly reviewer invoice from Devman, writes a Google
//! spreadsheet per reviewer and sends each reviewer its link on Telegram.

pub mod config;
pub mod error;
pub mod helpers;
pub mod models;
pub mod service;

pub use config::Config;
pub use service::{ReportService, ReportSettings, ReviewerOutcome, ReviewerReport, SkipReason};

// Re-export key types for convenience
pub use models::invoice::{Invoice, RowSet};
