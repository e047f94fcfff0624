//! Beacon Shared Types and Utilities
//!
//! Types and database helpers shared by everything that touches the user table.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
