//! Durable derivative ledger.
//!
//! This crate provides:
//! - One row per (source asset, profile, kind) with uniqueness enforced
//!   by the schema
//! - The atomic claim protocol: a single conditional bulk update that
//!   grants exactly one worker ownership of a job's rows
//! - Field-level partial updates for every mutation (never full-row
//!   replace), safe under concurrent writers

pub mod error;
pub mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use ledger::{Ledger, ERROR_TEXT_MAX};
