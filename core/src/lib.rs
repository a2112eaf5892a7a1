//! Donation ledger store and its data-integrity self-check.

pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod self_check;
pub mod store;
pub mod tip;
pub mod types;
