//! Storage layer for pci
//!
//! SQLite-backed implementation of the graph store

pub mod database;

pub use database::{Database, DbPool};
