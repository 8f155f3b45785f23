//! pci - Packet Communications Investigator
//!
//! Reads packets from tshark and builds a graph of the hosts that talk to each
//! other: one node per observed address, enriched with reverse DNS and
//! geolocation for public IPv4 machines, and one edge per protocol seen between
//! an ordered pair of nodes. The graph lives in SQLite.

pub mod capture;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod storage;

pub use error::{PciError, Result};
