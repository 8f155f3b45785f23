//! Packet capture
//!
//! This module provides:
//! - [`Packet`], the five header fields the graph is built from
//! - [`CaptureMode`], the three mutually exclusive acquisition modes
//! - [`PacketSource`], the collaborator interface the ingestion loop pulls from
//! - [`TsharkSource`], a `tshark` subprocess implementing all three modes

mod tshark;

pub use tshark::TsharkSource;

use crate::config::RingConfig;
use crate::error::{PciError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// Header summary of one captured packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source: String,
    pub destination: String,
    /// Highest-layer protocol label, e.g. "TCP", "DNS", "ARP"
    pub protocol: String,
    pub length: u32,
    pub info: String,
}

impl Packet {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        protocol: impl Into<String>,
        length: u32,
        info: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            protocol: protocol.into(),
            length,
            info: info.into(),
        }
    }

    /// Parse a tab-separated record: source, destination, protocol, length, info.
    ///
    /// Info may be missing or contain tabs of its own. A record without source,
    /// destination or protocol, or with a non-numeric length, is rejected.
    pub fn from_record(record: &str) -> Result<Self> {
        let record = record.trim_end_matches(['\r', '\n']);
        let mut fields = record.splitn(5, '\t');

        let mut required = |name: &str| -> Result<String> {
            match fields.next().map(str::trim) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => Err(PciError::CaptureSource(format!(
                    "Missing {} in record {:?}",
                    name, record
                ))),
            }
        };

        let source = required("source")?;
        let destination = required("destination")?;
        let protocol = required("protocol")?;
        let raw_length = required("length")?;
        let info = fields.next().unwrap_or("").trim().to_string();

        let length = raw_length.parse().map_err(|_| {
            PciError::CaptureSource(format!(
                "Invalid length {:?} in record {:?}",
                raw_length, record
            ))
        })?;

        Ok(Self {
            source,
            destination,
            protocol,
            length,
            info,
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {} --> {} ({}) - {}",
            self.protocol, self.source, self.destination, self.length, self.info
        )
    }
}

/// Where packets come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureMode {
    /// Replay a stored capture file; finite
    File { path: PathBuf },
    /// Sniff an interface continuously
    Live { interface: String },
    /// Sniff an interface continuously, keeping a rotating set of capture files
    Ring { interface: String, ring: RingConfig },
}

impl CaptureMode {
    /// Build the mode from the command line selectors.
    ///
    /// `Ok(None)` when nothing was selected. File and interface are mutually
    /// exclusive and ring mode needs an interface.
    pub fn from_selection(
        file: Option<PathBuf>,
        interface: Option<String>,
        ring: bool,
        ring_config: &RingConfig,
    ) -> Result<Option<Self>> {
        match (file, interface, ring) {
            (Some(_), Some(_), _) => Err(PciError::CaptureMode(
                "a capture file and an interface cannot be used together".to_string(),
            )),
            (Some(_), None, true) => Err(PciError::CaptureMode(
                "ring buffer capture needs an interface, not a file".to_string(),
            )),
            (None, None, true) => Err(PciError::CaptureMode(
                "ring buffer capture needs an interface".to_string(),
            )),
            (Some(path), None, false) => Ok(Some(CaptureMode::File { path })),
            (None, Some(interface), true) => Ok(Some(CaptureMode::Ring {
                interface,
                ring: ring_config.clone(),
            })),
            (None, Some(interface), false) => Ok(Some(CaptureMode::Live { interface })),
            (None, None, false) => Ok(None),
        }
    }

    /// Short mode name used in logs and the run ledger
    pub fn name(&self) -> &'static str {
        match self {
            CaptureMode::File { .. } => "file",
            CaptureMode::Live { .. } => "live",
            CaptureMode::Ring { .. } => "ring",
        }
    }

    /// File path or interface name
    pub fn target(&self) -> String {
        match self {
            CaptureMode::File { path } => path.display().to_string(),
            CaptureMode::Live { interface } | CaptureMode::Ring { interface, .. } => {
                interface.clone()
            }
        }
    }

    /// Only file replay reaches a natural end of stream
    pub fn is_bounded(&self) -> bool {
        matches!(self, CaptureMode::File { .. })
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::File { path } => write!(f, "pcap analysis on {}", path.display()),
            CaptureMode::Live { interface } => write!(f, "Live Capture on {}", interface),
            CaptureMode::Ring { interface, ring } => write!(
                f,
                "Live Ring Capture on {} ({} x {} kB in {})",
                interface,
                ring.files,
                ring.file_size_kb,
                ring.path.display()
            ),
        }
    }
}

/// Capture collaborator: a sequence of packets
#[async_trait]
pub trait PacketSource: Send {
    /// Next packet in capture order.
    ///
    /// `Ok(None)` is end of stream. `Err(CaptureSource)` means one record was
    /// unusable and the source can still be read; any other error means the
    /// source itself failed.
    async fn next_packet(&mut self) -> Result<Option<Packet>>;

    /// Stop capturing and release the underlying resources
    async fn close(&mut self) -> Result<()>;
}
