//! CLI argument definitions and parsing
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pci",
    version,
    about = "Build a graph of communicating hosts from captured packets",
    long_about = "pci reads packets from a capture file, a live interface or a ring-buffered live \
                  capture and records every observed address as a graph node, with one \
                  protocol-typed edge per communicating pair. Public IPv4 addresses are enriched \
                  with reverse DNS and GeoLite2 geolocation."
)]
pub struct Cli {
    /// Replay a stored capture file
    #[arg(short, long, value_name = "PATH", conflicts_with = "interface")]
    pub file: Option<PathBuf>,

    /// Capture live on a network interface
    #[arg(short, long, value_name = "NAME")]
    pub interface: Option<String>,

    /// Keep a rotating ring of capture files while sniffing the interface
    #[arg(short, long, requires = "interface")]
    pub ring: bool,

    /// Config file path (defaults to ~/.config/pci/config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Write the default configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    pub write_default_config: Option<PathBuf>,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// True when a capture mode was selected
    pub fn has_mode(&self) -> bool {
        self.file.is_some() || self.interface.is_some()
    }
}
