//! Ingestion loop
//!
//! Pulls packets from a [`PacketSource`] one at a time, feeds each through the
//! [`Pipeline`] and owns the shutdown sequence. The loop moves through
//! `Idle → Running → Draining → Stopped`; an operator signal and the natural
//! end of a capture file both lead to the same shutdown routine.

mod pipeline;
mod signals;

pub use pipeline::{PacketOutcome, Pipeline};
pub use signals::{
    spawn_signal_listener, ShutdownSignal, ShutdownToken, SignalAction, SignalHandler,
    FORCED_EXIT_CODE,
};

use crate::capture::{Packet, PacketSource};
use crate::error::PciError;
use crate::graph::{GraphStats, GraphStore, RunRecord, RunStatus};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Why the loop left `Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Operator signal
    Interrupted,
    /// Capture file fully replayed
    EndOfStream,
    /// The capture source itself broke
    SourceFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Interrupted => "interrupted",
            StopReason::EndOfStream => "end_of_stream",
            StopReason::SourceFailed => "source_failed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Packet counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Records read from the source, including malformed ones
    pub seen: u64,
    /// Packets fully applied to the graph
    pub processed: u64,
    /// Packets whose graph update failed
    pub dropped: u64,
    /// Records the source could not parse
    pub malformed: u64,
    pub edges_created: u64,
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub run: RunRecord,
    pub reason: StopReason,
    pub stats: IngestStats,
    /// Graph size at shutdown, when the store could still be read
    pub graph: Option<GraphStats>,
    /// Every state the ingestor went through, starting with `Idle`
    pub states: Vec<IngestState>,
}

impl IngestReport {
    /// Operator stop and end of file are normal completions
    pub fn is_success(&self) -> bool {
        self.reason != StopReason::SourceFailed
    }

    pub fn final_state(&self) -> IngestState {
        self.states.last().copied().unwrap_or(IngestState::Idle)
    }
}

/// Drives one capture run from start to shutdown
pub struct Ingestor {
    source: Box<dyn PacketSource>,
    pipeline: Pipeline,
    store: Arc<dyn GraphStore>,
    shutdown: ShutdownToken,
    run: RunRecord,
    states: Vec<IngestState>,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(
        source: Box<dyn PacketSource>,
        pipeline: Pipeline,
        store: Arc<dyn GraphStore>,
        shutdown: ShutdownToken,
        run: RunRecord,
    ) -> Self {
        Self {
            source,
            pipeline,
            store,
            shutdown,
            run,
            states: vec![IngestState::Idle],
            stats: IngestStats::default(),
        }
    }

    /// Process packets until interrupted or the source ends, then shut down.
    ///
    /// Consumes the ingestor so the shutdown sequence runs exactly once.
    pub async fn run(mut self) -> IngestReport {
        self.transition(IngestState::Running);
        tracing::info!(
            "Run {} started: {} capture on {}",
            self.run.id,
            self.run.mode,
            self.run.source
        );
        if let Err(e) = self.store.record_run(&self.run) {
            tracing::warn!("Failed to record run start: {}", e);
        }

        let reason = loop {
            // Shutdown wins over a ready packet; a packet in progress is never cut short
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break StopReason::Interrupted,
                next = self.source.next_packet() => next,
            };

            match next {
                Ok(Some(packet)) => self.handle(packet).await,
                Ok(None) => {
                    tracing::info!("End of capture reached");
                    break StopReason::EndOfStream;
                }
                Err(e) if e.is_packet_recoverable() => {
                    self.stats.seen += 1;
                    self.stats.malformed += 1;
                    tracing::warn!("Skipping malformed packet: {}", e);
                }
                Err(e) => {
                    tracing::error!("Capture source failed: {}", e);
                    break StopReason::SourceFailed;
                }
            }
        };

        self.transition(IngestState::Draining);
        self.drain(reason).await
    }

    fn transition(&mut self, next: IngestState) {
        if let Some(current) = self.states.last() {
            tracing::debug!("Ingestion {:?} -> {:?}", current, next);
        }
        self.states.push(next);
    }

    async fn handle(&mut self, packet: Packet) {
        self.stats.seen += 1;
        tracing::debug!("{}", packet);

        match self.pipeline.process(&packet).await {
            Ok(outcome) => {
                self.stats.processed += 1;
                if outcome.edge_created {
                    self.stats.edges_created += 1;
                }
            }
            Err(e @ PciError::StoreUnavailable(_)) | Err(e @ PciError::Database(_)) => {
                self.stats.dropped += 1;
                tracing::error!("Dropping packet {} -> {}: {}", packet.source, packet.destination, e);
            }
            Err(e) => {
                self.stats.dropped += 1;
                tracing::warn!("Dropping packet {} -> {}: {}", packet.source, packet.destination, e);
            }
        }
    }

    /// The single shutdown routine, whatever stopped the loop
    async fn drain(mut self, reason: StopReason) -> IngestReport {
        tracing::info!("Stopping capture ({})", reason);

        // A signal from here on means the operator wants out now
        self.shutdown.trigger();

        if let Err(e) = self.source.close().await {
            tracing::warn!("Failed to close capture source: {}", e);
        }

        self.pipeline.resolver().close();

        self.run.stopped_at = Some(Utc::now());
        self.run.status = RunStatus::Stopped;
        self.run.packets_seen = self.stats.seen;
        self.run.packets_dropped = self.stats.dropped + self.stats.malformed;
        self.run.stop_reason = Some(reason.as_str().to_string());
        if let Err(e) = self.store.record_run(&self.run) {
            tracing::warn!("Failed to record run end: {}", e);
        }

        tracing::info!(
            "Packets: {} seen, {} processed, {} dropped, {} malformed, {} new relationships",
            self.stats.seen,
            self.stats.processed,
            self.stats.dropped,
            self.stats.malformed,
            self.stats.edges_created
        );

        let graph = match self.store.stats() {
            Ok(stats) => {
                tracing::info!(
                    "Graph: {} local machines, {} machines, {} networks, {} IPv6 machines, {} relationships",
                    stats.local_machines,
                    stats.machines,
                    stats.networks,
                    stats.ipv6_machines,
                    stats.relationships
                );
                Some(stats)
            }
            Err(e) => {
                tracing::warn!("Failed to read graph stats: {}", e);
                None
            }
        };

        if let Err(e) = self.store.close() {
            tracing::warn!("Failed to close graph store: {}", e);
        }

        self.transition(IngestState::Stopped);
        tracing::info!("Run {} stopped", self.run.id);

        IngestReport {
            run: self.run,
            reason,
            stats: self.stats,
            graph,
            states: self.states,
        }
    }
}
