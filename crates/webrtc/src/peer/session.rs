//! Per-stream negotiation session
//!
//! One [`PeerSession`] aggregates everything the orchestrator tracks for a
//! stream id: the negotiation engine, the SDP state machine, the buffer of
//! ICE candidates that arrived before the remote description, the data
//! channel and its reassembly state, the statistics snapshot and the cached
//! command used to replay the session after a recovery.

use super::engine::{
    DataChannelHandle, IceCandidate, PeerConnectionEngine, SdpType, SessionDescription,
    SessionRole,
};
use crate::channels::DataChannelMessenger;
use crate::protocol::{PlayParams, PublishParams};
use crate::stats::StreamStats;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// SDP negotiation status of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SdpStatus {
    #[default]
    Idle,
    LocalOfferCreated,
    RemoteOfferReceived,
    RemoteDescriptionSet,
    LocalAnswerCreated,
    LocalDescriptionSet,
    Negotiating,
    Active,
    Closed,
}

/// The command that created this session, kept for replay on recovery
#[derive(Debug, Clone)]
pub enum ReplayCommand {
    Publish(PublishParams),
    Play(PlayParams),
}

/// Negotiation state guarded by one lock, so candidate application is
/// always ordered relative to remote-description acceptance.
#[derive(Debug, Default)]
struct Negotiation {
    status: SdpStatus,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    /// Server-provided mapping from SDP track ids to application track ids
    id_mapping: HashMap<String, String>,
}

/// What happened to an inbound candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Buffered,
    Rejected,
}

/// Per-stream session aggregate
pub struct PeerSession {
    pub stream_id: String,
    pub role: SessionRole,
    engine: Arc<dyn PeerConnectionEngine>,
    negotiation: Mutex<Negotiation>,
    data_channel: Mutex<Option<Arc<dyn DataChannelHandle>>>,
    messenger: Mutex<DataChannelMessenger>,
    stats: Mutex<StreamStats>,
    stats_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    replay: parking_lot::Mutex<Option<ReplayCommand>>,
    allowed_transports: Vec<String>,
}

impl PeerSession {
    pub fn new(
        stream_id: &str,
        role: SessionRole,
        engine: Arc<dyn PeerConnectionEngine>,
        allowed_transports: Vec<String>,
    ) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            role,
            engine,
            negotiation: Mutex::new(Negotiation {
                status: SdpStatus::Idle,
                ..Default::default()
            }),
            data_channel: Mutex::new(None),
            messenger: Mutex::new(DataChannelMessenger::new()),
            stats: Mutex::new(StreamStats::new(stream_id)),
            stats_task: parking_lot::Mutex::new(None),
            replay: parking_lot::Mutex::new(None),
            allowed_transports,
        }
    }

    pub fn engine(&self) -> &Arc<dyn PeerConnectionEngine> {
        &self.engine
    }

    pub async fn sdp_status(&self) -> SdpStatus {
        self.negotiation.lock().await.status
    }

    /// Cache the command to reissue if this session is recovered
    pub fn cache_replay(&self, command: ReplayCommand) {
        *self.replay.lock() = Some(command);
    }

    pub fn replay_command(&self) -> Option<ReplayCommand> {
        self.replay.lock().clone()
    }

    /// Record the id mapping delivered with a remote configuration
    pub async fn set_id_mapping(&self, mapping: HashMap<String, String>) {
        self.negotiation.lock().await.id_mapping = mapping;
    }

    /// Resolve a remote track against the recorded id mapping
    pub async fn resolve_track_id(&self, key: &str) -> Option<String> {
        self.negotiation.lock().await.id_mapping.get(key).cloned()
    }

    /// Create the local offer, set it locally and hand it back for
    /// transmission. A set failure is fatal for this session only.
    pub async fn create_local_offer(&self) -> Result<SessionDescription> {
        let desc = self.engine.create_offer().await?;
        {
            let mut neg = self.negotiation.lock().await;
            neg.status = SdpStatus::LocalOfferCreated;
        }
        self.set_local_description(desc).await
    }

    /// Create the local answer, set it locally and hand it back for
    /// transmission.
    pub async fn create_local_answer(&self) -> Result<SessionDescription> {
        let desc = self.engine.create_answer().await?;
        {
            let mut neg = self.negotiation.lock().await;
            neg.status = SdpStatus::LocalAnswerCreated;
        }
        self.set_local_description(desc).await
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<SessionDescription> {
        match self.engine.set_local_description(&desc).await {
            Ok(()) => {
                let mut neg = self.negotiation.lock().await;
                neg.status = SdpStatus::LocalDescriptionSet;
                debug!(
                    "Set local description successfully for stream {}",
                    self.stream_id
                );
                Ok(desc)
            }
            Err(e) => {
                error!(
                    "Cannot set local description for stream {}: {}",
                    self.stream_id, e
                );
                Err(e)
            }
        }
    }

    /// Apply a remote configuration message.
    ///
    /// On success the buffered candidates are applied in arrival order and
    /// the buffer is cleared; they are never re-buffered afterwards.
    /// Returns true when the remote description was an offer, in which case
    /// the caller creates and transmits an answer.
    pub async fn accept_remote_description(&self, desc: &SessionDescription) -> Result<bool> {
        let is_offer = desc.sdp_type == SdpType::Offer;

        {
            let mut neg = self.negotiation.lock().await;
            if is_offer {
                neg.status = SdpStatus::RemoteOfferReceived;
            } else {
                neg.status = SdpStatus::Negotiating;
            }
        }

        self.engine.set_remote_description(desc).await?;

        let buffered = {
            let mut neg = self.negotiation.lock().await;
            neg.remote_description_set = true;
            neg.status = if is_offer {
                SdpStatus::RemoteDescriptionSet
            } else {
                SdpStatus::Active
            };
            std::mem::take(&mut neg.pending_candidates)
        };

        debug!(
            "Ice candidate list size to be added for stream {}: {}",
            self.stream_id,
            buffered.len()
        );
        for candidate in buffered {
            self.apply_candidate(&candidate).await;
        }

        Ok(is_offer)
    }

    /// Mark the session active once the local answer has been transmitted
    pub async fn mark_active(&self) {
        let mut neg = self.negotiation.lock().await;
        if neg.status != SdpStatus::Closed {
            neg.status = SdpStatus::Active;
        }
    }

    /// Handle one inbound candidate: apply it when the remote description
    /// is set, buffer it otherwise. Filtering applies in both cases.
    pub async fn take_candidate(&self, candidate: IceCandidate) -> CandidateDisposition {
        if !is_candidate_allowed(&candidate, &self.allowed_transports) {
            return CandidateDisposition::Rejected;
        }

        let mut neg = self.negotiation.lock().await;
        if neg.remote_description_set {
            drop(neg);
            self.apply_candidate(&candidate).await;
            CandidateDisposition::Applied
        } else {
            debug!(
                "Ice candidate is buffered for stream {} because remote description is not set yet",
                self.stream_id
            );
            neg.pending_candidates.push(candidate);
            CandidateDisposition::Buffered
        }
    }

    async fn apply_candidate(&self, candidate: &IceCandidate) {
        if let Err(e) = self.engine.add_ice_candidate(candidate).await {
            error!(
                "Ice candidate cannot be added for stream {}: {}",
                self.stream_id, e
            );
        }
    }

    /// Number of candidates waiting for the remote description
    pub async fn buffered_candidates(&self) -> usize {
        self.negotiation.lock().await.pending_candidates.len()
    }

    pub fn is_candidate_allowed(&self, candidate: &IceCandidate) -> bool {
        is_candidate_allowed(candidate, &self.allowed_transports)
    }

    pub async fn set_data_channel(&self, channel: Arc<dyn DataChannelHandle>) {
        *self.data_channel.lock().await = Some(channel);
    }

    pub async fn data_channel(&self) -> Option<Arc<dyn DataChannelHandle>> {
        self.data_channel.lock().await.clone()
    }

    /// Feed one inbound binary frame to the reassembly state; returns the
    /// completed message when the declared size has been received.
    pub async fn accept_chunk(&self, frame: &[u8]) -> Option<Vec<u8>> {
        self.messenger.lock().await.accept_binary(frame)
    }

    /// Fold raw stats samples into this session's snapshot and return a copy
    pub async fn fold_stats(&self, samples: &[crate::stats::StatsSample]) -> StreamStats {
        let mut stats = self.stats.lock().await;
        crate::stats::StatsAggregator::fold(samples, &mut stats);
        stats.clone()
    }

    pub async fn stats_snapshot(&self) -> StreamStats {
        self.stats.lock().await.clone()
    }

    /// Install the periodic stats sampler; a second call is a no-op
    pub fn set_stats_task(&self, task: tokio::task::JoinHandle<()>) -> Result<()> {
        let mut slot = self.stats_task.lock();
        if slot.is_some() {
            task.abort();
            return Err(Error::InternalError(format!(
                "Stats sampler already running for stream {}",
                self.stream_id
            )));
        }
        *slot = Some(task);
        Ok(())
    }

    pub fn has_stats_task(&self) -> bool {
        self.stats_task.lock().is_some()
    }

    /// Stop the periodic stats sampler
    pub fn clear_stats_task(&self) {
        if let Some(task) = self.stats_task.lock().take() {
            task.abort();
        }
    }

    /// Close this session: stop the sampler, close the data channel and the
    /// engine, drop the candidate buffer. Safe to call more than once.
    pub async fn close(&self) {
        self.clear_stats_task();

        if let Some(channel) = self.data_channel.lock().await.take() {
            if let Err(e) = channel.close().await {
                warn!(
                    "Error closing data channel for stream {}: {}",
                    self.stream_id, e
                );
            }
        }

        {
            let mut neg = self.negotiation.lock().await;
            neg.status = SdpStatus::Closed;
            neg.pending_candidates.clear();
            neg.remote_description_set = false;
        }

        if let Err(e) = self.engine.close().await {
            warn!("Error closing engine for stream {}: {}", self.stream_id, e);
        }
    }
}

/// Candidate filtering policy.
///
/// A candidate is accepted when its payload is empty (end-of-candidates
/// marker), its declared transport is in the allowed set, or the transport
/// is undetermined but an allowed protocol name appears in the candidate
/// text.
pub fn is_candidate_allowed(candidate: &IceCandidate, allowed: &[String]) -> bool {
    if candidate.is_end_of_candidates() {
        return true;
    }
    match &candidate.protocol {
        Some(protocol) => allowed
            .iter()
            .any(|a| a.eq_ignore_ascii_case(protocol.as_str())),
        None => {
            let text = candidate.candidate.to_lowercase();
            allowed.iter().any(|a| text.contains(a.as_str()))
        }
    }
}
