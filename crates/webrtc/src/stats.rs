//! Delta-based statistics aggregation
//!
//! Raw per-sample reports from the negotiation engine are folded into one
//! [`StreamStats`] snapshot per stream. Cumulative counters keep their
//! first and previous values so lifetime-average and instantaneous rates
//! can be derived on demand.

use serde::{Deserialize, Serialize};

/// One raw report entry, in the W3C camelCase shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsSample {
    /// Report kind: "inbound-rtp", "outbound-rtp", "remote-inbound-rtp",
    /// "track", "media-source" or "candidate-pair"
    #[serde(rename = "type")]
    pub sample_type: String,
    /// "audio" or "video" where applicable
    pub kind: Option<String>,
    /// Sample timestamp in milliseconds
    pub timestamp: Option<f64>,
    pub bytes_received: Option<u64>,
    pub bytes_sent: Option<u64>,
    pub packets_lost: Option<i64>,
    pub packets_sent: Option<u64>,
    pub packets_received: Option<u64>,
    pub fraction_lost: Option<f64>,
    pub jitter: Option<f64>,
    pub round_trip_time: Option<f64>,
    pub current_round_trip_time: Option<f64>,
    pub frames_encoded: Option<u64>,
    pub frames_decoded: Option<u64>,
    pub frames_dropped: Option<u64>,
    pub frames_received: Option<u64>,
    pub frames_per_second: Option<f64>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub audio_level: Option<f64>,
    pub quality_limitation_reason: Option<String>,
    pub available_outgoing_bitrate: Option<f64>,
    /// Candidate-pair state; rates are read from succeeded pairs only
    pub state: Option<String>,
    pub jitter_buffer_delay: Option<f64>,
    pub jitter_buffer_emitted_count: Option<u64>,
    pub track_identifier: Option<String>,
}

/// Per-stream statistics snapshot
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub stream_id: String,

    pub total_bytes_received: u64,
    pub first_bytes_received: u64,
    pub last_bytes_received: u64,

    pub total_bytes_sent: u64,
    pub first_bytes_sent: u64,
    pub last_bytes_sent: u64,

    pub total_frames_encoded: u64,
    pub last_frames_encoded: u64,

    /// Monotonically increasing sample timestamp (ms)
    pub current_timestamp: f64,
    pub last_time: f64,
    /// Latched to the first timestamp minus one
    pub start_time: f64,

    pub video_packets_lost: i64,
    pub audio_packets_lost: i64,
    pub fraction_lost: f64,

    pub video_packets_sent: u64,
    pub audio_packets_sent: u64,
    pub video_packets_received: u64,
    pub audio_packets_received: u64,

    pub audio_level: f64,
    pub quality_limitation_reason: String,

    /// Source resolution and rate, from media-source reports
    pub res_width: u32,
    pub res_height: u32,
    pub src_fps: f64,

    /// Encoded/decoded frame dimensions
    pub frame_width: u32,
    pub frame_height: u32,

    pub video_round_trip_time: f64,
    pub audio_round_trip_time: f64,
    pub current_round_trip_time: f64,

    pub video_jitter: f64,
    pub audio_jitter: f64,

    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub frames_received: u64,

    pub audio_jitter_average_delay: f64,
    pub video_jitter_average_delay: f64,

    /// kbps, from the succeeded candidate pair
    pub available_outgoing_bitrate: f64,
}

impl StreamStats {
    pub fn new(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            ..Default::default()
        }
    }

    /// Advance the sample timestamp. The start time is latched one
    /// millisecond before the first sample so lifetime averages never
    /// divide by zero.
    pub fn set_current_time(&mut self, timestamp: f64) {
        self.last_time = self.current_timestamp;
        self.current_timestamp = timestamp;
        if self.start_time == 0.0 {
            self.start_time = timestamp - 1.0;
        }
    }

    pub fn set_total_bytes_received(&mut self, bytes: u64) {
        self.last_bytes_received = self.total_bytes_received;
        self.total_bytes_received = bytes;
        if self.first_bytes_received == 0 {
            self.first_bytes_received = bytes;
        }
    }

    pub fn set_total_bytes_sent(&mut self, bytes: u64) {
        self.last_bytes_sent = self.total_bytes_sent;
        self.total_bytes_sent = bytes;
        if self.first_bytes_sent == 0 {
            self.first_bytes_sent = bytes;
        }
    }

    pub fn set_total_frames_encoded(&mut self, frames: u64) {
        self.last_frames_encoded = self.total_frames_encoded;
        self.total_frames_encoded = frames;
        if self.last_frames_encoded == 0 {
            self.last_frames_encoded = frames;
        }
    }

    /// Lifetime-average outgoing bitrate in kbps
    pub fn average_outgoing_bitrate(&self) -> i64 {
        self.rate(
            self.total_bytes_sent,
            self.first_bytes_sent,
            self.start_time,
        )
    }

    /// Lifetime-average incoming bitrate in kbps
    pub fn average_incoming_bitrate(&self) -> i64 {
        self.rate(
            self.total_bytes_received,
            self.first_bytes_received,
            self.start_time,
        )
    }

    /// Instantaneous outgoing bitrate in kbps
    pub fn current_outgoing_bitrate(&self) -> i64 {
        self.rate(self.total_bytes_sent, self.last_bytes_sent, self.last_time)
    }

    /// Instantaneous incoming bitrate in kbps
    pub fn current_incoming_bitrate(&self) -> i64 {
        self.rate(
            self.total_bytes_received,
            self.last_bytes_received,
            self.last_time,
        )
    }

    /// Instantaneous encoder frame rate
    pub fn current_fps(&self) -> f64 {
        let elapsed = self.current_timestamp - self.last_time;
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.total_frames_encoded.saturating_sub(self.last_frames_encoded) as f64 / elapsed
            * 1000.0
    }

    fn rate(&self, cumulative: u64, reference: u64, since: f64) -> i64 {
        let elapsed = self.current_timestamp - since;
        if elapsed <= 0.0 {
            return 0;
        }
        (8.0 * cumulative.saturating_sub(reference) as f64 / elapsed).floor() as i64
    }
}

/// Folds raw report entries into a [`StreamStats`] snapshot
pub struct StatsAggregator;

impl StatsAggregator {
    /// Classify the report entries by kind and fold the relevant counters
    /// into the snapshot.
    pub fn fold(samples: &[StatsSample], stats: &mut StreamStats) {
        let mut bytes_received: Option<u64> = None;
        let mut bytes_sent: Option<u64> = None;
        let mut frames_encoded: Option<u64> = None;
        let mut timestamp: Option<f64> = None;
        let mut fraction_lost: Option<f64> = None;

        for sample in samples {
            let kind = sample.kind.as_deref();
            match sample.sample_type.as_str() {
                "inbound-rtp" => {
                    if let Some(v) = sample.bytes_received {
                        *bytes_received.get_or_insert(0) += v;
                    }
                    if let Some(ts) = sample.timestamp {
                        timestamp = Some(ts);
                    }
                    if let Some(v) = sample.fraction_lost {
                        *fraction_lost.get_or_insert(0.0) += v;
                    }
                    match kind {
                        Some("audio") => {
                            if let Some(v) = sample.packets_lost {
                                stats.audio_packets_lost = v;
                            }
                            if let Some(v) = sample.jitter {
                                stats.audio_jitter = v;
                            }
                            if let Some(v) = sample.packets_received {
                                stats.audio_packets_received = v;
                            }
                        }
                        Some("video") => {
                            if let Some(v) = sample.packets_lost {
                                stats.video_packets_lost = v;
                            }
                            if let Some(v) = sample.jitter {
                                stats.video_jitter = v;
                            }
                            if let Some(v) = sample.packets_received {
                                stats.video_packets_received = v;
                            }
                        }
                        _ => {}
                    }
                    if let Some(v) = sample.frame_width {
                        stats.frame_width = v;
                    }
                    if let Some(v) = sample.frame_height {
                        stats.frame_height = v;
                    }
                    if let Some(v) = sample.frames_decoded {
                        stats.frames_decoded = v;
                    }
                    if let Some(v) = sample.frames_dropped {
                        stats.frames_dropped = v;
                    }
                    if let Some(v) = sample.frames_received {
                        stats.frames_received = v;
                    }
                }
                "outbound-rtp" => {
                    if let Some(v) = sample.bytes_sent {
                        *bytes_sent.get_or_insert(0) += v;
                    }
                    if let Some(ts) = sample.timestamp {
                        timestamp = Some(ts);
                    }
                    if let Some(reason) = &sample.quality_limitation_reason {
                        stats.quality_limitation_reason = reason.clone();
                    }
                    if let Some(v) = sample.frames_encoded {
                        *frames_encoded.get_or_insert(0) += v;
                    }
                    match kind {
                        Some("audio") => {
                            if let Some(v) = sample.packets_sent {
                                stats.audio_packets_sent = v;
                            }
                        }
                        Some("video") => {
                            if let Some(v) = sample.packets_sent {
                                stats.video_packets_sent = v;
                            }
                            if let Some(v) = sample.frame_width {
                                stats.frame_width = v;
                            }
                            if let Some(v) = sample.frame_height {
                                stats.frame_height = v;
                            }
                        }
                        _ => {}
                    }
                }
                "remote-inbound-rtp" => match kind {
                    Some("audio") => {
                        if let Some(v) = sample.packets_lost {
                            stats.audio_packets_lost = v;
                        }
                        if let Some(v) = sample.round_trip_time {
                            stats.audio_round_trip_time = v;
                        }
                        if let Some(v) = sample.jitter {
                            stats.audio_jitter = v;
                        }
                    }
                    Some("video") => {
                        if let Some(v) = sample.packets_lost {
                            stats.video_packets_lost = v;
                        }
                        if let Some(v) = sample.round_trip_time {
                            stats.video_round_trip_time = v;
                        }
                        if let Some(v) = sample.jitter {
                            stats.video_jitter = v;
                        }
                    }
                    _ => {}
                },
                "track" => match kind {
                    Some("audio") => {
                        if let Some(v) = sample.audio_level {
                            stats.audio_level = v;
                        }
                        if let (Some(delay), Some(count)) =
                            (sample.jitter_buffer_delay, sample.jitter_buffer_emitted_count)
                        {
                            if count > 0 {
                                stats.audio_jitter_average_delay = delay / count as f64;
                            }
                        }
                    }
                    Some("video") => {
                        if let Some(v) = sample.frame_width {
                            stats.frame_width = v;
                        }
                        if let Some(v) = sample.frame_height {
                            stats.frame_height = v;
                        }
                        if let Some(v) = sample.frames_decoded {
                            stats.frames_decoded = v;
                        }
                        if let Some(v) = sample.frames_dropped {
                            stats.frames_dropped = v;
                        }
                        if let Some(v) = sample.frames_received {
                            stats.frames_received = v;
                        }
                        if let (Some(delay), Some(count)) =
                            (sample.jitter_buffer_delay, sample.jitter_buffer_emitted_count)
                        {
                            if count > 0 {
                                stats.video_jitter_average_delay = delay / count as f64;
                            }
                        }
                    }
                    _ => {}
                },
                "media-source" => {
                    if kind == Some("video") {
                        if let Some(v) = sample.width {
                            stats.res_width = v;
                        }
                        if let Some(v) = sample.height {
                            stats.res_height = v;
                        }
                        if let Some(v) = sample.frames_per_second {
                            stats.src_fps = v;
                        }
                    }
                }
                "candidate-pair" => {
                    if sample.state.as_deref() == Some("succeeded") {
                        if let Some(v) = sample.available_outgoing_bitrate {
                            stats.available_outgoing_bitrate = v / 1000.0;
                        }
                        if let Some(v) = sample.current_round_trip_time {
                            stats.current_round_trip_time = v;
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(ts) = timestamp {
            stats.set_current_time(ts);
        }
        if let Some(v) = bytes_received {
            stats.set_total_bytes_received(v);
        }
        if let Some(v) = bytes_sent {
            stats.set_total_bytes_sent(v);
        }
        if let Some(v) = frames_encoded {
            stats.set_total_frames_encoded(v);
        }
        if let Some(v) = fraction_lost {
            stats.fraction_lost = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(ts: f64, bytes: u64) -> StatsSample {
        StatsSample {
            sample_type: "inbound-rtp".to_string(),
            kind: Some("video".to_string()),
            timestamp: Some(ts),
            bytes_received: Some(bytes),
            ..Default::default()
        }
    }

    fn outbound(ts: f64, bytes: u64, frames: u64) -> StatsSample {
        StatsSample {
            sample_type: "outbound-rtp".to_string(),
            kind: Some("video".to_string()),
            timestamp: Some(ts),
            bytes_sent: Some(bytes),
            frames_encoded: Some(frames),
            ..Default::default()
        }
    }

    #[test]
    fn test_incoming_bitrate_delta() {
        let mut stats = StreamStats::new("s1");
        StatsAggregator::fold(&[inbound(0.0, 1000)], &mut stats);
        StatsAggregator::fold(&[inbound(1000.0, 2000)], &mut stats);

        assert_eq!(stats.current_incoming_bitrate(), 8);
    }

    #[test]
    fn test_average_uses_start_time_latch() {
        let mut stats = StreamStats::new("s1");
        StatsAggregator::fold(&[inbound(0.0, 1000)], &mut stats);
        // start_time latched to -1, so the first average never divides by 0
        assert_eq!(stats.start_time, -1.0);
        StatsAggregator::fold(&[inbound(1000.0, 2000)], &mut stats);
        // floor(8 * 1000 / 1001)
        assert_eq!(stats.average_incoming_bitrate(), 7);
    }

    #[test]
    fn test_first_value_latched_once() {
        let mut stats = StreamStats::new("s1");
        StatsAggregator::fold(&[inbound(0.0, 500)], &mut stats);
        StatsAggregator::fold(&[inbound(1000.0, 900)], &mut stats);
        StatsAggregator::fold(&[inbound(2000.0, 1400)], &mut stats);

        assert_eq!(stats.first_bytes_received, 500);
        assert_eq!(stats.last_bytes_received, 900);
        assert_eq!(stats.total_bytes_received, 1400);
    }

    #[test]
    fn test_current_fps() {
        let mut stats = StreamStats::new("s1");
        StatsAggregator::fold(&[outbound(0.0, 0, 0)], &mut stats);
        // The first non-zero frame count is latched, suppressing the
        // initial delta.
        StatsAggregator::fold(&[outbound(1000.0, 8000, 30)], &mut stats);
        assert!((stats.current_fps() - 0.0).abs() < f64::EPSILON);

        StatsAggregator::fold(&[outbound(2000.0, 16000, 60)], &mut stats);
        assert!((stats.current_fps() - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rates_zero_with_single_sample() {
        let mut stats = StreamStats::new("s1");
        StatsAggregator::fold(&[inbound(0.0, 1000)], &mut stats);
        assert_eq!(stats.current_incoming_bitrate(), 0);
    }

    #[test]
    fn test_remote_inbound_split_by_kind() {
        let mut stats = StreamStats::new("s1");
        let samples = vec![
            StatsSample {
                sample_type: "remote-inbound-rtp".to_string(),
                kind: Some("video".to_string()),
                packets_lost: Some(7),
                round_trip_time: Some(0.05),
                ..Default::default()
            },
            StatsSample {
                sample_type: "remote-inbound-rtp".to_string(),
                kind: Some("audio".to_string()),
                packets_lost: Some(3),
                jitter: Some(0.01),
                ..Default::default()
            },
        ];
        StatsAggregator::fold(&samples, &mut stats);

        assert_eq!(stats.video_packets_lost, 7);
        assert_eq!(stats.audio_packets_lost, 3);
        assert!((stats.video_round_trip_time - 0.05).abs() < f64::EPSILON);
        assert!((stats.audio_jitter - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn test_candidate_pair_requires_succeeded_state() {
        let mut stats = StreamStats::new("s1");
        let mut sample = StatsSample {
            sample_type: "candidate-pair".to_string(),
            state: Some("in-progress".to_string()),
            available_outgoing_bitrate: Some(2_000_000.0),
            ..Default::default()
        };
        StatsAggregator::fold(std::slice::from_ref(&sample), &mut stats);
        assert_eq!(stats.available_outgoing_bitrate, 0.0);

        sample.state = Some("succeeded".to_string());
        StatsAggregator::fold(&[sample], &mut stats);
        assert_eq!(stats.available_outgoing_bitrate, 2000.0);
    }

    #[test]
    fn test_media_source_dimensions() {
        let mut stats = StreamStats::new("s1");
        let sample = StatsSample {
            sample_type: "media-source".to_string(),
            kind: Some("video".to_string()),
            width: Some(1280),
            height: Some(720),
            frames_per_second: Some(30.0),
            ..Default::default()
        };
        StatsAggregator::fold(&[sample], &mut stats);

        assert_eq!(stats.res_width, 1280);
        assert_eq!(stats.res_height, 720);
        assert!((stats.src_fps - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sample_parses_camel_case() {
        let sample: StatsSample = serde_json::from_str(
            r#"{"type":"inbound-rtp","kind":"audio","bytesReceived":42,"packetsLost":1,"jitter":0.002}"#,
        )
        .unwrap();
        assert_eq!(sample.sample_type, "inbound-rtp");
        assert_eq!(sample.bytes_received, Some(42));
        assert_eq!(sample.packets_lost, Some(1));
    }
}
