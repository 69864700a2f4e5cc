//! Recovery supervision: debounce, forced recovery, idempotent teardown
//!
//! All tests run with paused time, so timer math is exact.

mod harness;

use harness::{settle, Harness};
use peerstream_webrtc::peer::IceConnectionState;
use peerstream_webrtc::{PlayParams, PublishParams};
use serde_json::json;
use std::time::Duration;

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn ice_failure_republishes_exactly_once_within_window() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.publish(PublishParams::new("s1")).await.unwrap();
    settle().await;

    sleep_ms(100).await;
    h.factory
        .engine_for("s1")
        .emit_ice_state(IceConnectionState::Failed);
    settle().await;

    // Recovery check fires 500 ms after the immediate-class trigger, the
    // replay another 500 ms later. Nothing further before t = 3600 ms.
    sleep_ms(3500).await;
    settle().await;

    let publishes = h.channel.sent_named("publish");
    assert_eq!(publishes.len(), 2, "initial publish plus one replay");
    assert!(publishes.iter().all(|p| p["streamId"] == "s1"));

    assert_eq!(h.channel.sent_named("stop").len(), 1);
    assert_eq!(
        h.event_names()
            .iter()
            .filter(|n| *n == "reconnection_attempt_for_publisher")
            .count(),
        1
    );
    // The replay went through a fresh peer connection.
    assert_eq!(h.factory.create_count("s1"), 2);
}

#[tokio::test(start_paused = true)]
async fn two_triggers_inside_window_produce_one_recovery() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.publish(PublishParams::new("s1")).await.unwrap();
    settle().await;

    h.factory
        .engine_for("s1")
        .emit_ice_state(IceConnectionState::Disconnected);
    settle().await;

    sleep_ms(500).await;
    h.factory
        .engine_for("s1")
        .emit_ice_state(IceConnectionState::Disconnected);
    settle().await;

    // The single pending check fires at 3000 ms; the recovery action (stop
    // + delayed replay) runs no earlier than that.
    sleep_ms(2400).await;
    settle().await;
    assert!(h.channel.sent_named("stop").is_empty());

    sleep_ms(1600).await;
    settle().await;

    assert_eq!(h.channel.sent_named("stop").len(), 1);
    assert_eq!(h.channel.sent_named("publish").len(), 2);
    assert_eq!(
        h.event_names()
            .iter()
            .filter(|n| *n == "reconnection_attempt_for_publisher")
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn transport_closed_forces_recovery_of_healthy_sessions() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.publish(PublishParams::new("s1")).await.unwrap();
    settle().await;
    h.factory
        .engine_for("s1")
        .set_ice_state(IceConnectionState::Connected);

    h.channel.set_connected(false);
    h.channel
        .emit(peerstream_webrtc::signaling::TransportEvent::Closed);
    settle().await;

    // Forced check at 500 ms re-dials the channel, then recovers the
    // session despite its healthy ICE state.
    sleep_ms(1200).await;
    settle().await;

    assert!(
        h.channel
            .connect_calls
            .load(std::sync::atomic::Ordering::SeqCst)
            >= 1
    );
    assert_eq!(h.channel.sent_named("publish").len(), 2);
    assert!(h
        .event_names()
        .contains(&"reconnection_attempt_for_publisher".to_string()));
}

#[tokio::test(start_paused = true)]
async fn play_sessions_recover_independently() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.play(PlayParams::new("p1")).await.unwrap();
    h.adaptor.play(PlayParams::new("p2")).await.unwrap();
    settle().await;

    // Only p1 fails; p2 stays connected.
    h.factory
        .engine_for("p2")
        .set_ice_state(IceConnectionState::Connected);
    h.factory
        .engine_for("p1")
        .emit_ice_state(IceConnectionState::Failed);
    settle().await;

    sleep_ms(1200).await;
    settle().await;

    let plays = h.channel.sent_named("play");
    // Two initial plays plus the single replay of p1.
    assert_eq!(plays.len(), 3);
    assert_eq!(plays[2]["streamId"], "p1");
    assert_eq!(
        h.event_names()
            .iter()
            .filter(|n| *n == "reconnection_attempt_for_player")
            .count(),
        1
    );
    assert_eq!(h.factory.create_count("p2"), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.publish(PublishParams::new("s1")).await.unwrap();
    settle().await;

    h.adaptor.stop("s1").await.unwrap();
    h.adaptor.stop("s1").await.unwrap();
    settle().await;

    assert!(h.adaptor.sdp_status("s1").await.is_none());
    assert!(h.factory.engine_for("s1").closed.load(std::sync::atomic::Ordering::SeqCst));

    // A stopped stream is never recovered: the publish timer fires into an
    // empty registry.
    sleep_ms(4000).await;
    settle().await;
    assert_eq!(h.channel.sent_named("publish").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_stop_tears_down_peer_session_only() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.join("p2p1").await.unwrap();
    h.adaptor.publish(PublishParams::new("s1")).await.unwrap();
    settle().await;

    h.inject(json!({"command": "stop", "streamId": "p2p1"}));
    settle().await;

    assert!(h.adaptor.sdp_status("p2p1").await.is_none());
    assert!(h
        .factory
        .engine_for("p2p1")
        .closed
        .load(std::sync::atomic::Ordering::SeqCst));
    // The publish session is untouched.
    assert!(h.adaptor.sdp_status("s1").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn resource_error_closes_session_and_surfaces() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.publish(PublishParams::new("s1")).await.unwrap();
    settle().await;

    h.inject(json!({
        "command": "error",
        "definition": "no_stream_exist",
        "streamId": "s1",
    }));
    settle().await;

    assert!(h.adaptor.sdp_status("s1").await.is_none());
    assert!(h
        .factory
        .engine_for("s1")
        .closed
        .load(std::sync::atomic::Ordering::SeqCst));
    assert!(h.error_names().contains(&"server_error".to_string()));
}

#[tokio::test(start_paused = true)]
async fn server_will_stop_notification_forces_fresh_connection() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.publish(PublishParams::new("s1")).await.unwrap();
    settle().await;
    h.factory
        .engine_for("s1")
        .set_ice_state(IceConnectionState::Connected);

    h.inject(json!({
        "command": "notification",
        "definition": "server_will_stop",
    }));
    settle().await;

    // The channel was closed; the forced check at 500 ms re-dials and
    // replays the publish.
    sleep_ms(1200).await;
    settle().await;

    assert!(
        h.channel
            .connect_calls
            .load(std::sync::atomic::Ordering::SeqCst)
            >= 1
    );
    assert_eq!(h.channel.sent_named("publish").len(), 2);
}
