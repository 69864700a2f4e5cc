//! Command surface and connection lifecycle against the mock channel

mod harness;

use harness::{settle, Harness};
use peerstream_webrtc::{AdaptorConfig, IceServer, PlayParams, PublishParams};
use serde_json::json;

#[tokio::test]
async fn connected_channel_emits_initialized_and_asks_for_ice_config() {
    let h = Harness::new();
    h.connect();
    settle().await;

    assert!(h.event_names().contains(&"initialized".to_string()));
    assert_eq!(h.channel.sent_named("getIceServerConfig").len(), 1);
}

#[tokio::test]
async fn user_defined_ice_servers_skip_server_lookup() {
    let config = AdaptorConfig::new("ws://localhost:5080/app/websocket")
        .with_ice_servers(vec![IceServer::stun("stun:stun.example.com:3478")]);
    let h = Harness::with_config(config);
    h.connect();
    settle().await;

    assert!(h.channel.sent_named("getIceServerConfig").is_empty());
}

#[tokio::test]
async fn pushed_ice_config_applies_to_later_sessions_only() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.publish(PublishParams::new("s1")).await.unwrap();
    settle().await;

    h.inject(json!({
        "command": "iceServerConfig",
        "stunServerUri": "turn:turn.example.com:3478",
        "turnServerUsername": "user",
        "turnServerCredential": "pass",
    }));
    settle().await;

    h.adaptor.play(PlayParams::new("s2")).await.unwrap();
    settle().await;

    let seen = h.factory.servers_seen.lock().clone();
    assert_eq!(seen.len(), 2);
    // First engine got the initial single-STUN set.
    assert_eq!(seen[0].len(), 1);
    // Second engine got the pushed TURN entry appended after the default.
    assert_eq!(seen[1].len(), 2);
    assert_eq!(seen[1][1].urls, "turn:turn.example.com:3478");
    assert_eq!(seen[1][1].username, "user");
}

#[tokio::test]
async fn join_room_command_mirrors_room_into_main_track() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor
        .join_room("room1", "s1", "mcu", "My Stream", "host", "")
        .await
        .unwrap();

    let sent = h.channel.sent_named("joinRoom");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["room"], "room1");
    assert_eq!(sent[0]["mainTrack"], "room1");
    assert_eq!(sent[0]["streamId"], "s1");
    assert_eq!(sent[0]["mode"], "mcu");
}

#[tokio::test]
async fn leave_from_room_closes_every_session() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.publish(PublishParams::new("s1")).await.unwrap();
    h.adaptor.play(PlayParams::new("s2")).await.unwrap();
    settle().await;

    h.adaptor.leave_from_room("room1", "s1").await.unwrap();
    settle().await;

    assert!(h.adaptor.sdp_status("s1").await.is_none());
    assert!(h.adaptor.sdp_status("s2").await.is_none());

    let sent = h.channel.sent_named("leaveFromRoom");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["mainTrack"], "room1");
}

#[tokio::test]
async fn connect_with_new_id_rejoins_and_leave_uses_assigned_id() {
    let config = AdaptorConfig {
        multi_peer: true,
        ..AdaptorConfig::new("ws://localhost:5080/app/websocket")
    };
    let h = Harness::with_config(config);
    h.connect();
    settle().await;

    h.adaptor.join("p2p1").await.unwrap();
    settle().await;

    h.inject(json!({"command": "connectWithNewId", "streamId": "assigned9"}));
    settle().await;

    let joins = h.channel.sent_named("join");
    assert_eq!(joins.len(), 2);
    assert_eq!(joins[0]["multiPeer"], true);
    assert_eq!(joins[1]["streamId"], "assigned9");
    // Once the server assigned an id, later joins are not multi-peer.
    assert_eq!(joins[1]["multiPeer"], false);

    h.adaptor.leave("p2p1").await.unwrap();
    settle().await;

    let leaves = h.channel.sent_named("leave");
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0]["streamId"], "assigned9");
    assert!(h.adaptor.sdp_status("p2p1").await.is_none());
}

#[tokio::test]
async fn query_commands_round_trip_to_events() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.get_stream_info("s1").await.unwrap();
    h.adaptor.get_room_info("room1", "s1").await.unwrap();
    h.adaptor.get_subtracks("s1", "host", 0, 10).await.unwrap();
    settle().await;

    assert_eq!(h.channel.sent_named("getStreamInfo").len(), 1);
    assert_eq!(h.channel.sent_named("getRoomInfo").len(), 1);
    assert_eq!(h.channel.sent_named("getSubtracks").len(), 1);

    h.inject(json!({"command": "streamInformation", "streamId": "s1"}));
    h.inject(json!({"command": "roomInformation", "room": "room1"}));
    h.inject(json!({"command": "trackList", "streamId": "s1", "trackIds": []}));
    h.inject(json!({"command": "pong"}));
    settle().await;

    let names = h.event_names();
    assert!(names.contains(&"streamInformation".to_string()));
    assert!(names.contains(&"roomInformation".to_string()));
    assert!(names.contains(&"trackList".to_string()));
    assert!(names.contains(&"pong".to_string()));
}

#[tokio::test]
async fn track_commands_carry_their_flags() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.adaptor.toggle_video("s1", "trackA", false).await.unwrap();
    h.adaptor.toggle_audio("s1", "trackB", true).await.unwrap();
    h.adaptor.enable_track("s1", "trackC", true).await.unwrap();
    h.adaptor
        .assign_video_track("videoTrack0", "s1", true)
        .await
        .unwrap();
    h.adaptor.force_stream_quality("s1", 720).await.unwrap();

    let toggles = h.channel.sent_named("toggleVideo");
    assert_eq!(toggles.len(), 1);
    assert_eq!(toggles[0]["trackId"], "trackA");
    assert_eq!(toggles[0]["enabled"], false);

    let toggles = h.channel.sent_named("toggleAudio");
    assert_eq!(toggles[0]["enabled"], true);

    let assigns = h.channel.sent_named("assignVideoTrackCommand");
    assert_eq!(assigns[0]["videoTrackId"], "videoTrack0");

    let quality = h.channel.sent_named("forceStreamQuality");
    assert_eq!(quality[0]["streamHeight"], 720);
}

#[tokio::test]
async fn notifications_are_forwarded_with_definition() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.inject(json!({
        "command": "notification",
        "definition": "joinedTheRoom",
        "streamId": "s1",
    }));
    settle().await;

    let found = h.events().into_iter().any(|event| match event {
        peerstream_webrtc::StreamEvent::Notification {
            definition,
            payload,
        } => definition == "joinedTheRoom" && payload["streamId"] == "s1",
        _ => false,
    });
    assert!(found);
}

#[tokio::test]
async fn unknown_commands_are_ignored() {
    let h = Harness::new();
    h.connect();
    settle().await;

    h.inject(json!({"command": "someFutureCommand", "x": 1}));
    h.inject(json!({"not even": "a command"}));
    settle().await;

    // Nothing crashed and no error surfaced for unknown traffic.
    assert!(h.error_names().is_empty());
}

#[tokio::test]
async fn commands_fail_cleanly_when_disconnected() {
    let h = Harness::new();
    // Channel never connected.

    let result = h.adaptor.get_stream_info("s1").await;
    assert!(result.is_err());
    settle().await;
    assert!(h
        .error_names()
        .contains(&"WebSocketNotConnected".to_string()));
}
