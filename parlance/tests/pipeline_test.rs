/// Integration tests for the translation pipeline
///
/// Runs whole directions against the hand-driven audio backend and
/// scripted translation sessions.
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use parlance_lib::audio::AudioError;
use parlance_lib::link::{LinkError, LinkState, ServerEvent};
use parlance_lib::pipeline::{
    Direction, PipelineError, PipelineMode, PipelineState, TranslationPipeline,
};

const WAIT: Duration = Duration::from_secs(2);

fn pipeline(
    mode: PipelineMode,
    backend: &Arc<HandBackend>,
    outgoing: &Arc<ScriptedConnector>,
    incoming: &Arc<ScriptedConnector>,
) -> TranslationPipeline {
    let mut config = test_config();
    config.pipeline.mode = mode;
    config.pipeline.max_consecutive_send_failures = 2;

    TranslationPipeline::new(config)
        .with_directory(FixedDirectory::studio())
        .with_backend(backend.clone())
        .with_direction_connector(Direction::Outgoing, outgoing.clone())
        .with_direction_connector(Direction::Incoming, incoming.clone())
}

#[tokio::test]
async fn test_outgoing_chain() {
    println!("\n=== Outgoing Chain Test ===");

    let backend = HandBackend::new();
    let outgoing = ScriptedConnector::new();
    let incoming = ScriptedConnector::new();
    let mut pipeline = pipeline(PipelineMode::Outgoing, &backend, &outgoing, &incoming);

    pipeline.start().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert!(backend.is_capturing(MIC));
    assert!(backend.is_playing(CABLE_INPUT));
    assert!(!backend.is_capturing(LOOPBACK));
    assert_eq!(incoming.attempts(), 0);

    for _ in 0..3 {
        assert!(backend.capture(MIC, &tone(500)));
    }
    assert!(wait_for(WAIT, || outgoing.sent_chunks() == 3).await);
    println!("Sent {} chunks", outgoing.sent_chunks());

    // Mic audio is already 16kHz: forwarded byte for byte
    assert_eq!(outgoing.sent()[0].len(), 2048);

    outgoing.push_audio(vec![0u8; 960]);
    assert!(wait_for(WAIT, || pipeline.direction_stats(Direction::Outgoing).played == 1).await);

    let stats = pipeline.stats();
    println!("{}", serde_json::to_string_pretty(&stats).unwrap());
    assert_eq!(stats.outgoing.unwrap().sent, 3);
    assert!(stats.incoming.is_none());
    assert_eq!(stats.link.as_ref().unwrap().chunks_sent, 3);
    assert!(stats.outgoing_link.is_none());

    pipeline.stop().await;
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(backend.open_streams(), 0);

    // Link figures outlive the session
    let stats = pipeline.stats();
    let link = stats.link.expect("link stats after stop");
    println!("Link after stop: {:?}", link);
    assert_eq!(link.state, LinkState::Disconnected);
    assert_eq!(link.chunks_sent, 3);
    assert_eq!(link.chunks_received, 1);
    assert_eq!(link.bytes_sent, 3 * 2048);
    assert!(link.connection_duration_secs > 0.0);
    assert!(serde_json::to_value(pipeline.stats()).unwrap().get("link").is_some());

    println!("\n✓ Outgoing chain moves audio both ways");
}

#[tokio::test]
async fn test_incoming_chain() {
    println!("\n=== Incoming Chain Test ===");

    let backend = HandBackend::new();
    let outgoing = ScriptedConnector::new();
    let incoming = ScriptedConnector::new();
    let mut pipeline = pipeline(PipelineMode::Incoming, &backend, &outgoing, &incoming);

    pipeline.start().await.unwrap();
    assert!(backend.is_capturing(LOOPBACK));
    assert!(backend.is_playing(SPEAKERS));
    assert!(!backend.is_capturing(MIC));
    assert!(!backend.is_playing(CABLE_INPUT));
    assert_eq!(outgoing.attempts(), 0);
    assert!(pipeline.link(Direction::Outgoing).is_none());

    for _ in 0..2 {
        assert!(backend.capture(LOOPBACK, &tone(800)));
    }
    assert!(wait_for(WAIT, || incoming.sent_chunks() == 2).await);

    // Stereo loopback buffer of 1024 samples goes out as 512 mono frames
    assert_eq!(incoming.sent()[0].len(), 1024);

    incoming.push_audio(vec![0u8; 960]);
    assert!(wait_for(WAIT, || pipeline.direction_stats(Direction::Incoming).played == 1).await);

    let stats = pipeline.stats();
    println!("{}", serde_json::to_string_pretty(&stats).unwrap());
    assert!(stats.outgoing.is_none());
    let counts = stats.incoming.unwrap();
    assert_eq!(counts.captured, 2);
    assert_eq!(counts.sent, 2);
    assert_eq!(counts.received, 1);
    assert_eq!(stats.link.unwrap().chunks_received, 1);

    pipeline.stop().await;
    assert_eq!(backend.open_streams(), 0);

    println!("\n✓ Incoming chain runs on its own");
}

/// Keep feeding the microphone until `sent` reaches `target`
async fn feed_until_sent(
    backend: &HandBackend,
    pipeline: &TranslationPipeline,
    target: u64,
) -> bool {
    wait_for(WAIT, || {
        backend.capture(MIC, &tone(600));
        pipeline.direction_stats(Direction::Outgoing).sent >= target
    })
    .await
}

#[tokio::test]
async fn test_pipeline_rides_through_session_changes() {
    println!("\n=== Session Replacement Test ===");

    let backend = HandBackend::new();
    let outgoing = ScriptedConnector::new();
    let incoming = ScriptedConnector::new();
    let mut pipeline = pipeline(PipelineMode::Outgoing, &backend, &outgoing, &incoming);

    pipeline.start().await.unwrap();
    assert!(feed_until_sent(&backend, &pipeline, 2).await);
    let link = pipeline.link(Direction::Outgoing).unwrap();

    // Server announces the end of the session
    outgoing.push(vec![ServerEvent::GoAway {
        time_left: Some(Duration::from_secs(5)),
    }]);
    assert!(
        wait_for(WAIT, || {
            backend.capture(MIC, &tone(600));
            outgoing.attempts() >= 2
        })
        .await
    );
    assert!(wait_for(WAIT, || link.is_connected()).await);

    let sent = pipeline.direction_stats(Direction::Outgoing).sent;
    assert!(feed_until_sent(&backend, &pipeline, sent + 3).await);
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert_eq!(outgoing.attempts(), 2);
    assert_eq!(link.stats().reconnection_count, 1);

    // The replacement session delivers translations
    outgoing.push_audio(vec![0u8; 960]);
    assert!(wait_for(WAIT, || pipeline.direction_stats(Direction::Outgoing).played == 1).await);

    // Remote side drops the session without notice
    outgoing.close_sessions();
    assert!(wait_for(WAIT, || outgoing.attempts() >= 3).await);
    assert!(wait_for(WAIT, || link.is_connected()).await);

    let sent = pipeline.direction_stats(Direction::Outgoing).sent;
    assert!(feed_until_sent(&backend, &pipeline, sent + 3).await);
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert_eq!(link.stats().reconnection_count, 2);

    outgoing.push_audio(vec![0u8; 960]);
    assert!(wait_for(WAIT, || pipeline.direction_stats(Direction::Outgoing).played == 2).await);

    let counts = pipeline.direction_stats(Direction::Outgoing);
    println!("Outgoing after two replacements: {:?}", counts);
    assert_eq!(counts.errors, 0);

    pipeline.stop().await;
    assert_eq!(pipeline.stats().link.unwrap().reconnection_count, 2);

    println!("\n✓ Pipeline kept running across replaced sessions");
}

#[tokio::test]
async fn test_setup_carries_target_language() {
    println!("\n=== Session Setup Test ===");

    let backend = HandBackend::new();
    let outgoing = ScriptedConnector::new();
    let incoming = ScriptedConnector::new();
    let mut pipeline = pipeline(PipelineMode::Bidirectional, &backend, &outgoing, &incoming);

    pipeline.start().await.unwrap();

    let out_setup = outgoing.last_setup().unwrap();
    let in_setup = incoming.last_setup().unwrap();
    assert_eq!(out_setup.language_code, "ja-JP");
    assert_eq!(out_setup, in_setup);

    pipeline.stop().await;
    println!("\n✓ Both directions share one setup");
}

/// Bidirectional pipeline whose outgoing sends keep failing
#[tokio::test]
async fn test_bidirectional_direction_failure_is_isolated() {
    println!("\n=== Bidirectional Failure Isolation Test ===");

    let backend = HandBackend::new();
    let outgoing = ScriptedConnector::new();
    let incoming = ScriptedConnector::new();
    let mut pipeline = pipeline(PipelineMode::Bidirectional, &backend, &outgoing, &incoming);

    pipeline.start().await.unwrap();
    assert!(backend.is_capturing(MIC));
    assert!(backend.is_capturing(LOOPBACK));
    assert!(backend.is_playing(CABLE_INPUT));
    assert!(backend.is_playing(SPEAKERS));

    outgoing.reject_sends();
    for _ in 0..3 {
        backend.capture(MIC, &tone(300));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(wait_for(WAIT, || pipeline.state() == PipelineState::Error).await);
    let failed = pipeline.direction_stats(Direction::Outgoing);
    println!("Outgoing after failure: {:?}", failed);
    assert_eq!(failed.captured, 3);
    assert_eq!(failed.sent, 0);
    assert!(failed.errors >= 1);

    // Outgoing stops advancing while incoming keeps going
    backend.capture(MIC, &tone(300));
    for _ in 0..2 {
        backend.capture(LOOPBACK, &tone(1000));
    }
    incoming.push_audio(vec![1u8; 960]);

    assert!(wait_for(WAIT, || {
        let stats = pipeline.direction_stats(Direction::Incoming);
        stats.sent == 2 && stats.played == 1
    })
    .await);
    assert_eq!(pipeline.direction_stats(Direction::Outgoing), failed);

    let stats = pipeline.stats();
    println!("{}", serde_json::to_string_pretty(&stats).unwrap());
    assert_eq!(stats.state, PipelineState::Error);
    assert!(stats.link.is_none());
    assert!(stats.outgoing_link.is_some());
    assert_eq!(stats.incoming_link.unwrap().chunks_sent, 2);
    assert_eq!(stats.totals.sent, 2);

    pipeline.stop().await;
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(backend.open_streams(), 0);

    let stats = pipeline.stats();
    assert_eq!(stats.incoming_link.unwrap().chunks_sent, 2);
    assert_eq!(stats.outgoing_link.unwrap().chunks_sent, 0);

    println!("\n✓ Failed direction did not stop the other");
}

#[tokio::test]
async fn test_missing_virtual_device() {
    println!("\n=== Device Discovery Failure Test ===");

    let backend = HandBackend::new();
    let mut config = test_config();
    config.pipeline.mode = PipelineMode::Incoming;

    let mut pipeline = TranslationPipeline::new(config)
        .with_directory(FixedDirectory::laptop())
        .with_backend(backend.clone())
        .with_connector(ScriptedConnector::new());

    let result = pipeline.start().await;
    println!("Start result: {:?}", result);
    assert!(matches!(result, Err(PipelineError::DeviceDiscovery(_))));
    assert!(result.unwrap_err().is_device_error());
    assert_eq!(pipeline.state(), PipelineState::Error);
    assert_eq!(backend.open_streams(), 0);

    pipeline.stop().await;
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    println!("\n✓ Missing loopback device reported");
}

#[tokio::test]
async fn test_invalid_device_index() {
    println!("\n=== Invalid Device Index Test ===");

    let backend = HandBackend::new();
    let mut config = test_config();
    config.pipeline.mic_device = Some(42);

    let mut pipeline = TranslationPipeline::new(config)
        .with_directory(FixedDirectory::studio())
        .with_backend(backend.clone())
        .with_connector(ScriptedConnector::new());

    let result = pipeline.start().await;
    assert!(matches!(
        result,
        Err(PipelineError::Audio(AudioError::InvalidDeviceIndex(42)))
    ));
    assert_eq!(backend.open_streams(), 0);

    println!("\n✓ Unknown index rejected before any stream opened");
}

#[tokio::test]
async fn test_partial_start_is_released() {
    println!("\n=== Partial Start Cleanup Test ===");

    let backend = HandBackend::new();
    let outgoing = ScriptedConnector::new();
    let incoming = ScriptedConnector::scripted(vec![Err(LinkError::Authentication(
        "API key not valid".into(),
    ))]);
    let mut pipeline = pipeline(PipelineMode::Bidirectional, &backend, &outgoing, &incoming);

    let result = pipeline.start().await;
    println!("Start result: {:?}", result);
    assert!(matches!(
        result,
        Err(PipelineError::Link(LinkError::Authentication(_)))
    ));

    // The outgoing direction was fully up before incoming failed
    assert_eq!(outgoing.attempts(), 1);
    assert_eq!(pipeline.state(), PipelineState::Error);
    assert_eq!(backend.open_streams(), 0);
    assert!(pipeline.link(Direction::Outgoing).is_none());

    pipeline.stop().await;
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    println!("\n✓ Started direction released after failure");
}

#[tokio::test]
async fn test_stream_open_failure() {
    println!("\n=== Stream Open Failure Test ===");

    let backend = HandBackend::new();
    backend.break_device(SPEAKERS);
    let mut config = test_config();
    config.pipeline.mode = PipelineMode::Incoming;

    let mut pipeline = TranslationPipeline::new(config)
        .with_directory(FixedDirectory::studio())
        .with_backend(backend.clone())
        .with_connector(ScriptedConnector::new());

    let result = pipeline.start().await;
    assert!(matches!(
        result,
        Err(PipelineError::Audio(AudioError::StreamBuildFailed(_)))
    ));
    assert!(!backend.is_capturing(LOOPBACK));

    println!("\n✓ Open failure unwinds the started input");
}

#[tokio::test]
async fn test_stop_is_idempotent_and_restartable() {
    println!("\n=== Stop Idempotence Test ===");

    let backend = HandBackend::new();
    let outgoing = ScriptedConnector::new();
    let incoming = ScriptedConnector::new();
    let mut pipeline = pipeline(PipelineMode::Outgoing, &backend, &outgoing, &incoming);

    pipeline.stop().await;
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    pipeline.start().await.unwrap();
    let again = pipeline.start().await;
    assert!(matches!(again, Err(PipelineError::InvalidTransition { .. })));

    pipeline.stop().await;
    pipeline.stop().await;
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    pipeline.start().await.unwrap();
    assert_eq!(outgoing.attempts(), 2);
    pipeline.stop().await;

    println!("\n✓ Stop can be repeated and the pipeline restarted");
}

#[tokio::test]
async fn test_state_changes_are_published() {
    println!("\n=== State Subscription Test ===");

    let backend = HandBackend::new();
    let outgoing = ScriptedConnector::new();
    let incoming = ScriptedConnector::new();
    let mut pipeline = pipeline(PipelineMode::Outgoing, &backend, &outgoing, &incoming);

    let mut changes = pipeline.state_manager().subscribe();
    pipeline.start().await.unwrap();
    pipeline.stop().await;

    let mut seen = Vec::new();
    while let Ok(Some(state)) =
        tokio::time::timeout(Duration::from_millis(200), changes.recv()).await
    {
        seen.push(state);
    }
    println!("Observed: {:?}", seen);
    assert_eq!(seen.first(), Some(&PipelineState::Starting));
    assert!(seen.contains(&PipelineState::Running));
    assert_eq!(seen.last(), Some(&PipelineState::Stopped));

    println!("\n✓ Lifecycle published to listeners");
}
