/// Integration tests for the translation link
///
/// Exercises `TranslationLink` through its public API against scripted
/// sessions: streaming receive, transcripts, session ceilings and the
/// reconnection budget.
mod common;

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use futures_util::StreamExt;
use parlance_lib::link::{
    LinkError, LinkOptions, LinkState, ReconnectionPolicy, ServerEvent, SessionSetup,
    TranscriptSource, TranslationLink,
};

fn setup() -> SessionSetup {
    SessionSetup {
        model: "gemini-live-2.5-flash-preview-native-audio".into(),
        language_code: "en-US".into(),
        input_transcription: true,
        output_transcription: true,
        ..SessionSetup::default()
    }
}

fn options() -> LinkOptions {
    LinkOptions {
        receive_poll_interval: Duration::from_millis(20),
        reconnect: ReconnectionPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_retries: 3,
        },
        ..LinkOptions::default()
    }
}

fn link(connector: &Arc<ScriptedConnector>, options: LinkOptions) -> TranslationLink {
    TranslationLink::new("test", setup(), options, connector.clone())
}

/// Poll until a chunk arrives; idle polls return `Ok(None)`
async fn next_chunk(link: &TranslationLink) -> Option<Vec<u8>> {
    for _ in 0..50 {
        if let Some(pcm) = link.next_audio().await.unwrap() {
            return Some(pcm);
        }
    }
    None
}

#[tokio::test]
async fn test_receive_stream_yields_audio_in_order() {
    println!("\n=== Receive Stream Test ===");

    let connector = ScriptedConnector::new();
    let link = link(&connector, options());
    link.connect().await.unwrap();

    for i in 0..3u8 {
        connector.push_audio(vec![i; 480]);
    }

    let mut audio = pin!(link.receive());
    for i in 0..3u8 {
        let chunk = tokio::time::timeout(Duration::from_secs(1), audio.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        println!("Chunk {}: {} bytes", i, chunk.len());
        assert_eq!(chunk, vec![i; 480]);
    }

    let stats = link.stats();
    assert_eq!(stats.chunks_received, 3);
    assert_eq!(stats.bytes_received, 1440);

    println!("\n✓ Audio arrives in server order");
}

#[tokio::test]
async fn test_receive_stream_ends_after_disconnect() {
    println!("\n=== Receive Stream End Test ===");

    let connector = ScriptedConnector::new();
    let link = link(&connector, options());
    link.connect().await.unwrap();
    link.disconnect().await;
    assert_eq!(link.state(), LinkState::Disconnected);

    let items: Vec<_> = tokio::time::timeout(Duration::from_secs(1), link.receive().collect::<Vec<_>>())
        .await
        .unwrap();
    println!("Items after disconnect: {:?}", items);
    assert!(items.is_empty());

    println!("\n✓ Stream ends once disconnected");
}

#[tokio::test]
async fn test_transcripts_collected_per_source() {
    println!("\n=== Transcript Collection Test ===");

    let connector = ScriptedConnector::new();
    let link = link(&connector, options());
    link.connect().await.unwrap();

    connector.push(vec![
        ServerEvent::Transcript {
            source: TranscriptSource::Input,
            text: "おはようございます".into(),
        },
        ServerEvent::Transcript {
            source: TranscriptSource::Output,
            text: "Good morning".into(),
        },
        ServerEvent::Audio(vec![0; 96]),
        ServerEvent::TurnComplete,
    ]);

    assert!(next_chunk(&link).await.is_some());

    let transcripts = link.transcriptions();
    println!("Transcripts: {:?}", transcripts);
    assert_eq!(transcripts.input, vec!["おはようございます".to_string()]);
    assert_eq!(transcripts.output, vec!["Good morning".to_string()]);

    link.clear_transcriptions();
    assert!(link.transcriptions().is_empty());

    println!("\n✓ Transcripts kept apart by source");
}

#[tokio::test]
async fn test_session_ceiling_forces_reconnect() {
    println!("\n=== Session Ceiling Test ===");

    let connector = ScriptedConnector::new();
    let link = link(
        &connector,
        LinkOptions {
            session_timeout: Duration::from_millis(150),
            session_buffer: Duration::from_millis(50),
            ..options()
        },
    );
    link.connect().await.unwrap();
    link.send(&[0u8; 320]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(link.tracker().is_expired());

    let result = link.send(&[0u8; 320]).await;
    println!("Send past the ceiling: {:?}", result);
    assert!(matches!(result, Err(LinkError::SessionExpired)));

    link.reconnect().await.unwrap();
    assert!(link.is_connected());
    assert_eq!(connector.attempts(), 2);
    assert_eq!(link.stats().reconnection_count, 1);

    link.send(&[0u8; 320]).await.unwrap();
    assert_eq!(connector.sent_chunks(), 2);

    println!("\n✓ Expired session replaced by a fresh one");
}

#[tokio::test]
async fn test_go_away_reconnects_on_receive() {
    println!("\n=== GoAway Reconnect Test ===");

    let connector = ScriptedConnector::new();
    let link = link(&connector, options());
    link.connect().await.unwrap();

    connector.push(vec![ServerEvent::GoAway {
        time_left: Some(Duration::from_secs(5)),
    }]);

    let reconnected = wait_for(Duration::from_secs(2), || connector.attempts() == 2);
    let poll = async {
        loop {
            let _ = link.next_audio().await;
            if connector.attempts() >= 2 {
                break;
            }
        }
    };
    let (done, ()) = tokio::join!(reconnected, poll);
    assert!(done);
    assert!(link.is_connected());

    // New session carries audio again
    connector.push_audio(vec![7; 64]);
    assert_eq!(next_chunk(&link).await, Some(vec![7; 64]));

    println!("\n✓ Server-announced expiry handled without an error");
}

#[tokio::test]
async fn test_exhausted_link_stays_failed() {
    println!("\n=== Reconnection Budget Test ===");

    let connector = ScriptedConnector::scripted(vec![
        Ok(()),
        Err(LinkError::Connection("refused".into())),
        Err(LinkError::Connection("refused".into())),
        Err(LinkError::Timeout(10_000)),
    ]);
    let link = link(&connector, options());
    link.connect().await.unwrap();

    let result = link.reconnect().await;
    println!("Reconnect: {:?}", result);
    assert!(matches!(result, Err(LinkError::RetriesExhausted(3))));
    assert_eq!(connector.attempts(), 4);
    assert_eq!(link.state(), LinkState::Error);
    assert!(link.is_exhausted());

    assert!(matches!(link.connect().await, Err(LinkError::Exhausted)));
    assert!(matches!(link.next_audio().await, Err(LinkError::Exhausted)));
    assert_eq!(connector.attempts(), 4);

    println!("\n✓ Exhausted link refuses further work");
}

#[tokio::test]
async fn test_auth_failure_stops_reconnecting() {
    println!("\n=== Authentication During Reconnect Test ===");

    let connector = ScriptedConnector::scripted(vec![
        Ok(()),
        Err(LinkError::Authentication("token expired".into())),
    ]);
    let link = link(&connector, options());
    link.connect().await.unwrap();

    let result = link.reconnect().await;
    assert!(matches!(result, Err(LinkError::Authentication(_))));
    assert_eq!(connector.attempts(), 2);
    assert!(link.is_exhausted());

    println!("\n✓ No retries after credentials were rejected");
}

#[tokio::test]
async fn test_remote_close_without_auto_reconnect() {
    println!("\n=== Remote Close Test ===");

    let connector = ScriptedConnector::new();
    let link = link(
        &connector,
        LinkOptions {
            enable_auto_reconnect: false,
            ..options()
        },
    );
    link.connect().await.unwrap();
    connector.close_sessions();

    let mut result = Ok(None);
    for _ in 0..10 {
        result = link.next_audio().await;
        if result.is_err() {
            break;
        }
    }
    println!("After remote close: {:?}", result);
    assert!(matches!(result, Err(LinkError::ConnectionLost(_))));
    assert_eq!(connector.attempts(), 1);

    println!("\n✓ Lost session surfaced to the caller");
}
