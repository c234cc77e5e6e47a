//! Stop, connection teardown, and races with in-flight negotiations

mod harness;

use harness::{next_reply, start_message, Call, TestGateway, OFFER};
use relay_gateway::{ClientChannel, ServerMessage, SessionId};

#[tokio::test]
async fn test_stop_is_idempotent() {
    let gateway = TestGateway::new();
    let id = SessionId::from("session-1");
    let (channel, _rx) = ClientChannel::new();
    gateway.orchestrator.start(&id, OFFER, channel).await.unwrap();

    assert!(gateway.orchestrator.stop(&id).await);
    assert!(!gateway.orchestrator.stop(&id).await);

    assert!(gateway.orchestrator.registry().get(&id).is_none());
    assert_eq!(gateway.media.released("pipeline-0"), 1);
}

#[tokio::test]
async fn test_stop_without_start_has_no_effect() {
    let gateway = TestGateway::new();
    let (mut connection, mut rx) = gateway.connect(Some("session-1"));

    assert!(connection.handle_text(r#"{"id":"stop"}"#).await.is_none());

    assert!(rx.try_recv().is_err());
    assert!(gateway.media.calls().is_empty());
    assert!(gateway.orchestrator.registry().is_empty());
}

#[tokio::test]
async fn test_stop_without_session_id_is_silent() {
    let gateway = TestGateway::new();
    let (mut connection, mut rx) = gateway.connect(None);

    connection.handle_text(r#"{"id":"stop"}"#).await;

    assert!(rx.try_recv().is_err());
    assert!(gateway.media.calls().is_empty());
}

#[tokio::test]
async fn test_stop_during_offer_releases_once() {
    let gateway = TestGateway::new();
    let hold = gateway.media.hold_offers();
    let id = SessionId::from("session-1");

    let orchestrator = gateway.orchestrator.clone();
    let start_id = id.clone();
    let start = tokio::spawn(async move {
        let (channel, _rx) = ClientChannel::new();
        orchestrator.start(&start_id, OFFER, channel).await
    });

    gateway.media.offer_reached().await;
    assert!(gateway.orchestrator.stop(&id).await);
    assert_eq!(gateway.media.released("pipeline-0"), 1);

    hold.notify_one();
    let err = start.await.unwrap().unwrap_err();

    assert!(err.is_session_gone());
    assert!(gateway.orchestrator.registry().is_empty());
    assert_eq!(gateway.media.released("pipeline-0"), 1);
    assert_eq!(gateway.orchestrator.ports().issued(), 0);
}

#[tokio::test]
async fn test_stop_right_after_start_cancels_negotiation() {
    let gateway = TestGateway::new();
    let (mut connection, mut rx) = gateway.connect(Some("session-1"));

    let start = connection.handle_text(&start_message(OFFER)).await.unwrap();
    assert!(connection.handle_text(r#"{"id":"stop"}"#).await.is_none());
    start.await.unwrap();

    match next_reply(&mut rx).await {
        ServerMessage::Error { message } => assert!(message.starts_with("Session not found")),
        other => panic!("expected error, got {:?}", other),
    }
    assert!(gateway.orchestrator.registry().is_empty());
    assert_eq!(gateway.media.releases(), gateway.media.count(|call| *call == Call::CreatePipeline));
    assert_eq!(gateway.orchestrator.ports().issued(), 0);
}

#[tokio::test]
async fn test_stop_before_pipeline_releases_it_on_arrival() {
    let gateway = TestGateway::new();
    let id = SessionId::from("session-1");
    let (channel, _rx) = ClientChannel::new();

    let reservation = gateway.orchestrator.reserve(&id);
    assert!(gateway.orchestrator.stop(&id).await);
    assert!(gateway.media.calls().is_empty());

    let err = gateway
        .orchestrator
        .start_reserved(&id, reservation, OFFER, channel)
        .await
        .unwrap_err();

    assert!(err.is_session_gone());
    assert_eq!(gateway.media.released("pipeline-0"), 1);
    assert_eq!(gateway.media.count(|call| matches!(call, Call::CreateEndpoint(_))), 0);
    assert!(gateway.orchestrator.registry().is_empty());
}

#[tokio::test]
async fn test_restart_releases_previous_pipeline() {
    let gateway = TestGateway::new();
    let id = SessionId::from("session-1");

    let (channel, _rx) = ClientChannel::new();
    gateway.orchestrator.start(&id, OFFER, channel.clone()).await.unwrap();
    gateway.orchestrator.start(&id, OFFER, channel).await.unwrap();

    assert_eq!(gateway.media.released("pipeline-0"), 1);
    assert_eq!(gateway.media.releases(), 1);

    let info = gateway.orchestrator.registry().get(&id).unwrap();
    assert_ne!(info.pipeline_id.as_deref(), Some("pipeline-0"));
    assert_eq!(gateway.orchestrator.registry().len(), 1);
}

#[tokio::test]
async fn test_concurrent_starts_keep_latest_session() {
    let gateway = TestGateway::new();
    let hold = gateway.media.hold_offers();
    let id = SessionId::from("session-1");

    let spawn_start = || {
        let orchestrator = gateway.orchestrator.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let (channel, _rx) = ClientChannel::new();
            orchestrator.start(&id, OFFER, channel).await
        })
    };

    let first = spawn_start();
    gateway.media.offer_reached().await;
    let first_pipeline = gateway.orchestrator.registry().get(&id).unwrap().pipeline_id.unwrap();

    let second = spawn_start();
    gateway.media.offer_reached().await;
    let second_pipeline = gateway.orchestrator.registry().get(&id).unwrap().pipeline_id.unwrap();
    assert_ne!(first_pipeline, second_pipeline);

    hold.notify_one();
    hold.notify_one();

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert!(first.unwrap_err().is_session_gone());
    assert!(second.is_ok());

    assert_eq!(gateway.media.released(&first_pipeline), 1);
    assert_eq!(gateway.media.released(&second_pipeline), 0);
    assert_eq!(
        gateway.orchestrator.registry().get(&id).unwrap().pipeline_id,
        Some(second_pipeline)
    );
}

#[tokio::test]
async fn test_connection_close_tears_down_session() {
    let gateway = TestGateway::new();
    let (mut connection, mut rx) = gateway.connect(Some("session-1"));

    let start = connection.handle_text(&start_message(OFFER)).await.unwrap();
    start.await.unwrap();
    assert!(matches!(next_reply(&mut rx).await, ServerMessage::StartResponse { .. }));

    connection.close().await;
    connection.close().await;

    assert!(gateway.orchestrator.registry().is_empty());
    assert_eq!(gateway.media.releases(), 1);
}

#[tokio::test]
async fn test_connection_close_during_negotiation() {
    let gateway = TestGateway::new();
    let hold = gateway.media.hold_offers();
    let (mut connection, mut rx) = gateway.connect(Some("session-1"));

    let start = connection.handle_text(&start_message(OFFER)).await.unwrap();
    gateway.media.offer_reached().await;

    connection.close().await;
    hold.notify_one();
    start.await.unwrap();

    assert!(gateway.orchestrator.registry().is_empty());
    assert_eq!(gateway.media.released("pipeline-0"), 1);
    match next_reply(&mut rx).await {
        ServerMessage::Error { message } => assert!(message.starts_with("Session not found")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(
        gateway
            .media
            .count(|call| matches!(call, Call::ProcessOffer { endpoint, .. } if endpoint.contains("RtpEndpoint"))),
        0
    );
}
