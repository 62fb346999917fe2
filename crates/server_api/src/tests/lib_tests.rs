use super::*;

use session_core::ControllerConfig;
use session_integration::{
    testing::{FakeConnector, RecordingQrDisplay},
    SessionEvent, SessionStoreConfig,
};
use shared::{
    domain::{AccountInfo, ChatId, LastMessage, SessionState},
    error::ErrorCode,
};

fn context(connector: &Arc<FakeConnector>, phone: Arc<dyn PhoneNormalizer>) -> ApiContext {
    let config = ControllerConfig {
        store: SessionStoreConfig {
            data_dir: std::env::temp_dir().join("server_api_tests_session"),
            ..SessionStoreConfig::default()
        },
        ..ControllerConfig::default()
    };
    let controller = ControllerHandle::spawn(
        config,
        connector.clone(),
        Arc::new(RecordingQrDisplay::default()),
    );
    ApiContext::new(controller, phone)
}

async fn ready_context(connector: &Arc<FakeConnector>) -> ApiContext {
    let ctx = context(connector, Arc::new(CountryCodePrefix::default()));
    ctx.controller.initialize().await.expect("initialize");
    connector.latest().emit(SessionEvent::Ready {
        info: Some(AccountInfo {
            display_name: "Bot".into(),
            user_id: "6280000".into(),
            platform: "android".into(),
        }),
    });
    ctx.controller
        .subscribe()
        .wait_for(|status| status.state.is_ready())
        .await
        .expect("ready");
    ctx
}

#[tokio::test]
async fn unregistered_number_is_rejected() {
    let connector = FakeConnector::new();
    connector.register_number("628123456789");
    let ctx = ready_context(&connector).await;

    let err = send_message(&ctx, Some("0812345"), Some("hi"))
        .await
        .expect_err("unregistered");
    assert!(matches!(err.code, ErrorCode::UnregisteredRecipient));
    assert_eq!(err.error, "invalid number");
    assert!(connector.latest().sent_messages().is_empty());
}

#[tokio::test]
async fn sends_to_resolved_chat_and_echoes_raw_recipient() {
    let connector = FakeConnector::new();
    connector.register_number("628123456789");
    let ctx = ready_context(&connector).await;

    let outcome = send_message(&ctx, Some("+62 812-3456-789"), Some("Halo"))
        .await
        .expect("sent");
    assert_eq!(outcome.recipient, "+62 812-3456-789");
    assert!(outcome.message_id.to_string().starts_with("true_628123456789@c.us"));
    assert_eq!(
        connector.latest().sent_messages(),
        vec![(ChatId("628123456789@c.us".into()), "Halo".to_string())]
    );
}

#[tokio::test]
async fn ten_digit_numbers_get_the_country_code() {
    let connector = FakeConnector::new();
    connector.register_number("15551234567");
    let ctx = ready_context(&connector).await;

    send_message(&ctx, Some("(555) 123-4567"), Some("hello"))
        .await
        .expect("sent");
    assert_eq!(
        connector.latest().sent_messages()[0].0,
        ChatId("15551234567@c.us".into())
    );
}

#[tokio::test]
async fn missing_fields_fail_validation_before_readiness() {
    let connector = FakeConnector::new();
    let ctx = context(&connector, Arc::new(DigitsOnly));

    for (phone, message) in [(None, Some("hi")), (Some("123"), None), (Some("  "), Some("hi"))] {
        let err = send_message(&ctx, phone, message)
            .await
            .expect_err("invalid");
        assert!(matches!(err.code, ErrorCode::Validation));
    }
}

#[tokio::test]
async fn operations_require_ready_session() {
    let connector = FakeConnector::new();
    let ctx = context(&connector, Arc::new(DigitsOnly));

    let err = send_message(&ctx, Some("628123456789"), Some("hi"))
        .await
        .expect_err("not ready");
    assert!(matches!(err.code, ErrorCode::NotReady));
    let err = get_chats(&ctx).await.expect_err("not ready");
    assert!(matches!(err.code, ErrorCode::NotReady));
    assert_eq!(get_status(&ctx).state, SessionState::Uninitialized);
}

#[tokio::test]
async fn send_failures_hide_transport_details() {
    let connector = FakeConnector::new();
    connector.register_number("628123456789");
    let ctx = ready_context(&connector).await;
    connector.latest().fail_sends(true);

    let err = send_message(&ctx, Some("628123456789"), Some("hi"))
        .await
        .expect_err("send fails");
    assert!(matches!(err.code, ErrorCode::SessionTransport));
    assert!(!err.message.contains("evaluation failed"));
}

#[tokio::test]
async fn lists_chats_when_ready() {
    let connector = FakeConnector::new();
    connector.set_chats(vec![ChatSummary {
        id: ChatId("628111@c.us".into()),
        name: "Alice".into(),
        is_group: false,
        unread_count: 2,
        last_message: Some(LastMessage {
            body: "see you".into(),
            timestamp: 1_700_000_000,
            from: "628111@c.us".into(),
        }),
    }]);
    let ctx = ready_context(&connector).await;

    let chats = get_chats(&ctx).await.expect("chats");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].name, "Alice");
}

#[tokio::test]
async fn status_reports_account_when_ready() {
    let connector = FakeConnector::new();
    let ctx = ready_context(&connector).await;

    let status = get_status(&ctx);
    assert!(status.state.is_ready());
    assert_eq!(
        status.account.map(|account| account.user_id),
        Some("6280000".to_string())
    );
}

#[tokio::test]
async fn manual_reconnect_while_reconnecting_reports_attempts() {
    let connector = FakeConnector::new();
    let ctx = ready_context(&connector).await;
    connector.latest().emit(SessionEvent::Disconnected {
        reason: "NAVIGATION".into(),
    });
    ctx.controller
        .subscribe()
        .wait_for(|status| status.is_reconnecting)
        .await
        .expect("reconnecting");

    let err = manual_reconnect(&ctx).await.expect_err("in progress");
    assert!(matches!(err.code, ErrorCode::ReconnectInProgress));
    assert_eq!(err.reconnect_attempts, Some(1));
}

#[tokio::test]
async fn manual_reconnect_starts_a_fresh_attempt() {
    let connector = FakeConnector::new();
    let ctx = ready_context(&connector).await;

    manual_reconnect(&ctx).await.expect("reconnect");
    assert_eq!(connector.created(), 2);
    assert!(connector.session(0).was_destroyed());
    let status = get_status(&ctx);
    assert_eq!(status.attempt_count, 0);
    assert_eq!(status.state, SessionState::Initializing);
}
