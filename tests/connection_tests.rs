mod common;

use std::time::Duration;

use serde_json::json;

use centrifuge_session::client::{Client, RequestError, State};
use centrifuge_session::errors::{
    AuthError, ClientErrorCode, ConnectError, ConnectFailed, DisconnectErrorCode, Error,
    StreamError,
};
use centrifuge_session::events::{
    ClientEvent, ConnectingEvent, DisconnectedEvent, connecting_codes,
};

use common::{config, events_until, next_event, within};

fn is_connected(event: &ClientEvent) -> bool {
    matches!(event, ClientEvent::Connected(_))
}

#[tokio::test]
async fn connect_reports_client_id() {
    let (client, mut server) = common::client(config());
    let mut events = client.events();
    let connect = client.connect();

    let mut conn = server.accept().await;
    let body = conn.handshake().await;
    assert_eq!(body["token"], "valid-token");
    assert_eq!(body["name"], "test");

    within(connect).await.unwrap();
    assert_eq!(client.state(), State::Connected);
    assert_eq!(client.server_context().unwrap().client_id, "client-1");

    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Connecting(ConnectingEvent {
            attempt: 1,
            code: connecting_codes::CONNECT_CALLED,
            reason: "connect called".into(),
        })
    );
    let ClientEvent::Connected(connected) = next_event(&mut events).await else {
        panic!("expected connected");
    };
    assert_eq!(connected.client_id, "client-1");
    assert_eq!(connected.version, "6.0.0");

    // already connected
    within(client.connect()).await.unwrap();
}

#[tokio::test]
async fn close_during_connecting_cancels_handshake() {
    let (client, mut server) = common::client(config());
    let mut events = client.events();
    let connect = tokio::spawn(client.connect().into_future());

    let mut conn = server.accept().await;
    conn.expect("connect").await;
    within(client.close()).await;

    assert_eq!(within(connect).await.unwrap(), Err(ConnectFailed::Closed));
    assert_eq!(client.state(), State::Closed);
    conn.closed().await;

    let mut seen = Vec::new();
    while let Some(event) = within(events.recv()).await {
        seen.push(event);
    }
    assert!(!seen.iter().any(is_connected), "{seen:?}");
    assert_eq!(
        seen.last(),
        Some(&ClientEvent::Disconnected(DisconnectedEvent {
            code: DisconnectErrorCode::DISCONNECT_CALLED,
            reason: "client closed".into(),
            reconnect: false,
        }))
    );

    assert_eq!(within(client.connect()).await, Err(ConnectFailed::Closed));
}

#[tokio::test]
async fn reconnects_after_transport_drop() {
    let (client, mut server) = common::client(config());
    let mut events = client.events();
    let connect = client.connect();
    let conn = server.accept_connected().await;
    within(connect).await.unwrap();
    events_until(&mut events, is_connected).await;

    conn.peer.abort();
    let _conn = server.accept_connected().await;

    let seen = events_until(&mut events, is_connected).await;
    assert_eq!(
        seen[..3],
        [
            ClientEvent::Error(Error::Stream(StreamError::Abnormal(
                "connection reset".into()
            ))),
            ClientEvent::Disconnected(DisconnectedEvent {
                code: DisconnectErrorCode::CONNECTION_CLOSED,
                reason: "transport closed".into(),
                reconnect: true,
            }),
            ClientEvent::Connecting(ConnectingEvent {
                attempt: 1,
                code: connecting_codes::TRANSPORT_CLOSED,
                reason: "transport closed".into(),
            }),
        ]
    );
    assert_eq!(seen.len(), 4);
    assert_eq!(client.state(), State::Connected);
}

#[tokio::test]
async fn server_close_frame_reconnects() {
    let (client, mut server) = common::client(config());
    let mut events = client.events();
    let connect = client.connect();
    let conn = server.accept_connected().await;
    within(connect).await.unwrap();
    events_until(&mut events, is_connected).await;

    conn.peer.close(3001, "shutdown");
    let _conn = server.accept_connected().await;

    let seen = events_until(&mut events, is_connected).await;
    assert_eq!(
        seen[0],
        ClientEvent::Disconnected(DisconnectedEvent {
            code: DisconnectErrorCode::SHUTDOWN,
            reason: "shutdown".into(),
            reconnect: true,
        })
    );
}

#[tokio::test]
async fn terminal_disconnect_push_stops() {
    let (client, mut server) = common::client(config());
    let mut events = client.events();
    let connect = client.connect();
    let mut conn = server.accept_connected().await;
    within(connect).await.unwrap();
    events_until(&mut events, is_connected).await;

    conn.push(
        "",
        "disconnect",
        json!({ "code": 3503, "reason": "force disconnect" }),
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Disconnected(DisconnectedEvent {
            code: DisconnectErrorCode::FORCE_NO_RECONNECT,
            reason: "force disconnect".into(),
            reconnect: false,
        })
    );
    conn.closed().await;
    assert_eq!(client.state(), State::Disconnected);

    let retry = tokio::time::timeout(Duration::from_millis(200), server.listener.accept()).await;
    assert!(retry.is_err(), "client must not reconnect");
}

#[tokio::test]
async fn rejected_token_is_stale_until_replaced() {
    let (client, mut server) = common::client(config());
    let mut events = client.events();
    let connect = client.connect();

    let mut conn = server.accept().await;
    let (id, _) = conn.expect("connect").await;
    conn.error(id, 101, "unauthorized");

    let err = within(connect).await.unwrap_err();
    let ConnectFailed::Auth(AuthError::Rejected(rejected)) = err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(rejected.code, ClientErrorCode::Unauthorized);

    let seen = events_until(&mut events, |e| matches!(e, ClientEvent::Disconnected(_))).await;
    assert!(matches!(
        seen[1],
        ClientEvent::Error(Error::Auth(AuthError::Rejected(_)))
    ));
    assert_eq!(
        seen[2],
        ClientEvent::Disconnected(DisconnectedEvent {
            code: DisconnectErrorCode::INVALID_TOKEN,
            reason: "unauthorized".into(),
            reconnect: false,
        })
    );
    assert_eq!(client.state(), State::Disconnected);

    assert_eq!(
        within(client.connect()).await,
        Err(ConnectFailed::Auth(AuthError::StaleToken))
    );

    client.set_token("fresh-token");
    let connect = client.connect();
    let mut conn = server.accept().await;
    let body = conn.handshake().await;
    assert_eq!(body["token"], "fresh-token");
    within(connect).await.unwrap();
}

#[tokio::test]
async fn expired_token_disconnect_is_auth_failure() {
    let (client, mut server) = common::client(config());
    let mut events = client.events();
    let connect = client.connect();
    let conn = server.accept_connected().await;
    within(connect).await.unwrap();
    events_until(&mut events, is_connected).await;

    conn.push("", "disconnect", json!({ "code": 3005, "reason": "expired" }));
    let seen = events_until(&mut events, |e| matches!(e, ClientEvent::Disconnected(_))).await;
    assert!(matches!(
        seen[0],
        ClientEvent::Error(Error::Auth(AuthError::Disconnected { .. }))
    ));
    assert!(matches!(
        seen[1],
        ClientEvent::Disconnected(DisconnectedEvent { reconnect: false, .. })
    ));
    assert_eq!(
        within(client.connect()).await,
        Err(ConnectFailed::Auth(AuthError::StaleToken))
    );
}

#[tokio::test]
async fn handshake_timeout_retries() {
    let (client, mut server) = common::client(config().with_read_timeout(Duration::from_millis(100)));
    let mut events = client.events();
    let connect = client.connect();

    let mut first = server.accept().await;
    first.expect("connect").await;
    first.closed().await;

    let _conn = server.accept_connected().await;
    within(connect).await.unwrap();

    let seen = events_until(&mut events, is_connected).await;
    assert_eq!(
        seen[..3],
        [
            ClientEvent::Connecting(ConnectingEvent {
                attempt: 1,
                code: connecting_codes::CONNECT_CALLED,
                reason: "connect called".into(),
            }),
            ClientEvent::Error(Error::Connect(ConnectError::Timeout)),
            ClientEvent::Connecting(ConnectingEvent {
                attempt: 2,
                code: connecting_codes::TRANSPORT_CLOSED,
                reason: "transport closed".into(),
            }),
        ]
    );
}

#[tokio::test]
async fn refused_transport_backs_off() {
    let (client, mut server) = common::client(config());
    server.transport.set_refusing(true);
    let mut events = client.events();
    let connect = client.connect();

    for _ in 0..2 {
        events_until(&mut events, |e| {
            matches!(e, ClientEvent::Error(Error::Connect(ConnectError::Refused)))
        })
        .await;
    }
    assert_eq!(client.state(), State::Reconnecting);

    server.transport.set_refusing(false);
    let _conn = server.accept_connected().await;
    within(connect).await.unwrap();

    let seen = events_until(&mut events, is_connected).await;
    let ClientEvent::Connecting(last) = &seen[seen.len() - 2] else {
        panic!("expected connecting, got {seen:?}");
    };
    assert!(last.attempt >= 3, "{seen:?}");
}

#[tokio::test]
async fn invalid_url_is_terminal() {
    let client = Client::new("http://localhost/connection/websocket", config());
    let mut events = client.events();

    let err = within(client.connect()).await.unwrap_err();
    assert!(
        matches!(err, ConnectFailed::Terminal(ConnectError::InvalidUrl(_))),
        "{err:?}"
    );

    let seen = events_until(&mut events, |e| matches!(e, ClientEvent::Disconnected(_))).await;
    assert!(matches!(
        seen.last(),
        Some(ClientEvent::Disconnected(DisconnectedEvent { reconnect: false, .. }))
    ));
    assert_eq!(client.state(), State::Disconnected);
}

#[tokio::test]
async fn disconnect_then_connect_again() {
    let (client, mut server) = common::client(config());
    let mut events = client.events();
    let connect = client.connect();
    let mut conn = server.accept_connected().await;
    within(connect).await.unwrap();
    events_until(&mut events, is_connected).await;

    within(client.disconnect()).await;
    assert_eq!(client.state(), State::Disconnected);
    conn.closed().await;
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Disconnected(DisconnectedEvent {
            code: DisconnectErrorCode::DISCONNECT_CALLED,
            reason: "disconnect called".into(),
            reconnect: false,
        })
    );

    let connect = client.start();
    let _conn = server.accept_connected().await;
    within(connect).await.unwrap();
    within(client.stop()).await;
    assert_eq!(client.state(), State::Closed);
}

#[tokio::test]
async fn answers_server_pings() {
    let (client, mut server) = common::client(config());
    let connect = client.connect();
    let mut conn = server.accept().await;
    conn.handshake_with(json!({ "client": "client-1", "ping": 25, "pong": true }))
        .await;
    within(connect).await.unwrap();

    conn.ping();
    assert_eq!(conn.recv().await, Some(json!({})));
    assert_eq!(client.server_context().unwrap().ping, 25);
}

#[tokio::test]
async fn missing_server_ping_reconnects() {
    let config = config().with_max_server_ping_delay(Duration::from_millis(100));
    let (client, mut server) = common::client(config);
    let mut events = client.events();
    let connect = client.connect();
    let mut conn = server.accept().await;
    conn.handshake_with(json!({ "client": "client-1", "ping": 1, "pong": true }))
        .await;
    within(connect).await.unwrap();
    events_until(&mut events, is_connected).await;

    let _conn = server.accept_connected().await;
    let seen = events_until(&mut events, is_connected).await;
    assert_eq!(
        seen[..2],
        [
            ClientEvent::Error(Error::Stream(StreamError::KeepAliveTimeout)),
            ClientEvent::Disconnected(DisconnectedEvent {
                code: DisconnectErrorCode::NO_PONG,
                reason: "no ping".into(),
                reconnect: true,
            }),
        ]
    );
}

#[tokio::test]
async fn client_pings_when_server_does_not() {
    let config = config()
        .with_ping_interval(Duration::from_millis(50))
        .with_pong_timeout(Duration::from_millis(50));
    let (client, mut server) = common::client(config);
    let mut events = client.events();
    let connect = client.connect();
    let mut conn = server.accept_connected().await;
    within(connect).await.unwrap();
    events_until(&mut events, is_connected).await;

    let (id, _) = conn.expect("ping").await;
    conn.reply(id, "ping", json!({}));
    // unanswered this time
    conn.expect("ping").await;

    let _conn = server.accept_connected().await;
    let seen = events_until(&mut events, is_connected).await;
    assert_eq!(
        seen[..3],
        [
            ClientEvent::Error(Error::Stream(StreamError::KeepAliveTimeout)),
            ClientEvent::Disconnected(DisconnectedEvent {
                code: DisconnectErrorCode::NO_PONG,
                reason: "no ping".into(),
                reconnect: true,
            }),
            ClientEvent::Connecting(ConnectingEvent {
                attempt: 1,
                code: connecting_codes::NO_PING,
                reason: "no ping".into(),
            }),
        ]
    );
}

#[tokio::test]
async fn publish_request_reply() {
    let (client, mut server) = common::client(config());
    let connect = client.connect();
    let mut conn = server.accept_connected().await;
    within(connect).await.unwrap();

    let publish = tokio::spawn(
        client
            .publish("news", br#"{"text":"hi"}"#.to_vec())
            .into_future(),
    );
    let (id, body) = conn.expect("publish").await;
    assert_eq!(body, json!({ "channel": "news", "data": { "text": "hi" } }));
    conn.reply(id, "publish", json!({}));
    within(publish).await.unwrap().unwrap();

    let publish = tokio::spawn(client.publish("news", b"{}".to_vec()).into_future());
    let (id, _) = conn.expect("publish").await;
    conn.error(id, 103, "permission denied");
    let err = within(publish).await.unwrap().unwrap_err();
    assert!(
        matches!(err, RequestError::ErrorResponse(ref e) if e.code == ClientErrorCode::PermissionDenied),
        "{err:?}"
    );
}

#[tokio::test]
async fn publish_waits_for_connection() {
    let (client, mut server) = common::client(config());
    let publish = tokio::spawn(client.publish("news", b"{}".to_vec()).into_future());

    let connect = client.connect();
    let mut conn = server.accept_connected().await;
    within(connect).await.unwrap();

    let (id, body) = conn.expect("publish").await;
    assert_eq!(body["channel"], "news");
    conn.reply(id, "publish", json!({}));
    within(publish).await.unwrap().unwrap();
}

#[tokio::test]
async fn publish_times_out_while_disconnected() {
    let (client, _server) =
        common::client(config().with_read_timeout(Duration::from_millis(50)));
    let err = within(client.publish("news", b"{}".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Timeout(_)), "{err:?}");
}

#[tokio::test]
async fn dropping_every_handle_closes_session() {
    let (client, mut server) = common::client(config());
    let connect = client.connect();
    let mut conn = server.accept_connected().await;
    within(connect).await.unwrap();

    drop(client);
    conn.closed().await;
}
