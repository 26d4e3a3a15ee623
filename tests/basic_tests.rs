use std::time::Duration;

use centrifuge_session::client::{Client, State};
use centrifuge_session::config::{
    BackoffReconnect, Config, Protocol, ReconnectStrategy, SubscriptionConfig,
};
use centrifuge_session::errors::{ClientError, ClientErrorCode, ConnectFailed};
use centrifuge_session::protocol::{Command, ConnectRequest, SubscribeRequest};
use centrifuge_session::subscription;

#[tokio::test]
async fn test_client_creation() {
    let config = Config::new().use_json();
    let client = Client::new("ws://localhost:8000/connection/websocket", config);

    // Check that client was created
    assert_eq!(client.state(), State::Disconnected);
    assert_eq!(client.server_context(), None);
}

#[tokio::test]
async fn test_subscription_creation() {
    let config = Config::new().use_json();
    let client = Client::new("ws://localhost:8000/connection/websocket", config);

    let subscription = client.new_subscription("test_channel");

    // Check that subscription was created
    assert_eq!(subscription.state(), subscription::State::Unsubscribed);
    assert_eq!(subscription.channel(), "test_channel");
    assert_eq!(subscription.config(), &SubscriptionConfig::default());
}

#[tokio::test]
async fn test_config_methods() {
    let config = Config::new()
        .use_json()
        .with_name("test_client")
        .with_version("1.0.0")
        .with_token("test_token")
        .with_read_timeout(Duration::from_secs(30))
        .with_ping_interval(Duration::from_secs(10))
        .with_pong_timeout(Duration::from_secs(2))
        .with_max_server_ping_delay(Duration::from_secs(3));

    // Check that configuration was applied
    assert_eq!(config.name, "test_client");
    assert_eq!(config.version, "1.0.0");
    assert_eq!(config.token, "test_token");
    assert_eq!(config.read_timeout, Duration::from_secs(30));
    assert_eq!(config.ping_interval, Duration::from_secs(10));
    assert_eq!(config.pong_timeout, Duration::from_secs(2));
    assert_eq!(config.max_server_ping_delay, Duration::from_secs(3));
}

#[tokio::test]
async fn test_subscription_callbacks() {
    let config = Config::new().use_json();
    let client = Client::new("ws://localhost:8000/connection/websocket", config);
    let subscription = client.new_subscription("test_channel");

    // Set up callbacks
    subscription.on_subscribing(|e| println!("Subscribing: {}", e.reason));
    subscription.on_subscribed(|e| println!("Subscribed to {}", e.channel));
    subscription.on_subscribe_error(|e| eprintln!("Subscribe error: {}", e.reason));
    subscription.on_unsubscribed(|e| println!("Unsubscribed: {}", e.code));
    subscription.on_publication(|e| println!("Publication: {:?}", e.data));
    subscription.on_join(|e| println!("Join: {}", e.info.user));
    subscription.on_leave(|e| println!("Leave: {}", e.info.user));
    subscription.on_event(|e| println!("Event on {}", e.channel()));

    assert_eq!(subscription.state(), subscription::State::Unsubscribed);
}

#[tokio::test]
async fn test_client_callbacks() {
    let config = Config::new().use_json();
    let client = Client::new("ws://localhost:8000/connection/websocket", config);

    // Set up callbacks
    client.on_connecting(|e| println!("Connecting, attempt {}", e.attempt));
    client.on_connected(|e| println!("Connected as {}", e.client_id));
    client.on_disconnected(|e| println!("Disconnected: {}", e.code));
    client.on_error(|err| eprintln!("Client error: {}", err));
    client.on_event(|e| println!("Event: {:?}", e));

    assert_eq!(client.state(), State::Disconnected);
}

#[tokio::test]
async fn test_config_protocols() {
    // Test JSON protocol
    let json_config = Config::new().use_json();
    assert_eq!(json_config.protocol, Protocol::Json);

    // Test Protobuf protocol
    let proto_config = Config::new().use_protobuf();
    assert_eq!(proto_config.protocol, Protocol::Protobuf);
}

#[tokio::test]
async fn test_reconnect_strategy() {
    let config = Config::new().with_reconnect_strategy(BackoffReconnect {
        factor: 2.0,
        min_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        jitter: 0.0,
    });

    assert_eq!(
        config.reconnect_strategy.time_before_next_attempt(1),
        Duration::from_secs(2)
    );
    assert_eq!(
        config.reconnect_strategy.time_before_next_attempt(5),
        Duration::from_secs(10)
    );
}

#[tokio::test]
async fn test_subscription_config() {
    let config = SubscriptionConfig::new()
        .with_token("channel-token")
        .with_data(br#"{"a":1}"#.to_vec())
        .recoverable(true)
        .positioned(true)
        .join_leave(true);

    assert_eq!(config.token, "channel-token");
    assert_eq!(config.data, br#"{"a":1}"#);
    assert!(config.recoverable);
    assert!(config.positioned);
    assert!(config.join_leave);
}

#[tokio::test]
async fn test_error_handling() {
    // Test error creation
    let error = ClientError::bad_request("Test error");
    assert_eq!(error.code, ClientErrorCode::BadRequest);

    let error = ClientError::unauthorized("Unauthorized");
    assert_eq!(error.code, ClientErrorCode::Unauthorized);
    assert!(error.code.is_auth_failure());

    let error = ClientError::internal("Internal error");
    assert_eq!(error.code, ClientErrorCode::Internal);
}

#[tokio::test]
async fn test_protocol_structures() {
    // Test command creation
    let connect_cmd = Command::Connect(ConnectRequest {
        token: "test_token".to_string(),
        name: "test_client".to_string(),
        version: "1.0.0".to_string(),
        ..Default::default()
    });

    let subscribe_cmd = Command::Subscribe(SubscribeRequest {
        channel: "test_channel".to_string(),
        recover: true,
        ..Default::default()
    });

    // Check that commands were created
    assert!(matches!(connect_cmd, Command::Connect(_)));
    assert!(matches!(subscribe_cmd, Command::Subscribe(_)));
}

#[tokio::test]
async fn test_client_connection_methods() {
    let config = Config::new().use_json();
    let client = Client::new("ws://localhost:8000/connection/websocket", config);

    // Futures may be dropped without awaiting
    let _connect_future = client.connect();
    let _disconnect_future = client.disconnect();

    client.set_token("new_token");
    client.close().await;
    assert_eq!(client.state(), State::Closed);
    assert_eq!(client.connect().await, Err(ConnectFailed::Closed));
}

#[tokio::test]
async fn test_subscription_methods() {
    let config = Config::new().use_json();
    let client = Client::new("ws://localhost:8000/connection/websocket", config);
    let subscription = client.new_subscription("test_channel");

    let _subscribe_future = subscription.subscribe();
    let _unsubscribe_future = subscription.unsubscribe();
    let _publish_future = subscription.publish(b"{}".to_vec());
    let _client_publish_future = client.publish("test_channel", b"{}".to_vec());

    client.remove_subscription(&subscription);
    client.close().await;
}

#[tokio::test]
async fn test_config_default_values() {
    let config = Config::new();

    // Check default values
    assert_eq!(config.protocol, Protocol::Json);
    assert_eq!(config.read_timeout, Duration::from_secs(5));
    assert_eq!(config.ping_interval, Duration::from_secs(25));
    assert_eq!(config.pong_timeout, Duration::from_secs(5));
    assert_eq!(config.max_server_ping_delay, Duration::from_secs(10));
    assert!(config.token.is_empty());

    // Check that configuration methods work
    let config = config
        .use_protobuf()
        .with_read_timeout(Duration::from_secs(10));

    assert_eq!(config.protocol, Protocol::Protobuf);
    assert_eq!(config.read_timeout, Duration::from_secs(10));
}
