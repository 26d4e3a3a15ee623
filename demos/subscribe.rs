use std::time::Duration;

use clap::Parser;
use centrifuge_session::client::Client;
use centrifuge_session::config::{Config, SubscriptionConfig};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(version, about = "subscribe to a Centrifugo channel and print what arrives")]
struct Arguments {
    #[arg(short, long, help = "server endpoint", default_value = "ws://localhost:8000/connection/websocket")]
    url: String,
    #[arg(short, long, help = "connection token", default_value = "")]
    token: String,
    #[arg(short, long, help = "channel to subscribe to", default_value = "chat_room_1")]
    channel: String,
    #[arg(short, long, help = "publish a counter every second")]
    publish: bool,
    #[arg(long, help = "use protobuf instead of json")]
    protobuf: bool,
}

#[tokio::main]
async fn main() {
    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct Message {
        hello: i32,
    }

    let args = Arguments::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            Targets::new()
                .with_default(LevelFilter::INFO)
                .with_target("centrifuge_session", LevelFilter::DEBUG),
        )
        .init();

    let mut config = Config::new().with_token(args.token);
    let url = if args.protobuf {
        config = config.use_protobuf();
        format!("{}?format=protobuf", args.url)
    } else {
        args.url
    };

    let client = Client::new(&url, config);
    client.on_connecting(|e| {
        log::info!("connecting (attempt={}, code={}, reason={})", e.attempt, e.code, e.reason);
    });
    client.on_connected(|e| {
        log::info!("connected as {} to server {}", e.client_id, e.version);
    });
    client.on_disconnected(|e| {
        log::info!("disconnected (code={}, reason={}, reconnect={})", e.code, e.reason, e.reconnect);
    });
    client.on_error(|err| {
        log::warn!("error: {}", err);
    });

    let sub = client.new_subscription_with(&args.channel, SubscriptionConfig::new().recoverable(true));
    sub.on_subscribing(|e| {
        log::info!("subscribing to {} (code={}, reason={})", e.channel, e.code, e.reason);
    });
    sub.on_subscribed(|e| {
        log::info!("subscribed to {} (recovered={})", e.channel, e.recovered);
    });
    sub.on_subscribe_error(|e| {
        log::warn!("subscribe to {} failed (code={}, reason={})", e.channel, e.code, e.reason);
    });
    sub.on_unsubscribed(|e| {
        log::info!("unsubscribed from {} (code={}, reason={})", e.channel, e.code, e.reason);
    });
    sub.on_publication(|e| match serde_json::from_slice::<Message>(&e.data) {
        Ok(message) => log::info!("publication at {:?}: {:?}", e.offset, message),
        Err(_) => log::info!("publication at {:?}: {}", e.offset, String::from_utf8_lossy(&e.data)),
    });
    sub.on_join(|e| log::info!("{} joined {}", e.info.user, e.channel));
    sub.on_leave(|e| log::info!("{} left {}", e.info.user, e.channel));
    sub.subscribe();

    client.connect();

    let publisher = args.publish.then(|| {
        let sub = sub.clone();
        tokio::spawn(async move {
            for i in 0.. {
                let data = serde_json::to_vec(&Message { hello: i }).unwrap();
                if let Err(err) = sub.publish(data).await {
                    log::warn!("publish failed: {}", err);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
    });

    tokio::signal::ctrl_c().await.unwrap();
    if let Some(publisher) = publisher {
        publisher.abort();
    }
    client.stop().await;
}
