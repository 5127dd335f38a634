// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::{info, warn};

use tandem::auth::AuthEndpoint;
use tandem::config::RoomConfig;
use tandem::driver::open_room;

/// Join a tandem room and log its activity.
#[derive(Debug, Parser)]
struct Args {
    /// WebSocket base URL of the room server.
    #[arg(long, default_value = "ws://127.0.0.1:9810", env = "TANDEM_SERVER")]
    server: String,

    /// Room to join.
    #[arg(long, env = "TANDEM_ROOM")]
    room: String,

    /// Public authorization endpoint.
    #[arg(long, default_value = "http://127.0.0.1:9810/api/v1/auth", env = "TANDEM_AUTH_URL")]
    auth_url: String,

    /// Publishable API key for the public auth endpoint.
    #[arg(long, env = "TANDEM_PUBLIC_KEY")]
    public_api_key: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = RoomConfig::new(
        args.server,
        args.room,
        AuthEndpoint::Public { url: args.auth_url, public_api_key: args.public_api_key },
    );
    let room = open_room(config);

    let mut connection = room.subscribe_connection();
    let mut others = room.subscribe_others();
    let mut events = room.subscribe_events();
    let mut errors = room.subscribe_errors();

    room.connect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            status = connection.recv() => match status {
                Ok(status) => info!(status = status.as_str(), "connection"),
                Err(_) => break,
            },
            notification = others.recv() => {
                if let Ok(notification) = notification {
                    info!(event = ?notification.event, peers = notification.others.len(), "others");
                }
            }
            event = events.recv() => {
                if let Ok(event) = event {
                    info!(from = event.connection_id, payload = %event.event, "event");
                }
            }
            error = errors.recv() => {
                if let Ok(error) = error {
                    warn!(err = %error, "room error");
                }
            }
        }
    }

    room.shutdown();
}
