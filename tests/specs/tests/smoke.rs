// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests: the real client against the in-process room
//! server stub, over real sockets and timers.

use std::time::Duration;

use serde_json::json;
use tandem::auth::AuthEndpoint;
use tandem::{open_room, ConnectionStatus, RoomConfig, RoomError};
use tandem_protocol::{JsonObject, SerializedNode, ServerMsg, TARGET_ALL};
use tandem_specs::StubServer;

const TIMEOUT: Duration = Duration::from_secs(5);

fn config_for(server: &StubServer) -> RoomConfig {
    let mut config = RoomConfig::new(
        server.ws_url(),
        "room:spec",
        AuthEndpoint::Private { url: server.auth_url() },
    );
    config.initial_presence = [("status".to_owned(), json!("here"))].into_iter().collect();
    config
}

async fn wait_for_status(
    rx: &mut tokio::sync::broadcast::Receiver<ConnectionStatus>,
    want: &str,
) -> anyhow::Result<ConnectionStatus> {
    loop {
        let status = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for status {want}"))??;
        if status.as_str() == want {
            return Ok(status);
        }
    }
}

#[tokio::test]
async fn cold_connect_announces_full_presence() -> anyhow::Result<()> {
    let mut server = StubServer::start().await?;
    let room = open_room(config_for(&server));
    let mut connection = room.subscribe_connection();

    room.connect();
    wait_for_status(&mut connection, "open").await?;

    let frame = server.recv_json().await?;
    assert_eq!(frame["type"], 100);
    assert_eq!(frame["targetActor"], TARGET_ALL);
    assert_eq!(frame["data"]["status"], "here");

    room.shutdown();
    Ok(())
}

#[tokio::test]
async fn presence_flows_both_ways() -> anyhow::Result<()> {
    let mut server = StubServer::start().await?;
    let room = open_room(config_for(&server));
    let mut connection = room.subscribe_connection();
    let mut others = room.subscribe_others();

    room.connect();
    wait_for_status(&mut connection, "open").await?;
    let _announce = server.recv_json().await?;

    // A peer joins and announces its presence to us.
    server.send_msg(&ServerMsg::UserJoined { actor: 7, id: Some("u7".to_owned()), info: None });
    server.send_msg(&ServerMsg::UpdatePresence {
        actor: 7,
        data: [("cursor".to_owned(), json!({"x": 3}))].into_iter().collect(),
        target_actor: Some(1),
    });

    // Enter, then update.
    loop {
        let notification = tokio::time::timeout(TIMEOUT, others.recv()).await??;
        let peers = notification.others;
        if peers.len() == 1 && peers[0].presence.is_some() {
            assert_eq!(peers[0].connection_id, 7);
            assert_eq!(peers[0].presence.as_ref().and_then(|p| p.get("cursor")), Some(&json!({"x": 3})));
            break;
        }
    }

    // Our reply to the joiner is a targeted full presence.
    let reply = server.recv_json().await?;
    assert_eq!(reply["type"], 100);
    assert_eq!(reply["targetActor"], 7);

    room.shutdown();
    Ok(())
}

#[tokio::test]
async fn storage_fetch_resolves_snapshot() -> anyhow::Result<()> {
    let mut server = StubServer::start().await?;
    let room = open_room(config_for(&server));
    let mut connection = room.subscribe_connection();

    room.connect();
    wait_for_status(&mut connection, "open").await?;
    let _announce = server.recv_json().await?;

    let storage_task = {
        let room = room.clone();
        tokio::spawn(async move { room.storage().await })
    };

    // The client asks for storage; answer with a small document.
    let fetch = server.recv_json().await?;
    assert_eq!(fetch["type"], 200);
    server.send_msg(&ServerMsg::InitialStorageState {
        items: vec![(
            "0:0".to_owned(),
            SerializedNode::Object {
                parent_id: None,
                parent_key: None,
                data: [("title".to_owned(), json!("hello"))].into_iter().collect(),
            },
        )],
    });

    let snapshot = tokio::time::timeout(TIMEOUT, storage_task).await???;
    assert_eq!(snapshot, json!({"title": "hello"}));

    room.shutdown();
    Ok(())
}

#[tokio::test]
async fn server_kick_surfaces_error_and_goes_unavailable() -> anyhow::Result<()> {
    let mut server = StubServer::start().await?;
    let room = open_room(config_for(&server));
    let mut connection = room.subscribe_connection();
    let mut errors = room.subscribe_errors();

    room.connect();
    wait_for_status(&mut connection, "open").await?;
    let _announce = server.recv_json().await?;

    server.close(4001, "kicked");

    let error = tokio::time::timeout(TIMEOUT, errors.recv()).await??;
    assert_eq!(error, RoomError::Protocol { code: 4001, reason: "kicked".to_owned() });

    wait_for_status(&mut connection, "failed").await?;
    wait_for_status(&mut connection, "unavailable").await?;

    room.shutdown();
    Ok(())
}

#[tokio::test]
async fn local_mutations_reach_the_server() -> anyhow::Result<()> {
    let mut server = StubServer::start().await?;
    let room = open_room(config_for(&server));
    let mut connection = room.subscribe_connection();

    room.connect();
    wait_for_status(&mut connection, "open").await?;
    let _announce = server.recv_json().await?;

    let _fetch = {
        let room = room.clone();
        tokio::spawn(async move { room.storage().await })
    };
    let fetch = server.recv_json().await?;
    assert_eq!(fetch["type"], 200);
    server.send_msg(&ServerMsg::InitialStorageState {
        items: vec![(
            "0:0".to_owned(),
            SerializedNode::Object { parent_id: None, parent_key: None, data: JsonObject::new() },
        )],
    });

    // Wait for the load to land, then mutate.
    let mut loaded = room.storage_loaded();
    tokio::time::timeout(TIMEOUT, loaded.wait_for(|l| *l))
        .await?
        .map_err(|_| anyhow::anyhow!("room shut down"))?;
    room.with(|machine| machine.update_object("0:0", [("n".to_owned(), json!(1))].into_iter().collect()))?;

    let update = server.recv_json().await?;
    assert_eq!(update["type"], 201);
    assert_eq!(update["ops"][0]["type"], 3);
    assert_eq!(update["ops"][0]["data"]["n"], 1);

    room.shutdown();
    Ok(())
}
