mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use lobby_core::net::bus::BusMessage;
use lobby_core::net::messages::ServerMessage;
use lobby_core::net::protocol::decode_server_message;
use lobby_core::test_helpers::{game_request, make_user, node_announcement};
use lobby_node::bus::{LocalBus, MessageBus};
use lobby_node::store::GameStore;

use common::*;

/// Two lobby nodes converging over one shared bus.
fn two_nodes() -> (Arc<LocalBus>, TestNode, TestNode) {
    let bus = Arc::new(LocalBus::new());
    let a = TestNode::start(test_config("lobby-a"), Arc::clone(&bus));
    let b = TestNode::start(test_config("lobby-b"), Arc::clone(&bus));
    (bus, a, b)
}

fn announce(bus: &LocalBus, name: &str, port: u16) {
    let envelope = BusMessage::NodeHello(node_announcement(name, port))
        .encode(name)
        .unwrap();
    bus.publish(envelope).unwrap();
}

/// Attach a fake client connection to a node's hub.
async fn attach(node: &TestNode, connection_id: &str) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(64);
    node.state
        .hub
        .write()
        .await
        .register(connection_id.to_string(), tx);
    rx
}

async fn next_handoff(rx: &mut mpsc::Receiver<Bytes>) -> lobby_core::net::messages::HandOffMsg {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let data = rx.recv().await.expect("client channel closed");
            if let ServerMessage::HandOff(handoff) = decode_server_message(&data).unwrap() {
                return handoff;
            }
        }
    })
    .await
    .expect("Timed out waiting for hand-off")
}

#[tokio::test]
async fn users_replicate_without_echo() {
    let (_bus, a, b) = two_nodes();

    a.lobby()
        .write()
        .await
        .register_user(make_user("alice"))
        .unwrap();
    b.lobby()
        .write()
        .await
        .register_user(make_user("bob"))
        .unwrap();

    eventually(b.lobby(), |lobby| lobby.user("conn-alice").is_some()).await;
    eventually(a.lobby(), |lobby| lobby.user("conn-bob").is_some()).await;

    let lobby = a.lobby().read().await;
    assert_eq!(lobby.directory().len(), 2);
    assert_eq!(lobby.user("conn-alice").unwrap().origin_node, "lobby-a");
    assert_eq!(lobby.user("conn-bob").unwrap().origin_node, "lobby-b");
    drop(lobby);

    let outbound = a.lobby().write().await.unregister_user("conn-alice").unwrap();
    assert!(outbound.is_empty());
    eventually(b.lobby(), |lobby| lobby.user("conn-alice").is_none()).await;
}

#[tokio::test]
async fn cross_node_create_join_leave() {
    let (_bus, a, b) = two_nodes();
    a.lobby()
        .write()
        .await
        .register_user(make_user("alice"))
        .unwrap();
    b.lobby()
        .write()
        .await
        .register_user(make_user("bob"))
        .unwrap();
    eventually(b.lobby(), |lobby| lobby.user("conn-alice").is_some()).await;
    eventually(a.lobby(), |lobby| lobby.user("conn-bob").is_some()).await;

    let (game_id, _) = a
        .lobby()
        .write()
        .await
        .create_game("conn-alice", game_request("X"))
        .unwrap();
    eventually(b.lobby(), |lobby| lobby.games().contains(game_id)).await;

    // Bob's node is authoritative for his join.
    b.lobby()
        .write()
        .await
        .join_game("conn-bob", game_id, "")
        .unwrap();
    eventually(a.lobby(), |lobby| {
        lobby
            .games()
            .get(game_id)
            .is_some_and(|g| g.player_count() == 2)
    })
    .await;

    a.lobby().write().await.leave_game("conn-alice").unwrap();
    eventually(b.lobby(), |lobby| {
        lobby.games().get(game_id).is_some_and(|g| g.owner == "bob")
    })
    .await;

    b.lobby().write().await.leave_game("conn-bob").unwrap();
    eventually(a.lobby(), |lobby| lobby.games().is_empty()).await;
    assert!(b.lobby().read().await.games().is_empty());
}

#[tokio::test]
async fn remote_start_hands_off_on_every_node() {
    let (bus, a, b) = two_nodes();
    announce(&bus, "exec-1", 9200);
    eventually(a.lobby(), |lobby| lobby.nodes().get("exec-1").is_some()).await;
    eventually(b.lobby(), |lobby| lobby.nodes().get("exec-1").is_some()).await;

    let mut alice_rx = attach(&a, "conn-alice").await;
    let mut bob_rx = attach(&b, "conn-bob").await;
    a.lobby()
        .write()
        .await
        .register_user(make_user("alice"))
        .unwrap();
    b.lobby()
        .write()
        .await
        .register_user(make_user("bob"))
        .unwrap();
    eventually(a.lobby(), |lobby| lobby.user("conn-bob").is_some()).await;

    let (game_id, _) = a
        .lobby()
        .write()
        .await
        .create_game("conn-alice", game_request("X"))
        .unwrap();
    eventually(b.lobby(), |lobby| lobby.games().contains(game_id)).await;
    b.lobby()
        .write()
        .await
        .join_game("conn-bob", game_id, "")
        .unwrap();
    eventually(a.lobby(), |lobby| {
        lobby
            .games()
            .get(game_id)
            .is_some_and(|g| g.player_count() == 2)
    })
    .await;

    let outbound = a.lobby().write().await.start_game("conn-alice").unwrap();
    a.state.hub.read().await.deliver(&outbound);

    let alice_handoff = next_handoff(&mut alice_rx).await;
    let bob_handoff = next_handoff(&mut bob_rx).await;
    assert_eq!(alice_handoff.node_name, "exec-1");
    assert_eq!(bob_handoff.node_name, "exec-1");
    assert_eq!(bob_handoff.game_id, game_id);

    // Both replicas account for the load on the chosen node.
    eventually(b.lobby(), |lobby| {
        lobby.nodes().get("exec-1").is_some_and(|n| n.num_games == 1)
    })
    .await;
    assert_eq!(
        a.lobby().read().await.nodes().get("exec-1").unwrap().num_games,
        1
    );

    // The starting node persisted the session.
    let store = Arc::clone(&a.store);
    tokio::time::timeout(Duration::from_secs(5), async move {
        while store.active_games().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timed out waiting for the store writer");
}

#[tokio::test]
async fn execution_node_retires_started_game() {
    let (bus, a, b) = two_nodes();
    announce(&bus, "exec-1", 9300);
    eventually(a.lobby(), |lobby| lobby.nodes().available_count() == 1).await;

    a.lobby()
        .write()
        .await
        .register_user(make_user("alice"))
        .unwrap();
    let (game_id, _) = a
        .lobby()
        .write()
        .await
        .create_game("conn-alice", game_request("X"))
        .unwrap();
    a.lobby().write().await.start_game("conn-alice").unwrap();
    eventually(b.lobby(), |lobby| {
        lobby.games().get(game_id).is_some_and(|g| g.started)
    })
    .await;

    bus.publish(BusMessage::GameRemove(game_id).encode("exec-1").unwrap())
        .unwrap();
    eventually(a.lobby(), |lobby| lobby.games().is_empty()).await;
    eventually(b.lobby(), |lobby| lobby.games().is_empty()).await;
}

#[tokio::test]
async fn chat_is_shared_across_nodes() {
    let (_bus, a, b) = two_nodes();
    a.lobby()
        .write()
        .await
        .register_user(make_user("alice"))
        .unwrap();

    let id = a
        .lobby()
        .write()
        .await
        .post_chat("conn-alice", "hi from a")
        .unwrap();
    eventually(a.lobby(), |lobby| lobby.chat().get(id).is_some()).await;
    eventually(b.lobby(), |lobby| lobby.chat().get(id).is_some()).await;

    a.lobby().write().await.remove_chat("conn-alice", id).unwrap();
    eventually(b.lobby(), |lobby| lobby.chat().is_empty()).await;
}

#[tokio::test]
async fn monitor_heartbeats_and_evicts_silent_nodes() {
    let bus = Arc::new(LocalBus::new());
    let mut config = test_config("lobby-a");
    config.nodes.monitor_interval_secs = 1;
    config.nodes.heartbeat_timeout_secs = 1;
    let mut records = bus.subscribe();
    let a = TestNode::start(config, Arc::clone(&bus));

    announce(&bus, "exec-1", 9600);
    eventually(a.lobby(), |lobby| lobby.nodes().available_count() == 1).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = records.recv().await.unwrap();
            if matches!(BusMessage::decode(&envelope), Ok(BusMessage::LobbyHeartbeat(_))) {
                assert_eq!(envelope.origin, "lobby-a");
                return;
            }
        }
    })
    .await
    .expect("Timed out waiting for a lobby heartbeat");

    eventually(a.lobby(), |lobby| {
        lobby.nodes().get("exec-1").is_some_and(|n| n.disconnected)
    })
    .await;
    assert!(a.lobby().read().await.nodes().select_node_for_game().is_none());
}

#[tokio::test]
async fn late_game_record_does_not_resurrect_removed_game() {
    let (bus, a, b) = two_nodes();
    a.lobby()
        .write()
        .await
        .register_user(make_user("alice"))
        .unwrap();
    let (game_id, _) = a
        .lobby()
        .write()
        .await
        .create_game("conn-alice", game_request("X"))
        .unwrap();
    eventually(b.lobby(), |lobby| lobby.games().contains(game_id)).await;
    let mut stale = b.lobby().read().await.games().get(game_id).unwrap().clone();

    a.lobby().write().await.leave_game("conn-alice").unwrap();
    eventually(b.lobby(), |lobby| !lobby.games().contains(game_id)).await;

    // A third lobby node publishes a join made before it saw the removal.
    let mut carol = make_user("carol");
    carol.origin_node = "lobby-c".to_string();
    stale.join(&carol, "").unwrap();
    bus.publish(BusMessage::GameUpdate(stale).encode("lobby-c").unwrap())
        .unwrap();
    // Records are applied in order, so once this marker lands the update has too.
    announce(&bus, "exec-marker", 9100);

    for node in [&a, &b] {
        eventually(node.lobby(), |lobby| lobby.nodes().get("exec-marker").is_some()).await;
        let lobby = node.lobby().read().await;
        assert!(!lobby.games().contains(game_id));
        assert!(lobby.games().game_for_member("alice").is_none());
    }
}
