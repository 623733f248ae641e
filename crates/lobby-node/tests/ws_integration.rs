mod common;

use lobby_core::game::GameId;
use lobby_core::net::messages::{
    ClientMessage, JoinGameMsg, LeaveGameMsg, NewGameMsg, SendChatMsg, ServerMessage,
    StartGameMsg, WatchGameMsg,
};
use lobby_core::test_helpers::game_request;
use lobby_node::handoff::{HANDOFF_AUDIENCE, HandOffClaims, TokenSigner};

use common::*;

fn new_game(game_type: &str) -> ClientMessage {
    ClientMessage::NewGame(NewGameMsg {
        request: game_request(game_type),
    })
}

fn join(game_id: GameId) -> ClientMessage {
    ClientMessage::JoinGame(JoinGameMsg {
        game_id,
        password: None,
    })
}

async fn read_state(stream: &mut WsStream) -> lobby_core::game::GameStateSummary {
    match ws_read_until(stream, |m| matches!(m, ServerMessage::GameStateChanged(_))).await {
        ServerMessage::GameStateChanged(changed) => changed.game,
        _ => unreachable!(),
    }
}

async fn read_failure(stream: &mut WsStream) -> String {
    match ws_read_until(stream, |m| matches!(m, ServerMessage::JoinFailed(_))).await {
        ServerMessage::JoinFailed(failed) => failed.reason,
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn anonymous_client_gets_lists_but_cannot_act() {
    let server = TestServer::new().await;
    let mut ws = ws_connect(&server.ws_url(None)).await;

    assert!(matches!(
        ws_read_server_msg(&mut ws).await,
        ServerMessage::UserList(_)
    ));
    assert!(matches!(
        ws_read_server_msg(&mut ws).await,
        ServerMessage::GameList(_)
    ));

    ws_send_client_msg(&mut ws, &new_game("X")).await;
    let reason = read_failure(&mut ws).await;
    assert!(reason.contains("logged in"), "unexpected reason: {reason}");
    assert!(server.state.lobby.read().await.games().is_empty());
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let server = TestServer::new().await;
    let url = format!("ws://{}/ws?access_token=not.a.token", server.addr);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
}

#[tokio::test]
async fn connected_user_is_registered_and_listed() {
    let server = TestServer::new().await;
    let _alice = ws_login(&server, "alice").await;

    let mut bob = ws_connect(&server.ws_url(Some("bob"))).await;
    match ws_read_server_msg(&mut bob).await {
        ServerMessage::UserList(list) => assert_eq!(list.users, ["alice", "bob"]),
        other => panic!("Expected UserList, got: {other:?}"),
    }
    assert_eq!(server.state.lobby.read().await.directory().len(), 2);
}

#[tokio::test]
async fn create_join_and_leave_over_websocket() {
    let server = TestServer::new().await;
    let mut alice = ws_login(&server, "alice").await;
    let mut bob = ws_login(&server, "bob").await;

    ws_send_client_msg(&mut alice, &new_game("X")).await;
    let state = read_state(&mut alice).await;
    assert_eq!(state.owner, "alice");
    let game_id = state.id;

    match ws_read_until(&mut bob, |m| matches!(m, ServerMessage::GameListChanged(_))).await {
        ServerMessage::GameListChanged(changed) => assert_eq!(changed.game.id, game_id),
        _ => unreachable!(),
    }

    ws_send_client_msg(&mut bob, &join(game_id)).await;
    let state = read_state(&mut alice).await;
    assert_eq!(state.players.len(), 2);
    let state = read_state(&mut bob).await;
    assert_eq!(state.players.len(), 2);

    ws_send_client_msg(&mut alice, &ClientMessage::LeaveGame(LeaveGameMsg {})).await;
    let state = read_state(&mut bob).await;
    assert_eq!(state.owner, "bob");
    assert_eq!(state.players.len(), 1);

    ws_send_client_msg(&mut bob, &ClientMessage::LeaveGame(LeaveGameMsg {})).await;
    match ws_read_until(&mut alice, |m| matches!(m, ServerMessage::GameRemoved(_))).await {
        ServerMessage::GameRemoved(removed) => assert_eq!(removed.game_id, game_id),
        _ => unreachable!(),
    }
    assert!(server.state.lobby.read().await.games().is_empty());
}

#[tokio::test]
async fn join_rejections_are_reported() {
    let server = TestServer::new().await;
    let mut alice = ws_login(&server, "alice").await;
    let mut bob = ws_login(&server, "bob").await;

    ws_send_client_msg(&mut bob, &join(GameId::new())).await;
    assert_eq!(read_failure(&mut bob).await, "That game no longer exists.");

    ws_send_client_msg(&mut alice, &new_game("X")).await;
    let game_id = read_state(&mut alice).await.id;

    ws_send_client_msg(
        &mut bob,
        &ClientMessage::WatchGame(WatchGameMsg {
            game_id,
            password: None,
        }),
    )
    .await;
    assert_eq!(
        read_failure(&mut bob).await,
        "That game does not allow spectators."
    );

    ws_send_client_msg(&mut alice, &new_game("Y")).await;
    assert_eq!(
        read_failure(&mut alice).await,
        "You are already in a game so cannot join another one."
    );
}

#[tokio::test]
async fn start_without_execution_node_fails() {
    let server = TestServer::new().await;
    let mut alice = ws_login(&server, "alice").await;

    ws_send_client_msg(&mut alice, &new_game("X")).await;
    let game_id = read_state(&mut alice).await.id;

    ws_send_client_msg(&mut alice, &ClientMessage::StartGame(StartGameMsg {})).await;
    let reason = read_failure(&mut alice).await;
    assert!(reason.contains("Could not find a game node"));
    assert!(!server.state.lobby.read().await.games().get(game_id).unwrap().started);
}

#[tokio::test]
async fn start_hands_off_both_players() {
    let server = TestServer::new().await;
    server.announce_node("exec-1", 9100).await;

    let mut alice = ws_login(&server, "alice").await;
    let mut bob = ws_login(&server, "bob").await;

    ws_send_client_msg(&mut alice, &new_game("X")).await;
    let game_id = read_state(&mut alice).await.id;
    ws_send_client_msg(&mut bob, &join(game_id)).await;
    read_state(&mut bob).await;

    ws_send_client_msg(&mut alice, &ClientMessage::StartGame(StartGameMsg {})).await;

    let signer = TokenSigner::new(TEST_SECRET, TEST_ISSUER);
    for (stream, name) in [(&mut alice, "alice"), (&mut bob, "bob")] {
        match ws_read_until(stream, |m| matches!(m, ServerMessage::HandOff(_))).await {
            ServerMessage::HandOff(handoff) => {
                assert_eq!(handoff.node_name, "exec-1");
                assert_eq!(handoff.address, "127.0.0.1:9100");
                assert_eq!(handoff.game_id, game_id);
                let claims = signer
                    .verify::<HandOffClaims>(&handoff.credential, HANDOFF_AUDIENCE)
                    .unwrap();
                assert_eq!(claims.body.name, name);
                assert_eq!(claims.body.game_id, game_id.to_string());
            },
            _ => unreachable!(),
        }
    }

    let lobby = server.state.lobby.read().await;
    assert!(lobby.games().get(game_id).unwrap().started);
    assert_eq!(lobby.nodes().get("exec-1").unwrap().num_games, 1);
}

#[tokio::test]
async fn disconnect_removes_member_from_forming_game() {
    let server = TestServer::new().await;
    let mut alice = ws_login(&server, "alice").await;
    let mut bob = ws_login(&server, "bob").await;

    ws_send_client_msg(&mut alice, &new_game("X")).await;
    let game_id = read_state(&mut alice).await.id;
    ws_send_client_msg(&mut bob, &join(game_id)).await;
    read_state(&mut alice).await;

    drop(bob);
    let state = read_state(&mut alice).await;
    assert_eq!(state.players.len(), 1);
    assert!(state.messages.iter().any(|m| m == "bob has disconnected"));

    eventually(&server.state.lobby, |lobby| lobby.directory().len() == 1).await;
}

#[tokio::test]
async fn chat_reaches_every_client() {
    let server = TestServer::new().await;
    let mut alice = ws_login(&server, "alice").await;
    let mut bob = ws_login(&server, "bob").await;

    ws_send_client_msg(
        &mut alice,
        &ClientMessage::SendChat(SendChatMsg {
            message: "hello everyone".to_string(),
        }),
    )
    .await;

    for stream in [&mut alice, &mut bob] {
        match ws_read_until(stream, |m| matches!(m, ServerMessage::ChatMessage(_))).await {
            ServerMessage::ChatMessage(chat) => {
                assert_eq!(chat.message.user, "alice");
                assert_eq!(chat.message.message, "hello everyone");
            },
            _ => unreachable!(),
        }
    }

    // Late joiners get the recent history after the lists.
    let mut carol = ws_login(&server, "carol").await;
    match ws_read_server_msg(&mut carol).await {
        ServerMessage::ChatMessage(chat) => assert_eq!(chat.message.message, "hello everyone"),
        other => panic!("Expected ChatMessage, got: {other:?}"),
    }
}

#[tokio::test]
async fn blocked_user_does_not_see_game() {
    let server = TestServer::new().await;
    let mut carol = ws_connect(&format!(
        "ws://{}/ws?access_token={}",
        server.addr,
        lobby_token("carol", &["dave"])
    ))
    .await;
    ws_read_server_msg(&mut carol).await;
    ws_read_server_msg(&mut carol).await;
    let mut dave = ws_login(&server, "dave").await;
    let mut erin = ws_login(&server, "erin").await;

    ws_send_client_msg(&mut carol, &new_game("X")).await;
    read_state(&mut carol).await;

    assert!(matches!(
        ws_read_server_msg(&mut erin).await,
        ServerMessage::GameListChanged(_)
    ));
    assert!(ws_try_read_raw(&mut dave, 300).await.is_none());
}
