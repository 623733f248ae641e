pub mod chat;
pub mod game;
pub mod net;
pub mod node;
pub mod time;
pub mod user;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::game::NewGameRequest;
    use crate::node::NodeAnnouncement;
    use crate::user::User;

    /// A user whose connection id is derived from the name (`conn-<name>`).
    pub fn make_user(name: &str) -> User {
        User::new(format!("conn-{name}"), name)
    }

    /// Create `n` users named `user1..=userN`.
    pub fn make_users(n: usize) -> Vec<User> {
        (1..=n).map(|i| make_user(&format!("user{i}"))).collect()
    }

    /// A public game request for `game_type` with spectators disabled.
    pub fn game_request(game_type: &str) -> NewGameRequest {
        NewGameRequest {
            name: format!("{game_type} game"),
            game_type: game_type.to_string(),
            ..NewGameRequest::default()
        }
    }

    /// Announcement for an execution node listening on a loopback port.
    pub fn node_announcement(name: &str, port: u16) -> NodeAnnouncement {
        NodeAnnouncement {
            name: name.to_string(),
            address: format!("127.0.0.1:{port}"),
            version: "1.0.0".to_string(),
        }
    }
}
