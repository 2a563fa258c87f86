use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContentUpdateMessage {
    pub content: String,
}

/// Inbound cursor move. Clients also send their username; the server ignores
/// it and uses the authenticated one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CursorMoveMessage {
    pub position: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PingMessage {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CursorUpdateMessage {
    pub username: String,
    pub position: usize,
    pub color: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UsersUpdateMessage {
    pub users: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PongMessage {
    pub date: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "content_update")]
    ContentUpdate(ContentUpdateMessage),
    #[serde(rename = "cursor_update")]
    CursorUpdate(CursorMoveMessage),
    #[serde(rename = "ping")]
    Ping(PingMessage),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "content_update")]
    ContentUpdate(ContentUpdateMessage),
    #[serde(rename = "cursor_update")]
    CursorUpdate(CursorUpdateMessage),
    #[serde(rename = "users_update")]
    UsersUpdate(UsersUpdateMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
}
