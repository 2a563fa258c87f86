use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    CollabError, ContentUpdateMessage, CursorUpdateMessage, SendMessage, UsersUpdateMessage,
};
use super::color::presence_color;

/// Outbound queue of one connection.
pub type MemberSender = mpsc::Sender<SendMessage>;

/// Messages a connection may have queued before it is evicted as too slow.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// One connection's presence within a room
#[derive(Debug)]
pub struct Member {
    pub connection_id: Uuid,
    pub username: String,
    pub cursor: Option<usize>,
    pub color: &'static str,
    tx: MemberSender,
}

impl Member {
    pub fn new(connection_id: Uuid, username: impl Into<String>, tx: MemberSender) -> Self {
        let username = username.into();
        let color = presence_color(&username);
        Self { connection_id, username, cursor: None, color, tx }
    }

    /// Queue a message. `false` when the connection is not keeping up or is gone.
    fn try_send(&self, msg: SendMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue of {} ({}) is full", self.username, self.connection_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Connection {} is closing", self.connection_id);
                false
            }
        }
    }

    fn presence(&self) -> Presence {
        Presence {
            connection_id: self.connection_id,
            username: self.username.clone(),
            cursor: self.cursor,
            color: self.color,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub connection_id: Uuid,
    pub username: String,
    pub cursor: Option<usize>,
    pub color: &'static str,
}

/// What a joining member needs for its first render
#[derive(Debug, Clone)]
pub struct JoinSnapshot {
    pub content: Option<String>,
    pub others: Vec<Presence>,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub removed: bool,
    pub remaining: usize,
}

#[derive(Debug)]
struct RoomState {
    content: Option<String>,
    members: Vec<Member>,
    closed: bool,
}

impl RoomState {
    fn users(&self) -> Vec<String> {
        self.members.iter().map(|m| m.username.clone()).collect()
    }

    fn position(&self, connection_id: Uuid) -> Option<usize> {
        self.members.iter().position(|m| m.connection_id == connection_id)
    }

    fn broadcast_users(&mut self) {
        let msg = SendMessage::UsersUpdate(UsersUpdateMessage { users: self.users() });
        self.deliver(None, &msg);
    }

    fn broadcast_except(&mut self, sender: Uuid, msg: SendMessage) -> usize {
        self.deliver(Some(sender), &msg)
    }

    /// Queue `msg` for every member but `skip`. Members whose queue is full or
    /// closed are evicted, and the rest are told who is left.
    fn deliver(&mut self, skip: Option<Uuid>, msg: &SendMessage) -> usize {
        let mut delivered = 0;
        let mut stalled = Vec::new();
        for member in self.members.iter().filter(|m| Some(m.connection_id) != skip) {
            if member.try_send(msg.clone()) {
                delivered += 1;
            } else {
                stalled.push(member.connection_id);
            }
        }
        if !stalled.is_empty() {
            self.evict(&stalled);
        }
        delivered
    }

    /// Dropping a member drops the room's sender, which ends its socket's send loop.
    fn evict(&mut self, connection_ids: &[Uuid]) {
        self.members.retain(|m| !connection_ids.contains(&m.connection_id));
        warn!("Evicted {} connections that stopped reading", connection_ids.len());
        self.broadcast_users();
    }
}

/// Authoritative live state of one file.
///
/// Every mutation and every enqueue to a member happens under `state`, so all
/// members observe broadcasts in the order the room received the inbound
/// messages. Content sync is whole-buffer last-writer-wins.
///
/// Member queues are bounded. A member whose queue fills up is evicted
/// instead of letting the room buffer for it without limit.
#[derive(Debug)]
pub struct Room {
    path: String,
    max_content_bytes: usize,
    state: Mutex<RoomState>,
}

impl Room {
    pub fn new(path: impl Into<String>, content: Option<String>, max_content_bytes: usize) -> Self {
        Self {
            path: path.into(),
            max_content_bytes,
            state: Mutex::new(RoomState { content, members: Vec::new(), closed: false }),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Add a member and queue its initial snapshot ahead of any later broadcast.
    pub async fn join(&self, member: Member) -> Result<JoinSnapshot, CollabError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(CollabError::RoomClosed(self.path.clone()));
        }

        let others: Vec<Presence> = state.members.iter().map(Member::presence).collect();

        let mut initial = Vec::new();
        if let Some(content) = &state.content {
            initial.push(SendMessage::ContentUpdate(ContentUpdateMessage { content: content.clone() }));
        }
        for other in &others {
            if let Some(position) = other.cursor {
                initial.push(SendMessage::CursorUpdate(CursorUpdateMessage {
                    username: other.username.clone(),
                    position,
                    color: other.color.to_string(),
                }));
            }
        }
        for msg in initial {
            if !member.try_send(msg) {
                return Err(CollabError::CapacityExceeded(format!(
                    "initial state of {} does not fit the outbound queue",
                    self.path
                )));
            }
        }

        debug!("{} joined room {} ({} already present)", member.username, self.path, others.len());
        state.members.push(member);
        state.broadcast_users();

        Ok(JoinSnapshot {
            content: state.content.clone(),
            others,
            users: state.users(),
        })
    }

    /// Replace the content wholesale and forward it to everyone but the sender.
    pub async fn apply_content_update(&self, connection_id: Uuid, content: String) -> Result<usize, CollabError> {
        if content.len() > self.max_content_bytes {
            return Err(CollabError::MalformedMessage(format!(
                "content of {} bytes exceeds limit of {} bytes",
                content.len(),
                self.max_content_bytes
            )));
        }

        let mut state = self.state.lock().await;
        if state.position(connection_id).is_none() {
            return Err(CollabError::NotMember(connection_id.to_string()));
        }
        state.content = Some(content.clone());
        let recipients = state.broadcast_except(
            connection_id,
            SendMessage::ContentUpdate(ContentUpdateMessage { content }),
        );
        Ok(recipients)
    }

    /// Store and forward a cursor, clamped to the end of the content.
    pub async fn update_cursor(&self, connection_id: Uuid, position: usize) -> Result<usize, CollabError> {
        let mut state = self.state.lock().await;
        let idx = state
            .position(connection_id)
            .ok_or_else(|| CollabError::NotMember(connection_id.to_string()))?;
        let end = state.content.as_ref().map_or(0, |c| c.chars().count());
        let position = position.min(end);

        let member = &mut state.members[idx];
        member.cursor = Some(position);
        let msg = SendMessage::CursorUpdate(CursorUpdateMessage {
            username: member.username.clone(),
            position,
            color: member.color.to_string(),
        });
        Ok(state.broadcast_except(connection_id, msg))
    }

    /// Queue a reply for a single member.
    pub async fn send_to(&self, connection_id: Uuid, msg: SendMessage) -> Result<(), CollabError> {
        let mut state = self.state.lock().await;
        let idx = state
            .position(connection_id)
            .ok_or_else(|| CollabError::NotMember(connection_id.to_string()))?;
        if !state.members[idx].try_send(msg) {
            state.evict(&[connection_id]);
        }
        Ok(())
    }

    /// Remove a member. Safe to call more than once for the same connection.
    pub async fn leave(&self, connection_id: Uuid) -> LeaveOutcome {
        let mut state = self.state.lock().await;
        let Some(idx) = state.position(connection_id) else {
            debug!("Connection {} already left room {}", connection_id, self.path);
            return LeaveOutcome { removed: false, remaining: state.members.len() };
        };

        let member = state.members.remove(idx);
        debug!("{} left room {} ({} remaining)", member.username, self.path, state.members.len());
        state.broadcast_users();
        LeaveOutcome { removed: true, remaining: state.members.len() }
    }

    /// Mark the room closed if nobody is in it. Closed rooms refuse joins.
    pub(crate) async fn close_if_empty(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.members.is_empty() {
            state.closed = true;
        }
        state.closed
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn users(&self) -> Vec<String> {
        self.state.lock().await.users()
    }

    pub async fn content(&self) -> Option<String> {
        self.state.lock().await.content.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str) -> (Member, mpsc::Receiver<SendMessage>) {
        member_with_queue(name, OUTBOUND_QUEUE_CAPACITY)
    }

    fn member_with_queue(name: &str, capacity: usize) -> (Member, mpsc::Receiver<SendMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Member::new(Uuid::new_v4(), name, tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<SendMessage>) -> Vec<SendMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn users(names: &[&str]) -> SendMessage {
        SendMessage::UsersUpdate(UsersUpdateMessage {
            users: names.iter().map(|n| n.to_string()).collect(),
        })
    }

    fn content(text: &str) -> SendMessage {
        SendMessage::ContentUpdate(ContentUpdateMessage { content: text.to_string() })
    }

    #[tokio::test]
    async fn second_member_gets_live_content_and_first_sees_presence() {
        let room = Room::new("/doc.py", Some("x=1".into()), 1024);
        let (a, mut a_rx) = member("alice");
        let (b, mut b_rx) = member("bob");

        room.join(a).await.unwrap();
        assert_eq!(drain(&mut a_rx), vec![content("x=1"), users(&["alice"])]);

        let snapshot = room.join(b).await.unwrap();
        assert_eq!(snapshot.content.as_deref(), Some("x=1"));
        assert_eq!(snapshot.others.len(), 1);
        assert_eq!(snapshot.others[0].username, "alice");
        assert_eq!(snapshot.users, vec!["alice", "bob"]);

        assert_eq!(drain(&mut b_rx), vec![content("x=1"), users(&["alice", "bob"])]);
        assert_eq!(drain(&mut a_rx), vec![users(&["alice", "bob"])]);
    }

    #[tokio::test]
    async fn content_update_reaches_others_but_not_sender() {
        let room = Room::new("/doc.py", Some("x=1".into()), 1024);
        let (a, mut a_rx) = member("alice");
        let (b, mut b_rx) = member("bob");
        let a_id = a.connection_id;
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        let recipients = room.apply_content_update(a_id, "x=2".into()).await.unwrap();
        assert_eq!(recipients, 1);
        assert_eq!(drain(&mut b_rx), vec![content("x=2")]);
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(room.content().await.as_deref(), Some("x=2"));
    }

    #[tokio::test]
    async fn last_writer_wins_in_receipt_order() {
        let room = Room::new("/doc.py", None, 1024);
        let (a, mut a_rx) = member("alice");
        let (b, mut b_rx) = member("bob");
        let (c, mut c_rx) = member("carol");
        let (a_id, b_id) = (a.connection_id, b.connection_id);
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        room.join(c).await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        room.apply_content_update(a_id, "from a".into()).await.unwrap();
        room.apply_content_update(b_id, "from b".into()).await.unwrap();

        assert_eq!(drain(&mut c_rx), vec![content("from a"), content("from b")]);
        assert_eq!(drain(&mut a_rx), vec![content("from b")]);
        assert_eq!(drain(&mut b_rx), vec![content("from a")]);
        assert_eq!(room.content().await.as_deref(), Some("from b"));
    }

    #[tokio::test]
    async fn new_member_without_content_gets_no_content_message() {
        let room = Room::new("/new.txt", None, 1024);
        let (a, mut a_rx) = member("alice");
        let snapshot = room.join(a).await.unwrap();
        assert!(snapshot.content.is_none());
        assert_eq!(drain(&mut a_rx), vec![users(&["alice"])]);
    }

    #[tokio::test]
    async fn cursor_is_broadcast_to_others_and_replayed_to_joiners() {
        let room = Room::new("/doc.py", Some("hello".into()), 1024);
        let (a, mut a_rx) = member("alice");
        let (b, mut b_rx) = member("bob");
        let a_id = a.connection_id;
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        room.update_cursor(a_id, 3).await.unwrap();
        let cursor = SendMessage::CursorUpdate(CursorUpdateMessage {
            username: "alice".into(),
            position: 3,
            color: presence_color("alice").into(),
        });
        assert_eq!(drain(&mut b_rx), vec![cursor.clone()]);
        assert!(drain(&mut a_rx).is_empty());

        let (c, mut c_rx) = member("carol");
        room.join(c).await.unwrap();
        assert_eq!(
            drain(&mut c_rx),
            vec![content("hello"), cursor, users(&["alice", "bob", "carol"])]
        );
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_updates_presence() {
        let room = Room::new("/doc.py", None, 1024);
        let (a, mut a_rx) = member("alice");
        let (b, _b_rx) = member("bob");
        let b_id = b.connection_id;
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        drain(&mut a_rx);

        assert_eq!(room.leave(b_id).await, LeaveOutcome { removed: true, remaining: 1 });
        assert_eq!(drain(&mut a_rx), vec![users(&["alice"])]);
        assert_eq!(room.leave(b_id).await, LeaveOutcome { removed: false, remaining: 1 });
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn same_user_may_hold_two_connections() {
        let room = Room::new("/doc.py", None, 1024);
        let (tab1, _rx1) = member("alice");
        let (tab2, _rx2) = member("alice");
        let tab1_id = tab1.connection_id;
        room.join(tab1).await.unwrap();
        room.join(tab2).await.unwrap();
        assert_eq!(room.users().await, vec!["alice", "alice"]);

        room.leave(tab1_id).await;
        assert_eq!(room.users().await, vec!["alice"]);
    }

    #[tokio::test]
    async fn oversize_and_foreign_updates_are_rejected() {
        let room = Room::new("/doc.py", Some("x".into()), 4);
        let (a, _a_rx) = member("alice");
        let a_id = a.connection_id;
        room.join(a).await.unwrap();

        assert!(matches!(
            room.apply_content_update(a_id, "12345".into()).await,
            Err(CollabError::MalformedMessage(_))
        ));
        assert!(matches!(
            room.apply_content_update(Uuid::new_v4(), "y".into()).await,
            Err(CollabError::NotMember(_))
        ));
        assert!(matches!(
            room.update_cursor(Uuid::new_v4(), 1).await,
            Err(CollabError::NotMember(_))
        ));
        assert_eq!(room.content().await.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn closed_room_refuses_joins() {
        let room = Room::new("/doc.py", None, 1024);
        assert!(room.close_if_empty().await);
        let (a, _a_rx) = member("alice");
        assert!(matches!(room.join(a).await, Err(CollabError::RoomClosed(_))));
    }

    #[tokio::test]
    async fn cursor_is_clamped_to_the_content() {
        let room = Room::new("/doc.py", Some("héllo".into()), 1024);
        let (a, _a_rx) = member("alice");
        let (b, mut b_rx) = member("bob");
        let a_id = a.connection_id;
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        drain(&mut b_rx);

        room.update_cursor(a_id, 1_000).await.unwrap();
        match drain(&mut b_rx).as_slice() {
            [SendMessage::CursorUpdate(c)] => assert_eq!(c.position, 5),
            other => panic!("unexpected {other:?}"),
        }

        let empty = Room::new("/new.txt", None, 1024);
        let (c, _c_rx) = member("carol");
        let (d, mut d_rx) = member("dave");
        let c_id = c.connection_id;
        empty.join(c).await.unwrap();
        empty.join(d).await.unwrap();
        drain(&mut d_rx);
        empty.update_cursor(c_id, 7).await.unwrap();
        match drain(&mut d_rx).as_slice() {
            [SendMessage::CursorUpdate(c)] => assert_eq!(c.position, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn member_that_stops_reading_is_evicted() {
        let room = Room::new("/doc.py", None, 1024);
        let (a, mut a_rx) = member("alice");
        let (stuck, mut stuck_rx) = member_with_queue("bob", 4);
        let a_id = a.connection_id;
        room.join(a).await.unwrap();
        room.join(stuck).await.unwrap();

        // bob never drains; alice keeps typing.
        for i in 0..10 {
            room.apply_content_update(a_id, format!("v{i}")).await.unwrap();
        }

        assert_eq!(room.users().await, vec!["alice"]);
        assert_eq!(drain(&mut a_rx).last(), Some(&users(&["alice"])));
        // Only what fit before eviction was queued, then the queue closed.
        assert_eq!(drain(&mut stuck_rx).len(), 4);
        assert!(stuck_rx.recv().await.is_none());
        // Later updates still reach the remaining member.
        assert_eq!(room.apply_content_update(a_id, "after".into()).await.unwrap(), 0);
        assert_eq!(room.content().await.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn replies_go_to_one_member_only() {
        let room = Room::new("/doc.py", None, 1024);
        let (a, mut a_rx) = member("alice");
        let (b, mut b_rx) = member("bob");
        let a_id = a.connection_id;
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        room.send_to(a_id, content("just you")).await.unwrap();
        assert_eq!(drain(&mut a_rx), vec![content("just you")]);
        assert!(drain(&mut b_rx).is_empty());
        assert!(matches!(
            room.send_to(Uuid::new_v4(), content("nobody")).await,
            Err(CollabError::NotMember(_))
        ));
    }
}
