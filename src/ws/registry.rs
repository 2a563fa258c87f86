use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::CollabError;
use super::room::{JoinSnapshot, LeaveOutcome, Member, MemberSender, Room};

#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    pub max_rooms: usize,
    pub max_connections: usize,
    pub max_content_bytes: usize,
}

/// Live rooms keyed by canonical file path.
///
/// Owned by the application state and handed to the gateway; tests build as
/// many isolated registries as they like.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    connections: Arc<Semaphore>,
    limits: RegistryLimits,
}

impl RoomRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            connections: Arc::new(Semaphore::new(limits.max_connections)),
            limits,
        }
    }

    /// Reserve a connection slot. The slot is freed when the permit drops.
    pub fn admit(&self) -> Result<OwnedSemaphorePermit, CollabError> {
        self.connections.clone().try_acquire_owned().map_err(|_| {
            CollabError::CapacityExceeded(format!(
                "connection limit of {} reached",
                self.limits.max_connections
            ))
        })
    }

    /// Whether a connection to `path` would find or be allowed to create a room.
    ///
    /// Checked before the WebSocket upgrade so a full server refuses with a
    /// status code. `get_or_create` still enforces the limit.
    pub async fn can_host(&self, path: &str) -> Result<(), CollabError> {
        let rooms = self.rooms.lock().await;
        if rooms.contains_key(path) || rooms.len() < self.limits.max_rooms {
            Ok(())
        } else {
            Err(CollabError::CapacityExceeded(format!(
                "room limit of {} reached",
                self.limits.max_rooms
            )))
        }
    }

    /// Return the room for `path`, creating it with `initial_content` if absent.
    pub async fn get_or_create(&self, path: &str, initial_content: Option<String>) -> Result<Arc<Room>, CollabError> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(path) {
            return Ok(room.clone());
        }
        if rooms.len() >= self.limits.max_rooms {
            return Err(CollabError::CapacityExceeded(format!(
                "room limit of {} reached",
                self.limits.max_rooms
            )));
        }

        let room = Arc::new(Room::new(path, initial_content, self.limits.max_content_bytes));
        rooms.insert(path.to_string(), room.clone());
        info!("Room created for {} ({} live rooms)", path, rooms.len());
        Ok(room)
    }

    /// Destroy the room for `path` if it has no members left.
    pub async fn release_if_empty(&self, path: &str) -> bool {
        let mut rooms = self.rooms.lock().await;
        let Some(room) = rooms.get(path) else {
            return false;
        };
        if room.close_if_empty().await {
            rooms.remove(path);
            info!("Room destroyed for {} ({} live rooms)", path, rooms.len());
            return true;
        }
        false
    }

    /// Join the room for `path`. `load` supplies the initial content and is
    /// only awaited when no room exists yet.
    pub async fn join<F, Fut>(
        &self,
        path: &str,
        connection_id: Uuid,
        username: &str,
        tx: MemberSender,
        load: F,
    ) -> Result<(Arc<Room>, JoinSnapshot), CollabError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<String>, CollabError>>,
    {
        loop {
            let room = match self.get(path).await {
                Some(room) => room,
                None => {
                    let content = load().await?;
                    self.get_or_create(path, content).await?
                }
            };

            match room.join(Member::new(connection_id, username, tx.clone())).await {
                Ok(snapshot) => return Ok((room, snapshot)),
                Err(CollabError::RoomClosed(_)) => {
                    // Lost a race with the last member leaving; retry on a fresh room.
                    debug!("Room {} closed while joining, retrying", path);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Leave the room for `path` and destroy it when it becomes empty.
    pub async fn leave(&self, path: &str, connection_id: Uuid) -> LeaveOutcome {
        let Some(room) = self.get(path).await else {
            return LeaveOutcome { removed: false, remaining: 0 };
        };
        let outcome = room.leave(connection_id).await;
        if outcome.remaining == 0 {
            self.release_if_empty(path).await;
        }
        outcome
    }

    pub async fn get(&self, path: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(path).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub fn connection_count(&self) -> usize {
        self.limits.max_connections - self.connections.available_permits()
    }
}
