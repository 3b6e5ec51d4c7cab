//! Project rooms: who receives which broadcast.

use std::collections::HashMap;

use atelier_protocol::{ProjectId, ServerEvent};
use tokio::sync::{mpsc, RwLock};

use crate::connection::ConnectionId;

/// Outbound queue of one connection.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Connections bound to each project, keyed by project id.
///
/// Rooms are created on first join and dropped when the last member leaves.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<ProjectId, HashMap<ConnectionId, Outbox>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, project: &ProjectId, connection: ConnectionId, outbox: Outbox) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(project.clone())
            .or_default()
            .insert(connection, outbox);
    }

    /// Remove a connection. Returns `true` if it was present.
    pub async fn leave(&self, project: &ProjectId, connection: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(project) else {
            return false;
        };
        let removed = room.remove(&connection).is_some();
        if room.is_empty() {
            rooms.remove(project);
        }
        removed
    }

    /// Send to every member except `exclude`. Returns the number reached.
    pub async fn broadcast(
        &self,
        project: &ProjectId,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(project) else {
            return 0;
        };
        room.iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .filter(|(_, outbox)| outbox.send(event.clone()).is_ok())
            .count()
    }

    pub async fn member_count(&self, project: &ProjectId) -> usize {
        self.rooms
            .read()
            .await
            .get(project)
            .map_or(0, HashMap::len)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_protocol::UserId;

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let rooms = RoomRegistry::new();
        let project = ProjectId::generate();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        rooms.join(&project, ConnectionId(1), a_tx).await;
        rooms.join(&project, ConnectionId(2), b_tx).await;

        let event = ServerEvent::Typing {
            sender: UserId::new("a"),
        };
        assert_eq!(rooms.broadcast(&project, &event, Some(ConnectionId(1))).await, 1);
        assert_eq!(b_rx.try_recv().unwrap(), event);
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rooms_are_isolated_and_cleaned_up() {
        let rooms = RoomRegistry::new();
        let (one, two) = (ProjectId::generate(), ProjectId::generate());
        let (tx, mut rx) = mpsc::unbounded_channel();
        rooms.join(&one, ConnectionId(1), tx.clone()).await;
        rooms.join(&two, ConnectionId(2), tx).await;

        let event = ServerEvent::TreeSaved { entries: 1 };
        assert_eq!(rooms.broadcast(&two, &event, None).await, 1);
        assert_eq!(rx.try_recv().unwrap(), event);
        assert!(rx.try_recv().is_err());

        assert!(rooms.leave(&one, ConnectionId(1)).await);
        assert!(!rooms.leave(&one, ConnectionId(1)).await);
        assert_eq!(rooms.member_count(&one).await, 0);
        assert_eq!(rooms.room_count().await, 1);
    }
}
