use crate::registry::ConnectionRegistry;
use shared::connection::{Connection, ConnectionId};
use shared::events::PeerEvents;
use shared::logger;
use shared::message::{BROADCAST_TARGET, Message, MessageType, SERVER_IDENTITY};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Everything the accept loop, the receive loops and the monitor share. Owned by one
/// [`crate::Server`].
pub struct ServerState {
    identity: String,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) events: Arc<dyn PeerEvents>,
    running: AtomicBool,
}

impl ServerState {
    pub fn new(identity: &str, events: Arc<dyn PeerEvents>) -> Self {
        ServerState {
            identity: identity.to_string(),
            registry: ConnectionRegistry::default(),
            events,
            running: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// True for the literal "Server" and for this server's own identity, ignoring case.
    pub fn is_local_identity(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(SERVER_IDENTITY) || name.eq_ignore_ascii_case(&self.identity)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Registers a freshly accepted connection. The running flag is read after the
    /// insert, so a `stop` racing with the accept either drains the connection or is
    /// seen here; in the latter case the connection is dropped and closed.
    pub(crate) async fn admit(&self, connection: Arc<Connection>) -> bool {
        self.registry.insert(connection.clone()).await;
        if self.is_running() {
            return true;
        }
        self.registry.remove(connection.id()).await;
        connection.close().await;
        false
    }

    /// Sends to every registered connection that is still open. Connections found
    /// closed are dropped from the registry afterwards; if any of them had a username
    /// the remaining peers get one refreshed peer list.
    pub async fn broadcast(&self, message: &Message) {
        let dead = self.deliver_to_all(message).await;
        if dead.is_empty() {
            return;
        }

        let mut lost_named_peer = false;
        for connection in dead {
            if let Some(removed) = self.registry.remove(connection.id()).await
                && let Some(username) = removed.username
            {
                logger::log_warning(&format!("Removed dead connection: {}", username));
                lost_named_peer = true;
            }
        }

        if lost_named_peer {
            let peer_list = self.peer_list_message().await;
            self.deliver_to_all(&peer_list).await;
        }
    }

    /// Returns the connections that were skipped because they are closed.
    async fn deliver_to_all(&self, message: &Message) -> Vec<Arc<Connection>> {
        let mut dead = Vec::new();
        for connection in self.registry.snapshot().await {
            if !connection.is_open() {
                dead.push(connection);
                continue;
            }
            // A failed write closes the connection; its receive loop then cleans it up.
            if let Err(e) = connection.send_message(message).await {
                logger::log_warning(&format!(
                    "Failed to send {} to {}: {}",
                    message.msg_type(),
                    connection.peer_addr(),
                    e
                ));
            }
        }
        dead
    }

    pub async fn peer_list_message(&self) -> Message {
        let usernames = self.registry.usernames().await;
        Message::peer_list(SERVER_IDENTITY, usernames.iter().map(String::as_str))
    }

    pub async fn broadcast_peer_list(&self) {
        let peer_list = self.peer_list_message().await;
        self.broadcast(&peer_list).await;
    }

    /// Forgets a connection. If it had a username, everyone left gets a refreshed peer
    /// list and a USER_LEAVE under that name. Returns the connection only for the first
    /// caller, so the cleanup runs once however the connection went away.
    pub async fn remove_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.registry.remove(id).await?;

        if let Some(username) = &removed.username {
            logger::log_info(&format!("Removed connection: {}", username));
            self.broadcast_peer_list().await;

            let leave = Message::new(
                MessageType::UserLeave,
                username.as_str(),
                BROADCAST_TARGET,
                format!("{} has left the chat", username),
            );
            self.broadcast(&leave).await;
        }
        Some(removed.connection)
    }

    /// Removes and force-closes every connection whose last heartbeat is older than
    /// `timeout` at `now`. Returns how many were evicted.
    pub async fn evict_stale(&self, now: Instant, timeout: Duration) -> usize {
        let stale: Vec<(ConnectionId, Duration)> = self
            .registry
            .heartbeat_snapshot()
            .await
            .into_iter()
            .map(|(id, last)| (id, now.saturating_duration_since(last)))
            .filter(|(_, silent_for)| *silent_for > timeout)
            .collect();

        let mut evicted = 0;
        for (id, silent_for) in stale {
            let name = self
                .registry
                .username_of(id)
                .await
                .unwrap_or_else(|| id.to_string());
            logger::log_warning(&format!(
                "Client timeout: {} (no heartbeat for {}s)",
                name,
                silent_for.as_secs()
            ));
            if let Some(connection) = self.remove_connection(id).await {
                connection.close().await;
                evicted += 1;
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestPeer, detached_connection, linked_connection};
    use shared::events::NoEvents;

    fn state() -> ServerState {
        ServerState::new("teacher", Arc::new(NoEvents))
    }

    #[test]
    fn test_local_identity_is_case_insensitive() {
        let state = state();
        assert!(state.is_local_identity("Server"));
        assert!(state.is_local_identity("SERVER"));
        assert!(state.is_local_identity("Teacher"));
        assert!(!state.is_local_identity("student"));
    }

    #[tokio::test]
    async fn test_admit_refuses_connections_once_stopped() {
        let state = state();
        let (early, _peer_early) = detached_connection().await;
        assert!(!state.admit(early.clone()).await);
        assert!(!early.is_open());
        assert!(state.registry.is_empty().await);
        assert!(state.registry.heartbeat_snapshot().await.is_empty());

        state.set_running(true);
        let (accepted, _peer_accepted) = detached_connection().await;
        assert!(state.admit(accepted.clone()).await);
        assert!(accepted.is_open());
        assert_eq!(state.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_once() {
        let state = state();
        let mut peers = Vec::new();
        for name in ["a", "b", "c"] {
            let (conn, peer) = linked_connection().await;
            state.registry.insert(conn.clone()).await;
            state.registry.set_username(conn.id(), name).await;
            peers.push(peer);
        }

        let message = Message::new(MessageType::Broadcast, "a", "all", "quiz at noon");
        state.broadcast(&message).await;

        for peer in &mut peers {
            assert_eq!(peer.next().await, message);
            peer.assert_silent().await;
        }
    }

    #[tokio::test]
    async fn test_broadcast_drops_dead_connection_and_refreshes_peer_list() {
        let state = state();
        let (a, mut peer_a) = linked_connection().await;
        let (b, _peer_b) = detached_connection().await;
        let (c, mut peer_c) = linked_connection().await;
        for (conn, name) in [(&a, "a"), (&b, "b"), (&c, "c")] {
            state.registry.insert(conn.clone()).await;
            state.registry.set_username(conn.id(), name).await;
        }
        b.close().await;

        let message = Message::new(MessageType::Text, "a", "all", "hello");
        state.broadcast(&message).await;

        assert!(state.registry.get(b.id()).await.is_none());
        for peer in [&mut peer_a, &mut peer_c] {
            assert_eq!(peer.next().await, message);
            let refresh = peer.next().await;
            assert_eq!(refresh.msg_type(), MessageType::PeerList);
            let mut names = shared::message::parse_peer_list(refresh.content());
            names.sort();
            assert_eq!(names, vec!["a", "c"]);
            peer.assert_silent().await;
        }
    }

    #[tokio::test]
    async fn test_remove_connection_announces_leave_once() {
        let state = state();
        let (gone, _peer_gone) = detached_connection().await;
        let (stay, mut peer_stay) = linked_connection().await;
        state.registry.insert(gone.clone()).await;
        state.registry.insert(stay.clone()).await;
        state.registry.set_username(gone.id(), "bob").await;
        state.registry.set_username(stay.id(), "alice").await;

        assert!(state.remove_connection(gone.id()).await.is_some());
        assert!(state.remove_connection(gone.id()).await.is_none());

        let peer_list = peer_stay.next().await;
        assert_eq!(peer_list.msg_type(), MessageType::PeerList);
        assert_eq!(peer_list.content(), "alice");
        let leave = peer_stay.next().await;
        assert_eq!(leave.msg_type(), MessageType::UserLeave);
        assert_eq!(leave.sender(), "bob");
        assert_eq!(leave.content(), "bob has left the chat");
        peer_stay.assert_silent().await;
    }

    #[tokio::test]
    async fn test_anonymous_removal_is_silent() {
        let state = state();
        let (anon, _peer_anon) = detached_connection().await;
        let (stay, mut peer_stay) = linked_connection().await;
        state.registry.insert(anon.clone()).await;
        state.registry.insert(stay.clone()).await;

        assert!(state.remove_connection(anon.id()).await.is_some());
        peer_stay.assert_silent().await;
    }

    #[tokio::test]
    async fn test_evict_stale_only_touches_silent_connections() {
        let state = state();
        let (quiet, mut peer_quiet) = linked_connection().await;
        let (chatty, mut peer_chatty) = linked_connection().await;
        state.registry.insert(quiet.clone()).await;
        state.registry.insert(chatty.clone()).await;
        state.registry.set_username(quiet.id(), "quiet").await;
        state.registry.set_username(chatty.id(), "chatty").await;

        let timeout = Duration::from_secs(90);
        let now = Instant::now() + Duration::from_secs(91);
        state.registry.touch_at(chatty.id(), now).await;

        assert_eq!(state.evict_stale(now, timeout).await, 1);
        assert!(!quiet.is_open());
        assert!(chatty.is_open());
        assert_eq!(state.registry.usernames().await, vec!["chatty"]);

        let peer_list = peer_chatty.next().await;
        assert_eq!(peer_list.msg_type(), MessageType::PeerList);
        assert_eq!(peer_list.content(), "chatty");
        let leave = peer_chatty.next().await;
        assert_eq!(leave.msg_type(), MessageType::UserLeave);
        assert_eq!(leave.sender(), "quiet");
        peer_chatty.assert_silent().await;
        peer_quiet.assert_closed().await;

        // Nothing left to evict on the next sweep.
        assert_eq!(state.evict_stale(now, timeout).await, 0);
    }

    #[tokio::test]
    async fn test_evict_stale_closes_a_connection_stuck_mid_write() {
        let state = state();
        // The remote end never reads, so writes to it eventually block.
        let (stuck, _remote) = detached_connection().await;
        state.registry.insert(stuck.clone()).await;
        state.registry.set_username(stuck.id(), "stuck").await;

        let writer = stuck.clone();
        let flood = tokio::spawn(async move {
            let transfer = shared::message::FileTransfer::new("big.bin", vec![1u8; 1024 * 1024], "a", "stuck");
            while writer.send_file(&transfer).await.is_ok() {}
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        let now = Instant::now() + Duration::from_secs(91);
        let evicted = tokio::time::timeout(
            Duration::from_secs(3),
            state.evict_stale(now, Duration::from_secs(90)),
        )
        .await
        .expect("eviction blocked behind a pending write");
        assert_eq!(evicted, 1);
        assert!(!stuck.is_open());
        assert!(state.registry.is_empty().await);
        tokio::time::timeout(Duration::from_secs(3), flood)
            .await
            .expect("writer was not released")
            .unwrap();
    }
}
