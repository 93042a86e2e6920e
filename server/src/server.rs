use crate::monitor;
use crate::routing::Router;
use crate::state::ServerState;
use shared::config::{NetworkConfig, is_valid_port};
use shared::connection::{Connection, ConnectionStream};
use shared::error::ServerError;
use shared::events::PeerEvents;
use shared::logger;
use shared::message::{BROADCAST_TARGET, Message, MessageType, SERVER_IDENTITY};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_rustls::TlsAcceptor;

struct Running {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

/// Accepts inbound peers, routes what they send and reaps the silent ones.
///
/// Lifecycle is `STOPPED -> RUNNING -> STOPPED`. Starting a running server and stopping
/// a stopped one are both no-ops.
pub struct Server {
    state: Arc<ServerState>,
    config: NetworkConfig,
    tls: Option<TlsAcceptor>,
    lifecycle: Mutex<Option<Running>>,
}

impl Server {
    /// `identity` is the name this server answers to in direct messages, in addition
    /// to the literal "Server".
    pub fn new(identity: &str, events: Arc<dyn PeerEvents>, config: NetworkConfig) -> Self {
        Server {
            state: Arc::new(ServerState::new(identity, events)),
            config,
            tls: None,
            lifecycle: Mutex::new(None),
        }
    }

    pub fn with_tls(mut self, acceptor: Option<TlsAcceptor>) -> Self {
        self.tls = acceptor;
        self
    }

    /// Listens on every interface at `port`, which must lie in 1024..=65535.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, ServerError> {
        if !is_valid_port(port) {
            return Err(ServerError::InvalidPort(port));
        }
        self.start_at(SocketAddr::from(([0, 0, 0, 0], port))).await
    }

    /// Listens on an explicit address. Returns the bound address, or the existing one
    /// if the server is already running.
    pub async fn start_at(&self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(running) = lifecycle.as_ref() {
            logger::log_warning("Server is already running");
            return Ok(running.local_addr);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        self.state.set_running(true);
        let router = Arc::new(Router::new(self.state.clone()));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.state.clone(),
            router,
            self.tls.clone(),
        ));
        let monitor_task = tokio::spawn(monitor::run(
            self.state.clone(),
            self.config.monitor_interval,
            self.config.heartbeat_timeout,
        ));

        *lifecycle = Some(Running {
            local_addr,
            accept_task,
            monitor_task,
        });
        self.state
            .events
            .on_status(&format!("Server started on port {}", local_addr.port()));
        Ok(local_addr)
    }

    /// Announces SERVER_SHUTDOWN, waits the grace period, then closes every connection
    /// and the listener.
    pub async fn stop(&self) {
        let Some(running) = self.lifecycle.lock().await.take() else {
            return;
        };
        self.state.set_running(false);
        running.monitor_task.abort();
        running.accept_task.abort();

        let notice = Message::new(
            MessageType::ServerShutdown,
            SERVER_IDENTITY,
            BROADCAST_TARGET,
            "Server is shutting down",
        );
        self.state.broadcast(&notice).await;
        sleep(self.config.shutdown_grace).await;

        for connection in self.state.registry.clear().await {
            connection.close().await;
        }
        self.state.events.on_status("Server stopped");
    }

    pub async fn broadcast(&self, message: &Message) {
        self.state.broadcast(message).await;
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn identity(&self) -> &str {
        self.state.identity()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.registry.len().await
    }

    pub async fn usernames(&self) -> Vec<String> {
        self.state.registry.usernames().await
    }

    pub async fn connection_for(&self, username: &str) -> Option<Arc<Connection>> {
        self.state.registry.find_by_username(username).await
    }

    pub async fn named_connections(&self) -> Vec<(String, Arc<Connection>)> {
        self.state.registry.named_connections().await
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    router: Arc<Router>,
    tls: Option<TlsAcceptor>,
) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let state = state.clone();
                let router = router.clone();
                let tls = tls.clone();
                tokio::spawn(async move {
                    let stream = match tls {
                        Some(acceptor) => match acceptor.accept(socket).await {
                            Ok(tls_stream) => ConnectionStream::ServerTls(Box::new(tls_stream)),
                            Err(e) => {
                                logger::log_error(&format!(
                                    "TLS handshake failed for {}: {}",
                                    addr, e
                                ));
                                return;
                            }
                        },
                        None => ConnectionStream::Plain(socket),
                    };

                    let (connection, reader) = Connection::open(stream, addr);
                    if !state.admit(connection.clone()).await {
                        return;
                    }
                    state
                        .events
                        .on_status(&format!("New peer connected: {}", addr.ip()));
                    connection.receive_loop(reader, router).await;
                });
            }
            Err(e) => {
                logger::log_error(&format!("Failed to accept connection: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestPeer;
    use shared::events::NoEvents;
    use shared::message::{FileTransfer, parse_peer_list};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        messages: StdMutex<Vec<Message>>,
        statuses: StdMutex<Vec<String>>,
        lost: StdMutex<usize>,
    }

    impl PeerEvents for Recorder {
        fn on_message_received(&self, message: &Message, _connection: &Connection) {
            self.messages.lock().unwrap().push(message.clone());
        }

        fn on_status(&self, status: &str) {
            self.statuses.lock().unwrap().push(status.to_string());
        }

        fn on_connection_lost(&self, _connection: &Connection) {
            *self.lost.lock().unwrap() += 1;
        }
    }

    fn quick_config() -> NetworkConfig {
        NetworkConfig {
            shutdown_grace: Duration::from_millis(20),
            ..NetworkConfig::default()
        }
    }

    async fn running_server(events: Arc<dyn PeerEvents>) -> (Server, SocketAddr) {
        let server = Server::new("teacher", events, quick_config());
        let addr = server.start_at("127.0.0.1:0".parse().unwrap()).await.unwrap();
        (server, addr)
    }

    /// Connects and joins under `name`, draining the join echo and peer list.
    async fn join(addr: SocketAddr, name: &str) -> TestPeer {
        let mut peer = TestPeer::connect(addr).await;
        peer.send(&Message::new(
            MessageType::UserJoin,
            name,
            BROADCAST_TARGET,
            format!("{} joined", name),
        ))
        .await;
        loop {
            let message = peer.next().await;
            if message.msg_type() == MessageType::PeerList
                && parse_peer_list(message.content()).iter().any(|n| n == name)
            {
                return peer;
            }
        }
    }

    async fn wait_for_users(server: &Server, count: usize) {
        for _ in 0..100 {
            if server.usernames().await.len() == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} users, have {:?}", count, server.usernames().await);
    }

    #[tokio::test]
    async fn test_start_rejects_privileged_port() {
        let server = Server::new("teacher", Arc::new(NoEvents), quick_config());
        assert!(matches!(
            server.start(80).await,
            Err(ServerError::InvalidPort(80))
        ));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_a_no_op() {
        let (server, addr) = running_server(Arc::new(NoEvents)).await;
        assert!(server.is_running());
        assert_eq!(server.start_at("127.0.0.1:0".parse().unwrap()).await.unwrap(), addr);
        assert_eq!(server.local_addr().await, Some(addr));
        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
        assert_eq!(server.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_join_is_echoed_with_peer_list() {
        let recorder = Arc::new(Recorder::default());
        let (server, addr) = running_server(recorder.clone()).await;

        let mut peer = TestPeer::connect(addr).await;
        peer.send(&Message::new(MessageType::UserJoin, "alice", "all", "alice joined"))
            .await;

        let echo = peer.next().await;
        assert_eq!(echo.msg_type(), MessageType::UserJoin);
        assert_eq!(echo.sender(), "alice");
        let peer_list = peer.next().await;
        assert_eq!(peer_list.msg_type(), MessageType::PeerList);
        assert_eq!(peer_list.content(), "alice");

        assert_eq!(server.usernames().await, vec!["alice"]);
        assert!(server.connection_for("alice").await.is_some());
        assert_eq!(recorder.messages.lock().unwrap()[0].msg_type(), MessageType::UserJoin);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_direct_message_reaches_only_its_target() {
        let (server, addr) = running_server(Arc::new(NoEvents)).await;
        let mut a = join(addr, "a").await;
        let mut b = join(addr, "b").await;
        let mut c = join(addr, "c").await;
        wait_for_users(&server, 3).await;
        // Drain the joins and peer lists the earlier peers saw.
        sleep(Duration::from_millis(100)).await;
        while tokio::time::timeout(Duration::from_millis(50), a.next_frame()).await.is_ok() {}
        while tokio::time::timeout(Duration::from_millis(50), b.next_frame()).await.is_ok() {}

        let dm = Message::new(MessageType::PeerToPeer, "a", "b", "see you in lab");
        a.send(&dm).await;

        assert_eq!(b.next().await, dm);
        a.assert_silent().await;
        c.assert_silent().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_file_message_is_forwarded_verbatim() {
        let (server, addr) = running_server(Arc::new(NoEvents)).await;
        let mut a = join(addr, "a").await;
        let mut b = join(addr, "b").await;
        wait_for_users(&server, 2).await;

        let file = Message::file(FileTransfer::new("hw1.pdf", vec![9; 2048], "a", "b"));
        a.send(&file).await;

        assert_eq!(b.next_significant().await, file);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_message_to_server_is_not_forwarded() {
        let recorder = Arc::new(Recorder::default());
        let (server, addr) = running_server(recorder.clone()).await;
        let mut a = join(addr, "a").await;

        let dm = Message::new(MessageType::PeerToPeer, "a", "TEACHER", "question");
        a.send(&dm).await;
        a.assert_silent().await;

        assert!(recorder.messages.lock().unwrap().contains(&dm));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_dropped() {
        let (server, addr) = running_server(Arc::new(NoEvents)).await;
        let mut a = join(addr, "a").await;

        a.send(&Message::new(MessageType::PeerToPeer, "a", "ghost", "boo"))
            .await;
        a.assert_silent().await;
        assert_eq!(server.connection_count().await, 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_heartbeat_gets_a_reply() {
        let (server, addr) = running_server(Arc::new(NoEvents)).await;
        let mut a = join(addr, "a").await;

        a.send(&Message::heartbeat("a", SERVER_IDENTITY, "ping")).await;
        let reply = a.next().await;
        assert_eq!(reply.msg_type(), MessageType::Heartbeat);
        assert_eq!(reply.receiver(), "a");
        assert_eq!(reply.content(), "pong");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_class_join_only_reaches_the_callback() {
        let recorder = Arc::new(Recorder::default());
        let (server, addr) = running_server(recorder.clone()).await;
        let mut a = join(addr, "a").await;
        let mut b = join(addr, "b").await;
        wait_for_users(&server, 2).await;
        sleep(Duration::from_millis(100)).await;
        while tokio::time::timeout(Duration::from_millis(50), a.next_frame()).await.is_ok() {}

        let class_join = Message::new(MessageType::ClassJoin, "b", SERVER_IDENTITY, "CS101");
        b.send(&class_join).await;
        a.assert_silent().await;
        b.assert_silent().await;

        let seen = recorder
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| **m == class_join)
            .count();
        assert_eq!(seen, 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_announces_leave() {
        let recorder = Arc::new(Recorder::default());
        let (server, addr) = running_server(recorder.clone()).await;
        let mut a = join(addr, "a").await;
        let b = join(addr, "b").await;
        wait_for_users(&server, 2).await;

        drop(b);

        let leave = a.next_significant().await;
        // The join broadcast for b may still be queued ahead of the leave.
        let leave = if leave.msg_type() == MessageType::UserJoin {
            a.next_significant().await
        } else {
            leave
        };
        assert_eq!(leave.msg_type(), MessageType::UserLeave);
        assert_eq!(leave.content(), "b has left the chat");
        wait_for_users(&server, 1).await;
        assert_eq!(*recorder.lost.lock().unwrap(), 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_announces_shutdown_and_closes() {
        let recorder = Arc::new(Recorder::default());
        let (server, addr) = running_server(recorder.clone()).await;
        let mut a = join(addr, "a").await;

        server.stop().await;

        assert_eq!(a.next().await.msg_type(), MessageType::ServerShutdown);
        a.assert_closed().await;
        assert_eq!(server.connection_count().await, 0);
        assert!(recorder
            .statuses
            .lock()
            .unwrap()
            .iter()
            .any(|s| s == "Server stopped"));
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
