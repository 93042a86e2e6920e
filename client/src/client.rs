use crate::dispatch::DispatchRegistry;
use rustls::pki_types::ServerName;
use shared::config::{DEFAULT_PORT, NetworkConfig};
use shared::connection::{Connection, ConnectionStream};
use shared::error::{ConnectError, TransportError};
use shared::events::{EventRelay, InboundHandler, PeerEvents};
use shared::logger;
use shared::message::{FileTransfer, Message, SERVER_IDENTITY};
use shared::tls;
use shared::transfer::{FilePeer, SendFuture};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

const TLS_PREFIX: &str = "tls://";

/// Splits `host:port` or `tls://host:port` into its parts. A missing port means the
/// default port.
pub fn parse_server_addr(addr: &str) -> Result<(String, u16, bool), ConnectError> {
    let invalid = || ConnectError::InvalidAddress(addr.to_string());
    let (use_tls, rest) = match addr.trim().strip_prefix(TLS_PREFIX) {
        Some(stripped) => (true, stripped),
        None => (false, addr.trim()),
    };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (rest, DEFAULT_PORT),
    };
    if host.is_empty() || port == 0 {
        return Err(invalid());
    }
    Ok((host.to_string(), port, use_tls))
}

/// Inbound side of a client link: the dispatch registry hands each message to its
/// processor, then the application callbacks see it.
struct ClientInbound {
    relay: EventRelay,
    registry: Arc<DispatchRegistry>,
}

impl InboundHandler for ClientInbound {
    async fn on_message(&self, message: Message, connection: &Arc<Connection>) {
        self.registry.dispatch(&message, connection);
        self.relay.on_message(message, connection).await;
    }

    async fn on_file(&self, transfer: FileTransfer, connection: &Arc<Connection>) {
        self.relay.on_file(transfer, connection).await;
    }

    async fn on_disconnected(&self, connection: &Arc<Connection>) {
        self.relay.on_disconnected(connection).await;
    }
}

struct Session {
    connection: Arc<Connection>,
    heartbeat: JoinHandle<()>,
    target: String,
}

/// One outbound link to a server. Safe to share across tasks.
pub struct Client {
    username: String,
    config: NetworkConfig,
    registry: Arc<DispatchRegistry>,
    events: Arc<dyn PeerEvents>,
    session: Mutex<Option<Session>>,
}

impl Client {
    pub fn new(
        username: impl Into<String>,
        registry: Arc<DispatchRegistry>,
        events: Arc<dyn PeerEvents>,
        config: NetworkConfig,
    ) -> Self {
        Client {
            username: username.into(),
            config,
            registry,
            events,
            session: Mutex::new(None),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Opens a plain TCP link, replacing any existing one.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), ConnectError> {
        self.open(host, port, false).await
    }

    /// Connects to `host:port`, or over TLS to `tls://host:port`.
    pub async fn connect_to(&self, addr: &str) -> Result<(), ConnectError> {
        let (host, port, use_tls) = parse_server_addr(addr).inspect_err(|e| {
            self.events.on_status(&format!("Failed to connect: {}", e));
        })?;
        self.open(&host, port, use_tls).await
    }

    async fn open(&self, host: &str, port: u16, use_tls: bool) -> Result<(), ConnectError> {
        let target = format!("{}:{}", host, port);
        if port == 0 {
            let err = ConnectError::InvalidAddress(target);
            self.events.on_status(&format!("Failed to connect: {}", err));
            return Err(err);
        }
        self.disconnect().await;

        let timeout = self.config.connect_timeout;
        let established = match time::timeout(timeout, establish(host, &target, use_tls)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::TimedOut {
                addr: target.clone(),
                timeout,
            }),
        };
        let (stream, peer_addr) = established.inspect_err(|e| {
            self.events.on_status(&format!("Failed to connect: {}", e));
        })?;

        let (connection, reader) = Connection::open(stream, peer_addr);
        let inbound = Arc::new(ClientInbound {
            relay: EventRelay::new(self.events.clone()),
            registry: self.registry.clone(),
        });
        tokio::spawn(connection.clone().receive_loop(reader, inbound));
        let heartbeat = tokio::spawn(heartbeat_loop(
            connection.clone(),
            self.username.clone(),
            self.config.heartbeat_interval,
        ));

        let replaced = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Session {
                connection,
                heartbeat,
                target: target.clone(),
            });
        // A concurrent connect won the race; keep the newer link.
        if let Some(old) = replaced {
            old.heartbeat.abort();
            old.connection.close().await;
        }

        self.events.on_status(&format!("Connected to {}", target));
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|session| session.connection.is_open())
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|session| session.connection.is_open())
            .map(|session| session.connection.clone())
    }

    fn live_connection(&self) -> Result<Arc<Connection>, TransportError> {
        self.connection().ok_or_else(|| {
            self.events.on_status("Not connected");
            TransportError::NotConnected
        })
    }

    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.live_connection()?.send_message(message).await
    }

    /// Writes a raw file frame; the server hands it to its own callbacks.
    pub async fn send_file(&self, transfer: &FileTransfer) -> Result<(), TransportError> {
        self.live_connection()?.send_file(transfer).await
    }

    /// Closes the link. Calling it again, or without a link, does nothing.
    pub async fn disconnect(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.heartbeat.abort();
            session.connection.close().await;
            self.events
                .on_status(&format!("Disconnected from {}", session.target));
        }
    }
}

/// Routes files through the server: the transfer travels as a FILE message addressed
/// to its recipient.
impl FilePeer for Client {
    fn label(&self) -> String {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        match session.as_ref() {
            Some(session) => format!("{}@{}", self.username, session.target),
            None => self.username.clone(),
        }
    }

    fn send_file<'a>(&'a self, transfer: &'a FileTransfer) -> SendFuture<'a> {
        Box::pin(async move { self.send(&Message::file(transfer.clone())).await })
    }
}

async fn establish(
    host: &str,
    target: &str,
    use_tls: bool,
) -> Result<(ConnectionStream, SocketAddr), ConnectError> {
    let io_error = |source| ConnectError::Io {
        addr: target.to_string(),
        source,
    };
    let socket = TcpStream::connect(target).await.map_err(io_error)?;
    let peer_addr = socket.peer_addr().map_err(io_error)?;
    if !use_tls {
        return Ok((ConnectionStream::Plain(socket), peer_addr));
    }

    let tls_error = |reason: String| ConnectError::Tls {
        addr: target.to_string(),
        reason,
    };
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|e| tls_error(e.to_string()))?;
    let stream = tls::client_connector()
        .connect(server_name, socket)
        .await
        .map_err(|e| tls_error(e.to_string()))?;
    logger::log_success(&format!("TLS session established with {}", target));
    Ok((ConnectionStream::ClientTls(Box::new(stream)), peer_addr))
}

/// Pings the server every `interval` until the link closes or a send fails.
async fn heartbeat_loop(connection: Arc<Connection>, username: String, interval: Duration) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        if !connection.is_open() {
            break;
        }
        let ping = Message::heartbeat(username.as_str(), SERVER_IDENTITY, "ping");
        if let Err(e) = connection.send_message(&ping).await {
            logger::log_warning(&format!("Heartbeat to {} failed: {}", connection.peer_addr(), e));
            break;
        }
    }
}
