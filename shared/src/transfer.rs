use crate::config::{TRANSFER_SHUTDOWN_GRACE, TRANSFER_TASK_TIMEOUT, TRANSFER_WORKERS};
use crate::connection::Connection;
use crate::error::{TransferError, TransportError};
use crate::logger;
use crate::message::{BROADCAST_TARGET, FileTransfer};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use uuid::Uuid;

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Anything a file can be pushed to: a direct client link or a server-side connection.
pub trait FilePeer: Send + Sync {
    /// Stable name used for registration and logs.
    fn label(&self) -> String;

    fn send_file<'a>(&'a self, transfer: &'a FileTransfer) -> SendFuture<'a>;
}

impl FilePeer for Connection {
    fn label(&self) -> String {
        format!("{}{}", self.peer_addr(), self.id())
    }

    fn send_file<'a>(&'a self, transfer: &'a FileTransfer) -> SendFuture<'a> {
        Box::pin(Connection::send_file(self, transfer))
    }
}

/// Progress of one `send_file` call. Exists only while the call runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStatus {
    pub file_name: String,
    pub total_bytes: u64,
    pub sent_bytes: u64,
    pub completed: bool,
    pub failed: bool,
    pub error: Option<String>,
}

impl TransferStatus {
    fn new(file_name: &str, total_bytes: u64) -> Self {
        TransferStatus {
            file_name: file_name.to_string(),
            total_bytes,
            sent_bytes: 0,
            completed: false,
            failed: false,
            error: None,
        }
    }

    /// Percentage in 0..=100.
    pub fn progress(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        ((self.sent_bytes.min(self.total_bytes) * 100) / self.total_bytes) as u8
    }
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub max_concurrent: usize,
    pub task_timeout: Duration,
    pub shutdown_grace: Duration,
    /// When a named recipient has no identity-addressed connection, hand the file to
    /// the first generic peer instead of failing.
    pub allow_peer_fallback: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            max_concurrent: TRANSFER_WORKERS,
            task_timeout: TRANSFER_TASK_TIMEOUT,
            shutdown_grace: TRANSFER_SHUTDOWN_GRACE,
            allow_peer_fallback: true,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Abort handles of running delivery tasks, so shutdown can wait for or cancel them.
#[derive(Default)]
struct InFlight {
    tasks: Mutex<HashMap<u64, AbortHandle>>,
    next_key: AtomicU64,
    idle: Notify,
}

struct InFlightGuard {
    tracker: Arc<InFlight>,
    key: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut tasks = lock(&self.tracker.tasks);
        tasks.remove(&self.key);
        if tasks.is_empty() {
            self.tracker.idle.notify_waiters();
        }
    }
}

impl InFlight {
    fn spawn<F>(self: &Arc<Self>, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let guard = InFlightGuard {
            tracker: Arc::clone(self),
            key,
        };
        // Hold the lock across spawn so the task cannot deregister before it is registered.
        let mut tasks = lock(&self.tasks);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            task.await
        });
        tasks.insert(key, handle.abort_handle());
        handle
    }

    fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    fn abort_all(&self) {
        let handles: Vec<AbortHandle> = lock(&self.tasks).drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.abort();
        }
    }
}

/// Coordinates concurrent delivery of whole files to registered peers.
pub struct FileTransferManager {
    config: TransferConfig,
    peers: RwLock<Vec<Arc<dyn FilePeer>>>,
    peer_connections: RwLock<HashMap<String, Arc<dyn FilePeer>>>,
    active: Mutex<HashMap<Uuid, TransferStatus>>,
    workers: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
    accepting: AtomicBool,
}

impl Default for FileTransferManager {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}

impl FileTransferManager {
    pub fn new(config: TransferConfig) -> Self {
        FileTransferManager {
            workers: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            peers: RwLock::new(Vec::new()),
            peer_connections: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            in_flight: Arc::new(InFlight::default()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Adds a generic outbound peer; a peer with the same label is not added twice.
    pub fn register_peer(&self, peer: Arc<dyn FilePeer>) {
        let label = peer.label();
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if !peers.iter().any(|p| p.label() == label) {
            peers.push(peer);
        }
    }

    pub fn unregister_peer(&self, label: &str) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let before = peers.len();
        peers.retain(|p| p.label() != label);
        peers.len() != before
    }

    /// Adds or replaces the connection that delivers to `username`.
    pub fn register_peer_connection(&self, username: &str, peer: Arc<dyn FilePeer>) {
        self.peer_connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(username.to_string(), peer);
    }

    pub fn unregister_peer_connection(&self, username: &str) -> bool {
        self.peer_connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(username)
            .is_some()
    }

    /// Generic peer labels followed by identity-addressed usernames.
    pub fn peer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.label())
            .collect();
        names.extend(
            self.peer_connections
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned(),
        );
        names
    }

    pub fn transfer_status(&self, transfer_id: &Uuid) -> Option<TransferStatus> {
        lock(&self.active).get(transfer_id).cloned()
    }

    pub fn active_transfers(&self) -> HashMap<Uuid, TransferStatus> {
        lock(&self.active).clone()
    }

    pub fn has_active_transfers(&self) -> bool {
        !lock(&self.active).is_empty()
    }

    /// Delivers `transfer` to every peer (`recipient == "all"`) or to one named
    /// recipient. Returns `true` only if every attempted delivery succeeded; partial
    /// deliveries are not rolled back.
    pub async fn send_file(&self, transfer: FileTransfer, recipient: &str) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            logger::log_warning(&format!(
                "Transfer manager is shut down, not sending '{}'",
                transfer.file_name()
            ));
            return false;
        }

        let transfer_id = Uuid::new_v4();
        let file_name = transfer.file_name().to_string();
        lock(&self.active).insert(
            transfer_id,
            TransferStatus::new(&file_name, transfer.file_size()),
        );

        let transfer = Arc::new(transfer);
        let outcome = if recipient == BROADCAST_TARGET {
            self.send_to_all(transfer_id, transfer).await
        } else {
            self.send_to_recipient(transfer_id, transfer, recipient).await
        };

        let delivered = match outcome {
            Ok(delivered) => delivered,
            Err(e) => {
                self.update_status(&transfer_id, |status| {
                    status.failed = true;
                    status.error = Some(e.to_string());
                });
                logger::log_error(&format!("File transfer of '{}' failed: {}", file_name, e));
                false
            }
        };

        lock(&self.active).remove(&transfer_id);
        delivered
    }

    async fn send_to_all(
        &self,
        transfer_id: Uuid,
        transfer: Arc<FileTransfer>,
    ) -> Result<bool, TransferError> {
        let targets = self.fan_out_targets(transfer.sender());
        if targets.is_empty() {
            logger::log_warning(&format!("No peers to send '{}' to", transfer.file_name()));
        }

        let mut tasks = Vec::with_capacity(targets.len());
        for (label, peer) in targets {
            let transfer = Arc::clone(&transfer);
            let workers = Arc::clone(&self.workers);
            let task_timeout = self.config.task_timeout;
            let handle = self.in_flight.spawn(async move {
                let _permit = workers
                    .acquire_owned()
                    .await
                    .map_err(|_| TransferError::ShutDown)?;
                deliver(peer.as_ref(), &transfer, task_timeout).await
            });
            tasks.push((label, handle));
        }

        let attempted = tasks.len();
        let mut failures = 0;
        for (label, handle) in tasks {
            let result = handle.await.unwrap_or(Err(TransferError::Cancelled));
            if let Err(e) = result {
                failures += 1;
                logger::log_warning(&format!(
                    "Failed to send '{}' to {}: {}",
                    transfer.file_name(),
                    label,
                    e
                ));
            }
        }

        self.update_status(&transfer_id, |status| {
            status.completed = true;
            status.sent_bytes = status.total_bytes;
            if failures > 0 {
                status.failed = true;
                status.error = Some(format!("delivery failed for {} of {} peers", failures, attempted));
            }
        });
        Ok(failures == 0)
    }

    async fn send_to_recipient(
        &self,
        transfer_id: Uuid,
        transfer: Arc<FileTransfer>,
        recipient: &str,
    ) -> Result<bool, TransferError> {
        let target = self
            .peer_connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(recipient)
            .cloned()
            .or_else(|| self.fallback_peer(recipient))
            .ok_or_else(|| TransferError::RecipientNotFound(recipient.to_string()))?;

        let workers = Arc::clone(&self.workers);
        let task_timeout = self.config.task_timeout;
        let handle = self.in_flight.spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|_| TransferError::ShutDown)?;
            deliver(target.as_ref(), &transfer, task_timeout).await
        });
        handle.await.unwrap_or(Err(TransferError::Cancelled))?;

        self.update_status(&transfer_id, |status| {
            status.completed = true;
            status.sent_bytes = status.total_bytes;
        });
        Ok(true)
    }

    fn fallback_peer(&self, recipient: &str) -> Option<Arc<dyn FilePeer>> {
        if !self.config.allow_peer_fallback {
            return None;
        }
        let peer = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()?;
        logger::log_info(&format!(
            "No connection registered for {}, relaying through {}",
            recipient,
            peer.label()
        ));
        Some(peer)
    }

    fn fan_out_targets(&self, sender: &str) -> Vec<(String, Arc<dyn FilePeer>)> {
        let mut targets: Vec<(String, Arc<dyn FilePeer>)> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|peer| (peer.label(), Arc::clone(peer)))
            .collect();
        targets.extend(
            self.peer_connections
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(username, _)| username.as_str() != sender)
                .map(|(username, peer)| (username.clone(), Arc::clone(peer))),
        );
        targets
    }

    fn update_status<F>(&self, transfer_id: &Uuid, update: F)
    where
        F: FnOnce(&mut TransferStatus),
    {
        if let Some(status) = lock(&self.active).get_mut(transfer_id) {
            update(status);
        }
    }

    /// Stops accepting work, waits up to the grace period for running deliveries,
    /// then cancels whatever is left and clears all transient state.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        self.workers.close();

        let drained = async {
            loop {
                let idle = self.in_flight.idle.notified();
                if self.in_flight.is_empty() {
                    break;
                }
                idle.await;
            }
        };
        if timeout(self.config.shutdown_grace, drained).await.is_err() {
            logger::log_warning("Cancelling file transfers still running after grace period");
            self.in_flight.abort_all();
        }

        lock(&self.active).clear();
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.peer_connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

async fn deliver(
    peer: &dyn FilePeer,
    transfer: &FileTransfer,
    task_timeout: Duration,
) -> Result<(), TransferError> {
    match timeout(task_timeout, peer.send_file(transfer)).await {
        Ok(result) => result.map_err(TransferError::from),
        Err(_) => Err(TransferError::TimedOut(task_timeout)),
    }
}
