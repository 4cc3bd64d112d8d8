//! Remote Node
//!
//! One memcached server. Every operation for the node is queued and run by a
//! single worker task that owns the client connection, so the server sees
//! operations in the order they were issued.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_memcached::{AsciiProtocol, Client};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error};

use crate::config::{Credentials, NodeAddress};
use crate::error::{CacheError, Result};

/// Key of the write that carries the login. The server ignores it.
const AUTH_KEY: &str = "auth";

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Get { key: String, reply: Reply<Option<Vec<u8>>> },
    Set { key: String, value: Vec<u8>, expiration: i64 },
    Delete { key: String, reply: Reply<()> },
    Flush { reply: Reply<()> },
    /// Answered once every command queued before it has run
    Barrier { reply: oneshot::Sender<()> },
}

// == Shared State ==
/// What the worker and the node handle both see.
#[derive(Debug)]
struct Shared {
    address: NodeAddress,
    credentials: Option<Credentials>,
    op_timeout: Duration,
    connected: AtomicBool,
    requests: AtomicU64,
    failures: AtomicU64,
    dropped_writes: AtomicU64,
    queued_writes: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn record_failure(&self, cause: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(cause.to_string());
    }

    fn failed(&self, error: CacheError) -> CacheError {
        self.record_failure(&error.to_string());
        error
    }

    fn timed_out(&self) -> CacheError {
        self.failed(CacheError::Timeout(format!(
            "no response from {} within {:?}",
            self.address, self.op_timeout
        )))
    }

    // == Connect ==
    async fn connect(&self) -> Result<Client> {
        let dsn = format!("tcp://{}", self.address);
        let mut client = match timeout(self.op_timeout, Client::new(&dsn)).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                return Err(self.failed(CacheError::Remote(format!(
                    "could not connect to {}: {}",
                    self.address, e
                ))))
            }
            Err(_) => return Err(self.timed_out()),
        };

        if let Some(credentials) = &self.credentials {
            let login = format!("{} {}", credentials.user, credentials.password);
            match timeout(self.op_timeout, client.set(AUTH_KEY, login.as_bytes(), Some(0), None)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(self.failed(CacheError::Remote(format!(
                        "authentication as {} refused by {}: {}",
                        credentials.user, self.address, e
                    ))))
                }
                Err(_) => return Err(self.timed_out()),
            }
        }

        self.connected.store(true, Ordering::Relaxed);
        debug!(node = %self.address, "Connected to remote cache node");
        Ok(client)
    }

    /// The open connection, opening one first if needed.
    async fn connection<'a>(&self, slot: &'a mut Option<Client>) -> Result<&'a mut Client> {
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }
        slot.as_mut()
            .ok_or_else(|| CacheError::Remote(format!("no connection to {}", self.address)))
    }

    /// Drops the connection. A request that timed out may still get its
    /// answer later, which must not be read as the answer to the next one.
    fn disconnect(&self, slot: &mut Option<Client>) {
        if slot.take().is_some() {
            self.connected.store(false, Ordering::Relaxed);
        }
    }

    // == Commands ==
    async fn get(&self, slot: &mut Option<Client>, key: &str) -> Result<Option<Vec<u8>>> {
        let outcome = {
            let client = self.connection(slot).await?;
            timeout(self.op_timeout, client.get(key)).await
        };
        match outcome {
            Ok(Ok(Some(value))) => {
                let data: Option<Vec<u8>> = value.data.into();
                Ok(data)
            }
            Ok(Ok(None)) => Ok(None),
            Ok(Err(e)) => {
                self.disconnect(slot);
                Err(self.failed(CacheError::Remote(e.to_string())))
            }
            Err(_) => {
                self.disconnect(slot);
                Err(self.timed_out())
            }
        }
    }

    async fn set(&self, slot: &mut Option<Client>, key: &str, value: &[u8], expiration: i64) -> Result<()> {
        let outcome = {
            let client = self.connection(slot).await?;
            timeout(self.op_timeout, client.set(key, value, Some(expiration), None)).await
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.disconnect(slot);
                Err(self.failed(CacheError::Remote(e.to_string())))
            }
            Err(_) => {
                self.disconnect(slot);
                Err(self.timed_out())
            }
        }
    }

    /// Deleting a missing key is answered with an error by the client, so
    /// only connection failures and timeouts count.
    async fn delete(&self, slot: &mut Option<Client>, key: &str) -> Result<()> {
        let outcome = {
            let client = self.connection(slot).await?;
            timeout(self.op_timeout, client.delete(key)).await
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!(node = %self.address, key, "Delete not acknowledged: {}", e);
                Ok(())
            }
            Err(_) => {
                self.disconnect(slot);
                Err(self.timed_out())
            }
        }
    }

    async fn flush(&self, slot: &mut Option<Client>) -> Result<()> {
        let outcome = {
            let client = self.connection(slot).await?;
            timeout(self.op_timeout, client.flush_all()).await
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.disconnect(slot);
                Err(self.failed(CacheError::Remote(e.to_string())))
            }
            Err(_) => {
                self.disconnect(slot);
                Err(self.timed_out())
            }
        }
    }
}

// == Worker ==
async fn run_worker(shared: Arc<Shared>, mut commands: mpsc::Receiver<Command>) {
    let mut client: Option<Client> = None;

    while let Some(command) = commands.recv().await {
        shared.requests.fetch_add(1, Ordering::Relaxed);
        match command {
            Command::Get { key, reply } => {
                // Nobody is waiting for this read anymore
                if reply.is_closed() {
                    continue;
                }
                let _ = reply.send(shared.get(&mut client, &key).await);
            }
            Command::Set { key, value, expiration } => {
                let outcome = shared.set(&mut client, &key, &value, expiration).await;
                shared.queued_writes.fetch_sub(1, Ordering::Relaxed);
                if let Err(e) = outcome {
                    shared.dropped_writes.fetch_add(1, Ordering::Relaxed);
                    error!("Cache write dropped. key={}, cause={}, node={}", key, e, shared.address);
                }
            }
            Command::Delete { key, reply } => {
                let _ = reply.send(shared.delete(&mut client, &key).await);
            }
            Command::Flush { reply } => {
                let _ = reply.send(shared.flush(&mut client).await);
            }
            Command::Barrier { reply } => {
                let _ = reply.send(());
            }
        }
    }

    shared.disconnect(&mut client);
    debug!(node = %shared.address, "Remote cache node worker finished");
}

#[derive(Debug, Default)]
struct Queue {
    sender: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

// == Node ==
/// A remote server and the queue in front of it.
///
/// The worker is started on first use. After [`Node::close`] nothing more
/// is accepted and the worker finishes what is already queued.
#[derive(Debug)]
pub struct Node {
    shared: Arc<Shared>,
    capacity: usize,
    queue: Mutex<Queue>,
}

impl Node {
    pub fn new(
        address: NodeAddress,
        credentials: Option<Credentials>,
        op_timeout: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                address,
                credentials,
                op_timeout,
                connected: AtomicBool::new(false),
                requests: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                dropped_writes: AtomicU64::new(0),
                queued_writes: AtomicUsize::new(0),
                last_error: Mutex::new(None),
            }),
            capacity: capacity.max(1),
            queue: Mutex::new(Queue::default()),
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.shared.address
    }

    /// Queues `command`. The check for a closed node and the send happen
    /// under one lock, so nothing slips in behind [`Node::close`].
    fn submit(&self, command: Command) -> Result<()> {
        let mut guard = self.queue.lock();
        let queue = &mut *guard;
        if queue.closed {
            return Err(CacheError::IllegalState(format!(
                "remote cache node {} has been stopped",
                self.shared.address
            )));
        }
        if queue.sender.is_none() {
            let (sender, receiver) = mpsc::channel(self.capacity);
            queue.worker = Some(tokio::spawn(run_worker(Arc::clone(&self.shared), receiver)));
            queue.sender = Some(sender);
        }
        let Some(sender) = queue.sender.as_ref() else {
            return Err(CacheError::Internal("node queue missing".to_string()));
        };

        sender.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CacheError::Remote(format!(
                "queue for {} is full ({} operations)",
                self.shared.address, self.capacity
            )),
            mpsc::error::TrySendError::Closed(_) => CacheError::Remote(format!(
                "worker for {} is gone",
                self.shared.address
            )),
        })
    }

    /// Queues a read and returns where its answer will arrive.
    pub fn request_get(&self, key: &str) -> Result<oneshot::Receiver<Result<Option<Vec<u8>>>>> {
        let (reply, answer) = oneshot::channel();
        self.submit(Command::Get {
            key: key.to_string(),
            reply,
        })?;
        Ok(answer)
    }

    /// Waits for an answer until `deadline`.
    pub async fn await_answer<T>(
        &self,
        answer: oneshot::Receiver<Result<T>>,
        deadline: Instant,
    ) -> Result<T> {
        match timeout_at(deadline, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CacheError::Remote(format!(
                "worker for {} stopped before answering",
                self.shared.address
            ))),
            Err(_) => Err(CacheError::Timeout(format!(
                "no response from {} within {:?}",
                self.shared.address, self.shared.op_timeout
            ))),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let answer = self.request_get(key)?;
        self.await_answer(answer, self.deadline()).await
    }

    /// Queues a write without waiting for it. A full queue drops the write.
    pub fn set(&self, key: &str, value: Vec<u8>, expiration: i64) -> Result<()> {
        self.shared.queued_writes.fetch_add(1, Ordering::Relaxed);
        let queued = self.submit(Command::Set {
            key: key.to_string(),
            value,
            expiration,
        });
        if queued.is_err() {
            self.shared.queued_writes.fetch_sub(1, Ordering::Relaxed);
        }
        queued
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let (reply, answer) = oneshot::channel();
        self.submit(Command::Delete {
            key: key.to_string(),
            reply,
        })?;
        self.await_answer(answer, self.deadline()).await
    }

    pub async fn flush(&self) -> Result<()> {
        let (reply, answer) = oneshot::channel();
        self.submit(Command::Flush { reply })?;
        self.await_answer(answer, self.deadline()).await
    }

    /// Waits until everything queued so far has run.
    pub async fn drain(&self) {
        if self.queue.lock().sender.is_none() {
            return;
        }
        let (reply, done) = oneshot::channel();
        if self.submit(Command::Barrier { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Stops accepting commands. The returned worker ends once the queue is
    /// empty.
    pub fn close(&self) -> Option<JoinHandle<()>> {
        let mut queue = self.queue.lock();
        queue.closed = true;
        queue.sender = None;
        queue.worker.take()
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.shared.op_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    pub fn queued_writes(&self) -> usize {
        self.shared.queued_writes.load(Ordering::Relaxed)
    }

    pub fn dropped_writes(&self) -> u64 {
        self.shared.dropped_writes.load(Ordering::Relaxed)
    }

    /// One-line state summary for diagnostics.
    pub fn status(&self) -> String {
        let last_error = self.shared.last_error.lock().clone();
        format!(
            "{} connected={} queued_writes={} requests={} failures={} last_error={}",
            self.shared.address,
            self.is_connected(),
            self.queued_writes(),
            self.shared.requests.load(Ordering::Relaxed),
            self.shared.failures.load(Ordering::Relaxed),
            last_error.as_deref().unwrap_or("none")
        )
    }
}

// == Node Selection ==
/// Picks the node owning `key`: FNV-1a over the key bytes, modulo the node
/// count. Stable across processes so every client agrees.
pub fn node_index(key: &[u8], nodes: usize) -> usize {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    if nodes <= 1 {
        return 0;
    }
    let hash = key
        .iter()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ u32::from(*byte)).wrapping_mul(PRIME));
    hash as usize % nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn unused_node(port: u16) -> Node {
        Node::new(NodeAddress::new("127.0.0.1", port), None, Duration::from_millis(500), 4)
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[test]
    fn test_node_index_is_stable() {
        // FNV-1a("a") = 0xe40c292c
        assert_eq!(node_index(b"a", 1 << 16), 0xe40c292c_u32 as usize % (1 << 16));
        assert_eq!(node_index(b"user:1", 3), node_index(b"user:1", 3));
        assert_eq!(node_index(b"anything", 1), 0);
        assert_eq!(node_index(b"anything", 0), 0);
    }

    #[test]
    fn test_node_index_spreads_keys() {
        let used: HashSet<usize> = (0..100)
            .map(|i| node_index(format!("key{i}").as_bytes(), 3))
            .collect();
        assert_eq!(used.len(), 3);
    }

    #[test]
    fn test_worker_starts_on_first_use() {
        let node = unused_node(11211);
        assert!(node.close().is_none());
        assert!(node.status().contains("connected=false"));
    }

    #[tokio::test]
    async fn test_unreachable_node_records_failure() {
        let node = unused_node(closed_port().await);

        assert!(node.get("k").await.is_err());
        assert!(node.status().contains("failures=1"));
        assert!(!node.is_connected());
    }

    #[tokio::test]
    async fn test_failed_write_is_counted() {
        let node = unused_node(closed_port().await);

        node.set("k", b"v".to_vec(), 60).unwrap();
        node.drain().await;

        assert_eq!(node.dropped_writes(), 1);
        assert_eq!(node.queued_writes(), 0);
    }

    #[tokio::test]
    async fn test_closed_node_rejects_commands() {
        let node = unused_node(closed_port().await);
        node.drain().await;
        node.close();

        assert!(matches!(node.set("k", Vec::new(), 0), Err(CacheError::IllegalState(_))));
        assert!(matches!(node.get("k").await, Err(CacheError::IllegalState(_))));
        assert_eq!(node.queued_writes(), 0);
    }
}
