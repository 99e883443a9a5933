use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use uuid::Uuid;

/// One live bidirectional control channel (component 4.D).
///
/// Created on connect, mutated by incoming messages, destroyed on close or
/// heartbeat timeout. Fields that change after construction sit behind a
/// single `Mutex` so a snapshot is always internally consistent; the channel
/// id and outbound sender never change for the channel's lifetime. `closed`
/// is the only way anything other than the owning socket task can force a
/// connection down — the heartbeat sweep and graceful shutdown both go
/// through `close()` rather than touching the socket directly.
pub struct ControlChannel {
    pub id: Uuid,
    tx: mpsc::UnboundedSender<String>,
    state: Mutex<ChannelState>,
    closed: Notify,
}

struct ChannelState {
    authenticated: bool,
    user_id: Option<Uuid>,
    machine_id: Option<Uuid>,
    web_client_id: Option<String>,
    last_heartbeat: Instant,
}

/// A point-in-time read of a channel's mutable fields.
#[derive(Clone, Debug)]
pub struct ChannelSnapshot {
    pub authenticated: bool,
    pub user_id: Option<Uuid>,
    pub machine_id: Option<Uuid>,
    pub web_client_id: Option<String>,
    pub last_heartbeat: Instant,
}

impl ControlChannel {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(ControlChannel {
            id: Uuid::new_v4(),
            tx,
            state: Mutex::new(ChannelState {
                authenticated: false,
                user_id: None,
                machine_id: None,
                web_client_id: None,
                last_heartbeat: Instant::now(),
            }),
            closed: Notify::new(),
        })
    }

    /// Send a pre-serialized frame. Failures are swallowed — the peer may be
    /// mid-close and a dropped receiver here is not a protocol error.
    pub fn send(&self, message: String) {
        let _ = self.tx.send(message);
    }

    /// Force this channel's socket closed. Uses `notify_one` rather than
    /// `notify_waiters` so a `close()` that lands before `handle_socket`
    /// reaches its `select!` still delivers — the permit is stored instead
    /// of lost.
    pub fn close(&self) {
        self.closed.notify_one();
    }

    /// Resolves once `close()` has been called. The connection task races
    /// this against its send/recv loops in a `select!`.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    pub async fn snapshot(&self) -> ChannelSnapshot {
        let state = self.state.lock().await;
        ChannelSnapshot {
            authenticated: state.authenticated,
            user_id: state.user_id,
            machine_id: state.machine_id,
            web_client_id: state.web_client_id.clone(),
            last_heartbeat: state.last_heartbeat,
        }
    }

    pub async fn authenticate(&self, user_id: Uuid) {
        let mut state = self.state.lock().await;
        state.authenticated = true;
        state.user_id = Some(user_id);
    }

    pub async fn set_machine_id(&self, machine_id: Uuid) {
        self.state.lock().await.machine_id = Some(machine_id);
    }

    pub async fn set_web_client_id(&self, web_client_id: String) {
        self.state.lock().await.web_client_id = Some(web_client_id);
    }

    pub async fn touch_heartbeat(&self) {
        self.state.lock().await.last_heartbeat = Instant::now();
    }

    pub async fn is_stale(&self, timeout: Duration) -> bool {
        self.state.lock().await.last_heartbeat.elapsed() > timeout
    }
}

/// The "connected-clients" table from §5: every live control channel, keyed
/// by its own id. Independent of the signaling broker's `MachineChannels`/
/// `WebChannels` tables; used for the heartbeat sweep and the `/health`
/// client count.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    channels: Arc<RwLock<HashMap<Uuid, Arc<ControlChannel>>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, channel: Arc<ControlChannel>) {
        self.channels.write().await.insert(channel.id, channel);
    }

    pub async fn remove(&self, id: Uuid) -> Option<Arc<ControlChannel>> {
        self.channels.write().await.remove(&id)
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<ControlChannel>> {
        self.channels.read().await.get(&id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Closes every live channel's socket. Used on graceful shutdown so the
    /// server doesn't just stop accepting new connections while leaving
    /// existing ones dangling until the client notices.
    pub async fn close_all(&self) {
        for channel in self.channels.read().await.values() {
            channel.close();
        }
    }

    /// Returns every channel whose last heartbeat predates `timeout`.
    pub async fn stale_channels(&self, timeout: Duration) -> Vec<Arc<ControlChannel>> {
        let channels = self.channels.read().await;
        let mut stale = Vec::new();
        for channel in channels.values() {
            if channel.is_stale(timeout).await {
                stale.push(channel.clone());
            }
        }
        stale
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_channel() -> Arc<ControlChannel> {
        let (tx, _rx) = mpsc::unbounded_channel();
        ControlChannel::new(tx)
    }

    #[tokio::test]
    async fn insert_and_get() {
        let mgr = ConnectionManager::new();
        let channel = make_channel();
        let id = channel.id;

        assert!(mgr.get(id).await.is_none());
        mgr.insert(channel).await;
        assert!(mgr.get(id).await.is_some());
    }

    #[tokio::test]
    async fn remove_clears_channel() {
        let mgr = ConnectionManager::new();
        let channel = make_channel();
        let id = channel.id;

        mgr.insert(channel).await;
        mgr.remove(id).await;
        assert!(mgr.get(id).await.is_none());
    }

    #[tokio::test]
    async fn send_delivers_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = ControlChannel::new(tx);

        channel.send("hello".to_string());
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn authenticate_sets_snapshot_fields() {
        let channel = make_channel();
        let user_id = Uuid::new_v4();

        channel.authenticate(user_id).await;
        let snap = channel.snapshot().await;
        assert!(snap.authenticated);
        assert_eq!(snap.user_id, Some(user_id));
    }

    #[tokio::test]
    async fn count_tracks_inserts_and_removes() {
        let mgr = ConnectionManager::new();
        assert_eq!(mgr.count().await, 0);

        let c1 = make_channel();
        let c2 = make_channel();
        let id1 = c1.id;

        mgr.insert(c1).await;
        assert_eq!(mgr.count().await, 1);

        mgr.insert(c2).await;
        assert_eq!(mgr.count().await, 2);

        mgr.remove(id1).await;
        assert_eq!(mgr.count().await, 1);
    }

    #[tokio::test]
    async fn stale_channels_reports_silent_peers() {
        let mgr = ConnectionManager::new();
        let channel = make_channel();
        mgr.insert(channel.clone()).await;

        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(mgr.stale_channels(Duration::from_secs(60)).await.is_empty());
        assert_eq!(mgr.stale_channels(Duration::from_millis(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let mgr = ConnectionManager::new();
        let clone = mgr.clone();

        let channel = make_channel();
        let id = channel.id;

        mgr.insert(channel).await;
        assert!(clone.get(id).await.is_some());
    }
}
