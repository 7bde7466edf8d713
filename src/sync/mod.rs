//! Component I: hub<->mirror state synchronisation (§4.9).
//!
//! No wire protocol is specified (§6 "Mirror link" is abstract); this module
//! models the state machine and the channel as a trait so a concrete
//! transport can be plugged in without touching the failover logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::HubResult;
use crate::model::snapshot::SystemStateSnapshot;

/// Synchronisation state machine (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connected,
    FailoverActive,
    Recovering,
}

/// A message-oriented, ordered, reliable channel to the mirror (§6 "Mirror
/// link"). If the transport drops, the sync component re-establishes and
/// resumes from the last acknowledged own-hash.
#[async_trait]
pub trait MirrorLink: Send + Sync {
    async fn send_state(&self, snapshot: &SystemStateSnapshot) -> HubResult<()>;
    async fn send_measurement_hash(&self, own_hash: &str) -> HubResult<()>;
    async fn send_heartbeat(&self) -> HubResult<bool>;
}

/// Callback invoked when the hub enters FAILOVER_ACTIVE: the orchestrator
/// uses this to cease valve actuation (§4.9).
pub type FailoverCallback = Arc<dyn Fn() + Send + Sync>;

pub struct SyncComponent<L: MirrorLink> {
    link: L,
    heartbeat_timeout: std::time::Duration,
    state: RwLock<SyncState>,
    last_heartbeat_ack: RwLock<Option<DateTime<Utc>>>,
    last_acknowledged_hash: RwLock<String>,
    failover_callback: RwLock<Option<FailoverCallback>>,
}

impl<L: MirrorLink> SyncComponent<L> {
    pub fn new(link: L, heartbeat_timeout: std::time::Duration, genesis_hash: String) -> Self {
        Self {
            link,
            heartbeat_timeout,
            state: RwLock::new(SyncState::Disconnected),
            last_heartbeat_ack: RwLock::new(None),
            last_acknowledged_hash: RwLock::new(genesis_hash),
            failover_callback: RwLock::new(None),
        }
    }

    pub async fn on_failover(&self, callback: FailoverCallback) {
        *self.failover_callback.write().await = Some(callback);
    }

    pub async fn state(&self) -> SyncState {
        *self.state.read().await
    }

    pub async fn connect(&self) {
        *self.state.write().await = SyncState::Connected;
        *self.last_heartbeat_ack.write().await = Some(Utc::now());
    }

    /// Sends a heartbeat and evaluates the failover timeout (§4.9).
    pub async fn tick_heartbeat(&self) {
        if *self.state.read().await != SyncState::Connected {
            return;
        }

        if let Ok(acked) = self.link.send_heartbeat().await {
            if acked {
                *self.last_heartbeat_ack.write().await = Some(Utc::now());
                return;
            }
        }

        let timed_out = match *self.last_heartbeat_ack.read().await {
            Some(t) => Utc::now().signed_duration_since(t).to_std().map(|d| d > self.heartbeat_timeout).unwrap_or(false),
            None => true,
        };

        if timed_out {
            self.trigger_failover().await;
        }
    }

    async fn trigger_failover(&self) {
        *self.state.write().await = SyncState::FailoverActive;
        if let Some(callback) = self.failover_callback.read().await.as_ref() {
            callback();
        }
    }

    /// Mirrors a state snapshot; only effective while CONNECTED (§4.9).
    pub async fn sync_state(&self, snapshot: &SystemStateSnapshot) -> HubResult<bool> {
        if *self.state.read().await != SyncState::Connected {
            return Ok(false);
        }
        self.link.send_state(snapshot).await?;
        Ok(true)
    }

    /// Mirrors a single measurement's own-hash for chain continuity.
    pub async fn sync_measurement(&self, own_hash: &str) -> HubResult<bool> {
        if *self.state.read().await != SyncState::Connected {
            return Ok(false);
        }
        self.link.send_measurement_hash(own_hash).await?;
        *self.last_acknowledged_hash.write().await = own_hash.to_string();
        Ok(true)
    }

    pub async fn last_acknowledged_hash(&self) -> String {
        self.last_acknowledged_hash.read().await.clone()
    }

    /// The mirror observing missed heartbeats assumes control independently;
    /// the hub side re-enters via `begin_recovery`/`resume` once the link is
    /// restored (§4.9).
    pub async fn begin_recovery(&self) {
        *self.state.write().await = SyncState::Recovering;
    }

    pub async fn resume(&self) {
        *self.state.write().await = SyncState::Connected;
        *self.last_heartbeat_ack.write().await = Some(Utc::now());
    }

    pub async fn disconnect(&self) {
        *self.state.write().await = SyncState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeLink {
        heartbeat_acks: AtomicBool,
        heartbeat_calls: AtomicUsize,
    }

    #[async_trait]
    impl MirrorLink for FakeLink {
        async fn send_state(&self, _snapshot: &SystemStateSnapshot) -> HubResult<()> {
            Ok(())
        }
        async fn send_measurement_hash(&self, _own_hash: &str) -> HubResult<()> {
            Ok(())
        }
        async fn send_heartbeat(&self) -> HubResult<bool> {
            self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.heartbeat_acks.load(Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn connects_and_syncs_measurement_hash() {
        let link = FakeLink { heartbeat_acks: AtomicBool::new(true), heartbeat_calls: AtomicUsize::new(0) };
        let sync = SyncComponent::new(link, std::time::Duration::from_secs(30), "0".repeat(64));
        sync.connect().await;
        assert_eq!(sync.state().await, SyncState::Connected);

        let synced = sync.sync_measurement("abc123").await.unwrap();
        assert!(synced);
        assert_eq!(sync.last_acknowledged_hash().await, "abc123");
    }

    #[tokio::test]
    async fn missed_heartbeats_trigger_failover_callback() {
        let link = FakeLink { heartbeat_acks: AtomicBool::new(false), heartbeat_calls: AtomicUsize::new(0) };
        let sync = SyncComponent::new(link, std::time::Duration::from_millis(1), "0".repeat(64));
        sync.connect().await;

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        sync.on_failover(Arc::new(move || fired_clone.store(true, Ordering::SeqCst))).await;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        sync.tick_heartbeat().await;

        assert_eq!(sync.state().await, SyncState::FailoverActive);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn recovery_resumes_connected_state() {
        let link = FakeLink { heartbeat_acks: AtomicBool::new(true), heartbeat_calls: AtomicUsize::new(0) };
        let sync = SyncComponent::new(link, std::time::Duration::from_secs(30), "0".repeat(64));
        sync.connect().await;
        sync.begin_recovery().await;
        assert_eq!(sync.state().await, SyncState::Recovering);
        sync.resume().await;
        assert_eq!(sync.state().await, SyncState::Connected);
    }

    #[tokio::test]
    async fn sync_while_disconnected_is_a_noop_not_an_error() {
        let link = FakeLink { heartbeat_acks: AtomicBool::new(true), heartbeat_calls: AtomicUsize::new(0) };
        let sync = SyncComponent::new(link, std::time::Duration::from_secs(30), "0".repeat(64));
        let synced = sync.sync_measurement("abc").await.unwrap();
        assert!(!synced);
    }
}
