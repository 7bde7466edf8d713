//! Component H: the valve dispatcher (§4.8).

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{HubError, HubResult};
use crate::model::valve::{Valve, ValveState};
use crate::storage::audit_log::AuditLog;

/// Outcome of a single transport round-trip, bounded by the 2 s deadline
/// (§4.8, §6 "Valve transport").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Acked,
    Timeout,
    Fault,
}

/// Abstract physical valve transport; no wire protocol is specified here
/// (§6). Production deployments back this with Modbus, LoRa, or whatever
/// the field hardware speaks.
#[async_trait]
pub trait ValveTransport: Send + Sync {
    async fn open(&self, valve_id: &str, duration: Option<Duration>) -> DispatchOutcome;
    async fn close(&self, valve_id: &str) -> DispatchOutcome;
}

/// A record of an irrigation run in progress, tracked so the dispatcher can
/// close the valve on duration expiry without a second decision pass.
#[derive(Debug, Clone)]
struct ActiveRun {
    started_at: chrono::DateTime<chrono::Utc>,
    duration_minutes: u32,
}

/// Dispatches open/close commands to valves, enforcing §4.8's legal
/// transition table and the 2 s acknowledgement deadline. Valve state is
/// owned exclusively here.
pub struct ValveDispatcher<T: ValveTransport> {
    transport: T,
    audit_log: Arc<AuditLog>,
    command_timeout: Duration,
    valves: RwLock<HashMap<String, Valve>>,
    active_runs: RwLock<HashMap<String, ActiveRun>>,
}

impl<T: ValveTransport> ValveDispatcher<T> {
    pub fn new(transport: T, audit_log: Arc<AuditLog>, command_timeout: Duration) -> Self {
        Self {
            transport,
            audit_log,
            command_timeout,
            valves: RwLock::new(HashMap::new()),
            active_runs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, valve: Valve) {
        self.valves.write().await.insert(valve.valve_id.clone(), valve);
    }

    pub async fn state_of(&self, valve_id: &str) -> Option<ValveState> {
        self.valves.read().await.get(valve_id).map(|v| v.state)
    }

    /// Commands a valve open for `duration_minutes`, honouring the legal
    /// transition table: CLOSED -> OPENING -> (OPEN | FAULT).
    pub async fn open(&self, valve_id: &str, duration_minutes: u32) -> HubResult<DispatchOutcome> {
        self.transition(valve_id, ValveState::Opening).await?;

        let outcome = tokio::time::timeout(
            self.command_timeout,
            self.transport.open(valve_id, Some(Duration::from_secs(duration_minutes as u64 * 60))),
        )
        .await
        .unwrap_or(DispatchOutcome::Timeout);

        match outcome {
            DispatchOutcome::Acked => {
                self.force_state(valve_id, ValveState::Open).await;
                self.active_runs.write().await.insert(
                    valve_id.to_string(),
                    ActiveRun { started_at: chrono::Utc::now(), duration_minutes },
                );
            }
            DispatchOutcome::Timeout | DispatchOutcome::Fault => {
                self.force_state(valve_id, ValveState::Fault).await;
            }
        }

        Ok(outcome)
    }

    /// Commands a valve closed: OPEN -> CLOSING -> (CLOSED | FAULT).
    pub async fn close(&self, valve_id: &str) -> HubResult<DispatchOutcome> {
        self.transition(valve_id, ValveState::Closing).await?;

        let outcome = tokio::time::timeout(self.command_timeout, self.transport.close(valve_id))
            .await
            .unwrap_or(DispatchOutcome::Timeout);

        match outcome {
            DispatchOutcome::Acked => {
                self.force_state(valve_id, ValveState::Closed).await;
                self.active_runs.write().await.remove(valve_id);
            }
            DispatchOutcome::Timeout | DispatchOutcome::Fault => {
                self.force_state(valve_id, ValveState::Fault).await;
            }
        }

        Ok(outcome)
    }

    /// Returns the valve ids whose commanded duration has elapsed, for the
    /// orchestrator's measurement cycle to close.
    pub async fn expired_runs(&self) -> Vec<String> {
        let now = chrono::Utc::now();
        self.active_runs
            .read()
            .await
            .iter()
            .filter(|(_, run)| now.signed_duration_since(run.started_at).num_minutes() >= run.duration_minutes as i64)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Accepted in every state except FAULT; always audit-logged before the
    /// physical command is sent (§4.8).
    pub async fn manual_override(
        &self,
        valve_id: &str,
        command: &str,
        principal: &str,
        reason: &str,
        duration_minutes: Option<u32>,
    ) -> HubResult<()> {
        {
            let valves = self.valves.read().await;
            if let Some(valve) = valves.get(valve_id) {
                if valve.state == ValveState::Fault {
                    return Err(HubError::precondition_failed(format!(
                        "valve {valve_id} is in FAULT; operator must acknowledge before override"
                    )));
                }
            }
        }

        let mut details = BTreeMap::new();
        details.insert("valve_id".to_string(), valve_id.to_string());
        details.insert("command".to_string(), command.to_string());
        details.insert("reason".to_string(), reason.to_string());
        details.insert("duration_minutes".to_string(), duration_minutes.unwrap_or(0).to_string());
        self.audit_log.log_event("irrigation_override", principal, details).await?;

        if command == "open" {
            self.force_state(valve_id, ValveState::ManualOverride).await;
        } else {
            self.force_state(valve_id, ValveState::Closed).await;
            self.active_runs.write().await.remove(valve_id);
        }

        Ok(())
    }

    /// Releases a valve from MANUAL_OVERRIDE back to CLOSED.
    pub async fn release_override(&self, valve_id: &str) -> HubResult<()> {
        self.transition(valve_id, ValveState::Closed).await
    }

    /// Operator acknowledgement of a FAULT, returning the valve to CLOSED.
    pub async fn acknowledge_fault(&self, valve_id: &str) -> HubResult<()> {
        self.transition(valve_id, ValveState::Closed).await
    }

    /// Drives every OPEN/OPENING valve to CLOSED immediately without
    /// waiting for acks, and logs a single audit event (§4.8).
    pub async fn emergency_stop_all(&self, principal: &str) -> HubResult<()> {
        let to_stop: Vec<String> = {
            let valves = self.valves.read().await;
            valves
                .values()
                .filter(|v| matches!(v.state, ValveState::Open | ValveState::Opening))
                .map(|v| v.valve_id.clone())
                .collect()
        };

        for valve_id in &to_stop {
            self.force_state(valve_id, ValveState::Closed).await;
        }
        self.active_runs.write().await.clear();

        let mut details = BTreeMap::new();
        details.insert("stopped_valves".to_string(), to_stop.join(","));
        self.audit_log.log_event("emergency_stop", principal, details).await?;

        Ok(())
    }

    async fn transition(&self, valve_id: &str, next: ValveState) -> HubResult<()> {
        let mut valves = self.valves.write().await;
        let valve = valves
            .get_mut(valve_id)
            .ok_or_else(|| HubError::invalid_input(format!("unknown valve {valve_id}")))?;

        if !valve.state.can_transition_to(next) {
            return Err(HubError::precondition_failed(format!(
                "valve {valve_id} cannot transition {:?} -> {:?}",
                valve.state, next
            )));
        }
        valve.state = next;
        Ok(())
    }

    async fn force_state(&self, valve_id: &str, next: ValveState) {
        if let Some(valve) = self.valves.write().await.get_mut(valve_id) {
            valve.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    struct AlwaysAck;

    #[async_trait]
    impl ValveTransport for AlwaysAck {
        async fn open(&self, _valve_id: &str, _duration: Option<Duration>) -> DispatchOutcome {
            DispatchOutcome::Acked
        }
        async fn close(&self, _valve_id: &str) -> DispatchOutcome {
            DispatchOutcome::Acked
        }
    }

    struct AlwaysTimeout;

    #[async_trait]
    impl ValveTransport for AlwaysTimeout {
        async fn open(&self, _valve_id: &str, _duration: Option<Duration>) -> DispatchOutcome {
            tokio::time::sleep(Duration::from_secs(5)).await;
            DispatchOutcome::Acked
        }
        async fn close(&self, _valve_id: &str) -> DispatchOutcome {
            DispatchOutcome::Acked
        }
    }

    async fn audit_log() -> Arc<AuditLog> {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::storage::schema::ensure_schema(&pool).await.unwrap();
        Arc::new(AuditLog::new(pool))
    }

    #[tokio::test]
    async fn open_then_close_happy_path() {
        let dispatcher = ValveDispatcher::new(AlwaysAck, audit_log().await, Duration::from_secs(2));
        dispatcher.register(Valve::new("V1", "Z1")).await;

        let outcome = dispatcher.open("V1", 30).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Acked);
        assert_eq!(dispatcher.state_of("V1").await, Some(ValveState::Open));

        let outcome = dispatcher.close("V1").await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Acked);
        assert_eq!(dispatcher.state_of("V1").await, Some(ValveState::Closed));
    }

    #[tokio::test]
    async fn timeout_moves_valve_to_fault() {
        let dispatcher = ValveDispatcher::new(AlwaysTimeout, audit_log().await, Duration::from_millis(50));
        dispatcher.register(Valve::new("V1", "Z1")).await;

        let outcome = dispatcher.open("V1", 30).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Timeout);
        assert_eq!(dispatcher.state_of("V1").await, Some(ValveState::Fault));
    }

    #[tokio::test]
    async fn emergency_stop_closes_every_open_valve_without_waiting() {
        let dispatcher = ValveDispatcher::new(AlwaysAck, audit_log().await, Duration::from_secs(2));
        dispatcher.register(Valve::new("V1", "Z1")).await;
        dispatcher.register(Valve::new("V2", "Z2")).await;
        dispatcher.open("V1", 30).await.unwrap();
        dispatcher.open("V2", 30).await.unwrap();

        dispatcher.emergency_stop_all("system").await.unwrap();

        assert_eq!(dispatcher.state_of("V1").await, Some(ValveState::Closed));
        assert_eq!(dispatcher.state_of("V2").await, Some(ValveState::Closed));
    }

    #[tokio::test]
    async fn manual_override_refused_while_in_fault() {
        let dispatcher = ValveDispatcher::new(AlwaysTimeout, audit_log().await, Duration::from_millis(10));
        dispatcher.register(Valve::new("V1", "Z1")).await;
        dispatcher.open("V1", 30).await.unwrap();
        assert_eq!(dispatcher.state_of("V1").await, Some(ValveState::Fault));

        let result = dispatcher.manual_override("V1", "open", "operator-1", "testing", None).await;
        assert!(result.is_err());
    }
}
