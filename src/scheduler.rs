//! Component L: the irrigation scheduler (§2 "Supplemented components").
//!
//! Grounded in the original engine's `IrrigationScheduler` companion to the
//! VRI controller: holds operator-entered windows, sorted by start time then
//! priority, and surfaces due ones for the orchestrator to execute.

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::model::decision::ScheduledIrrigation;

#[derive(Debug, Clone)]
struct ScheduledOperation {
    window: ScheduledIrrigation,
    priority: i32,
}

pub struct IrrigationScheduler {
    operations: RwLock<Vec<ScheduledOperation>>,
}

impl Default for IrrigationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl IrrigationScheduler {
    pub fn new() -> Self {
        Self { operations: RwLock::new(Vec::new()) }
    }

    /// Schedules a future irrigation window, keeping the list ordered by
    /// (start, priority) as the original scheduler does.
    pub async fn schedule(&self, window: ScheduledIrrigation, priority: i32) {
        let mut ops = self.operations.write().await;
        ops.push(ScheduledOperation { window, priority });
        ops.sort_by(|a, b| a.window.start.cmp(&b.window.start).then(a.priority.cmp(&b.priority)));
    }

    /// Returns and removes windows whose start has arrived, in schedule
    /// order, for the orchestrator to hand to the decision engine.
    pub async fn drain_due(&self, now: DateTime<Utc>) -> Vec<ScheduledIrrigation> {
        let mut ops = self.operations.write().await;
        let (due, pending): (Vec<_>, Vec<_>) = ops.drain(..).partition(|op| op.window.start <= now);
        *ops = pending;
        due.into_iter().map(|op| op.window).collect()
    }

    pub async fn pending(&self) -> Vec<ScheduledIrrigation> {
        self.operations.read().await.iter().map(|op| op.window.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window(zone: &str, start: DateTime<Utc>) -> ScheduledIrrigation {
        ScheduledIrrigation { zone_id: zone.to_string(), start, duration_minutes: 30, principal: "operator-1".to_string() }
    }

    #[tokio::test]
    async fn drain_due_returns_only_elapsed_windows_in_order() {
        let scheduler = IrrigationScheduler::new();
        let now = Utc::now();
        scheduler.schedule(window("Z2", now - Duration::minutes(5)), 1).await;
        scheduler.schedule(window("Z1", now - Duration::minutes(10)), 1).await;
        scheduler.schedule(window("Z3", now + Duration::hours(1)), 1).await;

        let due = scheduler.drain_due(now).await;
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].zone_id, "Z1");
        assert_eq!(due[1].zone_id, "Z2");
        assert_eq!(scheduler.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn ties_in_start_time_break_by_priority() {
        let scheduler = IrrigationScheduler::new();
        let now = Utc::now();
        scheduler.schedule(window("low", now), 5).await;
        scheduler.schedule(window("high", now), 1).await;

        let due = scheduler.drain_due(now).await;
        assert_eq!(due[0].zone_id, "high");
        assert_eq!(due[1].zone_id, "low");
    }
}
