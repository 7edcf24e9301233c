//! Scheduler supervisor: one cancellable timer loop per enabled parameter.
//!
//! `reconcile` diffs the desired set (from the configuration) against the
//! loops actually running, so it serves startup and every config write with
//! the same code path. A rule change is a stop followed by a start with the
//! new rule anchored at "now".

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::Schedule;
use crate::domain::{Config, Parameter};
use crate::ports::clock::Clock;

/// Receives scheduler fires. Implemented by the controller, which checks
/// admissibility and enqueues — or logs a skip.
#[async_trait]
pub trait ScheduleSink: Send + Sync {
    async fn fire(&self, param: Parameter);
}

struct SchedulerHandle {
    rule: String,
    cancel: CancellationToken,
}

pub struct Supervisor {
    clock: Arc<dyn Clock>,
    running: Mutex<HashMap<Parameter, SchedulerHandle>>,
}

impl Supervisor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Bring the running loops in line with `cfg`.
    ///
    /// - enabled + non-empty rule, not running (or rule changed): start
    /// - running, now disabled or rule changed: cancel and remove
    /// - unchanged: leave alone
    pub async fn reconcile(&self, cfg: &Config, sink: &Arc<dyn ScheduleSink>) {
        let mut running = self.running.lock().await;

        for p in Parameter::ALL {
            let desired = if cfg.enabled(p) {
                let rule = cfg.schedule(p).trim();
                (!rule.is_empty()).then(|| rule.to_string())
            } else {
                None
            };

            if let Some(handle) = running.get(&p) {
                if desired.as_deref() == Some(handle.rule.as_str()) {
                    continue;
                }
                let handle = running.remove(&p).expect("checked above");
                handle.cancel.cancel();
                tracing::info!(param = %p, "scheduler stopped");
            }

            let Some(rule) = desired else { continue };
            let schedule = match Schedule::parse(&rule, self.clock.now()) {
                Ok(Some(schedule)) => schedule,
                // non-empty by construction, so this arm is unreachable
                Ok(None) => continue,
                Err(err) => {
                    // config writes validate rules up front; anything that
                    // still slips through is ignored rather than fatal
                    tracing::warn!(param = %p, error = %err, "ignoring invalid schedule");
                    continue;
                }
            };

            let cancel = CancellationToken::new();
            let clock = Arc::clone(&self.clock);
            let sink = Arc::clone(sink);
            let token = cancel.clone();
            tokio::spawn(async move {
                schedule
                    .run(clock, token, move || {
                        let sink = Arc::clone(&sink);
                        async move { sink.fire(p).await }
                    })
                    .await;
            });

            running.insert(p, SchedulerHandle { rule, cancel });
            tracing::info!(param = %p, "scheduler started");
        }
    }

    /// Parameters with a live scheduler loop.
    pub async fn active(&self) -> Vec<Parameter> {
        let running = self.running.lock().await;
        let mut params: Vec<_> = running.keys().copied().collect();
        params.sort();
        params
    }

    /// Cancel every loop. Used at daemon shutdown.
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        for (_, handle) in running.drain() {
            handle.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ports::clock::SystemClock;

    struct CountingSink {
        fires: AtomicUsize,
    }

    #[async_trait]
    impl ScheduleSink for CountingSink {
        async fn fire(&self, _param: Parameter) {
            self.fires.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sink() -> Arc<dyn ScheduleSink> {
        Arc::new(CountingSink {
            fires: AtomicUsize::new(0),
        })
    }

    fn cfg_with_ca(rule: &str, enabled: bool) -> Config {
        Config {
            enable_ca: enabled,
            schedule_ca: rule.to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn reconcile_starts_and_stops_loops() {
        let supervisor = Supervisor::new(Arc::new(SystemClock));
        let sink = sink();

        supervisor
            .reconcile(&cfg_with_ca("FREQ=HOURLY;INTERVAL=6", true), &sink)
            .await;
        assert_eq!(supervisor.active().await, vec![Parameter::Ca]);

        // unchanged rule: still exactly one loop
        supervisor
            .reconcile(&cfg_with_ca("FREQ=HOURLY;INTERVAL=6", true), &sink)
            .await;
        assert_eq!(supervisor.active().await, vec![Parameter::Ca]);

        // disable: loop goes away
        supervisor
            .reconcile(&cfg_with_ca("FREQ=HOURLY;INTERVAL=6", false), &sink)
            .await;
        assert!(supervisor.active().await.is_empty());
    }

    #[tokio::test]
    async fn rule_change_restarts_the_loop() {
        let supervisor = Supervisor::new(Arc::new(SystemClock));
        let sink = sink();

        supervisor
            .reconcile(&cfg_with_ca("FREQ=HOURLY;INTERVAL=6", true), &sink)
            .await;
        supervisor
            .reconcile(&cfg_with_ca("FREQ=DAILY;BYHOUR=4;BYMINUTE=0", true), &sink)
            .await;

        let running = supervisor.running.lock().await;
        assert_eq!(
            running.get(&Parameter::Ca).unwrap().rule,
            "FREQ=DAILY;BYHOUR=4;BYMINUTE=0"
        );
    }

    #[tokio::test]
    async fn empty_or_invalid_rules_start_nothing() {
        let supervisor = Supervisor::new(Arc::new(SystemClock));
        let sink = sink();

        supervisor.reconcile(&cfg_with_ca("", true), &sink).await;
        assert!(supervisor.active().await.is_empty());

        supervisor
            .reconcile(&cfg_with_ca("FREQ=SOMETIMES", true), &sink)
            .await;
        assert!(supervisor.active().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let supervisor = Supervisor::new(Arc::new(SystemClock));
        let sink = sink();

        let mut cfg = cfg_with_ca("FREQ=HOURLY;INTERVAL=1", true);
        cfg.enable_mg = true;
        cfg.schedule_mg = "FREQ=DAILY;BYHOUR=2;BYMINUTE=15".to_string();
        supervisor.reconcile(&cfg, &sink).await;
        assert_eq!(supervisor.active().await.len(), 2);

        supervisor.shutdown().await;
        assert!(supervisor.active().await.is_empty());
    }
}
