//! The controller: single owner of the analyzer.
//!
//! Everything that touches the device funnels through here — HTTP handlers
//! and scheduler fires enqueue, the queue worker calls back into
//! [`Controller::execute`] one task at a time, and reagent/waste accounting
//! is serialized through its own mutex so a concurrent `PUT /config` cannot
//! lose an update.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::device::{Analyzer, Timing};
use crate::domain::{Config, Parameter, Reading, RenderedConfig, Task, TaskKind, DEFAULT_CONFIG_ID};
use crate::error::Error;
use crate::ports::bus::SharedBus;
use crate::ports::clock::Clock;
use crate::ports::store::{Bucket, Store};
use crate::queue::{TaskExecutor, TaskQueue};
use crate::schedule::{Schedule, ScheduleSink, Supervisor};

use super::log::ActivityLog;

/// Response shape of `GET /status/{param}`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub status: u8,
    pub param: String,
}

/// Response shape of `GET /results/{param}` entries.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingView {
    pub ts: i64,
    pub time: String,
    pub value: f32,
}

pub struct Controller {
    store: Arc<dyn Store>,
    bus: SharedBus,
    clock: Arc<dyn Clock>,
    queue: Arc<TaskQueue>,
    log: ActivityLog,
    supervisor: Supervisor,
    /// Serializes every reagent/waste read-modify-write.
    accounting: Mutex<()>,
    timing: Timing,
}

impl Controller {
    pub fn new(store: Arc<dyn Store>, bus: SharedBus, clock: Arc<dyn Clock>) -> Self {
        Self::with_timing(store, bus, clock, Timing::default())
    }

    pub fn with_timing(
        store: Arc<dyn Store>,
        bus: SharedBus,
        clock: Arc<dyn Clock>,
        timing: Timing,
    ) -> Self {
        Self {
            queue: Arc::new(TaskQueue::new(Arc::clone(&store), Arc::clone(&clock))),
            log: ActivityLog::new(Arc::clone(&clock)),
            supervisor: Supervisor::new(Arc::clone(&clock)),
            store,
            bus,
            clock,
            accounting: Mutex::new(()),
            timing,
        }
    }

    /// Bootstrap the default configuration record if none exists yet.
    pub fn setup(&self) -> Result<(), Error> {
        if self.store.get(Bucket::Config, DEFAULT_CONFIG_ID)?.is_none() {
            self.save_config(&Config::default())?;
        }
        Ok(())
    }

    /// Launch the queue worker and the schedulers from the stored
    /// configuration. The worker stops when `cancel` fires; schedulers are
    /// stopped via [`Controller::shutdown`].
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<(), Error> {
        self.setup()?;

        let queue = Arc::clone(&self.queue);
        let executor: Arc<dyn TaskExecutor> = self.clone();
        tokio::spawn(async move { queue.run(executor, cancel).await });

        self.reconcile().await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    // ---- configuration ----

    pub fn load_config(&self) -> Result<Config, Error> {
        let raw = self.store.get(Bucket::Config, DEFAULT_CONFIG_ID)?;
        Ok(match raw {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Config::default(),
        })
    }

    fn save_config(&self, cfg: &Config) -> Result<(), Error> {
        self.store
            .put(Bucket::Config, DEFAULT_CONFIG_ID, &serde_json::to_vec(cfg)?)?;
        Ok(())
    }

    /// Replace the configuration and reconcile the schedulers against it.
    ///
    /// Recurrence rules are validated here so a bad rule is a 400 at write
    /// time instead of a silently dead scheduler.
    pub async fn update_config(self: Arc<Self>, mut cfg: Config) -> Result<(), Error> {
        cfg.id = DEFAULT_CONFIG_ID.to_string();
        for p in Parameter::ALL {
            if cfg.enabled(p) {
                Schedule::parse(cfg.schedule(p), self.clock.now()).map_err(|err| {
                    Error::InvalidSchedule {
                        param: p,
                        reason: err.to_string(),
                    }
                })?;
            }
        }
        self.save_config(&cfg)?;
        self.reconcile().await?;
        Ok(())
    }

    async fn reconcile(self: Arc<Self>) -> Result<(), Error> {
        let cfg = self.load_config()?;
        let sink: Arc<dyn ScheduleSink> = self.clone();
        self.supervisor.reconcile(&cfg, &sink).await;
        Ok(())
    }

    /// The stored configuration merged with whatever calibration factors
    /// the device will serve right now. Factors are best-effort: a device
    /// that cannot answer simply leaves them out.
    pub async fn render_config(&self) -> Result<RenderedConfig, Error> {
        let cfg = self.load_config()?;
        let analyzer = self.analyzer(&cfg);
        let mut rendered = RenderedConfig::new(cfg);

        let mut kinds = vec![TaskKind::PumpCalibration];
        kinds.extend(Parameter::ALL.map(TaskKind::Calibration));
        for kind in kinds {
            let Some(opcode) = kind.factor_opcode() else {
                continue;
            };
            match analyzer.read_factor(opcode).await {
                Ok(factor) => match kind {
                    TaskKind::PumpCalibration => rendered.pump_calibration = Some(factor),
                    TaskKind::Calibration(p) => rendered.set_calibration(p, factor),
                    _ => {}
                },
                Err(err) => {
                    tracing::debug!(kind = %kind, error = %err, "calibration factor unavailable");
                }
            }
        }
        Ok(rendered)
    }

    // ---- enqueue paths ----

    /// Manually enqueue a test, subject to the reagent/waste gate.
    pub async fn run_test(&self, p: Parameter) -> Result<(), Error> {
        let cfg = self.load_config()?;
        Self::check_admissible(&cfg, p)?;
        self.queue.add(TaskKind::Test(p)).await?;
        self.log.append(format!("{}: Manual test enqueued", p.label()));
        Ok(())
    }

    /// Enqueue a pump calibration. The analyzer must be fully idle.
    pub async fn start_pump_calibration(&self) -> Result<(), Error> {
        self.check_exclusive().await?;
        self.queue.add(TaskKind::PumpCalibration).await?;
        self.log.append("PUMP: Calibration enqueued");
        Ok(())
    }

    /// Begin a parameter calibration: transmit the known value to the
    /// device, then enqueue the poll task that watches it settle. The
    /// analyzer must be fully idle, which is what makes the boundary-path
    /// bus write safe.
    pub async fn start_calibration(&self, p: Parameter, value: f32) -> Result<(), Error> {
        self.check_exclusive().await?;
        let cfg = self.load_config()?;
        let kind = TaskKind::Calibration(p);
        self.analyzer(&cfg).send_value(kind.opcode(), value).await?;
        self.queue.add(kind).await?;
        self.log.append(format!(
            "{}: Calibration started (known value {value:.2})",
            p.label()
        ));
        Ok(())
    }

    /// Single-shot calibration write: send `opcode ∥ float32(value)`, read
    /// the resulting factor back, log it. Used for direct factor overwrite
    /// and for submitting the measured pump volume. No task is enqueued.
    pub async fn write_calibration(&self, kind: TaskKind, value: f32) -> Result<f32, Error> {
        let Some(factor_opcode) = kind.factor_opcode() else {
            return Err(Error::UnknownParameter(kind.to_string()));
        };
        let cfg = self.load_config()?;
        let analyzer = self.analyzer(&cfg);
        analyzer.send_value(kind.opcode(), value).await?;
        tokio::time::sleep(analyzer.settle()).await;
        let factor = analyzer.read_factor(factor_opcode).await?;
        self.log.append(format!(
            "{}: Calibration value {value:.2} written; factor now {factor:.4}",
            kind.label()
        ));
        Ok(factor)
    }

    /// Enqueue a flush. The analyzer must be fully idle.
    pub async fn request_flush(&self, p: Parameter) -> Result<(), Error> {
        self.check_exclusive().await?;
        self.queue.add(TaskKind::Flush(p)).await?;
        self.log.append(format!("{}: Flush enqueued", p.label()));
        Ok(())
    }

    pub async fn cancel(&self, kind: TaskKind) -> Result<(), Error> {
        self.queue.cancel(kind).await?;
        self.log
            .append(format!("{}: Pending task canceled", kind.label()));
        Ok(())
    }

    // ---- reads ----

    pub async fn queue_list(&self) -> Result<Vec<Task>, Error> {
        self.queue.list().await
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log.lines()
    }

    /// Live status byte plus the param of whatever the worker is running.
    pub async fn device_status(&self) -> Result<StatusView, Error> {
        let cfg = self.load_config()?;
        let status = self.analyzer(&cfg).status().await?;
        let param = self
            .queue
            .current()
            .await
            .map(|t| t.kind.to_string())
            .unwrap_or_default();
        Ok(StatusView { status, param })
    }

    pub fn results(&self, p: Parameter) -> Result<Vec<ReadingView>, Error> {
        let mut readings = Vec::new();
        for (id, raw) in self.store.list(Bucket::Readings)? {
            match serde_json::from_slice::<Reading>(&raw) {
                Ok(reading) if reading.param == p => readings.push(reading),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(id, error = %err, "skipping undecodable reading");
                }
            }
        }
        readings.sort_by_key(|r| r.ts);
        Ok(readings
            .into_iter()
            .map(|r| ReadingView {
                ts: r.ts,
                time: Local
                    .timestamp_opt(r.ts, 0)
                    .single()
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_default(),
                value: r.value,
            })
            .collect())
    }

    // ---- gates ----

    /// The reagent/waste precondition for a test: enough reagent left, and
    /// room in the waste tank for what the test will add.
    fn check_admissible(cfg: &Config, p: Parameter) -> Result<(), Error> {
        let used = cfg.reagent_use(p);
        if cfg.reagent_remain(p) < used {
            return Err(Error::ReagentDepleted(p));
        }
        if cfg.waste_remaining + used > cfg.waste_threshold {
            return Err(Error::WasteFull);
        }
        Ok(())
    }

    /// Calibrations and flushes demand an otherwise idle analyzer.
    async fn check_exclusive(&self) -> Result<(), Error> {
        if !self.queue.is_idle().await? {
            return Err(Error::AnalyzerBusy);
        }
        Ok(())
    }

    // ---- task execution (queue worker thread) ----

    fn analyzer(&self, cfg: &Config) -> Analyzer {
        Analyzer::with_timing(self.bus.clone(), cfg.i2c_addr, self.timing)
    }

    async fn run_task(&self, task: &Task) -> Result<(), Error> {
        let cfg = self.load_config()?;
        let analyzer = self.analyzer(&cfg);
        match task.kind {
            TaskKind::Test(p) => self.run_test_task(&analyzer, task.code, p).await,
            TaskKind::PumpCalibration => self.run_pump_calibration_task(&analyzer, task.code).await,
            TaskKind::Calibration(p) => self.run_calibration_task(&analyzer, p).await,
            TaskKind::Flush(p) => self.run_flush_task(&analyzer, task.code, p).await,
        }
    }

    async fn run_test_task(&self, analyzer: &Analyzer, code: u8, p: Parameter) -> Result<(), Error> {
        let label = p.label();
        self.log.append(format!("{label}: Test started"));

        analyzer.start(code).await?;
        analyzer.poll_idle().await?;
        let value = analyzer.read_result().await?;

        if let Err(err) = self.store_reading(p, value) {
            // the reagent is spent either way; account for it below
            self.log.append(format!("{label}: Store error ({err})"));
        }
        self.apply_test_usage(p).await?;
        self.log
            .append(format!("{label}: Test completed ({value:.2})"));
        Ok(())
    }

    async fn run_pump_calibration_task(&self, analyzer: &Analyzer, code: u8) -> Result<(), Error> {
        self.log.append("PUMP: Calibration started");
        analyzer.start(code).await?;
        analyzer.poll_idle().await?;
        // the factor is written once the operator submits the volume they
        // measured, via the single-shot calibration write
        self.log.append("PUMP: Awaiting dispensed volume");
        Ok(())
    }

    async fn run_calibration_task(&self, analyzer: &Analyzer, p: Parameter) -> Result<(), Error> {
        let label = p.label();
        // the start opcode and known value went out on the boundary path,
        // before this task was enqueued
        analyzer.poll_idle().await?;
        tokio::time::sleep(analyzer.settle()).await;
        let kind = TaskKind::Calibration(p);
        let Some(opcode) = kind.factor_opcode() else {
            return Err(Error::UnknownParameter(kind.to_string()));
        };
        let factor = analyzer.read_factor(opcode).await?;
        self.log
            .append(format!("{label}: Calibration factor updated ({factor:.4})"));
        Ok(())
    }

    async fn run_flush_task(&self, analyzer: &Analyzer, code: u8, p: Parameter) -> Result<(), Error> {
        // same prefix the error path uses, so the ring stays in one register
        let label = TaskKind::Flush(p).label();
        self.log.append(format!("{label}: Flush started"));
        analyzer.start(code).await?;
        analyzer.poll_idle().await?;
        // only a flush the device completed resets the reagent level
        self.reset_reagent(p).await?;
        self.log
            .append(format!("{label}: Flush completed; reagent reset"));
        Ok(())
    }

    fn store_reading(&self, p: Parameter, value: f32) -> Result<(), Error> {
        let reading = Reading::new(p, self.clock.now().timestamp(), value);
        self.store
            .create(Bucket::Readings, &serde_json::to_vec(&reading)?)?;
        Ok(())
    }

    async fn apply_test_usage(&self, p: Parameter) -> Result<(), Error> {
        let _guard = self.accounting.lock().await;
        let mut cfg = self.load_config()?;
        let used = cfg.reagent_use(p);
        cfg.set_reagent_remain(p, (cfg.reagent_remain(p) - used).max(0.0));
        cfg.waste_remaining += used;
        self.save_config(&cfg)
    }

    async fn reset_reagent(&self, p: Parameter) -> Result<(), Error> {
        let _guard = self.accounting.lock().await;
        let mut cfg = self.load_config()?;
        cfg.set_reagent_remain(p, cfg.reagent_start(p));
        self.save_config(&cfg)
    }

    async fn enqueue_scheduled(&self, p: Parameter) -> Result<(), Error> {
        let cfg = self.load_config()?;
        Self::check_admissible(&cfg, p)?;
        self.queue.add(TaskKind::Test(p)).await
    }
}

#[async_trait]
impl TaskExecutor for Controller {
    async fn execute(&self, task: Task) {
        if let Err(err) = self.run_task(&task).await {
            self.log.append(format!("{}: {err}", task.kind.label()));
        }
    }
}

#[async_trait]
impl ScheduleSink for Controller {
    async fn fire(&self, p: Parameter) {
        let label = p.label();
        match self.enqueue_scheduled(p).await {
            Ok(()) => self.log.append(format!("{label}: Scheduled test enqueued")),
            Err(err) => self
                .log
                .append(format!("{label}: Scheduled test skipped ({err})")),
        }
    }
}
