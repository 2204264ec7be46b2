//! # Alarm engine: the station's field-bus watchdog.
//!
//! One background loop per engine. Every tick:
//!
//! ```text
//! tick ──► emergency check (always)
//!      │     assess(signals) ─┬─ global high ─► registry.cancel_all()
//!      │                      └─ slot N high ─► registry.cancel(N)
//!      │     rising edge ─► EmergencyStop event
//!      │
//!      └─► block polling (only when enabled)
//!            due blocks ─► stamp last_read ─► read (concurrently)
//!               ─► fit to width ─► evaluator.evaluate_block()
//!               ─► active snapshot ─► watch + telemetry topic
//!               ─► each change ─► history.insert_alarm_event()
//!                              ─► AlarmRaised / AlarmCleared
//! ```
//!
//! ## Rules
//! - `start` on a running engine fails with [`RuntimeError::AlarmEngineRunning`].
//! - External failures are logged; the loop never exits on them.
//! - A block whose read fails keeps its previous bits, so no transition is reported.
//! - `stop` waits at most `stop_timeout` for the loop, then aborts it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::SlotCycleRegistry;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::ports::{AlarmCatalog, BitArraySource, EmergencySignalSource, HistoryRef, TelemetryRef};

use super::config::{AlarmBlockConfig, AlarmEngineConfig, EmergencySignalConfig};
use super::emergency::{EmergencyStatus, assess};
use super::evaluator::AlarmEvaluator;
use super::layout::fit_width;
use super::record::AlarmRecord;

/// Collaborators the alarm loop talks to.
#[derive(Clone)]
pub struct AlarmDeps {
    pub bits: Arc<dyn BitArraySource>,
    pub signals: Arc<dyn EmergencySignalSource>,
    pub catalog: Arc<dyn AlarmCatalog>,
    pub history: HistoryRef,
    pub telemetry: TelemetryRef,
}

struct Running {
    token: CancellationToken,
    join: JoinHandle<()>,
}

/// Periodic alarm evaluation and emergency-stop handling.
pub struct AlarmEngine {
    cfg: AlarmEngineConfig,
    deps: AlarmDeps,
    registry: Arc<SlotCycleRegistry>,
    bus: Bus,
    enabled: AtomicBool,
    running: Mutex<Option<Running>>,
    active_tx: watch::Sender<Vec<AlarmRecord>>,
    emergency_tx: watch::Sender<EmergencyStatus>,
    raised_tx: broadcast::Sender<AlarmRecord>,
}

impl AlarmEngine {
    /// Creates a disabled, stopped engine.
    pub fn new(
        cfg: AlarmEngineConfig,
        deps: AlarmDeps,
        registry: Arc<SlotCycleRegistry>,
        bus: Bus,
    ) -> Arc<Self> {
        let (active_tx, _) = watch::channel(Vec::new());
        let (emergency_tx, _) = watch::channel(EmergencyStatus::default());
        let (raised_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            cfg,
            deps,
            registry,
            bus,
            enabled: AtomicBool::new(false),
            running: Mutex::new(None),
            active_tx,
            emergency_tx,
            raised_tx,
        })
    }

    /// Spawns the alarm loop with the given emergency inputs.
    pub async fn start(self: &Arc<Self>, signals: Vec<EmergencySignalConfig>) -> Result<(), RuntimeError> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.join.is_finished()) {
            return Err(RuntimeError::AlarmEngineRunning);
        }

        let token = CancellationToken::new();
        let me = Arc::clone(self);
        let loop_token = token.clone();
        let join = tokio::spawn(async move { me.run_loop(signals, loop_token).await });

        info!(blocks = self.cfg.blocks.len(), tick = ?self.cfg.tick_clamped(), "alarm engine started");
        *running = Some(Running { token, join });
        Ok(())
    }

    /// Stops the loop; no-op when it is not running.
    pub async fn stop(&self) {
        let Some(Running { token, mut join }) = self.running.lock().await.take() else {
            return;
        };
        token.cancel();
        if time::timeout(self.cfg.stop_timeout, &mut join).await.is_err() {
            warn!(timeout = ?self.cfg.stop_timeout, "alarm loop did not stop in time; aborting");
            join.abort();
        }
        info!("alarm engine stopped");
    }

    /// Enables block polling (emergency checks always run).
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.join.is_finished())
    }

    /// Current active alarms ordered by code.
    pub fn active_alarms(&self) -> Vec<AlarmRecord> {
        self.active_tx.borrow().clone()
    }

    /// Watch channel over the active-alarm snapshot.
    pub fn watch_active(&self) -> watch::Receiver<Vec<AlarmRecord>> {
        self.active_tx.subscribe()
    }

    /// Emergency state of the last tick.
    pub fn emergency_status(&self) -> EmergencyStatus {
        self.emergency_tx.borrow().clone()
    }

    /// Stream of newly raised alarms.
    pub fn subscribe_raised(&self) -> broadcast::Receiver<AlarmRecord> {
        self.raised_tx.subscribe()
    }

    async fn run_loop(self: Arc<Self>, signals: Vec<EmergencySignalConfig>, token: CancellationToken) {
        let mut evaluator = AlarmEvaluator::new();
        let mut blocks = self.cfg.blocks.clone();
        let mut ticker = time::interval(self.cfg.tick_clamped());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.check_emergency(&signals).await;
            if self.is_enabled() {
                self.poll_blocks(&mut blocks, &mut evaluator).await;
            }
        }
        debug!("alarm loop exited");
    }

    async fn check_emergency(&self, signals: &[EmergencySignalConfig]) {
        if signals.is_empty() {
            return;
        }
        let assessment = assess(signals, &*self.deps.signals).await;

        let status = if assessment.global {
            let cancelled = self.registry.cancel_all().await;
            if !cancelled.is_empty() {
                warn!(slots = ?cancelled, "global emergency: cycles cancelled");
            }
            EmergencyStatus {
                slot_independent: true,
                slots: Vec::new(),
            }
        } else {
            let flagged = assessment.flagged_slots();
            for &slot in &flagged {
                if self.registry.cancel(slot).await {
                    warn!(slot, "slot emergency: cycle cancelled");
                }
            }
            EmergencyStatus {
                slot_independent: false,
                slots: flagged,
            }
        };

        let previous = self.emergency_tx.borrow().clone();
        if status.slot_independent && !previous.slot_independent {
            self.bus
                .publish(Event::new(EventKind::EmergencyStop).with_reason("global"));
        }
        for &slot in status.slots.iter().filter(|s| !previous.slots.contains(s)) {
            self.bus.publish(
                Event::new(EventKind::EmergencyStop)
                    .with_slot(slot)
                    .with_reason("slot"),
            );
        }
        if status != previous {
            self.emergency_tx.send_replace(status);
        }
    }

    async fn poll_blocks(&self, blocks: &mut [AlarmBlockConfig], evaluator: &mut AlarmEvaluator) {
        let now = Instant::now();
        let due: Vec<usize> = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_due(now))
            .map(|(i, _)| i)
            .collect();
        if due.is_empty() {
            return;
        }
        for &i in &due {
            blocks[i].last_read = Some(now);
        }

        let blocks: &[AlarmBlockConfig] = blocks;
        let reads = join_all(due.iter().map(|&i| self.deps.bits.read_block(&blocks[i]))).await;

        for (&i, read) in due.iter().zip(reads) {
            let cfg = &blocks[i];
            let width = cfg.bit_width();
            let mut bits = match read {
                Ok(bits) => bits,
                Err(e) => {
                    warn!(block = cfg.block, error = %e, "alarm block read failed; keeping previous bits");
                    evaluator
                        .previous(cfg.block)
                        .map(<[bool]>::to_vec)
                        .unwrap_or_else(|| vec![false; width])
                }
            };
            if fit_width(&mut bits, width) {
                warn!(block = cfg.block, width, "alarm block returned unexpected bit count");
            }

            let changes = evaluator
                .evaluate_block(blocks, cfg.block, bits, &*self.deps.catalog)
                .await;
            self.publish_active(evaluator.active());

            for record in changes {
                self.dispatch_change(record).await;
            }
        }
    }

    fn publish_active(&self, active: Vec<AlarmRecord>) {
        match serde_json::to_string(&active) {
            Ok(payload) => {
                if let Err(e) = self.deps.telemetry.publish(&self.cfg.topic, payload) {
                    warn!(topic = %self.cfg.topic, error = %e, "active alarm publish failed");
                }
            }
            Err(e) => error!(error = %e, "active alarm serialization failed"),
        }
        self.active_tx.send_replace(active);
    }

    async fn dispatch_change(&self, record: AlarmRecord) {
        if let Err(e) = self.deps.history.insert_alarm_event(&record).await {
            warn!(code = record.code, error = %e, "alarm event insert failed");
        }

        if record.status {
            info!(code = record.code, description = %record.description, "alarm raised");
            let _ = self.raised_tx.send(record.clone());
            self.bus
                .publish(Event::new(EventKind::AlarmRaised).with_alarm(record));
        } else {
            info!(code = record.code, "alarm cleared");
            self.bus
                .publish(Event::new(EventKind::AlarmCleared).with_alarm(record));
        }
    }
}
