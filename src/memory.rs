//! # In-memory collaborators.
//!
//! Implementations of every [`ports`](crate::ports) trait that keep their state in
//! process memory. They back the test suite and the station simulator; production
//! deployments plug PLC drivers, a database and an MQTT client instead.
//!
//! | Port                    | Implementation        |
//! |-------------------------|-----------------------|
//! | `BitArraySource`        | [`ByteBlockSource`]   |
//! | `EmergencySignalSource` | [`StaticSignals`]     |
//! | `AlarmCatalog`          | [`StaticAlarmCatalog`]|
//! | `HistoryStore`          | [`MemoryHistory`]     |
//! | `TelemetrySink`         | [`TopicStore`]        |
//! | `Prompt`                | [`AutoPrompt`]        |
//! | `ResultExporter`        | [`MemoryExporter`]    |
//! | `StartTrigger`          | [`QueuedTrigger`]     |
//! | `Identifier`            | [`StaticIdentifier`]  |
//! | `PlanSource`            | [`StaticPlans`]       |

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::alarms::{AlarmBlockConfig, AlarmMeta, AlarmRecord, EmergencySignalConfig, bytes_to_bits};
use crate::core::CycleReport;
use crate::error::ExternalError;
use crate::plan::{ActionDefinition, CycleContext};
use crate::ports::{
    ActionDetail, AlarmCatalog, BitArraySource, DetailId, EmergencySignalSource, HistoryStore,
    Identification, Identifier, PlanSource, Prompt, PromptRequest, PromptResponse,
    ResultExporter, StartRequest, StartTrigger, SubActionDetail, TelemetrySink,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Block bytes set by hand; unset blocks read as zeros.
#[derive(Debug, Default)]
pub struct ByteBlockSource {
    blocks: Mutex<HashMap<u32, Vec<u8>>>,
    failing: Mutex<HashSet<u32>>,
}

impl ByteBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the bytes of `block` and clears a previous failure.
    pub fn set(&self, block: u32, bytes: Vec<u8>) {
        lock(&self.failing).remove(&block);
        lock(&self.blocks).insert(block, bytes);
    }

    /// Makes reads of `block` fail until the next `set`.
    pub fn fail(&self, block: u32) {
        lock(&self.failing).insert(block);
    }
}

#[async_trait]
impl BitArraySource for ByteBlockSource {
    async fn read_block(&self, block: &AlarmBlockConfig) -> Result<Vec<bool>, ExternalError> {
        if lock(&self.failing).contains(&block.block) {
            return Err(ExternalError::Unavailable {
                service: "plc",
                reason: format!("block {} unreachable", block.block),
            });
        }
        let bytes = lock(&self.blocks)
            .get(&block.block)
            .cloned()
            .unwrap_or_else(|| vec![0; block.size]);
        Ok(bytes_to_bits(&bytes))
    }
}

/// Emergency inputs keyed by address; unknown addresses read low.
#[derive(Debug, Default)]
pub struct StaticSignals {
    values: Mutex<HashMap<String, bool>>,
    failing: Mutex<HashSet<String>>,
    reads: AtomicUsize,
}

impl StaticSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, address: impl Into<String>, value: bool) -> Self {
        self.set(address, value);
        self
    }

    /// Reads of `address` return an error.
    pub fn failing(self, address: impl Into<String>) -> Self {
        lock(&self.failing).insert(address.into());
        self
    }

    pub fn set(&self, address: impl Into<String>, value: bool) {
        lock(&self.values).insert(address.into(), value);
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmergencySignalSource for StaticSignals {
    async fn read_signal(&self, signal: &EmergencySignalConfig) -> Result<bool, ExternalError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if lock(&self.failing).contains(&signal.address) {
            return Err(ExternalError::Unavailable {
                service: "plc",
                reason: format!("signal {} unreachable", signal.address),
            });
        }
        Ok(lock(&self.values).get(&signal.address).copied().unwrap_or(false))
    }
}

/// Fixed alarm texts.
#[derive(Debug, Default, Clone)]
pub struct StaticAlarmCatalog {
    entries: HashMap<u32, AlarmMeta>,
}

impl StaticAlarmCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, code: u32, meta: AlarmMeta) -> Self {
        self.entries.insert(code, meta);
        self
    }
}

#[async_trait]
impl AlarmCatalog for StaticAlarmCatalog {
    async fn lookup(&self, code: u32) -> Result<Option<AlarmMeta>, ExternalError> {
        Ok(self.entries.get(&code).cloned())
    }
}

/// Records every write; serves variables set up front.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    variables: BTreeMap<String, String>,
    next_id: AtomicU64,
    alarms: Mutex<Vec<AlarmRecord>>,
    details: Mutex<Vec<ActionDetail>>,
    sub_details: Mutex<Vec<SubActionDetail>>,
    finals: Mutex<Vec<CycleReport>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn alarm_events(&self) -> Vec<AlarmRecord> {
        lock(&self.alarms).clone()
    }

    pub fn action_details(&self) -> Vec<ActionDetail> {
        lock(&self.details).clone()
    }

    pub fn sub_action_details(&self) -> Vec<SubActionDetail> {
        lock(&self.sub_details).clone()
    }

    pub fn final_results(&self) -> Vec<CycleReport> {
        lock(&self.finals).clone()
    }

    fn next_id(&self) -> DetailId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn insert_alarm_event(&self, record: &AlarmRecord) -> Result<(), ExternalError> {
        lock(&self.alarms).push(record.clone());
        Ok(())
    }

    async fn insert_action_detail(&self, detail: &ActionDetail) -> Result<DetailId, ExternalError> {
        lock(&self.details).push(detail.clone());
        Ok(self.next_id())
    }

    async fn insert_sub_action_detail(
        &self,
        detail: &SubActionDetail,
    ) -> Result<DetailId, ExternalError> {
        lock(&self.sub_details).push(detail.clone());
        Ok(self.next_id())
    }

    async fn update_cycle_final_result(&self, report: &CycleReport) -> Result<(), ExternalError> {
        lock(&self.finals).push(report.clone());
        Ok(())
    }

    async fn load_variables(
        &self,
        _ctx: &CycleContext,
    ) -> Result<BTreeMap<String, String>, ExternalError> {
        Ok(self.variables.clone())
    }
}

/// Keeps the last payload and the publish count per topic.
#[derive(Debug, Default)]
pub struct TopicStore {
    topics: Mutex<HashMap<String, (String, usize)>>,
}

impl TopicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, topic: &str) -> Option<String> {
        lock(&self.topics).get(topic).map(|(payload, _)| payload.clone())
    }

    pub fn publishes(&self, topic: &str) -> usize {
        lock(&self.topics).get(topic).map_or(0, |(_, n)| *n)
    }
}

impl TelemetrySink for TopicStore {
    fn publish(&self, topic: &str, payload: String) -> Result<(), ExternalError> {
        let mut topics = lock(&self.topics);
        let entry = topics.entry(topic.to_string()).or_insert_with(|| (String::new(), 0));
        entry.0 = payload;
        entry.1 += 1;
        Ok(())
    }
}

/// Answers every prompt the same way and records the requests.
#[derive(Debug)]
pub struct AutoPrompt {
    accept: bool,
    requests: Mutex<Vec<PromptRequest>>,
}

impl AutoPrompt {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<PromptRequest> {
        lock(&self.requests).clone()
    }
}

impl Default for AutoPrompt {
    fn default() -> Self {
        Self::accepting()
    }
}

#[async_trait]
impl Prompt for AutoPrompt {
    async fn prompt_user(&self, request: PromptRequest) -> Result<PromptResponse, ExternalError> {
        lock(&self.requests).push(request);
        Ok(PromptResponse {
            accepted: self.accept,
            text: String::new(),
        })
    }
}

/// Collects exported reports.
#[derive(Debug, Default)]
pub struct MemoryExporter {
    reports: Mutex<Vec<CycleReport>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<CycleReport> {
        lock(&self.reports).clone()
    }
}

#[async_trait]
impl ResultExporter for MemoryExporter {
    async fn export(&self, report: &CycleReport) -> Result<(), ExternalError> {
        lock(&self.reports).push(report.clone());
        Ok(())
    }
}

/// Start requests queued per slot; `wait_start` blocks until one is pushed.
#[derive(Debug, Default)]
pub struct QueuedTrigger {
    queues: Mutex<HashMap<u16, VecDeque<Result<StartRequest, ExternalError>>>>,
    notify: Notify,
}

impl QueuedTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a start of `slot` with a scanned serial.
    pub fn push(&self, slot: u16, serial_number: impl Into<String>) {
        self.enqueue(slot, Ok(StartRequest::new(slot, serial_number)));
    }

    /// Queues a failed trigger read on `slot`.
    pub fn push_failure(&self, slot: u16) {
        self.enqueue(
            slot,
            Err(ExternalError::Unavailable {
                service: "trigger",
                reason: format!("slot {slot} trigger unreadable"),
            }),
        );
    }

    /// Requests not consumed yet on `slot`.
    pub fn pending(&self, slot: u16) -> usize {
        lock(&self.queues).get(&slot).map_or(0, VecDeque::len)
    }

    fn enqueue(&self, slot: u16, item: Result<StartRequest, ExternalError>) {
        lock(&self.queues).entry(slot).or_default().push_back(item);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl StartTrigger for QueuedTrigger {
    async fn wait_start(&self, slot: u16) -> Result<StartRequest, ExternalError> {
        loop {
            // Registered before the check so a push in between is not missed.
            let notified = self.notify.notified();
            let next = lock(&self.queues).get_mut(&slot).and_then(VecDeque::pop_front);
            if let Some(item) = next {
                return item;
            }
            notified.await;
        }
    }
}

/// Serial → order table; unknown serials fail identification.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentifier {
    orders: HashMap<String, String>,
}

impl StaticIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, serial_number: impl Into<String>, order_id: impl Into<String>) -> Self {
        self.orders.insert(serial_number.into(), order_id.into());
        self
    }
}

#[async_trait]
impl Identifier for StaticIdentifier {
    async fn identify(&self, request: &StartRequest) -> Result<Identification, ExternalError> {
        if request.serial_number.is_empty() {
            return Err(ExternalError::Rejected {
                service: "identifier",
                reason: format!("no serial read on slot {}", request.slot_id),
            });
        }
        match self.orders.get(&request.serial_number) {
            Some(order_id) => Ok(Identification {
                serial_number: request.serial_number.clone(),
                order_id: order_id.clone(),
            }),
            None => Err(ExternalError::NotFound {
                service: "identifier",
                what: format!("order of unit {}", request.serial_number),
            }),
        }
    }
}

/// Order → plan table with a switchable degraded flag.
#[derive(Debug, Default)]
pub struct StaticPlans {
    plans: HashMap<String, Vec<ActionDefinition>>,
    degraded: AtomicBool,
}

impl StaticPlans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, order_id: impl Into<String>, plan: Vec<ActionDefinition>) -> Self {
        self.plans.insert(order_id.into(), plan);
        self
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Release);
    }
}

#[async_trait]
impl PlanSource for StaticPlans {
    async fn load_plan(&self, ctx: &CycleContext) -> Result<Vec<ActionDefinition>, ExternalError> {
        self.plans
            .get(&ctx.order_id)
            .cloned()
            .ok_or_else(|| ExternalError::NotFound {
                service: "plans",
                what: format!("plan of order {}", ctx.order_id),
            })
    }

    async fn is_degraded(&self, _station_id: u32) -> Result<bool, ExternalError> {
        Ok(self.degraded.load(Ordering::Acquire))
    }
}
