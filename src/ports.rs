//! # External collaborators.
//!
//! The runtime never talks to PLCs, databases, MQTT or operator screens directly.
//! Each concern is an injected async trait object; the crate ships in-memory
//! implementations in [`memory`](crate::memory) for tests and simulations.
//!
//! ```text
//! AlarmEngine ──► BitArraySource      (read bits of block N)
//!             ──► EmergencySignalSource (read one signal)
//!             ──► AlarmCatalog        (code → description/action/group)
//!             ──► HistoryStore        (insert alarm event)
//!             ──► TelemetrySink       (publish "ActiveAlarms")
//!
//! Orchestrator ──► HistoryStore       (variables, action details, final result)
//!              ──► ResultExporter     (export cycle report)
//! Executor     ──► Prompt             (dialogs, PromptUser actions)
//!
//! Slot runner  ──► StartTrigger       (wait for the unit to be loaded)
//!              ──► Identifier         (serial → order)
//!              ──► PlanSource         (order → plan, station degraded?)
//! ```
//!
//! ## Rules
//! - Implementations must not panic; failures are returned as [`ExternalError`].
//! - The runtime logs every failure and continues with a fallback.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::alarms::{AlarmBlockConfig, AlarmMeta, AlarmRecord, EmergencySignalConfig};
use crate::core::CycleReport;
use crate::error::ExternalError;
use crate::plan::{ActionDefinition, CycleContext, ExportedValue, Verdict};

/// Id assigned by persistence to an inserted detail record.
pub type DetailId = u64;

/// Current bits of one alarm block.
#[async_trait]
pub trait BitArraySource: Send + Sync + 'static {
    /// Returns `size * 8` booleans; bit 0 is the LSB of byte 0.
    async fn read_block(&self, block: &AlarmBlockConfig) -> Result<Vec<bool>, ExternalError>;
}

/// One emergency input.
#[async_trait]
pub trait EmergencySignalSource: Send + Sync + 'static {
    async fn read_signal(&self, signal: &EmergencySignalConfig) -> Result<bool, ExternalError>;
}

/// Alarm description lookup.
#[async_trait]
pub trait AlarmCatalog: Send + Sync + 'static {
    /// Returns `Ok(None)` when the code is not configured.
    async fn lookup(&self, code: u32) -> Result<Option<AlarmMeta>, ExternalError>;
}

/// Persisted result of a top-level action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDetail {
    pub cycle_id: uuid::Uuid,
    pub history_id: u64,
    pub station_id: u32,
    pub action_uid: String,
    pub name: String,
    pub branch: u8,
    pub step: u32,
    pub verdict: Verdict,
    pub started_at: DateTime<Local>,
    pub total_secs: f64,
    /// Seconds from cycle start to action start.
    pub offset_start_s: f64,
    /// Seconds from cycle start to action end.
    pub offset_end_s: f64,
    /// Retries performed (attempts - 1).
    pub retries: u32,
    pub ignore_result: bool,
    pub negate_result: bool,
    /// Behavior specific payload.
    pub data: Option<serde_json::Value>,
    pub exported: Vec<ExportedValue>,
}

/// Parent linkage of an after-action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentLink {
    pub action_uid: String,
    /// Detail id of the parent record (0 when the parent insert failed).
    pub detail_id: DetailId,
    pub branch: u8,
    pub step: u32,
}

/// Persisted result of an after-action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubActionDetail {
    pub parent: ParentLink,
    pub detail: ActionDetail,
}

/// History/configuration persistence.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    async fn insert_alarm_event(&self, record: &AlarmRecord) -> Result<(), ExternalError>;

    async fn insert_action_detail(&self, detail: &ActionDetail) -> Result<DetailId, ExternalError>;

    async fn insert_sub_action_detail(
        &self,
        detail: &SubActionDetail,
    ) -> Result<DetailId, ExternalError>;

    async fn update_cycle_final_result(&self, report: &CycleReport) -> Result<(), ExternalError>;

    /// Current runtime variables for the cycle's station/slot.
    async fn load_variables(
        &self,
        ctx: &CycleContext,
    ) -> Result<BTreeMap<String, String>, ExternalError>;
}

/// Telemetry transport (MQTT in production).
pub trait TelemetrySink: Send + Sync + 'static {
    fn publish(&self, topic: &str, payload: String) -> Result<(), ExternalError>;
}

/// Operator prompt request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub station_id: u32,
    pub slot_id: u16,
    pub title: String,
    pub message: String,
}

/// Operator answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResponse {
    pub accepted: bool,
    #[serde(default)]
    pub text: String,
}

/// Operator dialogs.
#[async_trait]
pub trait Prompt: Send + Sync + 'static {
    async fn prompt_user(&self, request: PromptRequest) -> Result<PromptResponse, ExternalError>;
}

/// Export of finished cycles to the plant system.
#[async_trait]
pub trait ResultExporter: Send + Sync + 'static {
    async fn export(&self, report: &CycleReport) -> Result<(), ExternalError>;
}

/// A start signal for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub slot_id: u16,
    /// Serial read together with the trigger (barcode reader); empty when the
    /// identifier has to read it.
    #[serde(default)]
    pub serial_number: String,
}

impl StartRequest {
    pub fn new(slot_id: u16, serial_number: impl Into<String>) -> Self {
        Self {
            slot_id,
            serial_number: serial_number.into(),
        }
    }
}

/// Unit found on a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    pub serial_number: String,
    pub order_id: String,
}

/// Start condition of a slot (PLC bit, barcode scan, timer).
#[async_trait]
pub trait StartTrigger: Send + Sync + 'static {
    /// Resolves once a unit on `slot` is ready to be tested.
    async fn wait_start(&self, slot: u16) -> Result<StartRequest, ExternalError>;
}

/// Device identification.
#[async_trait]
pub trait Identifier: Send + Sync + 'static {
    async fn identify(&self, request: &StartRequest) -> Result<Identification, ExternalError>;
}

/// Test plans and station state.
#[async_trait]
pub trait PlanSource: Send + Sync + 'static {
    /// Plan for the identified unit in `ctx`.
    async fn load_plan(&self, ctx: &CycleContext) -> Result<Vec<ActionDefinition>, ExternalError>;

    /// Whether the station runs degraded and must not start cycles.
    async fn is_degraded(&self, _station_id: u32) -> Result<bool, ExternalError> {
        Ok(false)
    }
}

pub type HistoryRef = Arc<dyn HistoryStore>;
pub type PromptRef = Arc<dyn Prompt>;
pub type ExporterRef = Arc<dyn ResultExporter>;
pub type TelemetryRef = Arc<dyn TelemetrySink>;
pub type TriggerRef = Arc<dyn StartTrigger>;
pub type IdentifierRef = Arc<dyn Identifier>;
pub type PlanSourceRef = Arc<dyn PlanSource>;
