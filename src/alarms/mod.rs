//! # Alarm evaluation and emergency stops.
//!
//! - `config`: block layout, emergency inputs and loop settings
//! - `layout`: alarm code derivation
//! - `evaluator`: bit-change detection and the active set
//! - `emergency`: emergency-signal aggregation
//! - `engine`: the periodic loop wiring everything to the registry

mod config;
mod emergency;
mod engine;
mod evaluator;
pub mod layout;
mod record;

pub use config::{AlarmBlockConfig, AlarmEngineConfig, EmergencySignalConfig};
pub use emergency::{EmergencyAssessment, EmergencyStatus, assess};
pub use engine::{AlarmDeps, AlarmEngine};
pub use evaluator::AlarmEvaluator;
pub use layout::{alarm_code, bytes_to_bits, locate};
pub use record::{AlarmMeta, AlarmRecord};
