use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Configured texts of an alarm code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmMeta {
    pub description: String,
    /// What the operator should do.
    pub action: String,
    pub group: String,
    pub info: String,
}

/// One alarm, active or closing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub code: u32,
    pub status: bool,
    pub time: DateTime<Local>,
    pub description: String,
    pub action: String,
    pub group: String,
    pub info: String,
    /// Source block and bit.
    pub block: u32,
    pub bit: usize,
}

impl AlarmRecord {
    /// New active record from configured texts.
    pub fn raised(code: u32, block: u32, bit: usize, meta: AlarmMeta) -> Self {
        Self {
            code,
            status: true,
            time: Local::now(),
            description: meta.description,
            action: meta.action,
            group: meta.group,
            info: meta.info,
            block,
            bit,
        }
    }
}
