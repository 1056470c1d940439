//! Common types used across the fulfillment engine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invoice schedule attached to a customer's payment terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// One invoice per delivery, issued at delivery time
    Immediate,
    /// Periods close on Wednesday and Sunday
    TwiceWeekly,
    /// Periods close on Saturday
    Weekly,
    /// Monthly periods closing on the last calendar day
    Custom,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Immediate => "immediate",
            ScheduleType::TwiceWeekly => "twice_weekly",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "immediate" => Some(ScheduleType::Immediate),
            "twice_weekly" => Some(ScheduleType::TwiceWeekly),
            "weekly" => Some(ScheduleType::Weekly),
            "custom" => Some(ScheduleType::Custom),
            _ => None,
        }
    }

    /// Whether deliveries under this schedule accumulate into periods
    pub fn is_consolidated(&self) -> bool {
        !matches!(self, ScheduleType::Immediate)
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment-terms descriptor: schedule type plus credit days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentTerms {
    #[serde(rename = "type")]
    pub schedule: ScheduleType,
    pub days: u32,
}

impl PaymentTerms {
    pub fn new(schedule: ScheduleType, days: u32) -> Self {
        Self { schedule, days }
    }

    pub fn immediate(days: u32) -> Self {
        Self::new(ScheduleType::Immediate, days)
    }
}

/// Inventory filter a trade imposes on candidate vouchers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryFilter {
    pub hub_id: Uuid,
    pub grain_type_id: Uuid,
    pub grade: String,
}

impl InventoryFilter {
    pub fn new(hub_id: Uuid, grain_type_id: Uuid, grade: impl Into<String>) -> Self {
        Self {
            hub_id,
            grain_type_id,
            grade: grade.into(),
        }
    }
}
