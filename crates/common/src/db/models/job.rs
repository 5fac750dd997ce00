//! Durable job entity backing the priority broker

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Broker-visible job states. Completed jobs are deleted on ack, so only
/// two states persist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Leased,
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "leased" => JobStatus::Leased,
            _ => JobStatus::Pending,
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => "pending".to_string(),
            JobStatus::Leased => "leased".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub kind: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,

    /// 0 = high, 1 = default, 2 = low. Lower is dequeued first.
    pub priority: i16,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub dedup_key: Option<String>,

    pub dedup_expires_at: Option<DateTimeWithTimeZone>,

    /// Delivery count; incremented on every reserve.
    pub attempt_count: i32,

    pub max_attempts: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub leased_by: Option<String>,

    pub lease_expires_at: Option<DateTimeWithTimeZone>,

    pub next_run_at: DateTimeWithTimeZone,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn job_status(&self) -> JobStatus {
        JobStatus::from(self.status.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
