//! Dead-letter bucket for permanently failed jobs

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dead_letter_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// The original job id, kept for cross-referencing logs.
    pub job_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub kind: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,

    #[sea_orm(column_type = "Text")]
    pub reason: String,

    pub attempt_count: i32,

    pub failed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
