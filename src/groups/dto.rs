use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub group_id: String,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    pub name: String,
    /// Absent means rename only.
    #[serde(default)]
    pub members: Option<Vec<Uuid>>,
}

/// A group folded out of its membership rows.
#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub id: Uuid,
    pub group_id: String,
    pub name: String,
    pub members: Vec<String>,
    pub member_ids: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
