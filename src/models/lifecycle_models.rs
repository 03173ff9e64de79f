//! Domain models for the inspection and issue lifecycle engine
//!
//! Row structs mirror the database tables one to one. Status columns
//! are closed `sqlx::Type` enums stored as TEXT, so a typo can never
//! reach the lifecycle logic as a valid state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;

/// Equipment health status.
///
/// SCRAPPED is terminal and outside the health machine: the engine
/// reads it but never writes it, and never overwrites it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EquipmentStatus {
    Normal,
    Abnormal,
    Scrapped,
}

/// Lifecycle phase of an inspection record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InspectionState {
    Draft,
    Finalized,
}

/// Overall result of a finalized inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallResult {
    Normal,
    Abnormal,
}

/// Hazard ticket status.
///
/// `InProgress` is a reserved intermediate that is currently never
/// written; it still counts as open for the equipment health invariant.
/// `Rejected` is likewise reserved: a rejected audit rolls the ticket
/// back to `Pending` instead of parking it here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Pending,
    InProgress,
    PendingAudit,
    Closed,
    Rejected,
}

/// Owner discriminator for the shared image child table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageOwner {
    Inspection,
    Issue,
    IssueFixed,
}

/// Caller role as resolved by the upstream auth middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    FactoryAdmin,
    Inspector,
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUPER_ADMIN" => Ok(Role::SuperAdmin),
            "FACTORY_ADMIN" => Ok(Role::FactoryAdmin),
            "INSPECTOR" => Ok(Role::Inspector),
            _ => Err(()),
        }
    }
}

/// Resolved caller identity consumed from the auth boundary
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub role: Role,
    pub factory_id: Option<i64>,
}

/// Equipment record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Equipment {
    pub id: i64,
    pub name: String,
    pub factory_id: i64,
    pub status: EquipmentStatus,
    pub last_inspected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Inspection record.
///
/// `checklist_results` is NULL while the record is a draft and holds
/// the serialized checklist array once finalized; `state` is the
/// authoritative lifecycle marker. `inspection_image_url` mirrors the
/// first attached image for older report consumers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InspectionLog {
    pub id: i64,
    pub equipment_id: i64,
    pub inspector_id: i64,
    pub state: InspectionState,
    pub overall_result: Option<OverallResult>,
    pub checklist_results: Option<JsonValue>,
    pub inspection_image_url: Option<String>,
    pub location: Option<String>,
    pub issue_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

/// Hazard ticket record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Issue {
    pub id: i64,
    pub equipment_id: i64,
    pub inspection_id: Option<i64>,
    pub reporter_id: i64,
    pub description: String,
    pub status: IssueStatus,
    pub handler_id: Option<i64>,
    pub handled_at: Option<DateTime<Utc>>,
    pub solution: Option<String>,
    pub auditor_id: Option<i64>,
    pub audited_at: Option<DateTime<Utc>>,
    pub audit_note: Option<String>,
    pub issue_image_url: Option<String>,
    pub fixed_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the shared image child table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImageRow {
    pub id: i64,
    pub owner_type: ImageOwner,
    pub owner_id: i64,
    pub url: String,
    pub position: i64,
}

/// One checklist entry of a finalized inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub item: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Payload for the one-time finalize transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub overall_result: OverallResult,
    pub checklist_results: Vec<ChecklistItem>,
    #[serde(default)]
    pub issue_description: Option<String>,
    #[serde(default)]
    pub issue_image_urls: Vec<String>,
}

/// Finalize result: the immutable record plus the ticket it opened, if any
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeOutcome {
    pub inspection: InspectionLog,
    pub issue_id: Option<i64>,
}

/// Payload for handling a pending hazard ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleRequest {
    pub solution: String,
    #[serde(default)]
    pub fixed_image_urls: Vec<String>,
}

/// Payload for auditing a handled hazard ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRequest {
    pub approved: bool,
    #[serde(default)]
    pub audit_note: Option<String>,
}

/// One equipment entry of a batch submission, already complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInspectionItem {
    pub equipment_id: i64,
    pub overall_result: OverallResult,
    pub checklist_results: Vec<ChecklistItem>,
    #[serde(default)]
    pub inspection_image_url: Option<String>,
    #[serde(default)]
    pub issue_description: Option<String>,
    #[serde(default)]
    pub issue_image_url: Option<String>,
}

/// Batch submission for every equipment at one physical location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInspectionRequest {
    pub location: String,
    pub equipments: Vec<BatchInspectionItem>,
}

/// Summary returned by an atomic batch creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInspectionResult {
    pub normal_count: usize,
    pub abnormal_count: usize,
    pub issues_created: usize,
    pub records: Vec<InspectionLog>,
}

/// Presentational urgency, derived at read time and never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Hazard ticket with its image lists and derived severity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDetail {
    pub issue: Issue,
    pub issue_image_urls: Vec<String>,
    pub fixed_image_urls: Vec<String>,
    pub severity: Severity,
}

/// Inspection record with its image list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionDetail {
    pub inspection: InspectionLog,
    pub image_urls: Vec<String>,
}
