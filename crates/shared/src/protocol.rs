use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AccessRole, EmployeeId, EmployeeRecord};

/// One server-side page of the employee directory. `totalPages` and
/// `totalCount` are authoritative and overwrite client pagination state on
/// every successful fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeePage {
    pub employees: Vec<EmployeeRecord>,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
    #[serde(rename = "totalCount")]
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOption {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterOptionsResponse {
    #[serde(default)]
    pub legal_entities: Vec<FilterOption>,
    #[serde(default)]
    pub office_locations: Vec<FilterOption>,
    #[serde(default)]
    pub employee_types: Vec<FilterOption>,
    #[serde(default)]
    pub employee_sub_types: Vec<FilterOption>,
    #[serde(default)]
    pub applications: Vec<FilterOption>,
    #[serde(default)]
    pub managers: Vec<FilterOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub application_id: String,
    pub application_name: String,
    pub role: AccessRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessMatrixRow {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub grants: Vec<AccessGrant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogPage {
    pub entries: Vec<ActivityLogEntry>,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
    #[serde(rename = "totalCount")]
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRowError {
    pub row: u32,
    pub message: String,
}

/// Outcome of a CSV bulk import. The byte format itself is owned by the
/// server; the client only relays the file and reports the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: u32,
    pub updated: u32,
    pub failed: u32,
    #[serde(default)]
    pub errors: Vec<ImportRowError>,
}
