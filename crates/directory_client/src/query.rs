use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const DEFAULT_SORT_FIELD: &str = "first_name";

/// Status filter rest value. A filter set to this (or to the empty string)
/// is unset and never reaches the wire.
pub const STATUS_ALL: &str = "all";

/// User-editable filter criteria for the employee list. `search` holds the
/// debounced value; the raw input echo lives outside the criteria so a
/// keystroke alone never changes the derived query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub status: String,
    pub search: String,
    pub job_title: String,
    pub manager: String,
    pub legal_entity_id: String,
    pub office_location_id: String,
    pub employee_type_id: String,
    pub employee_sub_type_id: String,
    pub application_id: String,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            status: STATUS_ALL.to_string(),
            search: String::new(),
            job_title: String::new(),
            manager: String::new(),
            legal_entity_id: String::new(),
            office_location_id: String::new(),
            employee_type_id: String::new(),
            employee_sub_type_id: String::new(),
            application_id: String::new(),
        }
    }
}

impl FilterCriteria {
    /// Wire key/value pairs in their fixed parameter order.
    fn entries(&self) -> [(&'static str, &str); 9] {
        [
            ("status", &self.status),
            ("search", &self.search),
            ("jobTitle", &self.job_title),
            ("manager", &self.manager),
            ("legal_entity_id", &self.legal_entity_id),
            ("office_location_id", &self.office_location_id),
            ("employee_type_id", &self.employee_type_id),
            ("employee_sub_type_id", &self.employee_sub_type_id),
            ("application_id", &self.application_id),
        ]
    }

    /// Merges a partial update. An empty `status` falls back to the `all`
    /// rest value rather than persisting an empty string.
    pub fn apply(&mut self, patch: FilterPatch) {
        if let Some(status) = patch.status {
            self.status = if status.is_empty() {
                STATUS_ALL.to_string()
            } else {
                status
            };
        }
        if let Some(v) = patch.job_title {
            self.job_title = v;
        }
        if let Some(v) = patch.manager {
            self.manager = v;
        }
        if let Some(v) = patch.legal_entity_id {
            self.legal_entity_id = v;
        }
        if let Some(v) = patch.office_location_id {
            self.office_location_id = v;
        }
        if let Some(v) = patch.employee_type_id {
            self.employee_type_id = v;
        }
        if let Some(v) = patch.employee_sub_type_id {
            self.employee_sub_type_id = v;
        }
        if let Some(v) = patch.application_id {
            self.application_id = v;
        }
    }
}

/// Partial filter update. `search` is deliberately absent: presentation
/// layers feed keystrokes through the debounced search input instead of
/// writing the criteria directly.
#[derive(Debug, Clone, Default)]
pub struct FilterPatch {
    pub status: Option<String>,
    pub job_title: Option<String>,
    pub manager: Option<String>,
    pub legal_entity_id: Option<String>,
    pub office_location_id: Option<String>,
    pub employee_type_id: Option<String>,
    pub employee_sub_type_id: Option<String>,
    pub application_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// Single-column sort. Clicking the active column flips the order; clicking
/// any other column activates it ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortCriteria {
    pub sort_by: String,
    pub sort_order: SortOrder,
}

impl Default for SortCriteria {
    fn default() -> Self {
        Self {
            sort_by: DEFAULT_SORT_FIELD.to_string(),
            sort_order: SortOrder::Asc,
        }
    }
}

impl SortCriteria {
    pub fn toggled(&self, column: &str) -> Self {
        if self.sort_by == column {
            Self {
                sort_by: self.sort_by.clone(),
                sort_order: self.sort_order.flipped(),
            }
        } else {
            Self {
                sort_by: column.to_string(),
                sort_order: SortOrder::Asc,
            }
        }
    }
}

/// `current_page` and `limit` are client-owned; `total_pages` and
/// `total_count` are overwritten from every successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
    pub current_page: u32,
    pub limit: u32,
    pub total_pages: u32,
    pub total_count: u64,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            current_page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            total_pages: 0,
            total_count: 0,
        }
    }
}

fn is_unset(value: &str) -> bool {
    value.is_empty() || value == STATUS_ALL
}

/// Builds the outgoing parameter list: filter keys whose value is unset are
/// dropped, then `page`, `limit`, `sortBy`, `sortOrder` are always appended.
/// The ordered result is the fetch identity.
pub fn build_query(
    filters: &FilterCriteria,
    sorting: &SortCriteria,
    pagination: &PaginationState,
) -> Vec<(&'static str, String)> {
    let mut params = filter_params(filters);
    params.push(("page", pagination.current_page.to_string()));
    params.push(("limit", pagination.limit.to_string()));
    params.push(("sortBy", sorting.sort_by.clone()));
    params.push(("sortOrder", sorting.sort_order.as_str().to_string()));
    params
}

/// Parameter list for the CSV export endpoint: the active filters and sort,
/// without pagination.
pub fn build_export_query(
    filters: &FilterCriteria,
    sorting: &SortCriteria,
) -> Vec<(&'static str, String)> {
    let mut params = filter_params(filters);
    params.push(("sortBy", sorting.sort_by.clone()));
    params.push(("sortOrder", sorting.sort_order.as_str().to_string()));
    params
}

fn filter_params(filters: &FilterCriteria) -> Vec<(&'static str, String)> {
    filters
        .entries()
        .into_iter()
        .filter(|(_, value)| !is_unset(value))
        .map(|(key, value)| (key, value.to_string()))
        .collect()
}

/// Serialized derived query. Two fetches with the same key are the same
/// logical request. Values are form-encoded so a value containing `&` or `=`
/// cannot collide with a different parameter set.
pub fn query_key(params: &[(&'static str, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
