use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{EmployeeId, EmployeeRecord},
    error::{ApiError, ApiException},
    protocol::{
        AccessMatrixRow, ActivityLogPage, EmployeePage, FilterOptionsResponse, ImportReport,
    },
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod query;

pub use query::{
    build_export_query, build_query, query_key, FilterCriteria, FilterPatch, PaginationState,
    SortCriteria, SortOrder, DEFAULT_PAGE_LIMIT, DEFAULT_SORT_FIELD, STATUS_ALL,
};

/// Quiet interval before a raw search keystroke is merged into the criteria.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(500);
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const ACTIVITY_LOG_MAX_LIMIT: u32 = 100;

/// Fetch failure taxonomy. `Api` carries the server's structured error body
/// when one was sent; `Server` is the fallback for bare non-2xx responses.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("request failed to complete: {0}")]
    Network(String),
    #[error("server returned status {status}")]
    Server { status: u16 },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error(transparent)]
    Api(#[from] ApiException),
}

impl DirectoryError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        // A decode failure on a 200 still carries the status; check it first.
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => Self::Server {
                status: status.as_u16(),
            },
            None => Self::Network(err.to_string()),
        }
    }
}

/// Fetch cycle state for the current derived query key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Fetching,
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub enum DirectoryEvent {
    PageLoaded { key: String, total_count: u64 },
    LoadFailed { key: String, error: DirectoryError },
    SelectionCleared,
    FilterOptionsLoaded,
    ImportCompleted { report: ImportReport },
}

/// Read model handed to presentation layers.
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    pub employees: Vec<EmployeeRecord>,
    pub filters: FilterCriteria,
    pub sorting: SortCriteria,
    pub pagination: PaginationState,
    pub search_input: String,
    pub phase: FetchPhase,
    pub selected: HashSet<EmployeeId>,
    pub last_error: Option<DirectoryError>,
    /// True once any page has been applied; with `phase == Fetching` this
    /// distinguishes "refetching over stale data" from "no data yet".
    pub has_loaded: bool,
}

impl DirectorySnapshot {
    pub fn is_loading(&self) -> bool {
        self.phase == FetchPhase::Fetching
    }

    pub fn is_initial_load(&self) -> bool {
        self.phase == FetchPhase::Fetching && !self.has_loaded
    }
}

struct InflightFetch {
    seq: u64,
    key: String,
}

struct ControllerState {
    filters: FilterCriteria,
    sorting: SortCriteria,
    pagination: PaginationState,
    search_input: String,
    employees: Vec<EmployeeRecord>,
    selected: HashSet<EmployeeId>,
    phase: FetchPhase,
    last_error: Option<DirectoryError>,
    fetch_seq: u64,
    inflight: Option<InflightFetch>,
    applied_key: Option<String>,
    option_labels: HashMap<String, String>,
    debounce: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            filters: FilterCriteria::default(),
            sorting: SortCriteria::default(),
            pagination: PaginationState::default(),
            search_input: String::new(),
            employees: Vec::new(),
            selected: HashSet::new(),
            phase: FetchPhase::Idle,
            last_error: None,
            fetch_seq: 0,
            inflight: None,
            applied_key: None,
            option_labels: HashMap::new(),
            debounce: None,
        }
    }
}

/// Owns the employee list query state: filter criteria, sort criteria, the
/// pagination cursor, and the debounced search input. Every criteria change
/// resets the page cursor, derives a fresh query, and starts a fetch cycle;
/// only the most recently issued query may touch visible state.
pub struct ListQueryController {
    http: Client,
    server_url: String,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<DirectoryEvent>,
}

fn clear_selection_locked(state: &mut ControllerState, events: &broadcast::Sender<DirectoryEvent>) {
    if state.selected.is_empty() {
        return;
    }
    state.selected.clear();
    let _ = events.send(DirectoryEvent::SelectionCleared);
}

impl ListQueryController {
    pub fn new(server_url: impl Into<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            http: Client::new(),
            server_url: server_url.into(),
            inner: Mutex::new(ControllerState::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> DirectorySnapshot {
        let state = self.inner.lock().await;
        DirectorySnapshot {
            employees: state.employees.clone(),
            filters: state.filters.clone(),
            sorting: state.sorting.clone(),
            pagination: state.pagination.clone(),
            search_input: state.search_input.clone(),
            phase: state.phase,
            selected: state.selected.clone(),
            last_error: state.last_error.clone(),
            has_loaded: state.applied_key.is_some(),
        }
    }

    /// Merges a filter patch, resets the page cursor, and starts a fetch.
    pub async fn set_filters(self: &Arc<Self>, patch: FilterPatch) {
        {
            let mut state = self.inner.lock().await;
            state.filters.apply(patch);
            state.pagination.current_page = 1;
            clear_selection_locked(&mut state, &self.events);
        }
        self.spawn_refresh();
    }

    /// Replaces the criteria wholesale. An empty `status` is normalized to
    /// the `all` rest value before use.
    pub async fn replace_filters(self: &Arc<Self>, mut next: FilterCriteria) {
        if next.status.is_empty() {
            next.status = STATUS_ALL.to_string();
        }
        {
            let mut state = self.inner.lock().await;
            state.filters = next;
            state.pagination.current_page = 1;
            clear_selection_locked(&mut state, &self.events);
        }
        self.spawn_refresh();
    }

    /// Restores the exact default criteria, including `status = all`, and
    /// empties the search box.
    pub async fn clear_filters(self: &Arc<Self>) {
        {
            let mut state = self.inner.lock().await;
            if let Some(handle) = state.debounce.take() {
                handle.abort();
            }
            state.filters = FilterCriteria::default();
            state.search_input.clear();
            state.pagination.current_page = 1;
            clear_selection_locked(&mut state, &self.events);
        }
        self.spawn_refresh();
    }

    pub async fn set_sorting(self: &Arc<Self>, next: SortCriteria) {
        {
            let mut state = self.inner.lock().await;
            state.sorting = next;
            state.pagination.current_page = 1;
            clear_selection_locked(&mut state, &self.events);
        }
        self.spawn_refresh();
    }

    /// Column-header click: flips the order on the active column, otherwise
    /// activates the clicked column ascending.
    pub async fn toggle_sort(self: &Arc<Self>, column: &str) {
        let next = {
            let state = self.inner.lock().await;
            state.sorting.toggled(column)
        };
        self.set_sorting(next).await;
    }

    /// Pagination click. Filters and sort stay untouched, so no page reset.
    pub async fn set_page(self: &Arc<Self>, page: u32) {
        {
            let mut state = self.inner.lock().await;
            state.pagination.current_page = page.max(1);
        }
        self.spawn_refresh();
    }

    /// A page number is only meaningful for a fixed page size, so changing
    /// the size also rewinds to page 1.
    pub async fn set_page_size(self: &Arc<Self>, limit: u32) {
        {
            let mut state = self.inner.lock().await;
            state.pagination.limit = limit.max(1);
            state.pagination.current_page = 1;
        }
        self.spawn_refresh();
    }

    /// Synchronous input echo plus a cancellable delayed merge: the raw value
    /// is visible immediately, and 500ms of quiet later it becomes the
    /// criteria's search value with the page cursor rewound. A newer
    /// keystroke aborts the pending merge, so at most one is ever scheduled.
    pub async fn set_search_input(self: &Arc<Self>, text: impl Into<String>) {
        let text = text.into();
        let mut state = self.inner.lock().await;
        state.search_input = text.clone();
        if let Some(handle) = state.debounce.take() {
            handle.abort();
        }
        let controller = Arc::clone(self);
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(SEARCH_DEBOUNCE).await;
            {
                let mut state = controller.inner.lock().await;
                if state.search_input != text {
                    // A newer keystroke owns the merge now.
                    return;
                }
                if state.filters.search == text {
                    return;
                }
                state.filters.search = text;
                state.pagination.current_page = 1;
                clear_selection_locked(&mut state, &controller.events);
            }
            controller.refresh().await;
        }));
    }

    pub async fn toggle_selection(&self, id: EmployeeId) {
        let mut state = self.inner.lock().await;
        if !state.selected.remove(&id) {
            state.selected.insert(id);
        }
    }

    pub fn spawn_refresh(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.refresh().await;
        });
    }

    /// One fetch cycle for the current derived query. An identical in-flight
    /// key is not fetched again; a result that resolves after a newer query
    /// has been issued is discarded without touching state.
    pub async fn refresh(self: &Arc<Self>) {
        let (params, key, seq) = {
            let mut state = self.inner.lock().await;
            let params = build_query(&state.filters, &state.sorting, &state.pagination);
            let key = query_key(&params);
            if let Some(inflight) = &state.inflight {
                if inflight.key == key {
                    info!(key = %key, "identical query already in flight; skipping");
                    return;
                }
            }
            state.fetch_seq += 1;
            let seq = state.fetch_seq;
            state.inflight = Some(InflightFetch {
                seq,
                key: key.clone(),
            });
            state.phase = FetchPhase::Fetching;
            (params, key, seq)
        };

        let result = self.fetch_employee_page(&params).await;

        let mut state = self.inner.lock().await;
        if state.fetch_seq != seq {
            info!(key = %key, "discarding superseded fetch result");
            return;
        }
        if state.inflight.as_ref().is_some_and(|f| f.seq == seq) {
            state.inflight = None;
        }
        match result {
            Ok(page) => {
                state.employees = page.employees;
                state.pagination.total_pages = page.total_pages;
                state.pagination.total_count = page.total_count;
                state.phase = FetchPhase::Success;
                state.last_error = None;
                if state.applied_key.as_deref() != Some(key.as_str()) {
                    state.applied_key = Some(key.clone());
                    clear_selection_locked(&mut state, &self.events);
                }
                let total_count = state.pagination.total_count;
                let _ = self
                    .events
                    .send(DirectoryEvent::PageLoaded { key, total_count });
            }
            Err(error) => {
                // Stale-while-revalidate: the previous page stays visible.
                state.phase = FetchPhase::Error;
                state.last_error = Some(error.clone());
                warn!(key = %key, %error, "employee page fetch failed");
                let _ = self.events.send(DirectoryEvent::LoadFailed { key, error });
            }
        }
    }

    async fn fetch_employee_page(
        &self,
        params: &[(&'static str, String)],
    ) -> std::result::Result<EmployeePage, DirectoryError> {
        let response = self
            .http
            .get(format!("{}/employees", self.server_url))
            .query(params)
            .send()
            .await
            .map_err(DirectoryError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            // Prefer the structured API error body when the server sent one.
            if let Ok(api_error) = response.json::<ApiError>().await {
                return Err(DirectoryError::Api(ApiException::new(
                    api_error.code,
                    api_error.message,
                )));
            }
            return Err(DirectoryError::Server {
                status: status.as_u16(),
            });
        }

        response
            .json::<EmployeePage>()
            .await
            .map_err(DirectoryError::from_reqwest)
    }

    /// Refreshes the id-to-label directory used for filter pill rendering.
    pub async fn load_filter_options(&self) -> Result<()> {
        let options: FilterOptionsResponse = self
            .http
            .get(format!("{}/filter_options", self.server_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid filter options payload")?;

        let mut labels = HashMap::new();
        for group in [
            &options.legal_entities,
            &options.office_locations,
            &options.employee_types,
            &options.employee_sub_types,
            &options.applications,
            &options.managers,
        ] {
            for option in group {
                labels.insert(option.id.clone(), option.label.clone());
            }
        }

        let mut state = self.inner.lock().await;
        state.option_labels = labels;
        let _ = self.events.send(DirectoryEvent::FilterOptionsLoaded);
        Ok(())
    }

    /// Display-only resolution of an option id to its human label. The value
    /// stored in the criteria stays the raw id.
    pub async fn display_label(&self, raw: &str) -> String {
        let state = self.inner.lock().await;
        state
            .option_labels
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }

    /// Server-rendered CSV of the currently filtered and sorted directory.
    /// Pagination parameters are deliberately absent: the export covers the
    /// whole result set.
    pub async fn export_csv(&self) -> Result<Vec<u8>> {
        let params = {
            let state = self.inner.lock().await;
            build_export_query(&state.filters, &state.sorting)
        };
        let bytes = self
            .http
            .get(format!("{}/employees/export", self.server_url))
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    /// Relays a CSV file to the server-side bulk import and refreshes the
    /// visible page once the server accepts it.
    pub async fn import_csv(self: &Arc<Self>, csv_bytes: Vec<u8>) -> Result<ImportReport> {
        let report: ImportReport = self
            .http
            .post(format!("{}/employees/import", self.server_url))
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(csv_bytes)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid import report payload")?;

        info!(
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "csv import accepted"
        );
        let _ = self.events.send(DirectoryEvent::ImportCompleted {
            report: report.clone(),
        });
        self.spawn_refresh();
        Ok(report)
    }

    pub async fn fetch_access_matrix(&self) -> Result<Vec<AccessMatrixRow>> {
        let rows: Vec<AccessMatrixRow> = self
            .http
            .get(format!("{}/access_matrix", self.server_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows)
    }

    pub async fn fetch_activity_log(&self, page: u32, limit: u32) -> Result<ActivityLogPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, ACTIVITY_LOG_MAX_LIMIT);
        let log: ActivityLogPage = self
            .http
            .get(format!("{}/activity_logs", self.server_url))
            .query(&[("page", page.to_string()), ("limit", limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(log)
    }
}

/// Seam for presentation layers: the full controller surface behind one
/// trait, so binaries and tests can stay generic over the implementation.
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn set_filters(&self, patch: FilterPatch);
    async fn replace_filters(&self, next: FilterCriteria);
    async fn clear_filters(&self);
    async fn set_sorting(&self, next: SortCriteria);
    async fn toggle_sort(&self, column: &str);
    async fn set_page(&self, page: u32);
    async fn set_page_size(&self, limit: u32);
    async fn set_search_input(&self, text: &str);
    async fn toggle_selection(&self, id: EmployeeId);
    async fn refresh(&self);
    async fn snapshot(&self) -> DirectorySnapshot;
    async fn load_filter_options(&self) -> Result<()>;
    async fn display_label(&self, raw: &str) -> String;
    async fn export_csv(&self) -> Result<Vec<u8>>;
    async fn import_csv(&self, csv_bytes: Vec<u8>) -> Result<ImportReport>;
    async fn fetch_access_matrix(&self) -> Result<Vec<AccessMatrixRow>>;
    async fn fetch_activity_log(&self, page: u32, limit: u32) -> Result<ActivityLogPage>;
    fn subscribe_events(&self) -> broadcast::Receiver<DirectoryEvent>;
}

#[async_trait]
impl EmployeeDirectory for Arc<ListQueryController> {
    async fn set_filters(&self, patch: FilterPatch) {
        ListQueryController::set_filters(self, patch).await
    }

    async fn replace_filters(&self, next: FilterCriteria) {
        ListQueryController::replace_filters(self, next).await
    }

    async fn clear_filters(&self) {
        ListQueryController::clear_filters(self).await
    }

    async fn set_sorting(&self, next: SortCriteria) {
        ListQueryController::set_sorting(self, next).await
    }

    async fn toggle_sort(&self, column: &str) {
        ListQueryController::toggle_sort(self, column).await
    }

    async fn set_page(&self, page: u32) {
        ListQueryController::set_page(self, page).await
    }

    async fn set_page_size(&self, limit: u32) {
        ListQueryController::set_page_size(self, limit).await
    }

    async fn set_search_input(&self, text: &str) {
        ListQueryController::set_search_input(self, text).await
    }

    async fn toggle_selection(&self, id: EmployeeId) {
        ListQueryController::toggle_selection(self, id).await
    }

    async fn refresh(&self) {
        ListQueryController::refresh(self).await
    }

    async fn snapshot(&self) -> DirectorySnapshot {
        ListQueryController::snapshot(self).await
    }

    async fn load_filter_options(&self) -> Result<()> {
        ListQueryController::load_filter_options(self).await
    }

    async fn display_label(&self, raw: &str) -> String {
        ListQueryController::display_label(self, raw).await
    }

    async fn export_csv(&self) -> Result<Vec<u8>> {
        ListQueryController::export_csv(self).await
    }

    async fn import_csv(&self, csv_bytes: Vec<u8>) -> Result<ImportReport> {
        ListQueryController::import_csv(self, csv_bytes).await
    }

    async fn fetch_access_matrix(&self) -> Result<Vec<AccessMatrixRow>> {
        ListQueryController::fetch_access_matrix(self).await
    }

    async fn fetch_activity_log(&self, page: u32, limit: u32) -> Result<ActivityLogPage> {
        ListQueryController::fetch_activity_log(self, page, limit).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DirectoryEvent> {
        ListQueryController::subscribe_events(self)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
