use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use directory_client::{
    EmployeeDirectory, FetchPhase, FilterCriteria, ListQueryController, SortCriteria, SortOrder,
    STATUS_ALL,
};
use shared::domain::EmployeeStatus;
use tracing::warn;
use url::Url;

mod config;

use config::load_settings;

const PAGE_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides the configured HR API base url.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one page of the employee directory.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        job_title: Option<String>,
        #[arg(long)]
        manager: Option<String>,
        #[arg(long)]
        legal_entity: Option<String>,
        #[arg(long)]
        office: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        sort_by: Option<String>,
        #[arg(long)]
        descending: bool,
    },
    /// Download the filtered directory as CSV.
    Export {
        #[arg(long, default_value = "employees.csv")]
        out: PathBuf,
    },
    /// Bulk-import employees from a CSV file.
    Import { file: PathBuf },
    /// Print a page of the activity log.
    Audit {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Print the application access matrix.
    Matrix,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();
    let settings = load_settings();

    let server_url = cli.server_url.unwrap_or(settings.server_url.clone());
    Url::parse(&server_url).with_context(|| format!("invalid server url '{server_url}'"))?;
    let server_url = server_url.trim_end_matches('/').to_string();

    let client = ListQueryController::new(server_url);

    match cli.command {
        Command::List {
            status,
            search,
            job_title,
            manager,
            legal_entity,
            office,
            page,
            sort_by,
            descending,
        } => {
            let filters = FilterCriteria {
                status: status.unwrap_or_else(|| STATUS_ALL.to_string()),
                search: search.unwrap_or_default(),
                job_title: job_title.unwrap_or_default(),
                manager: manager.unwrap_or_default(),
                legal_entity_id: legal_entity.unwrap_or_default(),
                office_location_id: office.unwrap_or_default(),
                ..FilterCriteria::default()
            };
            let sorting = sort_by.map(|sort_by| SortCriteria {
                sort_by,
                sort_order: if descending {
                    SortOrder::Desc
                } else {
                    SortOrder::Asc
                },
            });
            run_list(&client, filters, sorting, page, settings.page_limit).await?;
        }
        Command::Export { out } => {
            let bytes = client.export_csv().await?;
            std::fs::write(&out, &bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("wrote {} bytes to {}", bytes.len(), out.display());
        }
        Command::Import { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let report = client.import_csv(bytes).await?;
            println!(
                "import finished: created={} updated={} failed={}",
                report.created, report.updated, report.failed
            );
            for error in &report.errors {
                println!("  row {}: {}", error.row, error.message);
            }
        }
        Command::Audit { page } => {
            let log = client.fetch_activity_log(page, settings.page_limit).await?;
            for entry in &log.entries {
                println!(
                    "{}  {}  {}  {}",
                    entry.occurred_at.to_rfc3339(),
                    entry.actor,
                    entry.action,
                    entry.subject.as_deref().unwrap_or("-")
                );
            }
            println!("page {page}/{} ({} total)", log.total_pages, log.total_count);
        }
        Command::Matrix => {
            let rows = client.fetch_access_matrix().await?;
            for row in &rows {
                let grants: Vec<String> = row
                    .grants
                    .iter()
                    .map(|grant| format!("{}:{:?}", grant.application_name, grant.role))
                    .collect();
                println!("{:<24} {}", row.employee_name, grants.join(", "));
            }
        }
    }

    Ok(())
}

async fn run_list<D: EmployeeDirectory>(
    directory: &D,
    filters: FilterCriteria,
    sorting: Option<SortCriteria>,
    page: u32,
    limit: u32,
) -> Result<()> {
    if let Err(err) = directory.load_filter_options().await {
        warn!(%err, "filter option labels unavailable; showing raw ids");
    }

    directory.replace_filters(filters).await;
    if let Some(sorting) = sorting {
        directory.set_sorting(sorting).await;
    }
    directory.set_page_size(limit).await;
    if page > 1 {
        directory.set_page(page).await;
    }
    directory.refresh().await;

    // Mutators each start their own fetch cycle; only the last-issued query
    // is authoritative, so wait for the controller to settle.
    let deadline = tokio::time::Instant::now() + PAGE_WAIT;
    loop {
        let snapshot = directory.snapshot().await;
        match snapshot.phase {
            FetchPhase::Success => break,
            FetchPhase::Error => {
                let error = snapshot
                    .last_error
                    .map(|err| err.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(anyhow!("employee page fetch failed: {error}"));
            }
            FetchPhase::Idle | FetchPhase::Fetching => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("timed out waiting for the employee page"));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let snapshot = directory.snapshot().await;
    for pill in active_filter_pills(directory, &snapshot.filters).await {
        println!("filter: {pill}");
    }
    for record in &snapshot.employees {
        println!(
            "{:>6}  {:<14} {:<14} {:<28} {}",
            record.id.0,
            record.first_name,
            record.last_name.as_deref().unwrap_or(""),
            record.email.as_deref().unwrap_or(""),
            record.status.map(status_str).unwrap_or("-"),
        );
    }
    println!(
        "page {}/{} ({} total)",
        snapshot.pagination.current_page,
        snapshot.pagination.total_pages,
        snapshot.pagination.total_count
    );
    Ok(())
}

/// Filter pills show human labels where an option id is known; the stored
/// criteria value stays the raw id.
async fn active_filter_pills<D: EmployeeDirectory>(
    directory: &D,
    filters: &FilterCriteria,
) -> Vec<String> {
    let mut pills = Vec::new();
    if filters.status != STATUS_ALL {
        pills.push(format!("status={}", filters.status));
    }
    for (name, value) in [
        ("search", &filters.search),
        ("job title", &filters.job_title),
        ("manager", &filters.manager),
        ("legal entity", &filters.legal_entity_id),
        ("office", &filters.office_location_id),
        ("employee type", &filters.employee_type_id),
        ("employee sub-type", &filters.employee_sub_type_id),
        ("application", &filters.application_id),
    ] {
        if !value.is_empty() {
            pills.push(format!("{name}={}", directory.display_label(value).await));
        }
    }
    pills
}

fn status_str(status: EmployeeStatus) -> &'static str {
    match status {
        EmployeeStatus::Active => "active",
        EmployeeStatus::Inactive => "inactive",
        EmployeeStatus::Invited => "invited",
    }
}
