use anyhow::{bail, Context};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;
use tlytics::{total_pages, PageRequest};
use tlytics_node::api::ViewResponse;
use tlytics_node::config::DEFAULT_MAX_PAGE_SIZE;
use tlytics_node::store::EventStore;

/// Read one newest-first page straight from a store file.
pub fn load(db_path: &Path, page: Option<i64>, page_size: Option<i64>) -> anyhow::Result<ViewResponse> {
    // Opening would create an empty database; a typo should not do that
    if !db_path.exists() {
        bail!("Database not found: {}", db_path.display());
    }

    let store = EventStore::open_read_only(db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    let req = PageRequest::sanitized(page, page_size, DEFAULT_MAX_PAGE_SIZE);
    let page = store.get_events(req.limit(), req.offset())?;

    Ok(ViewResponse {
        total_pages: total_pages(page.total, req.page_size),
        events: page.events,
        total: page.total,
        page: req.page,
        page_size: req.page_size,
    })
}

pub fn render_table(view: &ViewResponse) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Timestamp", "Key", "Data"]);

    for event in &view.events {
        let ts = event
            .timestamp()
            .map(|ts| ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_default();
        let data = serde_json::to_string(event.data()).unwrap_or_default();
        table.add_row(vec![ts, event.key().to_string(), data]);
    }

    format!(
        "{table}\nPage {} of {} ({} events total)",
        view.page, view.total_pages, view.total
    )
}

pub fn run(db_path: &Path, page: Option<i64>, page_size: Option<i64>, json: bool) -> anyhow::Result<()> {
    let view = load(db_path, page, page_size)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    if view.events.is_empty() {
        println!("\nNo events on page {} ({} events total)\n", view.page, view.total);
        return Ok(());
    }

    println!("\nEvents\n");
    println!("{}\n", render_table(&view));
    Ok(())
}
