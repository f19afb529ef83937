//! CLI presentation: text and json formatters per command.

use crate::bundle::{ActiveContext, BundleListing, BundleRecord, UnloadOutcome};
use crate::cli::OutputFormat;
use chrono::{TimeZone, Utc};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;
use serde_json::json;

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn format_millis(ts: i64) -> String {
    Utc.timestamp_millis_opt(ts)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

pub fn format_load_result(record: &BundleRecord, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_json(&json!({
            "bundle_id": record.bundle_id,
            "sptid": record.sptid,
            "status": record.status,
            "logs_processed": record.logs_processed,
            "metrics_ingested": record.metrics_ingested,
            "time_range": { "start": record.start_ts, "end": record.end_ts },
            "reused": record.reused,
            "replaced_previous": record.replaced_previous,
            "partial": record.partial,
            "writer": record.writer,
            "warnings": record.warnings,
        }));
    }

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Bundle".to_string(), record.bundle_id.clone()]);
    table.add_row(vec!["SPT".to_string(), or_dash(record.sptid.as_deref())]);
    table.add_row(vec!["Host".to_string(), or_dash(record.host.as_deref())]);
    table.add_row(vec!["Status".to_string(), record.status.to_string()]);
    table.add_row(vec!["Logs".to_string(), record.logs_processed.to_string()]);
    table.add_row(vec!["Samples".to_string(), record.metrics_ingested.to_string()]);
    let millis = |ts: Option<i64>| ts.map(format_millis).unwrap_or_else(|| "-".to_string());
    table.add_row(vec!["Start".to_string(), millis(record.start_ts)]);
    table.add_row(vec!["End".to_string(), millis(record.end_ts)]);
    table.add_row(vec!["Reused".to_string(), record.reused.to_string()]);
    if record.replaced_previous {
        table.add_row(vec!["Replaced previous".to_string(), "true".to_string()]);
    }
    let mut out = format!("{}\n", table);
    if !record.warnings.is_empty() {
        out.push_str(&format!("\nWarnings ({}):\n", record.warnings.len()));
        for warning in &record.warnings {
            out.push_str(&format!("  - {}\n", warning));
        }
    }
    out
}

pub fn format_listing(listing: &[BundleListing], format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_json(&json!({ "bundles": listing, "total": listing.len() }));
    }
    if listing.is_empty() {
        return "No bundles loaded.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["", "Bundle", "SPT", "Host", "Status", "Logs", "Samples", "Created"]);
    for item in listing {
        let r = &item.record;
        table.add_row(vec![
            if item.active { "*" } else { "" }.to_string(),
            r.bundle_id.clone(),
            or_dash(r.sptid.as_deref()),
            or_dash(r.host.as_deref()),
            r.status.to_string(),
            r.logs_processed.to_string(),
            r.metrics_ingested.to_string(),
            format_millis(r.created_at),
        ]);
    }
    format!("{}\n\nTotal: {} bundle(s)", table, listing.len())
}

pub fn format_active(active: Option<&BundleRecord>, format: OutputFormat) -> String {
    match (active, format) {
        (None, OutputFormat::Json) => to_json(&json!({ "active": null })),
        (None, OutputFormat::Text) => "No active bundle.".to_string(),
        (Some(record), OutputFormat::Json) => to_json(&json!({ "active": record })),
        (Some(record), OutputFormat::Text) => format!(
            "Active bundle: {} ({}, {} samples)",
            record.bundle_id,
            or_dash(record.host.as_deref()),
            record.metrics_ingested
        ),
    }
}

pub fn format_activated(context: &ActiveContext, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_json(context);
    }
    format!(
        "Active bundle: {} (since {})",
        context.bundle_id,
        format_millis(context.activated_at)
    )
}

pub fn format_unload_result(outcome: &UnloadOutcome, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_json(outcome);
    }
    let mut out = if outcome.purged {
        format!("Purged {} bundle(s).", outcome.unloaded.len())
    } else {
        format!("Unloaded {}.", outcome.unloaded.join(", "))
    };
    if let Some(promoted) = &outcome.promoted {
        out.push_str(&format!("\nPromoted {} to active.", promoted));
    }
    if outcome.samples_deleted > 0 {
        out.push_str(&format!("\nDeleted {} sample(s).", outcome.samples_deleted));
    }
    for warning in &outcome.warnings {
        out.push_str(&format!("\nWarning: {}", warning));
    }
    out
}
