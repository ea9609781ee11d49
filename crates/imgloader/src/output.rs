use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;
use imgloader_service::loader::BatchOutcome;
use imgloader_service::types::LoaderStats;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per image, followed by the loader stats.
    #[default]
    Text,
    /// The whole report as a JSON document.
    Json,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum ItemStatus {
    Loaded,
    Failed,
    Skipped,
}

#[derive(Debug, Serialize)]
struct ReportItem<'a> {
    url: &'a str,
    status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    images: Vec<ReportItem<'a>>,
    stats: &'a LoaderStats,
}

fn build_report<'a>(outcome: &'a BatchOutcome, stats: &'a LoaderStats) -> Report<'a> {
    let loaded = outcome.results.iter().map(|item| {
        let image = item.resource.as_loaded();
        ReportItem {
            url: item.key.as_str(),
            status: ItemStatus::Loaded,
            size: image.map(|image| image.data.len()),
            content_type: image.and_then(|image| image.content_type.as_deref()),
            error: None,
        }
    });
    let failed = outcome.errors.iter().map(|error| ReportItem {
        url: error.key.as_str(),
        status: ItemStatus::Failed,
        size: None,
        content_type: None,
        error: Some(error.error.to_string()),
    });
    let skipped = outcome.skipped.iter().map(|key| ReportItem {
        url: key.as_str(),
        status: ItemStatus::Skipped,
        size: None,
        content_type: None,
        error: None,
    });

    Report {
        images: loaded.chain(failed).chain(skipped).collect(),
        stats,
    }
}

fn write_text(mut w: impl Write, report: &Report<'_>) -> std::io::Result<()> {
    for item in &report.images {
        match item.status {
            ItemStatus::Loaded => {
                write!(w, "ok      {}", item.url)?;
                if let Some(size) = item.size {
                    write!(w, " ({size} bytes")?;
                    if let Some(content_type) = item.content_type {
                        write!(w, ", {content_type}")?;
                    }
                    write!(w, ")")?;
                }
                writeln!(w)?;
            }
            ItemStatus::Failed => {
                let error = item.error.as_deref().unwrap_or_default();
                writeln!(w, "failed  {}: {error}", item.url)?;
            }
            ItemStatus::Skipped => writeln!(w, "skipped {}", item.url)?,
        }
    }

    let stats = report.stats;
    writeln!(
        w,
        "\ncached: {}, loading: {}, completed: {}, failed: {}",
        stats.cached, stats.loading, stats.completed, stats.failed
    )
}

/// Prints the outcome of a batch to stdout.
pub fn print_batch(format: OutputFormat, outcome: &BatchOutcome, stats: &LoaderStats) -> Result<()> {
    let report = build_report(outcome, stats);
    let stdout = std::io::stdout().lock();
    match format {
        OutputFormat::Text => write_text(stdout, &report)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(stdout, &report)?;
            println!();
        }
    }
    Ok(())
}
