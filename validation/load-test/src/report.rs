//! Results reporting and formatting.

use crate::config::TestConfig;
use crate::error::ReportError;
use crate::metrics::TestResults;
use chrono::{DateTime, SecondsFormat, Utc};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// CSV header row, zoom-range schema.
pub const CSV_HEADER: &str = "timestamp,name,environment,pattern,threads,duration,had_failures,total_requests,failed_requests,avg_latency,p95_latency,p99_latency,qps,thread_qps,min_zoom,max_zoom,min_x,max_x,min_y,max_y";

/// Formats test results for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Append one row for this run to the CSV at `path`.
    ///
    /// The header is written only when the file does not exist yet; earlier
    /// rows are never touched.
    pub fn append_csv(
        path: &Path,
        config: &TestConfig,
        results: &TestResults,
    ) -> Result<(), ReportError> {
        let write_header = !path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| ReportError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let mut out = String::new();
        if write_header {
            out.push_str(CSV_HEADER);
            out.push('\n');
        }
        out.push_str(&Self::format_csv(config, results, Utc::now()));
        out.push('\n');

        file.write_all(out.as_bytes())
            .map_err(|source| ReportError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        info!(path = %path.display(), header = write_header, "Results written");
        Ok(())
    }

    /// Format results as CSV row.
    pub fn format_csv(config: &TestConfig, results: &TestResults, timestamp: DateTime<Utc>) -> String {
        let b = &config.bounds;
        let fields = [
            timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            csv_field(&config.name),
            csv_field(&config.environment),
            config.pattern.to_string(),
            config.threads.to_string(),
            format!("{:.1}", results.duration_secs),
            results.had_failures.to_string(),
            results.total_requests.to_string(),
            results.failed_requests.to_string(),
            format!("{:.1}", results.latency_avg),
            format!("{:.1}", results.latency_p95),
            format!("{:.1}", results.latency_p99),
            format!("{:.1}", results.requests_per_second),
            format!("{:.1}", results.requests_per_second_per_worker),
            b.min_zoom.to_string(),
            b.max_zoom.to_string(),
            b.min_x.to_string(),
            b.max_x.to_string(),
            b.min_y.to_string(),
            b.max_y.to_string(),
        ];
        fields.join(",")
    }

    /// Format results as a console table.
    pub fn format_table(config: &TestConfig, results: &TestResults) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                format!("Load Test Results: {}", config.name),
                config.environment.clone(),
            ]);

        let b = &config.bounds;
        table.add_row(vec![
            "Tiles:".to_string(),
            format!(
                "z {}-{}, x {}-{}, y {}-{} ({})",
                b.min_zoom, b.max_zoom, b.min_x, b.max_x, b.min_y, b.max_y, config.pattern
            ),
        ]);
        table.add_row(vec!["Threads:".to_string(), config.threads.to_string()]);
        table.add_row(vec![
            "Duration:".to_string(),
            format!("{:.2}s", results.duration_secs),
        ]);
        table.add_row(vec![
            "Total Requests:".to_string(),
            results.total_requests.to_string(),
        ]);
        table.add_row(vec![
            "Failed Requests:".to_string(),
            results.failed_requests.to_string(),
        ]);
        table.add_row(vec![
            "Success Rate:".to_string(),
            format!("{:.2}%", results.success_rate),
        ]);

        table.add_row(vec!["".to_string(), "".to_string()]);
        table.add_row(vec!["Latency (ms)".to_string(), "avg / p95 / p99".to_string()]);
        table.add_row(vec![
            "".to_string(),
            format!(
                "{:.2} / {:.2} / {:.2}",
                results.latency_avg, results.latency_p95, results.latency_p99
            ),
        ]);

        table.add_row(vec!["".to_string(), "".to_string()]);
        table.add_row(vec![
            "QPS:".to_string(),
            format!("{:.2}", results.requests_per_second),
        ]);
        table.add_row(vec![
            "QPS per thread:".to_string(),
            format!("{:.2}", results.requests_per_second_per_worker),
        ]);
        table.add_row(vec![
            "Throughput:".to_string(),
            format!("{:.2} MB/s", results.bytes_per_second / 1_000_000.0),
        ]);

        if !results.status_codes.is_empty() {
            table.add_row(vec!["".to_string(), "".to_string()]);
            table.add_row(vec!["Status Codes".to_string(), "count (share)".to_string()]);
            for (&status, count) in &results.status_codes {
                let label = if status == 0 {
                    "error".to_string()
                } else {
                    status.to_string()
                };
                table.add_row(vec![
                    format!("  {}", label),
                    format!("{} ({:.1}%)", count, results.status_share(status)),
                ]);
            }
        }

        table.to_string()
    }

    /// Format results as JSON.
    pub fn format_json(results: &TestResults) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(results)?)
    }
}

/// Quote a free-text field if it would break the row.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
