//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use shotline_common::{ComparisonResult, RunState, RunStatus, UrlSummary};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

impl TableDisplay for ComparisonResult {
    fn headers() -> Vec<&'static str> {
        vec!["URL", "Width", "Offset", "Difference", "Max color diff", "Diff image"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.url.clone(),
            self.width.to_string(),
            self.vertical_scroll_position.to_string(),
            format!("{:.4}", self.difference),
            self.max_single_color_difference.to_string(),
            self.difference_image_file_name.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_summary(url: &str, summary: &UrlSummary, max_diff: f64) {
    let verdict = if summary.passed {
        "passed".green()
    } else {
        "failed".red()
    };
    println!(
        "{} {}: {} screenshots compared, max difference {:.4} (allowed {:.4})",
        verdict, url, summary.compared, summary.max_difference, max_diff
    );
}

/// Print the outcome of a run
pub fn print_run(status: &RunStatus, format: OutputFormat) {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(status).unwrap_or_default());
        return;
    }

    if !status.report.results.is_empty() {
        let mut table = new_table();
        table.set_header(ComparisonResult::headers());
        for result in &status.report.results {
            let max_diff = status
                .job_config
                .urls
                .get(&result.base_url)
                .map(|u| u.max_diff)
                .unwrap_or(0.0);
            let color = if result.passes(max_diff) {
                Color::Green
            } else {
                Color::Red
            };
            let mut row = result.row().into_iter().map(Cell::new).collect::<Vec<_>>();
            row[3] = Cell::new(format!("{:.4}", result.difference)).fg(color);
            table.add_row(row);
        }
        println!("{table}");
    }

    for (url, summary) in &status.report.summary {
        let max_diff = status.job_config.urls.get(url).map(|u| u.max_diff).unwrap_or(0.0);
        print_summary(url, summary, max_diff);
    }

    for failure in &status.report.failures {
        print_warning(&format!(
            "{} {} at width {} ({}): {}",
            failure.phase, failure.url, failure.width, failure.path, failure.error
        ));
    }

    match status.state {
        RunState::FinishedWithoutDifferences => print_success("No differences found"),
        RunState::FinishedWithDifferences => print_error("Differences found"),
        RunState::Error => print_error(&format!(
            "Run failed: {}",
            status.error.as_deref().unwrap_or("unknown error")
        )),
        state => print_info(&format!("Run stopped in {}", state)),
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}
