//! Terminal output for coinfetch: spinner, batch summary and price table.
//!
//! Uses `indicatif` for the spinner while the queue drains and `console`
//! for colours. Logs go to stderr through `tracing`; tables and reports go
//! to stdout.

use std::io::{self, Write};

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;

use crate::jobs::BatchReport;
use crate::jobs::prices::CoinQuote;

/// Spinner shown while a job's queue drains.
pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl BatchProgress {
    pub fn start(job: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{job}: draining queue"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn clear(&self) {
        self.pb.finish_and_clear();
    }

    /// Writer for log output that shares the terminal with the spinner.
    pub fn log_writer(&self) -> LogWriter {
        LogWriter { pb: self.pb.clone() }
    }

    /// One-line result: green when every item landed, yellow when some were
    /// skipped, red when none did.
    pub fn summary(&self, report: &BatchReport) {
        self.clear();
        let (mark, style) = match (report.succeeded, report.skipped) {
            (_, 0) => ("✓", &self.green),
            (0, _) => ("✗", &self.red),
            _ => ("!", &self.yellow),
        };
        println!(
            "  {} {}: {}/{} succeeded, {} skipped in {}",
            style.apply_to(mark),
            report.job,
            report.succeeded,
            report.enqueued,
            report.skipped,
            format_duration_ms(report.duration_ms)
        );
    }
}

/// stderr writer that hides the spinner while a log line is written, so the
/// two never share a terminal line.
#[derive(Clone)]
pub struct LogWriter {
    pb: ProgressBar,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pb.suspend(|| io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub fn print_report_json(report: &BatchReport) {
    println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
}

pub fn print_quotes(quotes: &[CoinQuote]) {
    let bold = Style::new().bold();
    println!(
        "{}",
        bold.apply_to(format!(
            "{:<24} {:>14} {:>9} {:>9} {:>10} {:>10}",
            "Coin", "Price", "24h", "7d", "Volume", "Mkt Cap"
        ))
    );
    for q in quotes {
        println!(
            "{:<24} {:>14} {} {} {:>10} {:>10}",
            q.coin,
            format!("${:.2}", q.quote.current_price),
            change_cell(q.quote.change_24h_pct),
            change_cell(q.quote.change_7d_pct),
            format_compact(q.quote.volume),
            format_compact(q.quote.market_cap),
        );
    }
}

fn change_cell(pct: f64) -> String {
    let text = format!("{:>9}", format_change(pct));
    let style = if pct < 0.0 { Style::new().red() } else { Style::new().green() };
    style.apply_to(text).to_string()
}

pub fn format_change(pct: f64) -> String {
    format!("{pct:+.2}%")
}

/// `$1.23B`-style abbreviation.
pub fn format_compact(value: f64) -> String {
    const UNITS: [(f64, &str); 4] = [(1e12, "T"), (1e9, "B"), (1e6, "M"), (1e3, "K")];
    for (scale, suffix) in UNITS {
        if value.abs() >= scale {
            return format!("${:.2}{suffix}", value / scale);
        }
    }
    format!("${value:.2}")
}

fn format_duration_ms(ms: i64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}
