//! Slash-command queries answered from orchestrator state.

use std::fmt::Write as _;

use crate::pipeline::orchestrator::Orchestrator;
use crate::store::LedgerStats;

const DEAD_LETTER_PAGE: usize = 10;

const HELP: &str = "Commands:
  /status     component state
  /stats      processing statistics
  /health     health checks
  /metrics    metrics summary
  /dlq        recent failed deliveries
  /dlq clear  drop all failed deliveries";

/// Answer one `/command` line. Errors are rendered into the reply.
pub async fn run_command(orchestrator: &Orchestrator, line: &str) -> String {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let arg = parts.next();

    match (command, arg) {
        ("/status", _) => orchestrator.status().to_string(),
        ("/stats", _) => match orchestrator.statistics().await {
            Ok(stats) => render_stats(&stats),
            Err(e) => format!("Error: {e}"),
        },
        ("/health", _) => orchestrator.health().await.summary(),
        ("/metrics", _) => orchestrator.metrics_summary(),
        ("/dlq", Some("clear")) => match orchestrator.clear_dead_letters().await {
            Ok(n) => format!("Cleared {n} dead letters"),
            Err(e) => format!("Error: {e}"),
        },
        ("/dlq", _) => match orchestrator.dead_letters(None, DEAD_LETTER_PAGE).await {
            Ok(letters) if letters.is_empty() => "Dead-letter queue is empty".to_string(),
            Ok(letters) => {
                let mut out = format!("Dead letters (latest {}):", letters.len());
                for letter in letters {
                    let operation = letter.metadata["operation"].as_str().unwrap_or("unknown");
                    let _ = write!(
                        out,
                        "\n  #{} {} [{}] {}: {}",
                        letter.id,
                        letter.created_at.format("%Y-%m-%d %H:%M"),
                        letter.key,
                        operation,
                        letter.error
                    );
                }
                out
            }
            Err(e) => format!("Error: {e}"),
        },
        _ => HELP.to_string(),
    }
}

fn render_stats(stats: &LedgerStats) -> String {
    let rate = if stats.total_messages == 0 {
        0.0
    } else {
        stats.successful_extractions as f64 / stats.total_messages as f64 * 100.0
    };
    let mut out = format!(
        "Messages processed: {}\nSuccessful extractions: {} ({rate:.1}%)\nDeliveries: {}",
        stats.total_messages, stats.successful_extractions, stats.total_deliveries
    );
    for (kind, n) in &stats.deliveries_by_kind {
        let _ = write!(out, "\n  {kind}: {n}");
    }
    let _ = write!(out, "\nDead letters: {}", stats.dead_letters);
    out
}
