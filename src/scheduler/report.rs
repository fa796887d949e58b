//! Per-cycle outcome summary

use crate::etl::SourceOutcome;
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one source in one cycle.
#[derive(Debug)]
pub struct SourceReport {
    pub source: String,
    pub tab: String,
    pub outcome: SourceOutcome,
}

/// Everything that happened in one cycle, one entry per source in
/// configuration order.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub elapsed: Duration,
    pub sources: Vec<SourceReport>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.sources.iter().filter(|s| s.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.sources.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Data rows published across all successful sources.
    pub fn rows_published(&self) -> usize {
        self.sources
            .iter()
            .map(|s| match s.outcome {
                SourceOutcome::Succeeded { rows, .. } => rows,
                SourceOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| !s.outcome.is_success())
    }

    pub fn source(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == name)
    }

    /// Failure count per error kind.
    pub fn failure_kinds(&self) -> BTreeMap<String, usize> {
        let mut kinds = BTreeMap::new();
        for error in self.failures().filter_map(|s| s.outcome.error()) {
            *kinds.entry(error.kind().to_string()).or_insert(0) += 1;
        }
        kinds
    }

    pub fn log_summary(&self) {
        log::info!(
            "Cycle {} finished in {:.2}s: {}/{} source(s) succeeded, {} row(s) published",
            self.cycle,
            self.elapsed.as_secs_f64(),
            self.succeeded(),
            self.sources.len(),
            self.rows_published()
        );

        for report in self.failures() {
            if let SourceOutcome::Failed { stage, error } = &report.outcome {
                log::warn!(
                    "  {} → '{}': {} while {} ({} attempt(s))",
                    report.source,
                    report.tab,
                    error.kind(),
                    stage,
                    error.attempts()
                );
            }
        }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycle {}: {} succeeded, {} failed",
            self.cycle,
            self.succeeded(),
            self.failed()
        )?;
        let kinds = self.failure_kinds();
        if !kinds.is_empty() {
            let kinds: Vec<String> = kinds.iter().map(|(k, n)| format!("{}={}", k, n)).collect();
            write!(f, " ({})", kinds.join(", "))?;
        }
        Ok(())
    }
}
