//! In-memory liquidation counters for the status boundary.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Error categories reported in a summary.
const TOP_ERRORS: usize = 5;

#[derive(Debug, Default)]
struct Totals {
    execution_time: Duration,
    executions: u64,
    profit_usd: Decimal,
    errors: HashMap<&'static str, u64>,
    rejections: HashMap<&'static str, u64>,
}

#[derive(Debug, Default)]
pub struct LiquidationMetrics {
    opportunities: AtomicU64,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    totals: Mutex<Totals>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub opportunities: u64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub avg_execution_ms: u64,
    pub total_profit_usd: Decimal,
    pub top_errors: Vec<(String, u64)>,
}

impl LiquidationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_opportunity(&self) {
        self.opportunities.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, elapsed: Duration, profit_usd: Decimal) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let mut totals = self.totals.lock();
        totals.execution_time += elapsed;
        totals.executions += 1;
        totals.profit_usd += profit_usd;
    }

    pub fn record_failure(&self, category: &'static str, elapsed: Duration) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let mut totals = self.totals.lock();
        totals.execution_time += elapsed;
        totals.executions += 1;
        *totals.errors.entry(category).or_default() += 1;
    }

    pub fn record_rejection(&self, category: &'static str) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        *self.totals.lock().rejections.entry(category).or_default() += 1;
    }

    /// Most frequent failure and rejection categories, highest first.
    pub fn top_errors(&self, n: usize) -> Vec<(String, u64)> {
        let totals = self.totals.lock();
        let mut tally: HashMap<&'static str, u64> = totals.rejections.clone();
        for (category, count) in &totals.errors {
            *tally.entry(*category).or_default() += *count;
        }
        let mut ranked: Vec<(String, u64)> = tally
            .into_iter()
            .map(|(category, count)| (category.to_string(), count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    pub fn summary(&self) -> MetricsSummary {
        let (avg_execution_ms, total_profit_usd) = {
            let totals = self.totals.lock();
            let avg = match totals.executions {
                0 => 0,
                n => (totals.execution_time.as_millis() / u128::from(n)) as u64,
            };
            (avg, totals.profit_usd)
        };
        MetricsSummary {
            opportunities: self.opportunities.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            avg_execution_ms,
            total_profit_usd,
            top_errors: self.top_errors(TOP_ERRORS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_averages_and_profit() {
        let metrics = LiquidationMetrics::new();
        metrics.record_attempt();
        metrics.record_success(Duration::from_millis(100), Decimal::new(485, 1));
        metrics.record_attempt();
        metrics.record_failure("broadcast", Duration::from_millis(300));

        let summary = metrics.summary();
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.avg_execution_ms, 200);
        assert_eq!(summary.total_profit_usd, Decimal::new(485, 1));
    }

    #[test]
    fn test_top_errors_ranks_categories() {
        let metrics = LiquidationMetrics::new();
        for _ in 0..3 {
            metrics.record_rejection("insufficient_profit");
        }
        metrics.record_rejection("health_factor");
        metrics.record_failure("broadcast", Duration::ZERO);
        metrics.record_failure("broadcast", Duration::ZERO);

        assert_eq!(
            metrics.top_errors(2),
            vec![
                ("insufficient_profit".to_string(), 3),
                ("broadcast".to_string(), 2)
            ]
        );
        assert_eq!(metrics.summary().rejections, 4);
    }

    #[test]
    fn test_empty_summary() {
        let summary = LiquidationMetrics::new().summary();
        assert_eq!(summary.avg_execution_ms, 0);
        assert!(summary.top_errors.is_empty());
    }
}
