use crate::model::TestResult;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub total: u64,
    pub passed: u64,
    pub pass_rate: f64,
    pub avg_latency_ms: f64,
}

/// Aggregate view over a run's results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub run_id: String,
    pub total_tests: u64,
    pub passed_tests: u64,
    pub failed_tests: u64,
    /// Results that carry an error string; counted in `failed_tests` too.
    pub error_tests: u64,
    /// Fraction in `0.0..=1.0`.
    pub pass_rate: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub by_prompt: BTreeMap<String, GroupStats>,
    pub by_model: BTreeMap<String, GroupStats>,
}

pub fn summarize(run_id: &str, results: &[TestResult]) -> EvaluationSummary {
    let total = results.len() as u64;
    let passed = results.iter().filter(|r| r.passed).count() as u64;
    let errored = results.iter().filter(|r| r.error.is_some()).count() as u64;

    let mut latencies: Vec<f64> = results.iter().map(|r| r.latency_ms).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));

    EvaluationSummary {
        run_id: run_id.to_string(),
        total_tests: total,
        passed_tests: passed,
        failed_tests: total - passed,
        error_tests: errored,
        pass_rate: ratio(passed, total),
        avg_latency_ms: mean(&latencies),
        min_latency_ms: latencies.first().copied(),
        max_latency_ms: latencies.last().copied(),
        p50_latency_ms: percentile(&latencies, 50.0),
        p95_latency_ms: percentile(&latencies, 95.0),
        by_prompt: group_by(results, |r| r.prompt_id.as_str()),
        by_model: group_by(results, |r| r.model_id.as_str()),
    }
}

fn group_by<F>(results: &[TestResult], key: F) -> BTreeMap<String, GroupStats>
where
    F: Fn(&TestResult) -> &str,
{
    let mut acc: BTreeMap<String, (u64, u64, f64)> = BTreeMap::new();
    for r in results {
        let e = acc.entry(key(r).to_string()).or_insert((0, 0, 0.0));
        e.0 += 1;
        if r.passed {
            e.1 += 1;
        }
        e.2 += r.latency_ms;
    }
    acc.into_iter()
        .map(|(k, (total, passed, latency_sum))| {
            (
                k,
                GroupStats {
                    total,
                    passed,
                    pass_rate: ratio(passed, total),
                    avg_latency_ms: latency_sum / total as f64,
                },
            )
        })
        .collect()
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

/// Nearest-rank percentile over sorted input.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[idx])
}
