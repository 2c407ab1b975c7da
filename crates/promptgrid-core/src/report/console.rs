use crate::engine::orchestrator::{PreviewReport, RunSummary};
use crate::model::{RunStatus, TestResult, TestRun};
use crate::summary::EvaluationSummary;

fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "⏳",
        RunStatus::Running => "🔄",
        RunStatus::Completed => "✅",
        RunStatus::Failed => "❌",
        RunStatus::Cancelled => "⏹️ ",
    }
}

fn truncate(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() > max {
        let head: String = flat.chars().take(max).collect();
        format!("{}...", head)
    } else {
        flat
    }
}

pub fn print_run(run: &TestRun) {
    eprintln!("{} {} [{}]", status_icon(run.status), run.id, run.status);
    if let Some(name) = &run.name {
        eprintln!("    Name: {}", name);
    }
    eprintln!("    Dataset: {}", run.dataset_id);
    eprintln!("    Prompts: {}", run.prompt_ids.join(", "));
    eprintln!("    Models: {}", run.model_ids.join(", "));
    eprintln!(
        "    Mapping ({}): {}",
        run.mapping_source.as_str(),
        run.resolved_mapping
            .iter()
            .map(|(c, v)| format!("{} -> {}", c, v))
            .collect::<Vec<_>>()
            .join(", ")
    );
    eprintln!(
        "    Progress: {}/{} ({}%)",
        run.completed_cases, run.total_cases, run.progress
    );
    if let Some(err) = &run.error_message {
        eprintln!("    Error: {}", err);
    }
}

pub fn print_runs(runs: &[TestRun]) {
    if runs.is_empty() {
        eprintln!("No test runs.");
        return;
    }
    for r in runs {
        eprintln!(
            "{} {:<18} {:<10} {:>4}/{:<4} {}",
            status_icon(r.status),
            r.id,
            r.status.as_str(),
            r.completed_cases,
            r.total_cases,
            r.created_at
        );
    }
}

pub fn print_results(results: &[TestResult]) {
    eprintln!("\n{} results", results.len());
    for r in results {
        let icon = if r.passed { "✅" } else { "❌" };
        eprintln!(
            "{} {:<14} {:<24} {:<14} ({:.0}ms)",
            icon, r.prompt_id, r.model_id, r.case_id, r.latency_ms
        );
        if let Some(err) = &r.error {
            eprintln!("    Error: {}", truncate(err, 160));
        }
        for c in r.assertion_results.iter().filter(|c| !c.passed) {
            eprintln!(
                "    {} failed: {}",
                c.kind.as_deref().unwrap_or("check"),
                c.reason.as_deref().map(|s| truncate(s, 160)).unwrap_or_default()
            );
        }
    }
}

pub fn print_execution(s: &RunSummary) {
    eprintln!(
        "{} {} {}: results={} passed={} failed={}",
        status_icon(s.status),
        s.run_id,
        s.status,
        s.total_results,
        s.passed,
        s.failed
    );
}

pub fn print_summary(s: &EvaluationSummary) {
    eprintln!("Summary for {}", s.run_id);
    eprintln!(
        "Results: total={} passed={} failed={} errors={} pass_rate={:.1}%",
        s.total_tests,
        s.passed_tests,
        s.failed_tests,
        s.error_tests,
        s.pass_rate * 100.0
    );
    if s.total_tests > 0 {
        eprintln!(
            "Latency: avg={:.0}ms min={:.0}ms p50={:.0}ms p95={:.0}ms max={:.0}ms",
            s.avg_latency_ms,
            s.min_latency_ms.unwrap_or_default(),
            s.p50_latency_ms.unwrap_or_default(),
            s.p95_latency_ms.unwrap_or_default(),
            s.max_latency_ms.unwrap_or_default()
        );
    }
    for (title, groups) in [("By prompt", &s.by_prompt), ("By model", &s.by_model)] {
        if groups.is_empty() {
            continue;
        }
        eprintln!("{}:", title);
        for (k, g) in groups {
            eprintln!(
                "    {:<28} {:>4}/{:<4} {:>5.1}%  avg {:.0}ms",
                k,
                g.passed,
                g.total,
                g.pass_rate * 100.0,
                g.avg_latency_ms
            );
        }
    }
}

pub fn print_preview(p: &PreviewReport) {
    eprintln!(
        "Preview of {} v{} (mapping: {})",
        p.prompt_id,
        p.prompt_version,
        p.mapping_source.as_str()
    );
    if !p.validation.is_valid {
        eprintln!(
            "❌ Missing variables: {}",
            p.validation.missing_variables.join(", ")
        );
    }
    for w in &p.validation.warnings {
        eprintln!("⚠️  {}", w);
    }
    if !p.validation.unused_columns.is_empty() {
        eprintln!("    Unused columns: {}", p.validation.unused_columns.join(", "));
    }
    for s in &p.samples {
        match (&s.rendered_prompt, &s.error) {
            (Some(text), _) => {
                eprintln!("✅ {}", s.case_id);
                for line in text.lines() {
                    eprintln!("    {}", line);
                }
            }
            (None, Some(err)) => eprintln!("❌ {}: {}", s.case_id, err),
            (None, None) => eprintln!("❓ {}", s.case_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_flattens_and_cuts() {
        assert_eq!(truncate("a\nb", 10), "a b");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("서울특별시", 2), "서울...");
    }
}
