use super::{exit_codes, parse_mapping, print_json, report_run_error, Context};
use crate::cli::args::{PreviewArgs, SuggestArgs};
use promptgrid_core::engine::orchestrator::PreviewRequest;
use promptgrid_core::progress::NoopObserver;
use promptgrid_core::report::console;
use std::sync::Arc;

pub fn cmd_preview(ctx: &Context, args: PreviewArgs) -> anyhow::Result<i32> {
    let column_mapping = match parse_mapping(&args.mappings) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let orch = ctx.orchestrator(Arc::new(NoopObserver));
    let report = match orch.preview(PreviewRequest {
        prompt_id: args.prompt,
        dataset_id: args.dataset,
        column_mapping,
        sample_count: args.samples,
    }) {
        Ok(r) => r,
        Err(e) => return report_run_error(&e),
    };

    if args.json {
        print_json(&report)?;
    } else {
        console::print_preview(&report);
    }
    // A preview that shows the mapping is incomplete is still a successful preview.
    Ok(exit_codes::OK)
}

pub fn cmd_suggest(ctx: &Context, args: SuggestArgs) -> anyhow::Result<i32> {
    let orch = ctx.orchestrator(Arc::new(NoopObserver));
    let suggestion = match orch.suggest_mapping(&args.prompt, &args.dataset) {
        Ok(s) => s,
        Err(e) => return report_run_error(&e),
    };

    if args.json {
        print_json(&suggestion)?;
        return Ok(exit_codes::OK);
    }

    for (col, var) in &suggestion.mapping {
        println!("--map {}={}", col, var);
    }
    if !suggestion.validation.missing_variables.is_empty() {
        eprintln!(
            "⚠️  no column found for: {}",
            suggestion.validation.missing_variables.join(", ")
        );
    }
    if !suggestion.validation.unused_columns.is_empty() {
        eprintln!(
            "    unused columns: {}",
            suggestion.validation.unused_columns.join(", ")
        );
    }
    Ok(exit_codes::OK)
}
