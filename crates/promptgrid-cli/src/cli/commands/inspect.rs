use super::{exit_codes, print_json, report_run_error, Context};
use crate::cli::args::{ResultsArgs, SummaryArgs};
use promptgrid_core::errors::RunError;
use promptgrid_core::progress::NoopObserver;
use promptgrid_core::report::console;
use promptgrid_core::storage::RecordStore;
use std::sync::Arc;

pub fn cmd_results(ctx: &Context, args: ResultsArgs) -> anyhow::Result<i32> {
    if ctx.store.get_run(&args.run_id)?.is_none() {
        return report_run_error(&RunError::RunNotFound(args.run_id));
    }
    let results = ctx.store.list_results(&args.run_id)?;
    if args.json {
        print_json(&results)?;
    } else {
        console::print_results(&results);
    }
    Ok(exit_codes::OK)
}

pub fn cmd_summary(ctx: &Context, args: SummaryArgs) -> anyhow::Result<i32> {
    let orch = ctx.orchestrator(Arc::new(NoopObserver));
    let summary = match orch.summary(&args.run_id) {
        Ok(s) => s,
        Err(e) => return report_run_error(&e),
    };
    if args.json {
        print_json(&summary)?;
    } else {
        console::print_summary(&summary);
    }
    Ok(exit_codes::OK)
}
