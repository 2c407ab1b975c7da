use super::{exit_codes, parse_mapping, print_json, report_run_error, Context};
use crate::cli::args::{CreateArgs, ExecuteArgs, ListArgs, RunSub};
use promptgrid_core::engine::orchestrator::{CancelOutcome, Orchestrator, RunRequest, RunSummary};
use promptgrid_core::errors::RunError;
use promptgrid_core::model::RunStatus;
use promptgrid_core::progress::{BroadcastObserver, ProgressUpdate, TracingObserver};
use promptgrid_core::report::console;
use promptgrid_core::storage::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

pub async fn dispatch(ctx: &Context, sub: RunSub) -> anyhow::Result<i32> {
    match sub {
        RunSub::Create(args) => cmd_create(ctx, args),
        RunSub::Execute(args) => cmd_execute(ctx, args).await,
        RunSub::Cancel { run_id } => cmd_cancel(ctx, &run_id),
        RunSub::List(args) => cmd_list(ctx, args),
        RunSub::Show { run_id, json } => cmd_show(ctx, &run_id, json),
    }
}

fn cmd_create(ctx: &Context, args: CreateArgs) -> anyhow::Result<i32> {
    let column_mapping = match parse_mapping(&args.mappings) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let orch = ctx.orchestrator(Arc::new(TracingObserver));
    let req = RunRequest {
        name: args.name,
        prompt_ids: args.prompts,
        dataset_id: args.dataset,
        model_ids: args.models,
        column_mapping,
    };
    let run = match orch.create_run(req) {
        Ok(run) => run,
        Err(e) => return report_run_error(&e),
    };

    if args.json {
        print_json(&run)?;
    } else {
        console::print_run(&run);
        println!("{}", run.id);
    }
    Ok(exit_codes::OK)
}

async fn cmd_execute(ctx: &Context, args: ExecuteArgs) -> anyhow::Result<i32> {
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.cfg.engine.timeout());

    let outcome = if args.background {
        execute_streaming(ctx, &args.run_id, timeout).await?
    } else {
        execute_foreground(ctx, &args.run_id, timeout).await
    };

    let summary = match outcome {
        Ok(s) => s,
        Err(e) => return report_run_error(&e),
    };

    if args.json {
        print_json(&summary)?;
    }
    console::print_execution(&summary);

    if summary.status == RunStatus::Completed && summary.failed == 0 {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::TEST_FAILED)
    }
}

/// Run in the current task; Ctrl-C cancels the run instead of killing the process.
async fn execute_foreground(
    ctx: &Context,
    run_id: &str,
    timeout: Duration,
) -> Result<RunSummary, RunError> {
    let orch = ctx.orchestrator(Arc::new(TracingObserver));
    let exec = orch.execute(run_id, timeout);
    tokio::pin!(exec);

    tokio::select! {
        res = &mut exec => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupt: cancelling {}", run_id);
            request_cancel(&orch, run_id);
            exec.await
        }
    }
}

/// Run on a detached task and print each progress update as it arrives.
async fn execute_streaming(
    ctx: &Context,
    run_id: &str,
    timeout: Duration,
) -> anyhow::Result<Result<RunSummary, RunError>> {
    let observer = BroadcastObserver::new(64);
    let mut rx = observer.subscribe();
    let orch = ctx.orchestrator(Arc::new(observer));

    let mut handle = match orch.spawn(run_id, timeout) {
        Ok(h) => h,
        Err(e) => return Ok(Err(e)),
    };

    loop {
        tokio::select! {
            joined = &mut handle => {
                // The terminal update is sent before the task returns.
                while let Ok(u) = rx.try_recv() {
                    print_progress(&u);
                }
                return Ok(joined?);
            }
            update = rx.recv() => match update {
                Ok(u) => print_progress(&u),
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!(event = "promptgrid.cli.progress_lagged", skipped = n);
                }
                Err(RecvError::Closed) => return Ok(handle.await?),
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupt: cancelling {}", run_id);
                request_cancel(&orch, run_id);
                return Ok(handle.await?);
            }
        }
    }
}

fn print_progress(u: &ProgressUpdate) {
    eprintln!(
        "  [{}] {}/{} ({}%)",
        u.status, u.completed_cases, u.total_cases, u.progress
    );
}

fn request_cancel(orch: &Orchestrator, run_id: &str) {
    if let Err(e) = orch.cancel(run_id) {
        tracing::warn!(event = "promptgrid.cli.cancel_failed", run_id = %run_id, error = %e);
    }
}

fn cmd_cancel(ctx: &Context, run_id: &str) -> anyhow::Result<i32> {
    let orch = ctx.orchestrator(Arc::new(TracingObserver));
    match orch.cancel(run_id) {
        Ok(CancelOutcome::Cancelled) => {
            eprintln!("cancelled {}", run_id);
            Ok(exit_codes::OK)
        }
        Ok(CancelOutcome::Signalled) => {
            eprintln!("cancellation requested for {}", run_id);
            Ok(exit_codes::OK)
        }
        Err(e) => report_run_error(&e),
    }
}

fn cmd_list(ctx: &Context, args: ListArgs) -> anyhow::Result<i32> {
    let status = match args.status.as_deref() {
        None => None,
        Some(s) => match RunStatus::parse(s) {
            Some(st) => Some(st),
            None => {
                eprintln!("error: unknown status '{}'", s);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        },
    };
    let runs = ctx.store.list_runs(status, args.limit, args.offset)?;
    if args.json {
        print_json(&runs)?;
    } else {
        console::print_runs(&runs);
    }
    Ok(exit_codes::OK)
}

fn cmd_show(ctx: &Context, run_id: &str, json: bool) -> anyhow::Result<i32> {
    let Some(run) = ctx.store.get_run(run_id)? else {
        return report_run_error(&RunError::RunNotFound(run_id.to_string()));
    };
    if json {
        print_json(&run)?;
    } else {
        console::print_run(&run);
    }
    Ok(exit_codes::OK)
}
