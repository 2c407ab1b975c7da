use super::args::*;
use promptgrid_core::config::{self, Config};
use promptgrid_core::engine::orchestrator::Orchestrator;
use promptgrid_core::engine::promptfoo::PromptfooEngine;
use promptgrid_core::errors::{ErrorClass, RunError};
use promptgrid_core::model::ColumnMapping;
use promptgrid_core::progress::ProgressObserver;
use promptgrid_core::storage::SqliteStore;
use std::path::Path;
use std::sync::Arc;

pub mod inspect;
pub mod mapping;
pub mod run;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

/// Loaded config plus an opened store, shared by every data command.
pub struct Context {
    pub cfg: Config,
    pub store: SqliteStore,
}

impl Context {
    fn load(global: &GlobalArgs) -> anyhow::Result<Self> {
        let mut cfg = config::load_or_default(&global.config)?;
        cfg.apply_env_overrides();
        if let Some(db) = &global.db {
            cfg.db = db.clone();
        }

        let level = global
            .log_level
            .clone()
            .or_else(|| cfg.log_level.clone())
            .unwrap_or_else(|| "info".to_string());
        crate::init_logging(&level, global.log_json);

        ensure_parent_dir(&cfg.db)?;
        let store = SqliteStore::open(&cfg.db)?;
        store.init_schema()?;
        tracing::debug!(event = "promptgrid.cli.store_opened", db = %cfg.db.display());
        Ok(Self { cfg, store })
    }

    pub fn orchestrator(&self, observer: Arc<dyn ProgressObserver>) -> Orchestrator {
        let engine = PromptfooEngine::new(&self.cfg.engine);
        Orchestrator::new(Arc::new(self.store.clone()), Arc::new(engine), observer)
    }
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
        Command::Init(args) => cmd_init(&cli.global, args),
        cmd => {
            let ctx = match Context::load(&cli.global) {
                Ok(ctx) => ctx,
                Err(e) => {
                    eprintln!("error: {:#}", e);
                    return Ok(exit_codes::CONFIG_ERROR);
                }
            };
            match cmd {
                Command::Seed(args) => cmd_seed(&ctx, args),
                Command::Run(args) => run::dispatch(&ctx, args.cmd).await,
                Command::Results(args) => inspect::cmd_results(&ctx, args),
                Command::Summary(args) => inspect::cmd_summary(&ctx, args),
                Command::Preview(args) => mapping::cmd_preview(&ctx, args),
                Command::Suggest(args) => mapping::cmd_suggest(&ctx, args),
                Command::Version | Command::Init(_) => Ok(exit_codes::OK),
            }
        }
    }
}

fn cmd_init(global: &GlobalArgs, args: InitArgs) -> anyhow::Result<i32> {
    write_file_if_missing(&global.config, crate::templates::SAMPLE_CONFIG)?;
    write_file_if_missing(&args.catalog, crate::templates::SAMPLE_CATALOG)?;
    if args.gitignore {
        write_file_if_missing(Path::new(".gitignore"), crate::templates::GITIGNORE)?;
    }
    eprintln!(
        "next: promptgrid seed --file {}",
        args.catalog.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_seed(ctx: &Context, args: SeedArgs) -> anyhow::Result<i32> {
    let catalog = match promptgrid_core::catalog::load_catalog(&args.file) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let report = promptgrid_core::catalog::seed(&ctx.store, &catalog)?;
    eprintln!(
        "seeded {} prompts ({} versions), {} datasets, {} cases into {}",
        report.prompts,
        report.versions,
        report.datasets,
        report.cases,
        ctx.cfg.db.display()
    );
    Ok(exit_codes::OK)
}

fn write_file_if_missing(path: &Path, content: &str) -> anyhow::Result<()> {
    ensure_parent_dir(path)?;
    if !path.exists() {
        std::fs::write(path, content)?;
        eprintln!("created {}", path.display());
    } else {
        eprintln!("note: {} already exists (skipped)", path.display());
    }
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Parse repeated `column=variable` flags. No flags means no override.
pub fn parse_mapping(pairs: &[String]) -> anyhow::Result<Option<ColumnMapping>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut m = ColumnMapping::new();
    for p in pairs {
        let Some((col, var)) = p.split_once('=') else {
            anyhow::bail!("invalid --map '{}': expected column=variable", p);
        };
        let (col, var) = (col.trim(), var.trim());
        if col.is_empty() || var.is_empty() {
            anyhow::bail!("invalid --map '{}': expected column=variable", p);
        }
        m.insert(col.to_string(), var.to_string());
    }
    Ok(Some(m))
}

/// Report a run-level error and pick the exit code for it.
pub fn report_run_error(e: &RunError) -> anyhow::Result<i32> {
    match e.class() {
        ErrorClass::Precondition => {
            eprintln!("error: {}", e);
            Ok(exit_codes::CONFIG_ERROR)
        }
        ErrorClass::Engine | ErrorClass::Rendering | ErrorClass::Cancelled => {
            eprintln!("❌ {}", e);
            Ok(exit_codes::TEST_FAILED)
        }
        ErrorClass::Store => Err(anyhow::anyhow!("{}", e)),
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mapping_flags() {
        let m = parse_mapping(&["query=question".into(), " doc = context ".into()])
            .unwrap()
            .unwrap();
        assert_eq!(m["query"], "question");
        assert_eq!(m["doc"], "context");
        assert_eq!(m.keys().next().map(String::as_str), Some("query"));
        assert!(parse_mapping(&[]).unwrap().is_none());
        assert!(parse_mapping(&["nonsense".into()]).is_err());
        assert!(parse_mapping(&["=x".into()]).is_err());
    }
}
