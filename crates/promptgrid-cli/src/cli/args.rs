use clap::{Args, Parser, Subcommand};
use promptgrid_core::engine::orchestrator::DEFAULT_PREVIEW_SAMPLES;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "promptgrid",
    version,
    about = "Run prompt x model x case test matrices through an external evaluation engine"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Args, Clone)]
pub struct GlobalArgs {
    #[arg(long, global = true, env = "PROMPTGRID_CONFIG", default_value = "promptgrid.yaml")]
    pub config: PathBuf,

    /// overrides `db` from the config file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// tracing filter, e.g. `debug` or `promptgrid_core=trace`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// write a sample config and catalog
    Init(InitArgs),
    /// load a YAML catalog of prompts and datasets into the database
    Seed(SeedArgs),
    Run(RunArgs),
    /// list the stored results of a run
    Results(ResultsArgs),
    /// aggregate pass rate and latency for a run
    Summary(SummaryArgs),
    /// render a prompt against the first cases of a dataset
    Preview(PreviewArgs),
    /// propose a column mapping for a prompt and dataset
    Suggest(SuggestArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "catalog.yaml")]
    pub catalog: PathBuf,

    /// generate .gitignore for the database directory
    #[arg(long)]
    pub gitignore: bool,
}

#[derive(Parser, Clone)]
pub struct SeedArgs {
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Parser)]
pub struct RunArgs {
    #[command(subcommand)]
    pub cmd: RunSub,
}

#[derive(Subcommand)]
pub enum RunSub {
    /// create a pending run
    Create(CreateArgs),
    /// execute a pending or failed run
    Execute(ExecuteArgs),
    Cancel {
        run_id: String,
    },
    List(ListArgs),
    Show {
        run_id: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Parser, Clone)]
pub struct CreateArgs {
    #[arg(long = "prompt", required = true)]
    pub prompts: Vec<String>,

    #[arg(long)]
    pub dataset: String,

    #[arg(long = "model", required = true)]
    pub models: Vec<String>,

    /// column=variable override, repeatable
    #[arg(long = "map")]
    pub mappings: Vec<String>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone)]
pub struct ExecuteArgs {
    pub run_id: String,

    /// engine timeout in seconds (defaults to engine.timeout_seconds)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// run on a detached task and stream progress
    #[arg(long)]
    pub background: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone)]
pub struct ListArgs {
    /// pending|running|completed|failed|cancelled
    #[arg(long)]
    pub status: Option<String>,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    #[arg(long, default_value_t = 0)]
    pub offset: u32,

    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone)]
pub struct ResultsArgs {
    pub run_id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone)]
pub struct SummaryArgs {
    pub run_id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone)]
pub struct PreviewArgs {
    #[arg(long)]
    pub prompt: String,

    #[arg(long)]
    pub dataset: String,

    #[arg(long = "map")]
    pub mappings: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_PREVIEW_SAMPLES)]
    pub samples: usize,

    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone)]
pub struct SuggestArgs {
    #[arg(long)]
    pub prompt: String,

    #[arg(long)]
    pub dataset: String,

    #[arg(long)]
    pub json: bool,
}
