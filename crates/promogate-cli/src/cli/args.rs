use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "promogate",
    version,
    about = "Promotion gates for delivery pipelines: constraints, verifications, post-deploy actions and auto-rollback"
)]
pub struct Cli {
    /// Log filter, e.g. `info` or `promogate_core=debug`
    #[arg(long, global = true, env = "PROMOGATE_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a sample delivery config
    Init(InitArgs),
    Validate(ValidateArgs),
    /// Advance every check of one artifact version by one step
    Tick(TickArgs),
    /// Show stored check, constraint, pin and veto state
    Status(StatusArgs),
    Pin(PinArgs),
    Unpin(UnpinArgs),
    Veto(VetoArgs),
    /// Record the promotion status of a version in an environment
    Promote(PromoteArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "promogate.yaml")]
    pub config: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = "promogate.yaml")]
    pub config: PathBuf,

    /// Reject unknown config keys
    #[arg(long)]
    pub strict: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process backend persisted in the state db
    Local,
    /// Remote task API
    Http,
}

#[derive(clap::Args, Debug, Clone)]
pub struct TickArgs {
    #[arg(long, default_value = "promogate.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value = ".promogate/state.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub artifact: String,

    #[arg(long)]
    pub version: String,

    /// Limit the pass to one environment
    #[arg(long)]
    pub environment: Option<String>,

    #[arg(long, value_enum, default_value = "local")]
    pub backend: Backend,

    #[arg(long, env = "PROMOGATE_TASK_API_URL")]
    pub task_api_url: Option<String>,

    #[arg(long)]
    pub strict: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "promogate.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value = ".promogate/state.db")]
    pub db: PathBuf,

    /// text | json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PinArgs {
    #[arg(long, default_value = "promogate.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value = ".promogate/state.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub environment: String,

    #[arg(long)]
    pub artifact: String,

    #[arg(long)]
    pub version: String,

    #[arg(long, default_value = "")]
    pub comment: String,

    /// Defaults to the configured actor
    #[arg(long)]
    pub by: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct UnpinArgs {
    #[arg(long, default_value = "promogate.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value = ".promogate/state.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub environment: String,

    #[arg(long)]
    pub artifact: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct VetoArgs {
    #[arg(long, default_value = "promogate.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value = ".promogate/state.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub environment: String,

    #[arg(long)]
    pub artifact: String,

    #[arg(long)]
    pub version: String,

    #[arg(long, default_value = "")]
    pub comment: String,

    #[arg(long)]
    pub by: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PromoteArgs {
    #[arg(long, default_value = "promogate.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value = ".promogate/state.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub environment: String,

    #[arg(long)]
    pub artifact: String,

    #[arg(long)]
    pub version: String,

    /// pending | approved | deploying | current | previous | vetoed | skipped
    #[arg(long)]
    pub status: String,
}
