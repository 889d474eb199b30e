use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rs_converge::{
    Inventory, LocalConnector, PlayRunner, Playbook, ResolvedInventory, RetryPolicy, RunOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "rs-converge",
    version,
    about = "Idempotent remote configuration applier"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a playbook against an inventory
    Run(RunArgs),
    /// Resolve an inventory and print it as JSON
    Inventory(InventoryArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the playbook file
    playbook: PathBuf,

    /// Inventory file (YAML, or JSON by extension)
    #[arg(short = 'i', long)]
    inventory: PathBuf,

    /// Only target hosts whose name matches this pattern ('*' wildcard)
    #[arg(long)]
    limit: Option<String>,

    /// Probe only, never apply changes
    #[arg(long)]
    check: bool,

    /// Maximum number of hosts processed concurrently
    #[arg(long, default_value_t = 10)]
    forks: usize,

    /// Per-module timeout in seconds
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Maximum retries for transient transport errors
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Run modules on the control machine instead of over SSH
    #[arg(long)]
    local: bool,

    /// Emit the full report as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct InventoryArgs {
    /// Inventory file (YAML, or JSON by extension)
    #[arg(short = 'i', long)]
    inventory: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化tracing日志，RUST_LOG 可覆盖级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Inventory(args) => dump_inventory(args),
    }
}

fn load_inventory(path: &Path) -> anyhow::Result<ResolvedInventory> {
    let inventory = if path.extension().is_some_and(|ext| ext == "json") {
        Inventory::from_json_file(path)
    } else {
        Inventory::from_yaml_file(path)
    }
    .with_context(|| format!("loading inventory {}", path.display()))?;

    Ok(inventory.resolve()?)
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let resolved = load_inventory(&args.inventory)?;
    let playbook = Playbook::from_yaml_file(&args.playbook)
        .with_context(|| format!("loading playbook {}", args.playbook.display()))?;

    let options = RunOptions {
        forks: args.forks,
        check: args.check,
        task_timeout_secs: args.timeout,
        retry: RetryPolicy {
            max_retries: args.retries,
            ..Default::default()
        },
    };

    let mut runner = PlayRunner::new(resolved, options).with_limit(args.limit.clone());
    if args.local {
        runner = runner.with_connector(Arc::new(LocalConnector));
    }

    let report = runner.run(&playbook).await?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render());
    }

    // 部分主机失败：报告已完整输出，以非零码退出
    std::process::exit(report.exit_code());
}

fn dump_inventory(args: InventoryArgs) -> anyhow::Result<()> {
    let resolved = load_inventory(&args.inventory)?;
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}
