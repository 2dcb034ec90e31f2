use anyhow::Context;
use clap::Parser;
use std::io;
use std::path::PathBuf;
use warehouse_sql::{Connector, Overrides};

/// flow-warehouse-sql inspects connector configurations of analytical databases.
#[derive(Debug, clap::Parser)]
#[clap(author, about, version)]
struct Args {
    /// Filter of emitted logs, in `tracing_subscriber::EnvFilter` syntax.
    #[clap(long, global = true, default_value = "warn", env = "WAREHOUSE_SQL_LOG")]
    log: String,
    /// Format of emitted logs.
    #[clap(long, global = true, value_enum, default_value = "json")]
    log_format: LogFormat,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Resolve a connector configuration into the parameters used to open
    /// database sessions, and print them with secrets redacted.
    Resolve(ResolveArgs),
    /// Print the JSON schema of connector configurations.
    Spec,
}

#[derive(Debug, clap::Args)]
struct ResolveArgs {
    /// Path to a YAML or JSON connector configuration.
    #[clap(long, env = "WAREHOUSE_SQL_CONFIG")]
    config: PathBuf,
    /// Database to use instead of the connector default.
    #[clap(long)]
    database: Option<String>,
    /// Warehouse to use instead of the connector default.
    #[clap(long)]
    warehouse: Option<String>,
    /// Schema to use instead of the connector default.
    #[clap(long)]
    schema: Option<String>,
}

fn main() {
    let args = Args::parse();
    init_logging(&args.log, args.log_format);

    if let Err(err) = run(args.command) {
        tracing::error!(error = ?err, "execution failed");
        std::process::exit(1);
    }
}

fn init_logging(filter: &str, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());

    match format {
        LogFormat::Json => builder
            .json()
            // Hoist fields (including the message) to the top level of each event.
            .flatten_event(true)
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(false)
            .init(),
        LogFormat::Text => builder.init(),
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Resolve(args) => resolve(args),
        Command::Spec => {
            let schema = schemars::schema_for!(Connector);
            serde_json::to_writer_pretty(io::stdout(), &schema)?;
            Ok(())
        }
    }
}

fn resolve(
    ResolveArgs {
        config,
        database,
        warehouse,
        schema,
    }: ResolveArgs,
) -> anyhow::Result<()> {
    let content = std::fs::read(&config)
        .with_context(|| format!("failed to read connector config {}", config.display()))?;
    // YAML is a superset of JSON, so this parses either.
    let connector: Connector = serde_yaml::from_slice(&content)
        .with_context(|| format!("failed to parse connector config {}", config.display()))?;

    let params = connector
        .connect_params(&Overrides {
            database,
            warehouse,
            schema,
        })
        .context("failed to resolve connection parameters")?;

    tracing::info!(params = params.len(), "resolved connector config");

    serde_json::to_writer_pretty(io::stdout(), &params)?;
    println!();
    Ok(())
}
