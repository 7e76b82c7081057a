use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "dbsource",
    about = "Inspect and validate connection-source configuration",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Configuration file ([database] and [databases.<name>] tables)
    #[arg(short, long, global = true, default_value = "dbsource.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured database names, default first
    Names,
    /// Print the narrowed configuration of one database
    Show {
        /// Database name
        name: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Check every configured database's options
    Validate,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dbsource=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Names => commands::inspect::names(&cli.config),
        Commands::Show { name, format } => commands::inspect::show(&cli.config, &name, &format),
        Commands::Validate => commands::validate::validate(&cli.config),
    }
}
