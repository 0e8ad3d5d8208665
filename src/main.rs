use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "packetwarden",
    about = "Lightweight network intrusion detection pipeline",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (detection pipeline + API server)
    Serve {
        /// Bind address override
        #[arg(long)]
        bind: Option<String>,

        /// Path to the TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Rule file override
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Validate a rule file and exit
    CheckRules {
        /// Path to the rule file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            config,
            rules,
        } => {
            let mut cfg = match config {
                Some(path) => packetwarden::config::Config::load(&path)?,
                None => packetwarden::config::Config::load_or_default(),
            };
            if let Some(bind) = bind {
                cfg.api.bind = bind;
            }
            if let Some(rules) = rules {
                cfg.rules.path = rules;
            }
            tracing::info!(bind = %cfg.api.bind, "starting packetwarden daemon");
            packetwarden::serve(cfg).await?;
        }
        Commands::CheckRules { path } => {
            match packetwarden::rules::RuleSet::load(&path) {
                Ok(set) => {
                    println!("{}: {} rules ok", path.display(), set.len());
                }
                Err(err) => {
                    eprintln!("{}: {}", path.display(), err);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
