use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recall_agent::AgentConfig;
use recall_agent::memory::{DEFAULT_CAPACITY, DEFAULT_HISTORY_FILE, FlushPolicy, HistoryGuard};
use recall_agent::session::{Command, ReplExit, Reply, Session, run_repl};
use recall_agent::tools::currency_tools;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "recall-agent")]
#[command(version = "0.1.0")]
#[command(
    about = "Currency conversion assistant that remembers its recent results",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        global = true,
        env = "RECALL_HISTORY_FILE",
        default_value = DEFAULT_HISTORY_FILE,
        help = "Where history is persisted"
    )]
    history_file: PathBuf,

    #[arg(long, global = true, env = "RECALL_NO_PERSIST", help = "Keep history in memory only")]
    no_persist: bool,

    #[arg(
        short,
        long,
        global = true,
        env = "RECALL_CAPACITY",
        default_value_t = DEFAULT_CAPACITY,
        help = "Maximum number of remembered results"
    )]
    capacity: NonZeroUsize,

    #[arg(
        long,
        global = true,
        env = "RECALL_FLUSH",
        default_value = "on-exit",
        help = "When to save history: on-exit or every-append"
    )]
    flush: FlushPolicy,

    #[arg(
        short,
        long,
        global = true,
        env = "RECALL_RATES_FILE",
        help = "JSON file of USD rate overrides"
    )]
    rates: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> AgentConfig {
        AgentConfig {
            history_file: (!self.no_persist).then(|| self.history_file.clone()),
            capacity: self.capacity,
            flush: self.flush,
            rates_file: self.rates.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Convert an amount once")]
    Convert {
        #[arg(help = "Amount to convert")]
        amount: f64,

        #[arg(help = "Currency to convert from")]
        from: String,

        #[arg(help = "Currency to convert to")]
        to: String,
    },

    #[command(about = "Show recent conversions")]
    History {
        #[arg(short = 'n', long, default_value_t = 5, help = "Number of entries")]
        count: usize,
    },

    #[command(about = "Interactive mode")]
    Interactive,

    #[command(about = "Check the rate table")]
    CheckRates,
}

async fn open_session(config: &AgentConfig) -> Result<(HistoryGuard, Session)> {
    let rates = Arc::new(config.load_rates().await.context("Failed to load rates")?);
    // Dropping the guard saves history.
    let history = config.open_history();
    let session = Session::new(currency_tools(rates, history.handle()));
    Ok((history, session))
}

async fn check_rates(config: &AgentConfig) -> Result<()> {
    match &config.rates_file {
        Some(path) => println!("Checking rates at: {:?}", path),
        None => println!("Using built-in rates."),
    }

    let rates = config.load_rates().await.context("Failed to load rates")?;
    println!("Rates loaded successfully.");
    println!("Number of currencies: {}", rates.len());
    for (code, rate) in rates.iter() {
        println!("  - {}: {}", code, rate);
    }
    Ok(())
}

async fn convert(config: &AgentConfig, amount: f64, from: &str, to: &str) -> Result<()> {
    let (_history, session) = open_session(config).await?;
    let reply = session
        .execute(Command::Convert {
            amount,
            from: from.to_string(),
            to: to.to_string(),
        })
        .await?;

    if let Reply::Text(text) = reply {
        println!("{}", text);
    }
    Ok(())
}

fn show_history(config: &AgentConfig, count: usize) {
    let history = config.open_history();
    let recent = history.lock().recent(count);
    if recent.is_empty() {
        println!("No history yet.");
    }
    for entry in recent {
        println!("{}", entry);
    }
}

async fn interactive(config: &AgentConfig) -> Result<ReplExit> {
    let (history, session) = open_session(config).await?;

    println!("Currency agent with memory. Type 'help' for commands, 'exit' to quit.");
    println!(
        "Remembering up to {} results{}",
        config.capacity,
        config
            .history_file
            .as_ref()
            .map(|p| format!(" in {:?}", p))
            .unwrap_or_default()
    );
    println!();

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let exit = run_repl(&session, io::BufReader::new(io::stdin()), io::stdout(), shutdown).await;

    drop(session);
    drop(history);
    Ok(exit?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.config();

    match args.command {
        Commands::Convert { amount, from, to } => convert(&config, amount, &from, &to).await,
        Commands::History { count } => {
            show_history(&config, count);
            Ok(())
        }
        Commands::Interactive => {
            if interactive(&config).await? == ReplExit::Interrupted {
                // The stdin reader thread cannot be cancelled and would keep
                // the runtime from shutting down. History is already saved.
                std::process::exit(0);
            }
            Ok(())
        }
        Commands::CheckRates => check_rates(&config).await,
    }
}
