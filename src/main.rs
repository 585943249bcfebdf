use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use coachmark::completion::{CompletionStore, JsonFileCompletionStore, MemoryCompletionStore};
use coachmark::config::Config;
use coachmark::measure::MeasurementPolicy;
use coachmark::tour::TransitionOutcome;
use coachmark::{demo, logging};

#[derive(Parser)]
#[command(name = "coachmark")]
#[command(about = "Guided-tour engine: inspect and drive onboarding tours")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List tours recorded in the completion store
    List,

    /// Mark a tour completed so it is never shown again
    Complete {
        /// Tour id
        tour: String,
    },

    /// Make a tour eligible to be shown again
    Reset {
        /// Tour id (omit with --all)
        tour: Option<String>,

        /// Reset every tour
        #[arg(long, conflicts_with = "tour")]
        all: bool,
    },

    /// Run the "home" demo tour against simulated anchors
    Demo {
        /// Top inset applied to overlay frames (status bar height)
        #[arg(long, default_value_t = 0.0)]
        inset: f32,

        /// Keep completion in memory instead of the configured store
        #[arg(long)]
        memory: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let _logging_handle = logging::init_logging(&config, cli.debug)?;

    let store = JsonFileCompletionStore::new(config.store_path());

    match cli.command {
        Commands::List => cmd_list(&store).await?,
        Commands::Complete { tour } => {
            store.mark_completed(&tour).await?;
            println!("{tour}: completed");
        }
        Commands::Reset { tour, all } => cmd_reset(&store, tour, all).await?,
        Commands::Demo { inset, memory } => {
            let policy = MeasurementPolicy::from(&config.measurement);
            if memory {
                cmd_demo(Arc::new(MemoryCompletionStore::new()), policy, inset).await?;
            } else {
                cmd_demo(Arc::new(store), policy, inset).await?;
            }
        }
    }

    Ok(())
}

async fn cmd_list(store: &JsonFileCompletionStore) -> Result<()> {
    let mut tours: Vec<(String, bool)> = store.hydrate().await?.into_iter().collect();
    if tours.is_empty() {
        println!("No tours recorded in {}", store.path().display());
        return Ok(());
    }

    tours.sort();
    for (tour, completed) in tours {
        let status = if completed { "completed" } else { "pending" };
        println!("{tour:<24} {status}");
    }
    Ok(())
}

async fn cmd_reset(store: &JsonFileCompletionStore, tour: Option<String>, all: bool) -> Result<()> {
    match tour {
        Some(tour) => {
            store.set_completed(&tour, false).await?;
            println!("{tour}: reset");
        }
        None if all => {
            store.clear().await?;
            println!("All tours reset");
        }
        None => anyhow::bail!("Specify a tour id or --all"),
    }
    Ok(())
}

async fn cmd_demo(
    store: Arc<dyn CompletionStore>,
    policy: MeasurementPolicy,
    inset: f32,
) -> Result<()> {
    let outcomes = demo::run(store.clone(), policy, inset).await?;
    for outcome in &outcomes {
        match outcome {
            TransitionOutcome::Active {
                index, step_id, ..
            } => println!("shown    step {} ({step_id})", index + 1),
            TransitionOutcome::Completed { tour_id } => println!("finished {tour_id}"),
            TransitionOutcome::Stopped { tour_id } => println!("stopped  {tour_id}"),
            TransitionOutcome::AlreadyCompleted { tour_id } => {
                println!("skipped  {tour_id} (already completed, run `coachmark reset {tour_id}`)");
            }
        }
    }

    // Completion writes are fire-and-forget; give the last one a moment to land
    if matches!(outcomes.last(), Some(TransitionOutcome::Completed { .. })) {
        for _ in 0..20 {
            if store.hydrate().await?.get(demo::DEMO_TOUR) == Some(&true) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
    Ok(())
}
