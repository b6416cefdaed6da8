use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod common;

use plotjob_core::Transition;

#[derive(Parser)]
#[command(name = "plotjob-cli", version, about = "Pen plotter job lifecycle CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job management
    Job {
        #[command(subcommand)]
        action: commands::job::JobAction,
    },
    /// Queue a submitted job
    Queue { id: String },
    /// Validate and analyze a queued job's source artifact
    Analyze { id: String },
    /// Mark path optimization done
    Optimize { id: String },
    /// Stage an optimized job for arming
    Ready { id: String },
    /// Run the safety guards and arm the plotter
    Arm(commands::lifecycle::ArmArgs),
    /// Begin plotting an armed job
    Start { id: String },
    /// Pause the active plot
    Pause { id: String },
    /// Resume a paused plot
    Resume { id: String },
    /// Mark the active plot finished
    Complete { id: String },
    /// Abort a job (stops motion first if plotting)
    Abort { id: String },
    /// Mark a job failed
    Fail {
        id: String,
        /// Recorded as the job's error message
        #[arg(long)]
        reason: Option<String>,
    },
    /// Start a job and hold the plotting session under signal capture
    Run {
        id: String,
        /// Complete the job automatically after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Crash recovery: scan and disposition interrupted jobs
    Recover {
        #[command(subcommand)]
        action: commands::recover::RecoverAction,
    },
    /// Run the recovery scan (shorthand for `recover list`)
    ResumeAll,
    /// Requeue a failed or aborted job
    Restart { id: String },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Generate shell completions
    Completions { shell: clap_complete::Shell },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PLOTJOB_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Job { action } => commands::job::run(action),
        Commands::Queue { id } => commands::lifecycle::transition(&id, Transition::Queue),
        Commands::Analyze { id } => commands::lifecycle::transition(&id, Transition::Analyze),
        Commands::Optimize { id } => commands::lifecycle::transition(&id, Transition::Optimize),
        Commands::Ready { id } => commands::lifecycle::transition(&id, Transition::Ready),
        Commands::Arm(args) => commands::lifecycle::arm(args),
        Commands::Start { id } => commands::lifecycle::transition(&id, Transition::Start),
        Commands::Pause { id } => commands::lifecycle::transition(&id, Transition::Pause),
        Commands::Resume { id } => commands::lifecycle::transition(&id, Transition::Resume),
        Commands::Complete { id } => commands::lifecycle::transition(&id, Transition::Complete),
        Commands::Abort { id } => commands::lifecycle::transition(&id, Transition::Abort),
        Commands::Fail { id, reason } => commands::lifecycle::fail(&id, reason),
        Commands::Run { id, duration_secs } => commands::run::run(&id, duration_secs),
        Commands::Recover { action } => commands::recover::run(action),
        Commands::ResumeAll => commands::recover::run(commands::recover::RecoverAction::List),
        Commands::Restart { id } => commands::recover::restart(&id),
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "plotjob-cli", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(failure) = result {
        eprintln!("error: {failure}");
        std::process::exit(failure.code);
    }
}
