mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::EXIT_FAILURE;
use kiln_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Stateful, resumable image builds: unchanged inputs skip, failures resume"
)]
struct Cli {
    /// Path to the state file (default: .kiln/builder-state.json next to the plan).
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the builds in a plan, skipping or resuming from recorded state.
    Build {
        /// Path to the build plan JSON file.
        #[arg(default_value = "kiln-plan.json")]
        plan: PathBuf,
        /// Rebuild even if state says the builds are current.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Override a plan variable (key=value, repeatable).
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// Inspect or prune the recorded build state.
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum StateCommands {
    /// Render the state document.
    Show {
        /// Output the raw document as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Remove a build from state.
    Rm {
        /// Name of the build to remove.
        name: String,
    },
    /// Forcibly release an abandoned lock.
    Unlock,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KILN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let state = cli.state;
    let result = match cli.command {
        Commands::Build { plan, force, vars } => {
            commands::build::run(&plan, state.as_deref(), force, &vars)
        }
        Commands::State { command } => match command {
            StateCommands::Show { json } => commands::state_show::run(state.as_deref(), json),
            StateCommands::Rm { name } => commands::state_rm::run(state.as_deref(), &name),
            StateCommands::Unlock => commands::state_unlock::run(state.as_deref()),
        },
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
