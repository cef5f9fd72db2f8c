mod config;
mod prompt_cmd;
mod run_cmd;

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use drover_core::engine::EngineRegistry;

use config::{ConfigFile, DroverConfig, Overrides};

#[derive(Parser)]
#[command(
    name = "drover",
    version,
    about = "Drive coding-agent CLIs through a task list until it is done"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Engine selection shared by `run` and `prompt`.
#[derive(Args, Debug, Default)]
struct EngineArgs {
    /// Engine to drive (see `drover engines`)
    #[arg(long)]
    engine: Option<String>,
    /// Model passed to the engine
    #[arg(long)]
    model: Option<String>,
    /// Provider prefix for engines that take one (opencode)
    #[arg(long)]
    provider: Option<String>,
    /// Per-invocation timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Work through a task file until every task is done
    Run {
        #[command(flatten)]
        engine: EngineArgs,
        /// Path to the TOML task file
        #[arg(long, default_value = "tasks.toml")]
        tasks: PathBuf,
        /// Stop after this many iterations (0 = unbounded)
        #[arg(long)]
        max_iterations: Option<u32>,
        /// File whose contents are placed at the top of every prompt
        #[arg(long)]
        preamble: Option<PathBuf>,
        /// Show the next task and stop without running the engine
        #[arg(long)]
        dry_run: bool,
    },
    /// Send a single prompt and print the answer
    Prompt {
        #[command(flatten)]
        engine: EngineArgs,
        /// Show live progress and print only the assistant's text
        #[arg(long)]
        stream: bool,
        /// Prompt text
        text: String,
    },
    /// List the available engines
    Engines,
    /// Write a drover config file with the built-in defaults
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print a shell completion script
    Completions {
        /// Target shell
        shell: Shell,
    },
}

impl EngineArgs {
    fn into_overrides(self, max_iterations: Option<u32>) -> Overrides {
        Overrides {
            engine: self.engine,
            model: self.model,
            provider: self.provider,
            timeout_secs: self.timeout,
            max_iterations,
        }
    }
}

/// Execute the `drover init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = ConfigFile::starter();
    config::save_config(&path, &cfg)?;

    println!("Config written to {}", path.display());
    if let Some(name) = &cfg.engine.name {
        println!("  engine.name = {name}");
    }
    println!();
    println!("Next: write a tasks.toml and run `drover run`.");

    Ok(())
}

/// Execute the `drover engines` command.
fn cmd_engines() -> anyhow::Result<()> {
    let registry = EngineRegistry::with_defaults();
    let default = DroverConfig::resolve(&Overrides::default())
        .map(|c| c.engine_name)
        .unwrap_or_else(|_| config::DEFAULT_ENGINE.to_string());
    for name in registry.list() {
        let marker = if name == default { " (default)" } else { "" };
        println!("{name}{marker}");
    }
    Ok(())
}

async fn dispatch(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Run {
            engine,
            tasks,
            max_iterations,
            preamble,
            dry_run,
        } => {
            let resolved = DroverConfig::resolve(&engine.into_overrides(max_iterations))?;
            let options = run_cmd::RunOptions {
                tasks,
                preamble,
                dry_run,
            };
            run_cmd::run_tasks(&resolved, options).await
        }
        Commands::Prompt {
            engine,
            stream,
            text,
        } => {
            let resolved = DroverConfig::resolve(&engine.into_overrides(None))?;
            prompt_cmd::run_prompt(&resolved, &text, stream).await
        }
        Commands::Engines => cmd_engines().map(|()| 0),
        Commands::Init { force } => cmd_init(force).map(|()| 0),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "drover", &mut std::io::stdout());
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so they never interleave with the live display.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("drover: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "drover",
            "run",
            "--engine",
            "codex",
            "--max-iterations",
            "5",
            "--tasks",
            "work/tasks.toml",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                engine,
                tasks,
                max_iterations,
                dry_run,
                preamble,
            } => {
                assert_eq!(engine.engine.as_deref(), Some("codex"));
                assert_eq!(tasks, PathBuf::from("work/tasks.toml"));
                assert_eq!(max_iterations, Some(5));
                assert!(dry_run);
                assert_eq!(preamble, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn prompt_requires_text() {
        assert!(Cli::try_parse_from(["drover", "prompt"]).is_err());
        let cli = Cli::try_parse_from(["drover", "prompt", "--stream", "hello"]).unwrap();
        assert!(matches!(cli.command, Commands::Prompt { stream: true, ref text, .. } if text == "hello"));
    }

    #[test]
    fn engine_args_become_overrides() {
        let args = EngineArgs {
            engine: Some("opencode".into()),
            model: Some("m".into()),
            provider: Some("p".into()),
            timeout: Some(60),
        };
        let overrides = args.into_overrides(Some(3));
        assert_eq!(overrides.engine.as_deref(), Some("opencode"));
        assert_eq!(overrides.timeout_secs, Some(60));
        assert_eq!(overrides.max_iterations, Some(3));
    }
}
