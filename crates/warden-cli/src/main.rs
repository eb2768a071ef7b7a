//! Warden CLI - inspect and exercise sandbox configurations
//!
//! Usage:
//!   warden --config sandbox.json ops                 List exposed operations
//!   warden --config sandbox.json resolve ./a.txt     Classify a path
//!   warden --config sandbox.json require lodash      Check a module load
//!   warden --config sandbox.json read data.txt       Guarded read to stdout
//!   warden --config sandbox.json exists data.txt     Guarded existence query

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use warden::{
    GuardResult, ModuleLoader, PathClassification, PolicyOutcome, Reported, Sandbox,
    SandboxConfig, SandboxOptions,
};

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Inspect and exercise Warden sandbox configurations")]
struct Cli {
    /// JSON sandbox configuration; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured sandbox root
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the filesystem operations the configuration exposes
    Ops,
    /// Classify a requested path the way the guards do
    Resolve {
        /// Requested path or module identifier
        path: String,
        /// File the request is made from
        #[arg(long)]
        caller: Option<PathBuf>,
        /// Treat bare identifiers as module references
        #[arg(long)]
        modules: bool,
    },
    /// Check whether a module load would be allowed
    Require {
        /// Module identifier or path
        id: String,
        /// File the request is made from
        #[arg(long)]
        caller: Option<PathBuf>,
    },
    /// Read a file through the guarded filesystem
    Read {
        /// Requested path
        path: String,
        /// File the request is made from
        #[arg(long)]
        caller: Option<PathBuf>,
    },
    /// Query existence through the guarded filesystem
    Exists {
        /// Requested path
        path: String,
        /// File the request is made from
        #[arg(long)]
        caller: Option<PathBuf>,
    },
}

/// Loader that loads nothing and reports the identifier it was given.
#[derive(Debug)]
struct DryRunLoader;

impl ModuleLoader for DryRunLoader {
    type Module = String;
    type Error = Infallible;

    fn load(&self, id: &str, _caller: Option<&Path>) -> Result<String, Infallible> {
        Ok(id.to_string())
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SandboxConfig> {
    let mut options = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<SandboxOptions>(&json)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => SandboxOptions::default(),
    };
    if let Some(root) = &cli.root {
        options.root = Some(root.clone());
    }
    Ok(SandboxConfig::from_options(options)?)
}

/// Print a sentinel, or hand the value on.
fn reported<T>(result: GuardResult<T>) -> anyhow::Result<Option<T>> {
    Ok(match result? {
        Reported::Value(value) => Some(value),
        Reported::Null => {
            println!("null");
            None
        }
        Reported::Undefined => {
            println!("undefined");
            None
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Output to stderr so it doesn't interfere with file contents on stdout
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let cli = Cli::parse();
    let sandbox = Sandbox::new(load_config(&cli)?);

    match cli.command {
        Command::Ops => {
            for op in sandbox.capabilities().operations() {
                println!("{}", op);
            }
        }
        Command::Resolve {
            path,
            caller,
            modules,
        } => match sandbox.resolver().resolve(&path, caller.as_deref(), modules) {
            PolicyOutcome::Allowed(PathClassification::File(file)) => {
                println!("file {}", file.display());
            }
            PolicyOutcome::Allowed(PathClassification::Module(name)) => {
                println!("module {}", name);
            }
            PolicyOutcome::Denied(reason) => println!("denied: {}", reason),
            PolicyOutcome::Undefined(reason) => println!("undefined: {}", reason),
        },
        Command::Require { id, caller } => {
            let mut guard = sandbox.module_guard(DryRunLoader);
            if let Some(caller) = caller {
                guard = guard.for_caller(caller);
            }
            if let Some(loaded) = reported(guard.require(&id))? {
                println!("allowed {}", loaded);
            }
        }
        Command::Read { path, caller } => {
            let mut fs = sandbox.local_filesystem();
            if let Some(caller) = caller {
                fs = fs.for_caller(caller);
            }
            if let Some(bytes) = reported(fs.read_file(&path).await)? {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
            }
        }
        Command::Exists { path, caller } => {
            let mut fs = sandbox.local_filesystem();
            if let Some(caller) = caller {
                fs = fs.for_caller(caller);
            }
            println!("{}", fs.exists_sync(&path)?);
        }
    }

    Ok(())
}
