#![forbid(unsafe_code)]

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use solar_ops::backup::{verify_artifact, BackupManager, FileBackupStorage};
use solar_ops::clock::SystemClock;
use solar_ops::config::{dev_database_target, OpsConfig};
use solar_ops::console::{AutoConfirm, Console, Prompt, StdinPrompt};
use solar_ops::deploy::Deployer;
use solar_ops::environment::Environment;
use solar_ops::health::{HttpHealthProbe, DEFAULT_PROBE_TIMEOUT};
use solar_ops::registry::{default_build_context, DockerRegistry, ImagePublisher};
use solar_ops::runtime::DockerCompose;
use solar_ops::OpsError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "solar-ops")]
#[command(about = "Deployment and backup operations for the solar backend")]
#[command(
    after_help = "Environment:\n  \
                  RUST_LOG   Log filter override (e.g. solar_ops=debug)\n  \
                  Any key of <root>/<env>/.env overrides the file's value"
)]
struct Cli {
    /// Directory containing the per-environment directories
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Print the command's report as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[arg(long, global = true, default_value_t = false)]
    quiet: bool,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[arg(long, global = true, default_value_t = false)]
    no_color: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a tiered, verified backup of an environment's database
    Backup { environment: String },
    /// Delete backups older than their tier's retention window
    Sweep { environment: String },
    /// List an environment's backups, newest first
    List { environment: String },
    /// Decompress-test a backup artifact
    Verify { artifact: PathBuf },
    /// Export the development database (uncompressed plus .gz)
    Export { output: Option<PathBuf> },
    /// Restore a backup artifact into an environment's database
    Restore {
        environment: String,
        artifact: PathBuf,
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Deploy an image tag to an environment
    Deploy {
        environment: String,
        #[arg(long)]
        tag: Option<String>,
        /// Answer yes to every confirmation prompt
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Build and push the backend image
    Push {
        tag: Option<String>,
        /// Environment whose env file holds the registry settings
        #[arg(long, default_value = "prod")]
        environment: String,
        #[arg(long)]
        context: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let console = Console::new(!cli.no_color).quiet(cli.quiet || cli.json);
    match run(&cli, console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            console.error(&format!("{:#}", e));
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn prompt_for(assume_yes: bool) -> Arc<dyn Prompt> {
    if assume_yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(StdinPrompt)
    }
}

fn backup_manager(root: &Path, console: Console) -> BackupManager {
    BackupManager::new(
        Arc::new(DockerCompose::new()),
        Box::new(FileBackupStorage::new(root)),
        Arc::new(SystemClock),
    )
    .with_console(console)
}

fn emit<T: Serialize>(json: bool, report: &T) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    Ok(())
}

async fn run(cli: &Cli, console: Console) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Backup { environment } => {
            let environment: Environment = environment.parse()?;
            let config = OpsConfig::load_or_default(&cli.root, environment)?;
            let artifact = backup_manager(&cli.root, console)
                .run_backup(&config.database_target())
                .await
                .with_context(|| format!("backup of {} failed", environment))?;
            emit(cli.json, &artifact)
        }
        Commands::Sweep { environment } => {
            let environment: Environment = environment.parse()?;
            let report = backup_manager(&cli.root, console)
                .sweep_retention(environment)
                .await?;
            emit(cli.json, &report)
        }
        Commands::List { environment } => {
            let environment: Environment = environment.parse()?;
            let artifacts = backup_manager(&cli.root, console)
                .list_artifacts(environment)
                .await?;
            if !cli.json {
                for artifact in &artifacts {
                    console.info(&format!(
                        "{:<8} {}  {:>8}  {}",
                        artifact.tier,
                        artifact.created_at.format("%Y-%m-%d %H:%M:%S"),
                        solar_ops::console::human_size(artifact.size_bytes),
                        artifact.path.display()
                    ));
                }
            }
            emit(cli.json, &artifacts)
        }
        Commands::Verify { artifact } => {
            let result = verify_artifact(artifact)?;
            emit(cli.json, &result)?;
            if !result.is_valid {
                return Err(OpsError::IntegrityCheckFailed {
                    path: result.path,
                    reason: result.error.unwrap_or_default(),
                }
                .into());
            }
            let summary = format!("{} is intact (sha256 {})", artifact.display(), result.checksum);
            console.success(&summary);
            Ok(())
        }
        Commands::Export { output } => {
            let target = dev_database_target(&cli.root)?;
            let report = backup_manager(&cli.root, console)
                .with_export_dir(std::env::current_dir()?)
                .export_snapshot(&target, output.clone())
                .await?;
            emit(cli.json, &report)
        }
        Commands::Restore {
            environment,
            artifact,
            yes,
        } => {
            let environment: Environment = environment.parse()?;
            let config = OpsConfig::load_or_default(&cli.root, environment)?;
            let prompt = prompt_for(*yes);
            let report = backup_manager(&cli.root, console)
                .restore_backup(&config.database_target(), artifact, prompt.as_ref())
                .await?;
            emit(cli.json, &report)
        }
        Commands::Deploy { environment, tag, yes } => {
            let environment: Environment = environment.parse()?;
            let config = OpsConfig::load(&cli.root, environment)?;
            let tag = tag.clone().unwrap_or_else(|| config.default_image_tag.clone());

            let runtime = Arc::new(DockerCompose::new());
            let backups = BackupManager::new(
                runtime.clone(),
                Box::new(FileBackupStorage::new(&cli.root)),
                Arc::new(SystemClock),
            )
            .with_console(console);
            let deployer = Deployer::new(
                runtime,
                Arc::new(DockerRegistry::new()),
                Arc::new(HttpHealthProbe::new(DEFAULT_PROBE_TIMEOUT)?),
                prompt_for(*yes),
                backups,
            )
            .with_console(console);

            let report = deployer.deploy(&config, &tag).await?;
            emit(cli.json, &report)
        }
        Commands::Push {
            tag,
            environment,
            context,
            yes,
        } => {
            let environment: Environment = environment.parse()?;
            let config = OpsConfig::load_or_default(&cli.root, environment)?;
            let tag = tag.clone().unwrap_or_else(|| config.default_image_tag.clone());
            let context = context.clone().unwrap_or_else(|| default_build_context(&config));

            let registry = DockerRegistry::new();
            let prompt = prompt_for(*yes);
            let report = ImagePublisher::new(&registry, prompt.as_ref(), console)
                .publish(&config, &tag, &context)
                .await?;
            emit(cli.json, &report)
        }
    }
}
