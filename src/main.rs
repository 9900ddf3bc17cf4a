mod error;
mod exec;
mod frame;

use crate::error::{ErrorKind, Result};
use crate::exec::{ExecCommand, LogCommand};
use clap::{Args, Parser, Subcommand};
use drover_config::Config;
use drover_ftpdata::{ModeCodec, TransferMode, TransferStructure};
use drover_monitor::{Checkpoint, Dispatch, FileCommand};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Directory spooling monitor and FTP data-channel framing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the configured directories until the stop file appears or Ctrl-C
    Watch {
        /// TOML, YAML or JSON configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Summarise a monitor checkpoint
    Status { file: PathBuf },
    /// Run a file through the data-channel codec
    #[command(subcommand)]
    Frame(FrameCommand),
}

#[derive(Subcommand, Debug)]
enum FrameCommand {
    /// Plain data in, framed bytes out
    Encode(FrameArgs),
    /// Framed bytes in, plain data out
    Decode(FrameArgs),
}

#[derive(Args, Debug)]
struct FrameArgs {
    /// S (stream) or B (block)
    #[arg(long, short, default_value = "S")]
    mode: String,
    /// F (file) or R (record)
    #[arg(long, short, default_value = "F")]
    structure: String,
    input: PathBuf,
    output: PathBuf,
}

impl FrameArgs {
    fn codec(&self) -> Result<ModeCodec> {
        let mode = self.mode.parse::<TransferMode>().or_raise(|| ErrorKind::Frame)?;
        let structure = self.structure.parse::<TransferStructure>().or_raise(|| ErrorKind::Frame)?;
        ModeCodec::new(mode, structure).or_raise(|| ErrorKind::Frame)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Watch { config } => watch(config.as_deref()).await,
        Commands::Status { file } => status(&file).await,
        Commands::Frame(FrameCommand::Encode(args)) => frame::encode(args.codec()?, &args.input, &args.output).await,
        Commands::Frame(FrameCommand::Decode(args)) => frame::decode(args.codec()?, &args.input, &args.output).await,
    }
}

async fn watch(config: Option<&Path>) -> Result<()> {
    let settings = Config::load(config).or_raise(|| ErrorKind::Config)?.validate().or_raise(|| ErrorKind::Config)?;
    let settings = settings.monitor;
    let command: Arc<dyn FileCommand> = match settings.command.as_deref().and_then(ExecCommand::new) {
        Some(exec) => Arc::new(exec),
        None => {
            warn!("No command configured, stable files will only be logged");
            Arc::new(LogCommand)
        },
    };
    let monitor = settings
        .builder()
        .dispatch(Dispatch::with_parallelism(Arc::new(command), settings.parallelism))
        .on_removed(|item| info!(path = %item.path.display(), "No longer tracked"))
        .on_cycle(|report| {
            if report.dispatched > 0 || report.scan_errors > 0 || report.task_errors > 0 {
                info!(
                    cycle = report.cycle,
                    dispatched = report.dispatched,
                    scan_errors = report.scan_errors,
                    task_errors = report.task_errors,
                    "Cycle finished"
                );
            }
        })
        .build();

    let handle = monitor.start();
    let stopper = monitor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping after the current cycle");
            stopper.stop();
        }
    });
    handle.await.or_raise(|| ErrorKind::Monitor)?.or_raise(|| ErrorKind::Monitor)?;
    let counters = monitor.counters();
    info!(succeeded = counters.total_succeeded, failed = counters.total_failed, "Done");
    Ok(())
}

async fn status(file: &Path) -> Result<()> {
    let Some(checkpoint) = Checkpoint::load(file).await.or_raise(|| ErrorKind::Checkpoint(file.to_path_buf()))? else {
        exn::bail!(ErrorKind::NoCheckpoint(file.to_path_buf()));
    };
    let summary = serde_json::json!({
        "name": checkpoint.name,
        "version": checkpoint.version,
        "items": checkpoint.items.len(),
        "statuses": checkpoint.status_counts(),
        "counters": checkpoint.counters,
    });
    let pretty = serde_json::to_string_pretty(&summary).or_raise(|| ErrorKind::Checkpoint(file.to_path_buf()))?;
    println!("{pretty}");
    Ok(())
}
