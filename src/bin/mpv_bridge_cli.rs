use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mpv_bridge::data_source::FileDataSourceFactory;
use mpv_bridge::{
    AppContext, EndFile, EndFileReason, EngineConfig, EngineHandle, ErrorCode, Event, EventId,
    EventSubscription, Format, MpvError, PropertyValue, DATA_SOURCE_PREFIX,
};
use serde::Serialize;
use tokio_stream::StreamExt;

const FILE_SIZE_TOKEN: u64 = 1;
const STREAM_POS_TOKEN: u64 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "mpv_bridge_cli",
    about = "Drive the mpv bridge from the command line"
)]
struct Cli {
    /// JSON engine configuration (defaults to $MPV_BRIDGE_CONFIG or built-ins)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log engine and bridge activity to stderr
    #[arg(long)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a file and print every event as one JSON line
    Play {
        #[arg(long)]
        file: PathBuf,
        /// Open the file as a plain path instead of through the data source
        #[arg(long)]
        direct: bool,
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
    /// Load a file through the data source and print a JSON summary
    Probe {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
    /// Print the error code table as JSON
    Codes,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    if cli.verbose {
        mpv_bridge::init_logging();
    }
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path),
        None => EngineConfig::load(),
    };

    match cli.command {
        Commands::Play {
            file,
            direct,
            timeout_ms,
        } => run_play(config, &file, direct, Duration::from_millis(timeout_ms)),
        Commands::Probe { file, timeout_ms } => {
            run_probe(config, &file, Duration::from_millis(timeout_ms))
        }
        Commands::Codes => run_codes(),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("building tokio runtime")
}

/// Engine serving `datasource://` from the directory holding `file`.
fn open_engine(config: EngineConfig, file: &Path) -> Result<(EngineHandle, String)> {
    let file = file
        .canonicalize()
        .with_context(|| format!("resolving {}", file.display()))?;
    let (Some(dir), Some(name)) = (file.parent(), file.file_name()) else {
        bail!("{} is not a file path", file.display());
    };

    let engine = EngineHandle::create_with_config(&AppContext::default(), config)
        .map_err(engine_error)
        .context("creating engine")?;
    engine
        .set_data_source_factory(Arc::new(FileDataSourceFactory::with_root(dir)))
        .map_err(|err| anyhow::anyhow!("{} (code {})", err, err.code()))?;
    engine.init().map_err(engine_error).context("initializing engine")?;

    let uri = format!("{}{}", DATA_SOURCE_PREFIX, name.to_string_lossy());
    Ok((engine, uri))
}

fn engine_error(err: MpvError) -> anyhow::Error {
    anyhow::anyhow!("{} (code {})", err, err.code())
}

fn run_play(config: EngineConfig, file: &Path, direct: bool, timeout: Duration) -> Result<ExitCode> {
    let (engine, uri) = open_engine(config, file)?;
    let target = if direct {
        file.display().to_string()
    } else {
        uri
    };

    let mut events = engine.subscribe();
    engine
        .command(&["loadfile", &target])
        .map_err(engine_error)
        .context("loadfile")?;

    let rt = runtime()?;
    let end = rt.block_on(async { tokio::time::timeout(timeout, print_until_end(&mut events)).await });

    engine.destroy().map_err(engine_error)?;
    match end {
        Ok(Ok(Some(end))) if end.reason == EndFileReason::Eof => Ok(ExitCode::from(0)),
        Ok(Ok(Some(_))) => Ok(ExitCode::from(2)),
        Ok(Ok(None)) => bail!("event stream closed before END_FILE"),
        Ok(Err(err)) => Err(err),
        Err(_) => bail!("no END_FILE within {:?}", timeout),
    }
}

/// Print events as JSON lines up to and including END_FILE.
async fn print_until_end(events: &mut EventSubscription) -> Result<Option<EndFile>> {
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
        if let Event::EndFile(end) = event {
            return Ok(Some(end));
        }
    }
    Ok(None)
}

#[derive(Serialize, Default)]
struct ProbeReport {
    uri: String,
    loaded: bool,
    file_size: Option<i64>,
    bytes_read: i64,
    end_reason: Option<EndFileReason>,
    error: Option<MpvError>,
    thumbnail: Option<(u32, u32)>,
}

fn run_probe(config: EngineConfig, file: &Path, timeout: Duration) -> Result<ExitCode> {
    let (engine, uri) = open_engine(config, file)?;
    let mut events = engine.subscribe();
    engine
        .observe_property("file-size", Format::Int64, FILE_SIZE_TOKEN)
        .map_err(engine_error)?;
    engine
        .observe_property("stream-pos", Format::Int64, STREAM_POS_TOKEN)
        .map_err(engine_error)?;
    engine
        .command(&["loadfile", &uri])
        .map_err(engine_error)
        .context("loadfile")?;

    let mut report = ProbeReport {
        uri,
        ..ProbeReport::default()
    };
    let rt = runtime()?;
    let finished = rt.block_on(async {
        tokio::time::timeout(timeout, async {
            while let Some(event) = events.next().await {
                match event {
                    Event::Basic {
                        id: EventId::FileLoaded,
                        ..
                    } => {
                        report.loaded = true;
                        report.thumbnail = engine
                            .grab_thumbnail(128)
                            .map(|thumb| (thumb.width, thumb.height));
                    }
                    Event::PropertyChange(change) => match (change.token, change.value) {
                        (FILE_SIZE_TOKEN, PropertyValue::Long(size)) => {
                            report.file_size = Some(size)
                        }
                        (STREAM_POS_TOKEN, PropertyValue::Long(pos)) => {
                            report.bytes_read = report.bytes_read.max(pos)
                        }
                        _ => {}
                    },
                    Event::EndFile(end) => {
                        report.end_reason = Some(end.reason);
                        report.error = end.error;
                        return true;
                    }
                    _ => {}
                }
            }
            false
        })
        .await
    });

    engine.destroy().map_err(engine_error)?;
    if !matches!(finished, Ok(true)) {
        bail!("no END_FILE within {:?}", timeout);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(if report.error.is_none() { 0 } else { 2 }))
}

#[derive(Serialize)]
struct CodeEntry {
    code: i32,
    name: String,
    message: String,
}

fn run_codes() -> Result<ExitCode> {
    let entries: Vec<CodeEntry> = MpvError::ALL
        .iter()
        .map(|err| CodeEntry {
            code: err.code(),
            name: format!("{:?}", err),
            message: err.message(),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(ExitCode::from(0))
}
