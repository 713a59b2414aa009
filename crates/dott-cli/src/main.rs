//! OpenDOTT CLI
//!
//! Host-side simulator for the OpenDOTT transfer core: streams images through
//! the GATT adapter exactly as a phone would, and inspects stored images.

mod config;
mod device;
mod progress;

use clap::{Parser, Subcommand, ValueEnum};
use dott_core::gatt::Characteristic;
use dott_core::protocol::{Command, TRIGGER_BYTES};
use dott_core::storage::BlobStore;
use dott_core::{
    GattServer, ImageFormat, PeerId, SessionManager, TransferMode, TransferState, runtime,
    validate,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use config::{Config, LoggingConfig, MAX_CHUNK_SIZE};
use device::{ConsoleSink, build_manager};
use progress::{TransferProgress, format_bytes, format_duration, format_speed};

/// Address the simulated central connects from
const SIMULATOR_PEER: PeerId = PeerId([0x02, 0x00, 0x00, 0xD0, 0x77, 0x01]);

/// OpenDOTT - validated image transfer for the DOTT wearable display
#[derive(Parser)]
#[command(name = "opendott")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload an image through a simulated BLE link
    Upload {
        /// Image file to upload
        #[arg(required = true)]
        file: PathBuf,

        /// Protocol variant
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Bytes per data write
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Only send the first N bytes of the file
        #[arg(long)]
        truncate: Option<usize>,

        /// Drop the link after N data writes
        #[arg(long)]
        disconnect_after: Option<usize>,
    },

    /// Detect and validate an image file
    Inspect {
        /// Image file to inspect
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Re-validate and display the stored image
    Show,

    /// Print the device information characteristic
    Info,

    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Start command with a declared byte count
    Declared,
    /// Trigger, then complete after inactivity
    OpenEnded,
}

impl From<ModeArg> for TransferMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Declared => Self::Declared,
            ModeArg::OpenEnded => Self::OpenEnded,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    init_logging(cli.verbose, &config.logging)?;

    config.validate()?;

    match cli.command {
        Commands::Upload {
            file,
            mode,
            chunk_size,
            truncate,
            disconnect_after,
        } => {
            let options = UploadOptions {
                mode: mode.map_or(config.transfer.mode, TransferMode::from),
                chunk_size: chunk_size.unwrap_or(config.transfer.chunk_size),
                truncate,
                disconnect_after,
            };
            upload(&file, options, &config).await?;
        }
        Commands::Inspect { file } => inspect(&file)?,
        Commands::Show => show(&config)?,
        Commands::Info => info(&config)?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn init_logging(verbose: bool, logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }
    Ok(())
}

struct UploadOptions {
    mode: TransferMode,
    chunk_size: usize,
    truncate: Option<usize>,
    disconnect_after: Option<usize>,
}

/// Stream a file through the GATT adapter into a live event loop
async fn upload(file: &Path, options: UploadOptions, config: &Config) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    if options.chunk_size == 0 || options.chunk_size > MAX_CHUNK_SIZE {
        anyhow::bail!(
            "Chunk size must be between 1 and {} bytes",
            MAX_CHUNK_SIZE
        );
    }

    let mut data = std::fs::read(file)?;
    if let Some(limit) = options.truncate {
        data.truncate(limit);
    }
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");

    println!("File: {}", file.display());
    println!("Size: {}", format_bytes(data.len() as u64));
    println!("Mode: {}", options.mode);
    println!("Chunk size: {} bytes", options.chunk_size);

    let mut transfer = config.to_transfer_config();
    transfer.mode = options.mode;

    let sink = ConsoleSink::default();
    let progress = TransferProgress::new(data.len() as u64, filename);
    let mut manager = build_manager(transfer, &config.storage, sink.clone())?;
    manager.set_progress_listener(Box::new(progress.clone()));

    let (handle, task) = runtime::spawn(manager);
    let server = GattServer::new(handle);
    let started = Instant::now();

    server.connect(SIMULATOR_PEER).await?;
    let data_characteristic = match options.mode {
        TransferMode::Declared => {
            let size = u32::try_from(data.len())?;
            server
                .write(Characteristic::Control, &Command::Start { size }.encode())
                .await?;
            Characteristic::ImageData
        }
        TransferMode::OpenEnded => {
            server.write(Characteristic::Trigger, &TRIGGER_BYTES).await?;
            Characteristic::Data
        }
    };
    let generation = server.handle().current_generation();

    for (index, chunk) in data.chunks(options.chunk_size).enumerate() {
        if options.disconnect_after == Some(index) {
            tracing::info!("Dropping link after {} writes", index);
            server.disconnect(SIMULATOR_PEER).await?;
            break;
        }
        server.write(data_characteristic, chunk).await?;
    }

    if options.mode == TransferMode::OpenEnded {
        println!(
            "Waiting {} ms for inactivity timeout...",
            config.transfer.inactivity_timeout_ms
        );
    }
    server
        .handle()
        .wait_for(|s| s.generation >= generation && s.state == TransferState::Idle)
        .await?;
    let elapsed = started.elapsed();

    drop(server);
    let manager = task.await?;
    let stats = manager.stats();

    if stats.sessions_completed > 0 {
        progress.finish_with_message(format!("Uploaded: {filename}"));
        println!();
        println!("Result: Transfer Complete");
        println!("Stored: {}", config.storage.dir.join(&config.transfer.image_name).display());
    } else {
        progress.abandon_with_message(format!("Failed: {filename}"));
        println!();
        println!("Result: Transfer Fail");
    }

    let secs = elapsed.as_secs_f64();
    println!("Elapsed: {}", format_duration(elapsed));
    if secs > 0.0 {
        println!("Speed: {}", format_speed(stats.bytes_received as f64 / secs));
    }
    println!(
        "Notifications: {}",
        sink.sent()
            .iter()
            .map(device::Notification::render)
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}

/// Run detection and validation over a local file
fn inspect(file: &Path) -> anyhow::Result<()> {
    let data = std::fs::read(file)?;
    let outcome = validate(&data);

    println!("File: {}", file.display());
    println!("Size: {} ({} bytes)", format_bytes(data.len() as u64), data.len());
    println!("Magic: {}", dott_core::format::magic_hex(&data));
    println!("Format: {}", outcome.format);
    if outcome.format != ImageFormat::Unknown {
        println!("Dimensions: {}x{}", outcome.width, outcome.height);
    }
    match outcome.trailer_present {
        Some(true) => println!("Trailer: present"),
        Some(false) => println!("Trailer: missing (may be truncated)"),
        None => {}
    }
    match &outcome.reason {
        None => println!("Valid: yes"),
        Some(reason) => println!("Valid: no ({}: {})", reason.category(), reason),
    }

    Ok(())
}

fn open_device(config: &Config) -> anyhow::Result<SessionManager> {
    build_manager(config.to_transfer_config(), &config.storage, ConsoleSink::quiet())
}

/// Restore the stored image as at boot
fn show(config: &Config) -> anyhow::Result<()> {
    let mut manager = open_device(config)?;
    let name = &config.transfer.image_name;

    println!("Image: {}", config.storage.dir.join(name).display());
    if !manager.store().exists(name) {
        println!("No image stored");
        return Ok(());
    }

    match manager.restore_last_image() {
        Some(frame) => println!("Displayed: {} {}x{}", frame.format, frame.width, frame.height),
        None => println!("Stored image could not be displayed (see log)"),
    }
    Ok(())
}

/// Print the device information characteristic
fn info(config: &Config) -> anyhow::Result<()> {
    let manager = open_device(config)?;
    let info = manager.device_info();

    println!("OpenDOTT Device");
    println!(
        "Firmware: {}.{}.{}",
        info.version_major, info.version_minor, info.version_patch
    );
    println!("Battery: {}%", info.battery);
    println!("Free space: {}", format_bytes(u64::from(info.free_space)));
    println!("Mode: {}", manager.config().mode);
    println!(
        "Service: {}",
        Characteristic::service_uuid(manager.config().mode)
    );
    println!("Raw: {}", hex::encode(info.encode()));
    Ok(())
}
