//! camcanvas CLI
//!
//! Command-line interface for running the camera canvas headless, listing
//! devices and adjusting the stored filters.

use anyhow::Context;
use camcanvas::{
    devices::{find_groups, MediaDevices, TestPatternDevices},
    FileStore, FilterController, FilterField, FilterParameters, PipelineBuilder, RenderConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

/// Device backend for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Backend {
    /// Built-in colour bar cameras
    #[default]
    TestPattern,
    /// Real cameras through the desktop portal and PipeWire
    Pipewire,
}

#[derive(Parser)]
#[command(name = "camcanvas")]
#[command(about = "Live camera canvas with a persistent filter chain")]
#[command(version)]
struct Cli {
    /// Device backend
    #[arg(short, long, value_enum, default_value = "test-pattern", global = true)]
    backend: Backend,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the camera onto the canvas until Ctrl+C
    Run {
        /// Device label to look for
        #[arg(short, long)]
        label: Option<String>,

        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Start with rendering paused
        #[arg(long)]
        paused: bool,

        /// Write the last canvas frame to this PNG file on exit
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// List capture devices grouped by physical device
    Devices {
        /// Only show devices whose label contains this
        #[arg(short, long, default_value = "")]
        label: String,
    },

    /// Show or change the stored filter values
    Filters {
        #[command(subcommand)]
        action: FilterAction,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum FilterAction {
    /// Print current values
    Show,
    /// Set one value (grayscale, blur, brightness, contrast)
    Set { field: FilterField, value: String },
    /// Restore the defaults
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("camcanvas=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            label,
            seconds,
            paused,
            snapshot,
        } => cmd_run(config, cli.backend, label, seconds, paused, snapshot).await,
        Commands::Devices { label } => cmd_devices(cli.backend, &label).await,
        Commands::Filters { action } => cmd_filters(&config, action),
        Commands::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RenderConfig> {
    match path {
        Some(path) => RenderConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(RenderConfig::default()),
    }
}

fn make_devices(backend: Backend) -> anyhow::Result<Arc<dyn MediaDevices>> {
    match backend {
        Backend::TestPattern => Ok(Arc::new(TestPatternDevices::default_rig())),
        #[cfg(feature = "pipewire")]
        Backend::Pipewire => Ok(Arc::new(camcanvas::PipeWireDevices::portal())),
        #[cfg(not(feature = "pipewire"))]
        Backend::Pipewire => {
            anyhow::bail!("camcanvas was built without PipeWire support (enable the `pipewire` feature)")
        }
    }
}

fn open_filters(config: &RenderConfig) -> anyhow::Result<FilterController> {
    let store = match &config.storage_dir {
        Some(dir) => FileStore::open(dir)?,
        None => FileStore::user_default()?,
    };
    println!("Filter storage: {}", store.dir().display());
    Ok(FilterController::open(store)?)
}

fn print_filters(params: &FilterParameters) {
    for field in FilterField::ALL {
        println!("  {:<10} {}", field.name(), params.get(field));
    }
    println!("  filter     {}", params.to_filter_string());
}

async fn cmd_run(
    config: RenderConfig,
    backend: Backend,
    label: Option<String>,
    seconds: Option<u64>,
    paused: bool,
    snapshot: Option<PathBuf>,
) -> anyhow::Result<()> {
    let devices = make_devices(backend)?;
    let pipeline = PipelineBuilder::new()
        .config(config)
        .devices(devices)
        .build()?;

    println!("Configuration:");
    println!("  Label: {}", label.as_deref().unwrap_or(&pipeline.config().media_label));
    println!("  Canvas: {}", pipeline.config().canvas);
    println!("  Refresh: {}", pipeline.config().refresh_rate);
    println!("  Flip X: {}", pipeline.config().flip_x);
    println!();

    if paused {
        pipeline.stop();
    }
    for issue in pipeline.start(label.as_deref()).await? {
        eprintln!("warning: {}", issue);
    }
    if let Some(source) = pipeline.source() {
        println!("Rendering {}", source);
    }
    println!("Commands: play | stop | restart [label] | set <field> <value> | stats | quit");
    println!("Press Ctrl+C to stop.\n");

    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                let mut words = line.split_whitespace();
                match words.next() {
                    Some("play") => pipeline.play(),
                    Some("stop") => pipeline.stop(),
                    Some("restart") => {
                        let label = words.collect::<Vec<_>>().join(" ");
                        let label = (!label.is_empty()).then_some(label);
                        match pipeline.restart(label.as_deref()).await {
                            Ok(issues) => {
                                for issue in issues {
                                    eprintln!("warning: {}", issue);
                                }
                                if let Some(source) = pipeline.source() {
                                    println!("Rendering {}", source);
                                }
                            }
                            Err(e) => eprintln!("restart failed: {}", e),
                        }
                    }
                    Some("set") => {
                        let (Some(field), Some(value)) = (words.next(), words.next()) else {
                            eprintln!("usage: set <field> <value>");
                            continue;
                        };
                        let result = field
                            .parse::<FilterField>()
                            .and_then(|f| pipeline.filters().update_from_str(f, value));
                        match result {
                            Ok(params) => println!("filter {}", params.to_filter_string()),
                            Err(e) => eprintln!("{}", e),
                        }
                    }
                    Some("stats") => print_stats(&pipeline.stats(), pipeline.is_playing()),
                    Some("quit") | Some("exit") => break,
                    Some(other) => eprintln!("unknown command: {}", other),
                    None => {}
                }
            }
        }
    }

    println!("\nStopping...");
    pipeline.shutdown();
    print_stats(&pipeline.stats(), pipeline.is_playing());

    if let Some(path) = snapshot {
        let frame = pipeline.canvas().lock().pixels().clone();
        let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.data)
            .context("canvas buffer has unexpected size")?;
        image
            .save(&path)
            .with_context(|| format!("writing snapshot {}", path.display()))?;
        println!("Snapshot written to {}", path.display());
    }

    Ok(())
}

fn print_stats(stats: &camcanvas::Stats, playing: bool) {
    println!("Statistics:");
    println!("  Playing: {}", if playing { "Yes" } else { "No" });
    println!("  Ticks: {}", stats.ticks);
    println!("  Frames rendered: {}", stats.frames_rendered);
    println!("  Ticks while paused: {}", stats.frames_skipped);
    println!("  Avg render time: {:.2} ms", stats.avg_render_ms);
}

async fn cmd_devices(backend: Backend, label: &str) -> anyhow::Result<()> {
    let devices = make_devices(backend)?.enumerate_devices().await?;
    let groups = find_groups(devices, label);

    if groups.is_empty() {
        println!("No devices match {:?}", label);
        return Ok(());
    }

    for group in groups {
        println!("Group {}", group.group_id);
        for device in &group.devices {
            println!("  [{}] {} ({})", device.kind, device.label, device.id);
        }
    }
    Ok(())
}

fn cmd_filters(config: &RenderConfig, action: FilterAction) -> anyhow::Result<()> {
    let filters = open_filters(config)?;
    let params = match action {
        FilterAction::Show => filters.current(),
        FilterAction::Set { field, value } => filters.update_from_str(field, &value)?,
        FilterAction::Reset => filters.reset()?,
    };
    print_filters(&params);
    Ok(())
}

fn cmd_config(config: &RenderConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
