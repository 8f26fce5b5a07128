use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use exportdash::loader::{DataSource, DatasetLoader};
use exportdash::parser::{parse_controls, Controls};
use exportdash::views::{Dispatcher, ViewId};
use exportdash::{render, DashboardConfig, DashboardError, OutputFormat};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Png,
}

#[derive(Parser, Debug)]
#[command(name = "exportdash")]
#[command(about = "Explore export records through a fixed set of dashboard views", long_about = None)]
struct Args {
    /// View label (e.g. 'Mapa Interactivo') or slug (e.g. 'mapa'). Defaults to the summary.
    view: Option<String>,

    /// Dataset URL or local .xlsx/.csv path
    #[arg(long)]
    source: Option<String>,

    /// Secondary controls, e.g. 'country: "Perú", modes: ["Aéreo"]'
    #[arg(long)]
    controls: Option<String>,

    #[arg(long, value_enum)]
    format: Option<Format>,

    /// Panel to render with --format png
    #[arg(long, default_value_t = 0)]
    chart: usize,

    /// HTTP timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// JSON settings file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the available views and exit
    #[arg(long)]
    list_views: bool,

    /// Print the control option lists and exit
    #[arg(long)]
    options: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if args.list_views {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        for view in ViewId::ALL {
            writeln!(handle, "{:<14} {}", view.slug(), view.label()).context("Failed to write to stdout")?;
        }
        return Ok(());
    }

    let config = load_config(&args)?;
    let controls = match &args.controls {
        Some(text) => read_controls(text)?,
        None => Controls::default(),
    };
    debug!(?controls, "controls parsed");

    let loader = DatasetLoader::new(config.source.clone(), config.timeout());
    let table = loader
        .load()
        .with_context(|| format!("Failed to load dataset from {}", loader.source()))?;
    let dispatcher = Dispatcher::new(table, config.clone());

    let stdout = io::stdout();
    let mut handle = stdout.lock();

    if args.options {
        let options = dispatcher.options().context("Failed to list control options")?;
        serde_json::to_writer_pretty(&mut handle, &options).context("Failed to write options")?;
        writeln!(handle).context("Failed to write to stdout")?;
        return Ok(());
    }

    let view = args.view.as_deref().unwrap_or(ViewId::Summary.slug());
    let output = dispatcher
        .dispatch(view, &controls)
        .with_context(|| format!("Failed to build view '{}'", view))?;

    match config.format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut handle, &output).context("Failed to write view")?;
            writeln!(handle).context("Failed to write to stdout")?;
        }
        OutputFormat::Png => {
            let panel = output
                .panels
                .get(args.chart)
                .with_context(|| format!("View '{}' has {} panels", output.view, output.panels.len()))?;
            let spec = panel
                .chart()
                .with_context(|| format!("Panel {} of '{}' has no data", args.chart, output.view))?;
            let png = render::render_png(spec, config.width, config.height).context("Failed to render chart")?;
            handle.write_all(&png).context("Failed to write PNG to stdout")?;
        }
    }
    handle.flush().context("Failed to flush stdout")?;

    Ok(())
}

fn load_config(args: &Args) -> Result<DashboardConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => DashboardConfig::default(),
    };

    if let Some(source) = &args.source {
        config.source = DataSource::parse(source);
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(format) = args.format {
        config.format = match format {
            Format::Json => OutputFormat::Json,
            Format::Png => OutputFormat::Png,
        };
    }
    Ok(config)
}

fn read_controls(text: &str) -> Result<Controls> {
    match parse_controls(text) {
        Ok((_, controls)) => Ok(controls),
        Err(e) => Err(DashboardError::Controls(format!("{}", e))).context("Failed to parse --controls"),
    }
}
