use std::{io, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use pose_relay::{
    capture::SimulatedCapture,
    config::{Config, DEFAULT_CONFIG_FILE},
    context::TrackerContext,
    error::SettingsError,
    pipeline::{AcquisitionOptions, start_acquisition},
    settings::Settings,
};

#[derive(Parser, Debug)]
#[command(version, about = "Relays tracked eye positions to UDP endpoints")]
struct Args {
    /// Runtime configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Operator settings file; overrides `settings_path` from the config.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Open the discovery listener at start-up.
    #[arg(long)]
    listen: bool,

    /// Write the settings in effect (discovered endpoints included) back on exit.
    #[arg(long)]
    save_on_exit: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config::load_or_default(&args.config);
    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(|| config.settings_path.clone());

    let settings = match Settings::load(&settings_path) {
        Ok(settings) => settings,
        Err(SettingsError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            log::warn!(
                "{} not found, starting with default settings",
                settings_path.display()
            );
            Settings::default()
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to load {}", settings_path.display()));
        }
    };

    let context = TrackerContext::new(settings, args.listen || config.discovery.enabled);
    let capture = SimulatedCapture::start(config.simulator.options())?;
    let acquisition = start_acquisition(
        capture,
        context.clone(),
        AcquisitionOptions {
            wait_timeout: config.acquisition.wait_timeout(),
            send_timeout: config.broadcast.send_timeout(),
        },
    )?;

    let stop = acquisition.stop_signal();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, shutting down");
        stop.stop();
    })
    .context("failed to install Ctrl-C handler")?;

    let frames = acquisition.join();
    log::info!("relayed {frames} frames");

    if args.save_on_exit {
        context
            .current_settings()
            .save(&settings_path)
            .with_context(|| format!("failed to save {}", settings_path.display()))?;
        log::info!("settings saved to {}", settings_path.display());
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}
