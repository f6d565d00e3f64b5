// SPDX-License-Identifier: GPL-3.0-only
//! `mbctl`: command line front end for the three brightness backends

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use mon_brightness::config::{self, Config};
use mon_brightness::{Handle, entry, platform};

#[macro_use]
extern crate tracing;

#[derive(Parser)]
#[command(name = "mbctl")]
#[command(about = "Display brightness control over DXVA2, WMI and the LCD driver")]
struct Cli {
    /// JSON config file, defaults to <config dir>/mon-brightness/config.json
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the library version
    Version,
    /// External monitors over DXVA2 monitor configuration
    Dxva2 {
        #[command(subcommand)]
        command: Dxva2Command,
    },
    /// Internal panel through WmiMonitorBrightnessMethods
    Wmi {
        #[command(subcommand)]
        command: WmiCommand,
    },
    /// Legacy internal panel through the LCD driver
    Ioctl {
        #[command(subcommand)]
        command: IoctlCommand,
    },
}

#[derive(Subcommand)]
enum Dxva2Command {
    /// List controllable monitors with their current brightness
    List {
        #[arg(long)]
        json: bool,
    },
    /// Current brightness of one monitor, 0.0 to 1.0
    Get { index: usize },
    /// Set brightness of one monitor, 0.0 to 1.0
    Set { index: usize, fraction: f64 },
}

#[derive(Subcommand)]
enum WmiCommand {
    /// Set panel brightness in percent and print the method's return code
    Set {
        level: u8,
        /// Transition time in seconds
        #[arg(short, long, default_value_t = 0)]
        timeout: u32,
    },
}

#[derive(Subcommand)]
enum IoctlCommand {
    /// Print AC and DC brightness in percent
    Get,
    /// Set AC and DC brightness in percent
    Set { ac: u32, dc: u32 },
}

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=warn",
        env!("CARGO_CRATE_NAME")
    )));

    #[cfg(target_os = "linux")]
    let journal_layer = tracing_journald::layer().ok();
    #[cfg(not(target_os = "linux"))]
    let journal_layer: Option<tracing_subscriber::layer::Identity> = None;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(journal_layer)
        .init();
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mon-brightness").join("config.json"))
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }

    match default_config_path() {
        Some(path) if path.exists() => Config::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        _ => {
            debug!("no config file, using defaults");
            Ok(Config::default())
        }
    }
}

/// Handle that is cleaned up when it goes out of scope
struct Opened {
    handle: Handle,
    cleanup: fn(Handle) -> mon_brightness::Result<()>,
}

impl Drop for Opened {
    fn drop(&mut self) {
        if let Err(e) = (self.cleanup)(self.handle) {
            warn!("cleanup failed: {}", e);
        }
    }
}

fn run_dxva2(command: Dxva2Command) -> Result<()> {
    let api = platform::system_monitor_api()?;
    let opened = Opened {
        handle: entry::dxva2_init(api).context("failed to enumerate monitors")?,
        cleanup: entry::dxva2_cleanup,
    };
    let handle = opened.handle;

    match command {
        Dxva2Command::List { json } => {
            let count = entry::dxva2_get_count(handle)?;
            if count == 0 && !json {
                println!("{}", mon_brightness::last_error::message());
                return Ok(());
            }

            let mut monitors = Vec::with_capacity(count);
            for index in 0..count {
                let name = String::from_utf16_lossy(&entry::dxva2_get_name(handle, index)?);
                let brightness = entry::dxva2_get_brightness(handle, index).ok();
                monitors.push((index, name, brightness));
            }

            if json {
                let list: Vec<_> = monitors
                    .iter()
                    .map(|(index, name, brightness)| {
                        json!({ "index": index, "name": name, "brightness": brightness })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                for (index, name, brightness) in monitors {
                    match brightness {
                        Some(fraction) => println!("{index}: {name} {fraction:.2}"),
                        None => println!("{index}: {name} -"),
                    }
                }
            }
        }
        Dxva2Command::Get { index } => {
            let fraction = entry::dxva2_get_brightness(handle, index)
                .with_context(|| format!("failed to read brightness of monitor {index}"))?;
            println!("{fraction:.2}");
        }
        Dxva2Command::Set { index, fraction } => {
            entry::dxva2_set_brightness(handle, index, fraction)
                .with_context(|| format!("failed to set brightness of monitor {index}"))?;
        }
    }
    Ok(())
}

fn run_wmi(command: WmiCommand, config: &Config) -> Result<()> {
    let instrumentation = platform::system_instrumentation()?;
    let opened = Opened {
        handle: entry::wmi_init(instrumentation, config)
            .context("failed to connect to the brightness method")?,
        cleanup: entry::wmi_cleanup,
    };

    match command {
        WmiCommand::Set { level, timeout } => {
            let code = entry::wmi_set_brightness(opened.handle, timeout, level)
                .context("failed to invoke the brightness method")?;
            println!("{code}");
        }
    }
    Ok(())
}

fn run_ioctl(command: IoctlCommand, config: &Config) -> Result<()> {
    let opener = platform::system_driver_opener()?;
    let opened = Opened {
        handle: entry::ioctl_init(opener.as_ref(), config)
            .with_context(|| format!("failed to open {}", config.lcd_device_path))?,
        cleanup: entry::ioctl_cleanup,
    };

    match command {
        IoctlCommand::Get => {
            let (ac, dc) = entry::ioctl_get_brightness(opened.handle)?;
            println!("ac {ac} dc {dc}");
        }
        IoctlCommand::Set { ac, dc } => {
            entry::ioctl_set_brightness(opened.handle, ac, dc)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    setup_logs();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    config::replace(config.clone());

    match cli.command {
        Commands::Version => {
            println!("{}", mon_brightness::VERSION);
            Ok(())
        }
        Commands::Dxva2 { command } => run_dxva2(command),
        Commands::Wmi { command } => run_wmi(command, &config),
        Commands::Ioctl { command } => run_ioctl(command, &config),
    }
}
