use anyhow::{bail, Context, Result};
use photobooth::config::BoothConfig;
use photobooth::joystick::JoystickController;
use photobooth::kiosk::{BoothBackend, KioskApp, KioskFeed, KioskTimings, Mailbox, SessionController};
use photobooth::printer::{list_printers, vendor_name, PrintSink};
use photobooth::server::{self, AppState};
use photobooth::timing::StopSignal;
use photobooth::types::CaptureKind;
use photobooth::workflow::{Booth, CaptureOptions};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const USAGE: &str = "\
Usage: photobooth <command> [args]

Commands:
  serve [--config PATH]                  Web control page and API
  kiosk [--config PATH]                  Fullscreen kiosk display with web API
  capture [--strip] [--countdown N] [--photos N] [--no-print] [--config PATH]
  print-test [MESSAGE] [--config PATH]   Print a test page
  list-printers                          Find USB thermal printers
  init-config [PATH]                     Write a default config file";

fn main() -> Result<()> {
    photobooth::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }

    let command = &args[1];
    let rest = &args[2..];
    match command.as_str() {
        "serve" => cmd_serve(rest),
        "kiosk" => cmd_kiosk(rest),
        "capture" => cmd_capture(rest),
        "print-test" => cmd_print_test(rest),
        "list-printers" => cmd_list_printers(),
        "init-config" => cmd_init_config(rest),
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}\n\n{USAGE}", command);
            std::process::exit(1);
        }
    }
}

/// Parsed `--config` plus whatever else was on the line.
struct Args {
    config: Option<PathBuf>,
    flags: Vec<String>,
    values: Vec<(String, String)>,
    positional: Vec<String>,
}

impl Args {
    fn parse(args: &[String], valued: &[&str]) -> Result<Self> {
        let mut parsed = Args {
            config: None,
            flags: Vec::new(),
            values: Vec::new(),
            positional: Vec::new(),
        };

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            if arg == "--config" || valued.contains(&arg) {
                i += 1;
                let value = args
                    .get(i)
                    .with_context(|| format!("{arg} needs a value"))?
                    .clone();
                if arg == "--config" {
                    parsed.config = Some(PathBuf::from(value));
                } else {
                    parsed.values.push((arg.to_string(), value));
                }
            } else if arg.starts_with("--") {
                parsed.flags.push(arg.to_string());
            } else {
                parsed.positional.push(arg.to_string());
            }
            i += 1;
        }
        Ok(parsed)
    }

    fn has(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    fn value<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match self.values.iter().rev().find(|(n, _)| n == name) {
            Some((_, raw)) => raw
                .parse()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("invalid {name} {raw:?}: {e}")),
            None => Ok(None),
        }
    }

    fn load_config(&self) -> Result<BoothConfig> {
        let path = self.config.clone().unwrap_or_else(BoothConfig::default_path);
        Ok(BoothConfig::load_from_file(path)?)
    }
}

fn start_joystick<F>(config: &BoothConfig, on_press: F) -> Option<JoystickController>
where
    F: Fn(CaptureKind) + Send + 'static,
{
    if !config.joystick.enabled {
        log::info!("Joystick disabled in config");
        return None;
    }
    match JoystickController::start_default(&config.joystick, on_press) {
        Ok(joystick) => Some(joystick),
        Err(e) => {
            log::warn!("Joystick not available: {}", e);
            None
        }
    }
}

/// Ctrl-C flips the returned channel to `true`.
fn shutdown_channel() -> Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        log::info!("Shutting down...");
        let _ = tx.send(true);
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(rx)
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

fn shutdown_devices(booth: &Booth, joystick: Option<JoystickController>) {
    if let Some(joystick) = joystick {
        joystick.stop();
    }
    if let Some(source) = booth.frame_source() {
        source.stop();
    }
}

fn cmd_serve(args: &[String]) -> Result<()> {
    let args = Args::parse(args, &[])?;
    let config = args.load_config()?;
    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;

    let booth = Booth::open(config.clone());
    let joystick = start_joystick(&config, {
        let booth = booth.clone();
        move |kind| {
            if let Err(e) = booth.start_capture(kind) {
                log::info!("Button press ignored: {}", e);
            }
        }
    });
    if let Some(joystick) = &joystick {
        booth.attach_joystick(joystick.connected_flag());
    }

    let shutdown = shutdown_channel()?;
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(server::serve(
        AppState::new(booth.clone()),
        bind,
        wait_for_shutdown(shutdown),
    ));

    shutdown_devices(&booth, joystick);
    result
}

fn cmd_kiosk(args: &[String]) -> Result<()> {
    let args = Args::parse(args, &[])?;
    let config = args.load_config()?;
    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;

    let booth = Booth::open(config.clone());
    let capture = booth
        .capture_service()
        .cloned()
        .context("Kiosk mode needs a camera")?;

    let mailbox = Mailbox::new();
    let feed = KioskFeed::new(mailbox.clone());
    let joystick = start_joystick(&config, {
        let mailbox = mailbox.clone();
        move |kind| mailbox.post(kind)
    });
    if let Some(joystick) = &joystick {
        booth.attach_joystick(joystick.connected_flag());
    }

    let backend = BoothBackend::new(
        capture.clone(),
        booth.printer().clone(),
        config.thermal.clone(),
        config.strip.spacing_px,
    );
    let controller = SessionController::new(
        KioskTimings::from_config(&config.kiosk, &config.strip),
        mailbox,
        booth.gate().clone(),
        backend,
        Instant::now(),
    );
    let mut app = KioskApp::new(controller, capture.frame_source().clone(), feed.clone(), &config.kiosk);

    let shutdown = shutdown_channel()?;
    let stop = Arc::new(StopSignal::new());
    let runtime = tokio::runtime::Runtime::new()?;
    let server_task = runtime.spawn(server::serve(
        AppState::new(booth.clone()).with_kiosk(feed),
        bind,
        wait_for_shutdown(shutdown.clone()),
    ));
    runtime.spawn({
        let stop = stop.clone();
        async move {
            wait_for_shutdown(shutdown).await;
            stop.stop();
        }
    });

    println!("Photobooth kiosk: open http://{bind}/kiosk fullscreen. Ctrl-C to exit.");
    app.run(&stop);

    shutdown_devices(&booth, joystick);
    runtime.block_on(server_task)?
}

fn cmd_capture(args: &[String]) -> Result<()> {
    let args = Args::parse(args, &["--countdown", "--photos"])?;
    let config = args.load_config()?;
    let kind = if args.has("--strip") {
        CaptureKind::Strip
    } else {
        CaptureKind::Single
    };

    let booth = Booth::open(config);
    let defaults = booth.default_options(kind);
    let options = CaptureOptions {
        countdown: args
            .value::<u64>("--countdown")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.countdown),
        shots: args.value("--photos")?.unwrap_or(defaults.shots),
        gap: defaults.gap,
        print: !args.has("--no-print"),
    };
    if options.shots == 0 {
        bail!("--photos must be at least 1");
    }

    let run = booth
        .start_capture_with(kind, options)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut updates = run.updates();
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    runtime.block_on(async {
        while updates.changed().await.is_ok() {
            println!("{}", updates.borrow_and_update().message);
        }
    });

    let result = run.join();
    if let Some(source) = booth.frame_source() {
        source.stop();
    }
    match result {
        Some(path) => {
            println!("Saved {}", path.display());
            Ok(())
        }
        None => bail!("Capture failed"),
    }
}

fn cmd_print_test(args: &[String]) -> Result<()> {
    let args = Args::parse(args, &[])?;
    let config = args.load_config()?;
    let message = if args.positional.is_empty() {
        "Printer test OK!".to_string()
    } else {
        args.positional.join(" ")
    };

    let printer = PrintSink::new(&config.printer);
    if !printer.print_message(&message) {
        bail!("Printing failed, see log for details");
    }
    println!("Test page sent");
    Ok(())
}

fn cmd_list_printers() -> Result<()> {
    let printers = list_printers();
    if printers.is_empty() {
        println!("No USB thermal printers found");
    }
    for p in printers {
        println!(
            "{:04x}:{:04x}  {} {}{}",
            p.vendor_id,
            p.product_id,
            p.manufacturer,
            p.product,
            vendor_name(p.vendor_id)
                .map(|v| format!(" ({v})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_init_config(args: &[String]) -> Result<()> {
    let path = args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(BoothConfig::default_path);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    BoothConfig::default().save_to_file(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
