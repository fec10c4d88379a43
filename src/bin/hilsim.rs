use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use hilsim::bus::{BusHub, BusKind, TimeDriver};
use hilsim::config::{ConnectionKind, SimConfig, SimulatorConfig};
use hilsim::model::HardwareModel;
use hilsim::telemetry::{write_json_lines, FrameCapture};
use hilsim::terminal::{Terminal, TerminalOutput};
use hilsim::SimError;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TERMINAL_POLL_MS: u64 = 100;
const CAPTURE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("hilsim")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("Hardware-in-the-loop peripheral simulator")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("log-level")
                .short("l")
                .long("log-level")
                .value_name("FILTER")
                .help("Log filter, overrides RUST_LOG (e.g. info, hilsim=debug)")
                .takes_value(true)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run every active simulator in a configuration file")
                .arg(
                    Arg::with_name("file")
                        .short("f")
                        .long("file")
                        .value_name("FILE")
                        .help("Simulator configuration (JSON)")
                        .takes_value(true)
                        .required(true),
                )
                .arg(
                    Arg::with_name("terminal")
                        .short("t")
                        .long("terminal")
                        .help("Attach an operator terminal to stdin"),
                )
                .arg(
                    Arg::with_name("capture")
                        .short("c")
                        .long("capture")
                        .value_name("FILE")
                        .help("Write every streamed frame to FILE as JSON lines")
                        .takes_value(true),
                ),
        )
        .subcommand(SubCommand::with_name("plugins").about("List the registered data providers and hardware models"))
        .get_matches();

    init_logging(matches.value_of("log-level"));

    match matches.subcommand() {
        ("run", Some(sub_matches)) => run(sub_matches).await,
        ("plugins", Some(_)) => {
            list_plugins();
            Ok(())
        }
        _ => Ok(()),
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn list_plugins() {
    let plugins = hilsim::plugins::global();
    println!("{}", "Data providers".bold());
    for key in plugins.providers().keys() {
        println!("  {}", key.bright_cyan());
    }
    println!("{}", "Hardware models".bold());
    for key in plugins.models().keys() {
        println!("  {}", key.bright_cyan());
    }
}

async fn run(matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let path = matches.value_of("file").unwrap_or_default();
    let config = SimConfig::load(path)?;
    info!("loaded {} simulators from {}", config.simulators.len(), path);

    let hub = Arc::new(BusHub::new(config.common.clone()));
    let capture = matches.value_of("capture").map(|_| Arc::new(FrameCapture::new()));
    let capture_task = match (&capture, matches.value_of("capture")) {
        (Some(capture), Some(capture_path)) => {
            let file = tokio::fs::File::create(capture_path).await?;
            let rx = capture.subscribe();
            Some(tokio::spawn(write_json_lines(rx, tokio::io::BufWriter::new(file))))
        }
        _ => None,
    };

    let models: Vec<Arc<dyn HardwareModel>> = hilsim::plugins::global().start_simulators(&config, &hub, capture.as_ref());
    for model in &models {
        println!("{} {} ({})", "▶".green(), model.name().bright_green(), model.model_type());
    }
    let active = config.active_simulators().count();
    if models.is_empty() && active > 0 {
        return Err(SimError::Config(format!("none of the {active} active simulators in {path} started")).into());
    }
    if active == 0 {
        warn!("no active simulators in {}", path);
    } else if models.len() < active {
        warn!("{} of {} active simulators started", models.len(), active);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = TimeDriver::new(hub.time(), &config.common);
    let driver_shutdown = shutdown_rx.clone();
    let driver_task = tokio::spawn(async move { driver.run(driver_shutdown).await });

    if matches.is_present("terminal") {
        start_terminal(&hub, config.active_simulators().next(), shutdown_tx.clone());
    }

    let mut quit_rx = shutdown_rx;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for Ctrl+C: {}", e);
            }
        }
        _ = quit_rx.changed() => {}
    }

    println!("{}", "Shutting down simulators".yellow());
    let _ = shutdown_tx.send(true);
    for model in &models {
        model.stop();
    }
    if let Err(e) = driver_task.await {
        error!("time driver task failed: {}", e);
    }
    drop(models);
    drop(capture);

    if let Some(task) = capture_task {
        match time::timeout(CAPTURE_FLUSH_TIMEOUT, task).await {
            Ok(Ok(Ok(frames))) => info!("{} frames captured", frames),
            Ok(Ok(Err(e))) => error!("frame capture failed: {}", e),
            Ok(Err(e)) => error!("frame capture task failed: {}", e),
            Err(_) => warn!("frame capture did not finish in time"),
        }
    }
    Ok(())
}

/// Command node of the first active simulator, the terminal's initial target.
fn default_target(simulator: Option<&SimulatorConfig>) -> (String, String) {
    let Some(simulator) = simulator else {
        return ("command".to_string(), String::new());
    };
    match simulator.connection(ConnectionKind::Command) {
        Some(connection) => (
            connection.bus_name.clone(),
            connection
                .node_name
                .clone()
                .unwrap_or_else(|| format!("{}-command", simulator.name)),
        ),
        None => ("command".to_string(), format!("{}-command", simulator.name)),
    }
}

fn start_terminal(hub: &Arc<BusHub>, first: Option<&SimulatorConfig>, shutdown: watch::Sender<bool>) {
    let (bus, target) = default_target(first);
    let mut terminal = Terminal::new(Arc::clone(hub), BusKind::Command, &bus, &target);
    if let Err(e) = terminal.reset_bus_connection() {
        println!("{} {}", "Not connected:".red(), e);
    }
    let terminal = Arc::new(Mutex::new(terminal));

    // stdin blocks, so it gets its own thread rather than a runtime worker.
    let input = Arc::clone(&terminal);
    std::thread::spawn(move || {
        println!("This is the simulator terminal program. Type 'HELP' for help.");
        print_prompt(&input);
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let output = input.lock().unwrap_or_else(PoisonError::into_inner).process_line(&line);
            match output {
                TerminalOutput::Continue(text) if text.starts_with("Error") => println!("{}", text.red()),
                TerminalOutput::Continue(text) if !text.is_empty() => println!("{}", text),
                TerminalOutput::Continue(_) => {}
                TerminalOutput::Quit => break,
            }
            print_prompt(&input);
        }
        println!("SimTerminal is quitting!");
        let _ = shutdown.send(true);
    });

    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_millis(TERMINAL_POLL_MS));
        loop {
            interval.tick().await;
            let unsolicited = terminal.lock().unwrap_or_else(PoisonError::into_inner).poll_unsolicited();
            if let Some(text) = unsolicited {
                println!("{}", text.bright_blue());
            }
        }
    });
}

fn print_prompt(terminal: &Mutex<Terminal>) {
    let prompt = terminal.lock().unwrap_or_else(PoisonError::into_inner).prompt();
    print!("{}", prompt.bold());
    let _ = std::io::stdout().flush();
}
