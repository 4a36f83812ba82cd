//! # Motor Bench Console
//! Operator front-end for the motor/propeller test bench.
//!
//! ## Flow
//! - Load `Settings` from TOML (defaults if the file is missing).
//! - Build the coordinator: verified autopilot link or UDP datagram link,
//!   plus the telemetry receiver. A failed handshake drops to telemetry-only.
//! - A pump thread pulls the freshest frame every 100 ms so recording sees it.
//! - The menu drives motor selection, throttle, pulses, continuous mode and
//!   recording until quit.
//!
//! ## Logging
//! `RUST_LOG=info` (or `debug`) for link and telemetry diagnostics.

use clap::Parser;
use motor_bench::{
    BenchError, Coordinator, Settings,
    config::TransportKind,
    telemetry::TelemetryFrame,
};
use parking_lot::Mutex;
use std::{
    io::{Write, stdin, stdout},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use log::{error, info, warn};

const PUMP_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_PULSE_MS: u64 = 1000;

#[derive(Parser, Debug)]
#[command(name = "motor_bench", about = "Motor test bench console")]
struct Args {
    /// Settings file (TOML)
    #[arg(long, default_value = "motor_bench.toml")]
    config: PathBuf,

    /// Override the configured command transport
    #[arg(long, value_parser = parse_transport)]
    transport: Option<TransportKind>,

    /// Skip the command link entirely
    #[arg(long)]
    telemetry_only: bool,

    /// Write the effective settings back to --config and continue
    #[arg(long)]
    save_config: bool,
}

fn parse_transport(s: &str) -> Result<TransportKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "verified" | "serial" | "mavlink" => Ok(TransportKind::Verified),
        "datagram" | "udp" => Ok(TransportKind::Datagram),
        other => Err(format!("unknown transport '{}' (verified|datagram)", other)),
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut settings = Settings::load_or_default(&args.config);
    if let Some(transport) = args.transport {
        settings.transport = transport;
    }
    if args.save_config {
        match settings.save(&args.config) {
            Ok(()) => info!("[Main] settings saved to {}", args.config.display()),
            Err(e) => warn!("[Main] could not save settings: {}", e),
        }
    }

    let coordinator = match connect(settings, args.telemetry_only) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("[Main] startup failed: {}", e);
            eprintln!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    match coordinator.telemetry_addr() {
        Ok(addr) => println!("Telemetry listening on {}", addr),
        Err(e) => warn!("[Main] telemetry address unavailable: {}", e),
    }

    let last_frame: Arc<Mutex<Option<TelemetryFrame>>> = Arc::new(Mutex::new(None));
    let running = Arc::new(AtomicBool::new(true));
    let pump = spawn_pump(coordinator.clone(), last_frame.clone(), running.clone());

    run_console(&coordinator, &last_frame);

    running.store(false, Ordering::Release);
    if let Some(pump) = pump {
        let _ = pump.join();
    }
    coordinator.shutdown();
    println!("Exiting. Goodbye!");
}

/// Falls back to telemetry-only when the command link cannot be established.
fn connect(settings: Settings, telemetry_only: bool) -> Result<Coordinator, BenchError> {
    if telemetry_only {
        return Coordinator::telemetry_only(settings);
    }
    match Coordinator::new(settings.clone()) {
        Ok(c) => Ok(c),
        Err(BenchError::Link(e)) => {
            warn!("[Main] command link unavailable ({}), telemetry only", e);
            println!("Command link unavailable: {}", e);
            Coordinator::telemetry_only(settings)
        }
        Err(e) => Err(e),
    }
}

fn spawn_pump(
    coordinator: Arc<Coordinator>,
    last_frame: Arc<Mutex<Option<TelemetryFrame>>>,
    running: Arc<AtomicBool>,
) -> Option<thread::JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("frame-pump".into())
        .spawn(move || {
            while running.load(Ordering::Acquire) {
                if let Some(frame) = coordinator.latest_frame() {
                    *last_frame.lock() = Some(frame);
                }
                thread::sleep(PUMP_INTERVAL);
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("[Main] frame pump not started: {}", e);
            None
        }
    }
}

fn run_console(coordinator: &Coordinator, last_frame: &Mutex<Option<TelemetryFrame>>) {
    loop {
        // stdin closed
        let Some(choice) = prompt_menu(coordinator) else {
            break;
        };
        let result = match choice.as_str() {
            "1" => select_motor(coordinator),
            "2" => set_throttle(coordinator),
            "3" => pulse(coordinator),
            "4" => coordinator.start_continuous(),
            "5" => coordinator.stop_all(),
            "6" => toggle_recording(coordinator),
            "7" => {
                show_telemetry(coordinator, last_frame);
                Ok(())
            }
            "q" | "Q" | "8" => break,
            "" => Ok(()),
            other => {
                println!("Unrecognized option '{}', please try again.", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("Error: {}", e);
        }
    }
}

fn prompt_menu(coordinator: &Coordinator) -> Option<String> {
    let link = match coordinator.link_snapshot() {
        Some(s) if s.connected => if s.armed { "ARMED" } else { "connected" },
        Some(_) => "no heartbeat",
        None => "none",
    };
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│  MOTOR BENCH                                │");
    println!(
        "│  motor M{}  throttle {:>5.1}%  cont {:<3}      │",
        coordinator.selected_channel(),
        coordinator.throttle_percent(),
        if coordinator.is_continuous() { "ON" } else { "OFF" }
    );
    println!(
        "│  link {:<13} rec {:<3}                  │",
        link,
        if coordinator.is_recording() { "ON" } else { "OFF" }
    );
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Select motor                            │");
    println!("│  2) Set throttle %                          │");
    println!("│  3) Single pulse                            │");
    println!("│  4) Continuous ON                           │");
    println!("│  5) Stop / disarm                           │");
    println!("│  6) Start / stop recording                  │");
    println!("│  7) Show telemetry                          │");
    println!("│  8) Quit                                    │");
    println!("└─────────────────────────────────────────────┘");
    read_input("Select [1-8]: ")
}

fn read_input(prompt: &str) -> Option<String> {
    print!("{}", prompt);
    let _ = stdout().flush();
    let mut input = String::new();
    match stdin().read_line(&mut input) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(input.trim().to_string()),
    }
}

fn read_line(prompt: &str) -> String {
    read_input(prompt).unwrap_or_default()
}

fn select_motor(coordinator: &Coordinator) -> Result<(), BenchError> {
    let input = read_line("Motor [1-8]: ");
    match input.parse::<u8>() {
        Ok(idx) => coordinator.select_channel(idx),
        Err(_) => {
            println!("'{}' is not a motor number.", input);
            Ok(())
        }
    }
}

fn set_throttle(coordinator: &Coordinator) -> Result<(), BenchError> {
    let input = read_line("Throttle % [0-100]: ");
    match input.parse::<f32>() {
        Ok(pct) => {
            let pwm = coordinator.set_throttle_percent(pct)?;
            println!("M{} -> {} us", coordinator.selected_channel(), pwm);
            Ok(())
        }
        Err(_) => {
            println!("'{}' is not a number.", input);
            Ok(())
        }
    }
}

fn pulse(coordinator: &Coordinator) -> Result<(), BenchError> {
    let pct = read_line("Pulse throttle % [0-100]: ").parse::<f32>().unwrap_or(0.0);
    let ms = read_line(&format!("Duration ms [default: {}]: ", DEFAULT_PULSE_MS))
        .parse::<u64>()
        .unwrap_or(DEFAULT_PULSE_MS);
    println!("Pulsing M{} at {:.1}% for {} ms...", coordinator.selected_channel(), pct, ms);
    coordinator.pulse(pct, Duration::from_millis(ms))
}

fn toggle_recording(coordinator: &Coordinator) -> Result<(), BenchError> {
    if coordinator.is_recording() {
        if let Some(path) = coordinator.stop_logging()? {
            println!("Saved {}", path.display());
        }
    } else {
        let prefix = read_line("Log name [default: log]: ");
        coordinator.start_logging(&prefix)?;
        println!("Recording.");
    }
    Ok(())
}

fn show_telemetry(coordinator: &Coordinator, last_frame: &Mutex<Option<TelemetryFrame>>) {
    let stats = coordinator.ingest_stats();
    println!(
        "datagrams: {} received, {} decoded, {} dropped",
        stats.received, stats.decoded, stats.dropped
    );
    let Some(frame) = last_frame.lock().clone() else {
        println!("No telemetry yet.");
        return;
    };
    for (name, value) in frame.fields() {
        println!("  {:<12} {:>12.3}", name, value);
    }
    if frame.get("thrust").is_none() {
        println!("  {:<12} {:>12.3}", "thrust", frame.thrust());
    }
    println!("  {:<12} {:>12.3}", "power", frame.power());
}
