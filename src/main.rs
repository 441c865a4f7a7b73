use std::path::Path;
use std::process::ExitCode;

use log::error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use serial_probe::prelude::*;

/// Where operator settings persist between runs.
const SETTINGS_FILE: &str = "config/serial_probe.ron";

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(port_name) = args.first() else {
        print_usage();
        return ExitCode::SUCCESS;
    };

    let settings_path = Path::new(SETTINGS_FILE);
    let mut settings = Settings::load(settings_path);
    settings.config.port_name = port_name.clone();
    if let Some(baud) = args.get(1) {
        match baud.parse::<u32>() {
            Ok(rate) => settings.config.baud_rate = rate,
            Err(_) => {
                eprintln!("invalid baud rate: {baud}");
                return ExitCode::FAILURE;
            }
        }
    }

    let session = SerialLinkSession::new();
    session.set_timestamps(settings.show_timestamp);
    session.set_append_newline(settings.append_newline);
    if settings.hex_display {
        session.set_receive_mode(DataMode::Hex);
    }
    session.set_render_hook(Box::new(|entry| println!("{}", entry.render())));

    // Implicit disconnect when the open device is unplugged.
    let (events_tx, events_rx) = broadcast::channel(16);
    tokio::spawn(watch_ports(events_tx));
    session.bind_device_events(events_rx);

    if let Err(e) = session.connect(&settings.config).await {
        error!("{e}");
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = settings.save(settings_path) {
        error!("could not persist settings: {e}");
    }

    // Stdin pump: every line is one outbound text frame; EOF or device
    // removal ends the session.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if session.state().is_disconnected() {
            break;
        }
        // Send failures are already rendered through the activity log.
        let _ = session.send(&line, DataMode::Text).await;
    }

    // Snapshot before teardown; the connection clock stops on disconnect.
    let stats = session.stats();
    if let Err(e) = session.disconnect().await {
        error!("disconnect failed: {e}");
    }
    println!(
        "rx {} bytes, tx {} bytes, connected {}",
        stats.bytes_received,
        stats.bytes_sent,
        format_elapsed(stats.connection_elapsed)
    );
    ExitCode::SUCCESS
}

fn print_usage() {
    println!("usage: serial_probe <port> [baud]");
    println!("common baud rates: {COMMON_BAUD_RATES:?}");
    match list_port_names() {
        Ok(ports) if ports.is_empty() => println!("no serial ports found"),
        Ok(ports) => {
            println!("available ports:");
            for port in ports {
                println!("  {port}");
            }
        }
        Err(e) => println!("{e}"),
    }
}
