//! ferry: send a file over TCP, receive it, or copy it locally
//!
//! - `ferry serve` accepts one client, stores its bytes and acknowledges
//! - `ferry send --file PATH` streams a file and waits for the acknowledgement
//! - `ferry copy SRC DST` copies through the transfer engine
//!
//! Configuration via CLI arguments or TOML file

use ferry::config::{Action, Config};
use ferry::session::{Client, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let engine = config.engine()?;
    info!(
        buffer_size = engine.buffer_size(),
        allocation = ?engine.allocation(),
        "Starting ferry"
    );

    match config.action {
        Action::Serve { listen, output } => {
            let mut server = Server::bind(listen, engine)?;
            info!(addr = %server.local_addr(), output = %output.display(), "Waiting for a client");
            let report = server.receive_once(&output)?;
            info!(
                peer = %report.peer,
                bytes = report.bytes_received,
                "Received file"
            );
        }
        Action::Send { connect, file } => {
            let mut client = Client::connect(connect.as_str(), engine)?;
            info!(peer = %client.peer_addr(), file = %file.display(), "Sending file");
            let report = client.send_file(&file)?;
            info!(
                peer = %report.peer,
                bytes = report.bytes_sent,
                ack = %String::from_utf8_lossy(&report.ack),
                "Server acknowledged"
            );
        }
        Action::Copy { source, dest, mode } => {
            let copied = engine.copy_path(&source, &dest, mode)?;
            info!(
                source = %source.display(),
                dest = %dest.display(),
                mode = ?mode,
                bytes = copied,
                "Copied file"
            );
        }
    }

    Ok(())
}
