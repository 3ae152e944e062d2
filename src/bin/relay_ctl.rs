//! Command-line client for the relay control listener
//!
//! ```text
//! relay-ctl status
//! relay-ctl --addr 127.0.0.1:7380 start
//! ```

use clap::{Parser, Subcommand};
use event_relay::control::ControlClient;

#[derive(Parser, Debug)]
#[command(name = "relay-ctl", version, about = "Control a running event relay")]
struct Args {
    /// Control listener address
    #[arg(long, env = "RELAY_CONTROL_ADDR", default_value = "127.0.0.1:7380")]
    addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the upstream connection if the configuration permits it
    Start,
    /// Close the upstream connection and cancel pending reconnects
    Stop,
    /// Print `{"connected": bool, "retryAttempts": n}`
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let line = match args.command {
        Command::Start => "START",
        Command::Stop => "STOP",
        Command::Status => "STATUS",
    };

    let mut client = ControlClient::connect(&args.addr).await?;
    let response = client.send(line).await?;
    println!("{}", response);

    let value: serde_json::Value = serde_json::from_str(&response)?;
    if value.get("ok").and_then(|ok| ok.as_bool()) == Some(false) {
        std::process::exit(1);
    }
    Ok(())
}
