use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use flux_control_lib::control_interface::ControlInterface;
use flux_control_lib::util::discovery::{find_bulbs, pretty_print_bulbs};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "flux_control",
    about = "Controls Magic Home compatible LED bulbs",
    version = "0.3.0"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `discover` command.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Searches the local network for bulbs
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Search timeout in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 5000)]
        timeout: u64,
    },
    /// Subcommand for operations that require bulb communication
    #[clap(name = "device-call")]
    DeviceCall {
        /// Sets the IP address of the bulb
        #[clap(long)]
        ip: String,

        /// Sets the TCP command port of the bulb
        #[clap(long, default_value_t = 5577)]
        port: u16,

        #[clap(subcommand)]
        action: DeviceAction,
    },
}

/// Actions available under the `device-call` subcommand
#[derive(Subcommand)]
pub enum DeviceAction {
    /// Queries and prints the bulb's current state.
    #[clap(name = "status")]
    Status,
    /// Switches the bulb on.
    #[clap(name = "on")]
    On,
    /// Switches the bulb off.
    #[clap(name = "off")]
    Off,
    /// Sets a static RGB color.
    #[clap(name = "set-color")]
    SetColor {
        /// Red component of the color (0-255)
        #[clap(value_parser = clap::value_parser!(u8))]
        red: u8,

        /// Green component of the color (0-255)
        #[clap(value_parser = clap::value_parser!(u8))]
        green: u8,

        /// Blue component of the color (0-255)
        #[clap(value_parser = clap::value_parser!(u8))]
        blue: u8,
    },
}

async fn handle_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Discover { output, timeout } => {
            let bulbs = find_bulbs(Duration::from_millis(timeout)).await?;
            match output {
                OutputFormat::Plaintext => {
                    pretty_print_bulbs(&bulbs);
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string(&bulbs)?;
                    println!("{}", json);
                }
            }
        }
        Commands::DeviceCall { ip, port, action } => {
            let mut bulb = ControlInterface::new(&ip).with_port(port);
            bulb.connect().await?;

            match action {
                DeviceAction::Status => {
                    let state = bulb.refresh_state().await?;
                    println!("Power: {:?}", state.power);
                    println!("Mode:  {:?}", state.mode);
                    match state.color {
                        Some(color) => println!(
                            "Color: ({}, {}, {})",
                            color.red, color.green, color.blue
                        ),
                        None => println!("Color: unknown"),
                    }
                }
                DeviceAction::On => {
                    bulb.turn_on().await?;
                    println!("Bulb switched on");
                }
                DeviceAction::Off => {
                    bulb.turn_off().await?;
                    println!("Bulb switched off");
                }
                DeviceAction::SetColor { red, green, blue } => {
                    bulb.set_color(red, green, blue).await?;
                    println!("Color set to ({}, {}, {})", red, green, blue);
                }
            }
        }
    }

    Ok(())
}
