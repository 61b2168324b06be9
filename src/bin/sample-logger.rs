use clap::Parser;
use color_eyre::Result;
use serial_bridge::{client::BridgeClient, config::DEFAULT_PORT, logging};
use tracing::{error, info, Level};

/// Connects to a bridge and prints every sample it receives,
/// one JSON object per line, prefixed by the time of arrival.
#[derive(Parser, Debug)]
struct Args {
    /// Server address.
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Server port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

async fn run(args: Args) -> Result<()> {
    let mut client = BridgeClient::connect(&args.address, args.port).await?;

    loop {
        let sample = client.next_sample().await?;
        let now = chrono::Utc::now().to_rfc3339();

        println!("{now} {}", serde_json::to_string(&sample)?);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init(Level::WARN, None).await;

    let args = Args::parse();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        result = run(args) => {
            error!("Connection ended");
            result?;
        }
    }

    Ok(())
}
