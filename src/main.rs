//! companion-pair - pair with an Apple TV style device over the Companion protocol.

use anyhow::{bail, Context, Result};
use companion_pairing::{PairingConfig, PairingSession};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments
struct Args {
    host: String,
    port: u16,
    /// Enable debug logging
    debug: bool,
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut debug = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--debug" | "-d" => debug = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            _ => positional.push(arg),
        }
    }

    let [host, port] = <[String; 2]>::try_from(positional).map_err(|_| {
        print_help();
        anyhow::anyhow!("expected <host> and <port>")
    })?;
    let port = port
        .parse()
        .with_context(|| format!("invalid port {:?}", port))?;

    Ok(Args { host, port, debug })
}

fn print_help() {
    println!("companion-pair - pair with a device using the PIN it displays");
    println!();
    println!("Usage: companion-pair <HOST> <PORT> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -d, --debug  Enable debug logging (frame and key dumps)");
    println!("  -h, --help   Show this help message");
    println!();
    println!("Timeouts can be overridden with COMPANION_READ_TIMEOUT_MS and");
    println!("COMPANION_CONNECT_TIMEOUT_MS. RUST_LOG takes precedence over --debug.");
}

fn setup_logging(args: &Args) {
    let default = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(args.debug)
        .with_writer(std::io::stderr)
        .init();
}

async fn read_pin() -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"Enter PIN shown on device: ").await?;
    stdout.flush().await?;

    let mut line = String::new();
    let read = BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    if read == 0 {
        bail!("no PIN entered");
    }
    Ok(line.trim().to_string())
}

async fn pair(session: &mut PairingSession) -> Result<String> {
    session.begin().await.context("could not start pairing")?;

    let pin = read_pin().await?;
    session.pin(&pin)?;
    session.finish().await.context("pairing failed")?;

    session
        .credentials()
        .map(str::to_string)
        .context("pairing finished without credentials")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    setup_logging(&args);

    let config = PairingConfig::from_env_or(args.host.as_str(), args.port);
    info!(host = %config.host(), port = config.port(), "Pairing with device");

    let mut session = PairingSession::new(&config);
    let result = pair(&mut session).await;
    session.close();

    match result {
        Ok(credentials) => {
            println!("{}", credentials);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
