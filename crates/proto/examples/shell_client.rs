//! Interactive shell over SSH.
//!
//! Connects, authenticates with a password and relays stdin to the remote
//! shell and the shell's output to stdout. No terminal emulation is done;
//! escape sequences are passed through as-is.
//!
//! Usage:
//!   cargo run --example shell_client <host> <port> <username> <password>
//!
//! Example:
//!   RUST_LOG=cellsh_proto=debug cargo run --example shell_client 127.0.0.1 22 admin secret

use cellsh_proto::ssh::{SshClient, SshClientConfig, StatusListener};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Prints banners and other server text to stderr.
struct ConsoleListener;

impl StatusListener for ConsoleListener {
    fn on_event(&self, message_type: u8, message: Option<&str>) {
        if let Some(message) = message {
            eprintln!("[{}] {}", message_type, message.trim_end());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 5 {
        eprintln!("Usage: {} <host> <port> <username> <password>", args[0]);
        eprintln!("Example: {} 127.0.0.1 22 admin secret", args[0]);
        std::process::exit(1);
    }

    let mut config = SshClientConfig::new(&args[1], &args[3], &args[4]);
    config.port = args[2].parse()?;

    let client = SshClient::new(config).with_listener(Arc::new(ConsoleListener));
    let (mut reader, writer) = client.connect().await?;

    if let Some(fingerprint) = reader.connection().host_key_fingerprint() {
        eprintln!("Host key fingerprint: {} (not verified)", fingerprint);
    }

    let keyboard = writer.clone();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Err(e) = keyboard.write(&buf[..n]).await {
                        eprintln!("send failed: {}", e);
                        break;
                    }
                }
            }
        }
        let _ = keyboard.disconnect().await;
    });

    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; 512];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n]).await?;
        stdout.flush().await?;
    }

    eprintln!("Connection closed.");
    Ok(())
}
