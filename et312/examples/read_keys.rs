//! Key register example
//!
//! Connects to a box behind a serial-to-TCP bridge and prints the session
//! key along with the box and host key registers.

use anyhow::Context;
use et312::{Et312, MemoryAddress, TcpTransport};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Change to your bridge address
    let addr = std::env::var("ET312_ADDR").unwrap_or_else(|_| "127.0.0.1:2001".to_string());
    let (host, port) = addr
        .rsplit_once(':')
        .context("ET312_ADDR must be host:port")?;
    let port: u16 = port.parse().context("invalid port in ET312_ADDR")?;

    println!("Connecting to {}...", addr);

    let mut transport = TcpTransport::new(host, port);
    transport.connect().await?;

    let et312 = Et312::new(transport);
    let (box_key, host_key) = et312
        .run(|et312| async move {
            if let Some(key) = et312.key() {
                println!("Key is 0x{:02X} ({})", key.value(), key.value());
            }
            let box_key = et312.read_memory(MemoryAddress::BOX_KEY).await?;
            let host_key = et312.read_memory(MemoryAddress::HOST_KEY).await?;
            Ok((box_key, host_key))
        })
        .await?;

    println!("Current box key: 0x{:02X}", box_key);
    println!("Current host key: 0x{:02X}", host_key);

    Ok(())
}
