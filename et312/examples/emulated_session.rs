//! Emulated session example
//!
//! Runs a full session against the in-memory emulator: handshake, a speed
//! shift, a few writes and reads, and an orderly close.

use et312::{Et312, MemoryAddress, SessionConfig};
use et312_core::constants::baud;
use et312_emulator::Emulator;

#[tokio::main]
async fn main() -> et312::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let emulator = Emulator::new();
    let handle = emulator.handle();

    let et312 = Et312::with_config(emulator, SessionConfig::default().with_shift_baud_rate(true));
    et312.connect().await?;

    println!("Connected, box at {} baud", handle.box_speed());

    let scratch = MemoryAddress::new(0x4000);
    et312.write_block(scratch, &[0x01, 0x02, 0x03]).await?;
    for offset in 0..3 {
        let address = MemoryAddress::new(scratch.get() + offset);
        println!("{} = 0x{:02X}", address, et312.read_memory(address).await?);
    }

    et312.close().await?;

    assert_eq!(handle.box_speed(), baud::DEFAULT);
    println!("Closed, box back at {} baud", handle.box_speed());

    Ok(())
}
