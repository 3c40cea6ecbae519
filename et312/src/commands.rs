//! Memory read/write commands

use tracing::debug;

use et312_core::{constants::MAX_WRITE_LEN, Command, MemoryAddress};
use et312_transport::ByteTransport;

use crate::connection::{register_payload, Connection};
use crate::error::{Error, Result};

impl<T: ByteTransport> Connection<T> {
    /// Read one byte of box memory
    pub async fn read_memory(&mut self, address: MemoryAddress) -> Result<u8> {
        let packet = self.request(Command::Read, &address.to_be_bytes()).await?;

        let value = *packet.payload.first().ok_or(et312_core::Error::PacketTooShort {
            expected: 1,
            actual: 0,
        })?;

        debug!("{} = 0x{:02X}", address, value);
        Ok(value)
    }

    /// Write one byte of box memory
    pub async fn write_memory(&mut self, address: MemoryAddress, value: u8) -> Result<()> {
        self.write_block(address, &[value]).await
    }

    /// Write up to eight consecutive bytes starting at `address`
    pub async fn write_block(&mut self, address: MemoryAddress, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() > MAX_WRITE_LEN {
            return Err(Error::InvalidArgument(format!(
                "write of {} bytes, expected 1..={}",
                data.len(),
                MAX_WRITE_LEN
            )));
        }

        self.request_ack(Command::Write, &register_payload(address, data))
            .await?;

        debug!("{} <- {} byte(s)", address, data.len());
        Ok(())
    }
}
