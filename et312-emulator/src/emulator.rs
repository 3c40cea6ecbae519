//! Box emulator transport

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use et312_core::{
    command,
    constants::{self, baud},
    key, Command, MemoryAddress, Packet, Reply, SessionKey,
};
use et312_transport::{ByteTransport, Error, Result};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

const MEMORY_SIZE: usize = 0x10000;

/// Everything the box remembers, shared between the transport and its handles
struct BoxState {
    memory: Vec<u8>,
    key: Option<SessionKey>,
    box_speed: u32,
    link_speed: u32,
    open: bool,
    inbox: BytesMut,
    outbox: BytesMut,
    silent: bool,
    corrupt_replies: usize,
    sends: usize,
}

impl BoxState {
    fn new() -> Self {
        Self {
            memory: vec![0; MEMORY_SIZE],
            key: None,
            box_speed: baud::DEFAULT,
            link_speed: baud::DEFAULT,
            open: true,
            inbox: BytesMut::new(),
            outbox: BytesMut::new(),
            silent: false,
            corrupt_replies: 0,
            sends: 0,
        }
    }

    fn peek(&self, address: MemoryAddress) -> u8 {
        self.memory[address.get() as usize]
    }

    fn poke(&mut self, address: MemoryAddress, value: u8) {
        self.memory[address.get() as usize] = value;
    }

    fn write(&mut self, address: MemoryAddress, data: &[u8]) {
        for (offset, &value) in data.iter().enumerate() {
            let target = MemoryAddress::new(address.get().wrapping_add(offset as u16));
            self.poke(target, value);

            if target == MemoryAddress::BOX_KEY && value == 0 && self.key.is_some() {
                debug!("Box key reset");
                self.key = None;
            }

            if target == MemoryAddress::BAUD_RATE {
                match baud::rate_for(value) {
                    Some(rate) => {
                        debug!("Box line speed {} -> {}", self.box_speed, rate);
                        self.box_speed = rate;
                    }
                    None => warn!("Unsupported UBRRL value 0x{:02X} ignored", value),
                }
            }
        }
    }

    fn accept(&mut self, data: &[u8]) {
        self.sends += 1;

        if self.silent {
            trace!("Silent, dropping {} bytes", data.len());
            return;
        }
        if self.link_speed != self.box_speed {
            trace!(
                "Line speed mismatch (box {}, link {}), {} bytes lost",
                self.box_speed,
                self.link_speed,
                data.len()
            );
            return;
        }

        self.inbox.extend_from_slice(data);
        while self.process_one() {}
    }

    /// Handle one complete command from the inbox; false when more bytes are needed
    fn process_one(&mut self) -> bool {
        let Some(&first) = self.inbox.first() else {
            return false;
        };
        let header = match self.key {
            Some(k) => key::deobfuscate(first, k),
            None => first,
        };
        let (length, _) = command::unpack_header(header);

        // Sync bytes and stray single bytes both get 0x07
        if length == 0 {
            self.inbox.advance(1);
            self.outbox.put_u8(constants::SYNC_ACK);
            return true;
        }

        let frame_len = length + 1;
        if self.inbox.len() < frame_len {
            return false;
        }
        let frame = self.inbox.split_to(frame_len);

        match Packet::decode(&frame, self.key) {
            Ok(packet) => self.dispatch(packet),
            Err(e) => {
                debug!("Rejecting frame {}: {}", hex::encode(&frame), e);
                self.outbox.put_u8(constants::ERROR_REPLY);
            }
        }
        true
    }

    fn dispatch(&mut self, packet: Packet) {
        let payload = packet.payload.clone();

        match (packet.command(), self.key) {
            (Ok(Command::KeyExchange), None) if payload.len() == 1 => {
                self.key_exchange(payload[0]);
            }
            (Ok(Command::Read), Some(_)) if payload.len() == 2 => {
                if let Some(address) = MemoryAddress::from_be_slice(&payload) {
                    let value = self.peek(address);
                    debug!("READ {} = 0x{:02X}", address, value);
                    self.queue_reply(Packet::reply(Reply::Read, vec![value]));
                }
            }
            (Ok(Command::Write), Some(_)) if payload.len() > 2 => {
                if let Some(address) = MemoryAddress::from_be_slice(&payload) {
                    debug!("WRITE {} <- {}", address, hex::encode(&payload[2..]));
                    // Acknowledge at the old speed, then apply
                    self.outbox.put_u8(constants::WRITE_ACK);
                    self.write(address, &payload[2..]);
                }
            }
            (command, key) => {
                debug!(
                    "Rejecting {:?} (keyed={}, payload={})",
                    command,
                    key.is_some(),
                    hex::encode(&payload)
                );
                self.outbox.put_u8(constants::ERROR_REPLY);
            }
        }
    }

    fn key_exchange(&mut self, host_fragment: u8) {
        let stored = self.peek(MemoryAddress::BOX_KEY);
        let box_fragment = if stored != 0 { stored } else { rand::random() };

        self.poke(MemoryAddress::HOST_KEY, host_fragment);
        self.poke(MemoryAddress::BOX_KEY, box_fragment);
        self.queue_reply(Packet::reply(Reply::KeyExchange, vec![box_fragment]));

        self.key = Some(SessionKey::derive(box_fragment, host_fragment));
        debug!("Keyed (box fragment 0x{:02X})", box_fragment);
    }

    fn queue_reply(&mut self, packet: Packet) {
        let mut frame = match packet.encode(None) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot encode reply {}: {}", packet, e);
                return;
            }
        };

        if self.corrupt_replies > 0 {
            self.corrupt_replies -= 1;
            let last = frame.len() - 1;
            frame[last] ^= 0xFF;
            debug!("Corrupting reply checksum");
        }

        self.outbox.extend_from_slice(&frame);
    }

    fn power_cycle(&mut self) {
        self.key = None;
        self.box_speed = baud::DEFAULT;
        self.inbox.clear();
        self.outbox.clear();
        self.silent = false;
        self.corrupt_replies = 0;
    }
}

/// Emulated box reachable as a [`ByteTransport`]
///
/// # Examples
///
/// ```
/// use et312_core::MemoryAddress;
/// use et312_emulator::Emulator;
///
/// let emulator = Emulator::new().with_memory(MemoryAddress::BOX_KEY, 0x42);
/// let handle = emulator.handle();
/// assert_eq!(handle.peek(MemoryAddress::BOX_KEY), 0x42);
/// ```
pub struct Emulator {
    state: Arc<Mutex<BoxState>>,
}

impl Emulator {
    /// Freshly powered box: zeroed memory, no key, default speed
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BoxState::new())),
        }
    }

    /// Preload a memory cell
    pub fn with_memory(self, address: MemoryAddress, value: u8) -> Self {
        self.state.lock().poke(address, value);
        self
    }

    /// Handle for inspecting and steering the box from tests
    pub fn handle(&self) -> EmulatorHandle {
        EmulatorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ByteTransport for Emulator {
    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::NotConnected);
        }

        trace!("Box received {}", hex::encode(data));
        state.accept(data);
        Ok(data.len())
    }

    async fn receive(&mut self, max_len: usize, _timeout: Option<Duration>) -> Result<BytesMut> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::NotConnected);
        }

        // Nothing queued means the box had nothing to say: report the timeout at once
        let n = max_len.min(state.outbox.len());
        Ok(state.outbox.split_to(n))
    }

    async fn set_speed(&mut self, rate: u32) -> Result<()> {
        self.state.lock().link_speed = rate;
        Ok(())
    }

    fn speed(&self) -> u32 {
        self.state.lock().link_speed
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.open = false;
        state.inbox.clear();
        state.outbox.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn describe(&self) -> String {
        "emulator".to_string()
    }
}

/// Cloneable view into an [`Emulator`]
#[derive(Clone)]
pub struct EmulatorHandle {
    state: Arc<Mutex<BoxState>>,
}

impl EmulatorHandle {
    pub fn peek(&self, address: MemoryAddress) -> u8 {
        self.state.lock().peek(address)
    }

    pub fn poke(&self, address: MemoryAddress, value: u8) {
        self.state.lock().poke(address, value);
    }

    /// Number of `send` calls the box has seen
    pub fn sends(&self) -> usize {
        self.state.lock().sends
    }

    /// Key the box is currently using
    pub fn key(&self) -> Option<SessionKey> {
        self.state.lock().key
    }

    /// Speed the box's UART runs at
    pub fn box_speed(&self) -> u32 {
        self.state.lock().box_speed
    }

    /// Speed the host side of the link runs at
    pub fn link_speed(&self) -> u32 {
        self.state.lock().link_speed
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Drop every incoming byte without answering
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Break the checksum of the next `count` framed replies
    pub fn corrupt_next_replies(&self, count: usize) {
        self.state.lock().corrupt_replies = count;
    }

    /// Forget the key and return to the default speed; memory is kept
    pub fn power_cycle(&self) {
        self.state.lock().power_cycle();
    }

    /// Open a fresh link to the same box, as a new client plugging in would
    ///
    /// The link starts at the default speed; the box keeps its key, speed
    /// and memory.
    pub fn attach(&self) -> Emulator {
        {
            let mut state = self.state.lock();
            state.open = true;
            state.link_speed = baud::DEFAULT;
            state.outbox.clear();
        }
        Emulator {
            state: Arc::clone(&self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use et312_core::frame_command;
    use pretty_assertions::assert_eq;

    async fn key_box(emulator: &mut Emulator, host_fragment: u8) -> SessionKey {
        let frame = frame_command(Command::KeyExchange, &[host_fragment], None).unwrap();
        emulator.send(&frame).await.unwrap();
        let reply = emulator.receive(3, None).await.unwrap();
        let packet = Packet::decode(&reply, None).unwrap();
        SessionKey::derive(packet.payload[0], host_fragment)
    }

    #[tokio::test]
    async fn test_sync_ack() {
        let mut emulator = Emulator::new();
        emulator.send(&[constants::SYNC_BYTE]).await.unwrap();

        let reply = emulator.receive(1, None).await.unwrap();
        assert_eq!(&reply[..], &[constants::SYNC_ACK]);
    }

    #[tokio::test]
    async fn test_silence_is_empty_receive() {
        let mut emulator = Emulator::new();
        let reply = emulator.receive(1, None).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_key_exchange_uses_preloaded_fragment() {
        let mut emulator = Emulator::new().with_memory(MemoryAddress::BOX_KEY, 0x42);
        let handle = emulator.handle();

        let key = key_box(&mut emulator, 0x10).await;

        assert_eq!(key, SessionKey::derive(0x42, 0x10));
        assert_eq!(handle.key(), Some(key));
        assert_eq!(handle.peek(MemoryAddress::HOST_KEY), 0x10);
        assert_eq!(handle.peek(MemoryAddress::BOX_KEY), 0x42);
    }

    #[tokio::test]
    async fn test_keyed_read_and_write() {
        let mut emulator = Emulator::new();
        let handle = emulator.handle();
        let key = key_box(&mut emulator, 0x01).await;

        let write = frame_command(Command::Write, &[0x42, 0x12, 0x07], Some(key)).unwrap();
        emulator.send(&write).await.unwrap();
        assert_eq!(&emulator.receive(1, None).await.unwrap()[..], &[constants::WRITE_ACK]);
        assert_eq!(handle.peek(MemoryAddress::HOST_KEY), 0x07);

        let read = frame_command(Command::Read, &[0x42, 0x12], Some(key)).unwrap();
        emulator.send(&read).await.unwrap();
        let reply = emulator.receive(3, None).await.unwrap();
        let packet = Packet::decode(&reply, None).unwrap();
        assert_eq!(packet.reply_code().unwrap(), Reply::Read);
        assert_eq!(packet.payload.as_ref(), &[0x07]);
    }

    #[tokio::test]
    async fn test_bytes_may_arrive_one_at_a_time() {
        let mut emulator = Emulator::new();
        let key = key_box(&mut emulator, 0x33).await;

        let read = frame_command(Command::Read, &[0x40, 0x29], Some(key)).unwrap();
        for byte in read.iter() {
            emulator.send(&[*byte]).await.unwrap();
        }

        let reply = emulator.receive(3, None).await.unwrap();
        assert_eq!(reply.len(), 3);
    }

    #[tokio::test]
    async fn test_unkeyed_read_rejected() {
        let mut emulator = Emulator::new();
        let read = frame_command(Command::Read, &[0x42, 0x13], None).unwrap();
        emulator.send(&read).await.unwrap();

        assert_eq!(&emulator.receive(3, None).await.unwrap()[..], &[constants::ERROR_REPLY]);
    }

    #[tokio::test]
    async fn test_bad_checksum_rejected() {
        let mut emulator = Emulator::new();
        emulator.send(&[0x2F, 0x00, 0x00]).await.unwrap();

        assert_eq!(&emulator.receive(3, None).await.unwrap()[..], &[constants::ERROR_REPLY]);
        assert!(emulator.handle().key().is_none());
    }

    #[tokio::test]
    async fn test_baud_register_changes_box_speed() {
        let mut emulator = Emulator::new();
        let handle = emulator.handle();
        let key = key_box(&mut emulator, 0x00).await;

        let ubrr = baud::ubrr_for(baud::FAST).unwrap();
        let write = frame_command(Command::Write, &[0x40, 0x29, ubrr], Some(key)).unwrap();
        emulator.send(&write).await.unwrap();
        assert_eq!(&emulator.receive(1, None).await.unwrap()[..], &[constants::WRITE_ACK]);
        assert_eq!(handle.box_speed(), baud::FAST);

        // Link still at the old speed: the box hears nothing
        let read = frame_command(Command::Read, &[0x42, 0x13], Some(key)).unwrap();
        emulator.send(&read).await.unwrap();
        assert!(emulator.receive(3, None).await.unwrap().is_empty());

        emulator.set_speed(baud::FAST).await.unwrap();
        emulator.send(&read).await.unwrap();
        assert_eq!(emulator.receive(3, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_corrupted_reply() {
        let mut emulator = Emulator::new();
        let handle = emulator.handle();
        let key = key_box(&mut emulator, 0x00).await;
        handle.corrupt_next_replies(1);

        let read = frame_command(Command::Read, &[0x42, 0x13], Some(key)).unwrap();
        emulator.send(&read).await.unwrap();
        let reply = emulator.receive(3, None).await.unwrap();
        assert!(Packet::decode(&reply, None).is_err());

        emulator.send(&read).await.unwrap();
        let reply = emulator.receive(3, None).await.unwrap();
        assert!(Packet::decode(&reply, None).is_ok());
    }

    #[tokio::test]
    async fn test_key_reset_write_unkeys_box() {
        let mut emulator = Emulator::new();
        let handle = emulator.handle();
        let key = key_box(&mut emulator, 0x5A).await;

        let reset = frame_command(Command::Write, &[0x42, 0x13, 0x00], Some(key)).unwrap();
        emulator.send(&reset).await.unwrap();
        assert_eq!(&emulator.receive(1, None).await.unwrap()[..], &[constants::WRITE_ACK]);
        assert!(handle.key().is_none());

        // Plain key exchange is accepted again
        let key = key_box(&mut emulator, 0x11).await;
        assert_eq!(handle.key(), Some(key));
    }

    #[tokio::test]
    async fn test_attach_reopens_link() {
        let mut emulator = Emulator::new();
        let handle = emulator.handle();
        emulator.set_speed(baud::FAST).await.unwrap();
        emulator.close().await.unwrap();

        let mut second = handle.attach();
        assert!(second.is_open());
        assert_eq!(second.speed(), baud::DEFAULT);

        second.send(&[constants::SYNC_BYTE]).await.unwrap();
        assert_eq!(&second.receive(1, None).await.unwrap()[..], &[constants::SYNC_ACK]);
    }

    #[tokio::test]
    async fn test_power_cycle_forgets_key() {
        let mut emulator = Emulator::new();
        let handle = emulator.handle();
        key_box(&mut emulator, 0x00).await;

        handle.power_cycle();
        assert!(handle.key().is_none());
        assert_eq!(handle.box_speed(), baud::DEFAULT);
    }

    #[tokio::test]
    async fn test_closed_emulator_refuses_io() {
        let mut emulator = Emulator::new();
        emulator.close().await.unwrap();

        assert!(!emulator.is_open());
        assert!(matches!(emulator.send(&[0x00]).await, Err(Error::NotConnected)));
        assert_eq!(emulator.handle().sends(), 0);
    }
}
