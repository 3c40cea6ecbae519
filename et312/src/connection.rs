//! Protocol engine
//!
//! [`Connection`] owns the transport, runs the sync and key exchange, and
//! performs one request/response round trip at a time. It takes `&mut self`
//! everywhere; sharing between tasks is done by [`Et312`](crate::Et312).

use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, error, info, trace, warn};

use et312_core::{
    constants::{self, baud},
    frame_command, parse_response, Command, ConnectionState, MemoryAddress, Packet, Reply,
    Session, SessionKey,
};
use et312_transport::ByteTransport;

use crate::config::SessionConfig;
use crate::error::{Error, Result};

/// Bytes read (and discarded) when clearing stale input
const DRAIN_LEN: usize = 64;

/// Size of every framed reply the box sends: header, one data byte, checksum
const FRAMED_REPLY_LEN: usize = Packet::OVERHEAD + 1;

/// A session with one box over one transport
pub struct Connection<T: ByteTransport> {
    transport: T,
    session: Session,
    config: SessionConfig,
    /// Line speed the transport came with; restored on close and before
    /// every handshake
    base_speed: u32,
    consecutive_failures: usize,
    /// Set while a request is on the wire; still set on entry means the
    /// previous exchange future was dropped
    in_flight: bool,
    /// Stale bytes may be waiting on the transport
    needs_drain: bool,
}

impl<T: ByteTransport> Connection<T> {
    /// Create a disconnected session bound to `transport`
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        let base_speed = transport.speed();
        Self {
            transport,
            session: Session::new(),
            config,
            base_speed,
            consecutive_failures: 0,
            in_flight: false,
            needs_drain: false,
        }
    }

    /// Shared state tracker
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Synchronize with the box and agree on a session key
    ///
    /// # Errors
    ///
    /// - [`Error::Handshake`] if the box does not sync or answers the key
    ///   exchange badly; the session is back in `Disconnected` and connect
    ///   may be retried
    /// - [`Error::Transport`] if the channel fails; the session is closed
    /// - [`Error::InvalidState`] / [`Error::Closed`] when not `Disconnected`
    pub async fn connect(&mut self) -> Result<()> {
        match self.session.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Closed => return Err(Error::Closed),
            other => {
                return Err(Error::InvalidState(format!(
                    "cannot connect while {:?}",
                    other
                )));
            }
        }

        info!("Connecting to {}...", self.transport.describe());
        self.session.begin_handshake()?;
        let guard = HandshakeGuard::new(self.session.clone());

        match self.handshake().await {
            Ok(key) => {
                self.session.complete_handshake(key)?;
                guard.disarm();
                self.consecutive_failures = 0;
                self.in_flight = false;
                self.needs_drain = false;
                info!("Connected to {}", self.transport.describe());
            }
            Err(Error::Transport(e)) => return Err(self.transport_failed(e).await),
            Err(e) => {
                warn!(error = %e, "Handshake aborted");
                return Err(e);
            }
        }

        if self.config.shift_baud_rate {
            self.change_baud_rate(baud::FAST).await?;
        }

        Ok(())
    }

    async fn handshake(&mut self) -> Result<SessionKey> {
        // An unkeyed box always listens at the base speed
        if self.transport.speed() != self.base_speed {
            debug!("Returning link to {} baud", self.base_speed);
            self.transport.set_speed(self.base_speed).await?;
        }

        self.drain().await?;
        self.sync().await?;

        let host_fragment: u8 = rand::random();
        let frame = frame_command(Command::KeyExchange, &[host_fragment], None)?;
        self.transport.send(&frame).await?;

        let reply = self
            .transport
            .receive(FRAMED_REPLY_LEN, Some(self.config.timeout))
            .await?;
        if reply.is_empty() {
            return Err(Error::Handshake("no key exchange reply".into()));
        }

        let packet = decode_framed(&reply, Reply::KeyExchange)
            .map_err(|e| Error::Handshake(format!("bad key exchange reply: {}", e)))?;
        let box_fragment = *packet
            .payload
            .first()
            .ok_or_else(|| Error::Handshake("key exchange reply without key".into()))?;

        debug!("Key exchange complete");
        Ok(SessionKey::derive(box_fragment, host_fragment))
    }

    async fn sync(&mut self) -> Result<()> {
        for attempt in 1..=self.config.sync_attempts {
            self.transport.send(&[constants::SYNC_BYTE]).await?;
            let reply = self
                .transport
                .receive(1, Some(self.config.sync_timeout))
                .await?;

            if reply.first() == Some(&constants::SYNC_ACK) {
                debug!(attempt, "Synchronized");
                return Ok(());
            }
            trace!(attempt, reply = %hex::encode(&reply), "Sync unanswered");
        }

        Err(Error::Handshake(format!(
            "no sync acknowledgment after {} attempts",
            self.config.sync_attempts
        )))
    }

    /// Throw away anything left over on the line
    async fn drain(&mut self) -> Result<()> {
        let stale = self.transport.receive(DRAIN_LEN, Some(Duration::ZERO)).await?;
        if !stale.is_empty() {
            debug!(bytes = stale.len(), "Discarded stale input");
        }
        self.needs_drain = false;
        Ok(())
    }

    /// Key of a usable session, or why there is none
    ///
    /// Never touches the transport.
    fn ensure_ready(&self) -> Result<SessionKey> {
        match (self.session.state(), self.session.key()) {
            (ConnectionState::Connected, Some(key)) => Ok(key),
            _ => Err(Error::NotConnected),
        }
    }

    /// Send one command and read `reply_len` bytes back
    async fn exchange(&mut self, command: Command, payload: &[u8], reply_len: usize) -> Result<BytesMut> {
        if self.in_flight && self.session.is_connected() {
            warn!("Previous exchange abandoned mid-flight, session desynchronized");
            return Err(self.desynchronize().await);
        }
        self.in_flight = false;

        let key = self.ensure_ready()?;

        if self.needs_drain {
            if let Err(e) = self.drain().await {
                return Err(self.fail(e).await);
            }
        }

        debug!(%command, "Sending command");
        self.in_flight = true;
        let outcome = self.round_trip(key, command, payload, reply_len).await;
        self.in_flight = false;

        match outcome {
            Ok(reply) => {
                trace!(%command, reply = %hex::encode(&reply), "Received reply");
                Ok(reply)
            }
            Err(Error::Timeout(timeout)) => {
                warn!(%command, "No reply within {:?}", timeout);
                self.needs_drain = true;
                Err(Error::Timeout(timeout))
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Frame, send and wait; no state bookkeeping
    async fn round_trip(
        &mut self,
        key: SessionKey,
        command: Command,
        payload: &[u8],
        reply_len: usize,
    ) -> Result<BytesMut> {
        let frame = frame_command(command, payload, Some(key))?;
        self.transport.send(&frame).await?;

        let reply = self
            .transport
            .receive(reply_len, Some(self.config.timeout))
            .await?;
        if reply.is_empty() {
            return Err(Error::Timeout(self.config.timeout));
        }
        Ok(reply)
    }

    /// Round trip for a command answered with a framed packet
    pub async fn request(&mut self, command: Command, payload: &[u8]) -> Result<Packet> {
        let expected = Reply::for_command(command).ok_or_else(|| {
            Error::InvalidArgument(format!("{} is not answered with a packet", command))
        })?;

        let reply = self.exchange(command, payload, FRAMED_REPLY_LEN).await?;
        let outcome = decode_framed(&reply, expected);
        self.record(outcome).await
    }

    /// Round trip for a command answered with the single-byte acknowledgment
    pub async fn request_ack(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let reply = self.exchange(command, payload, 1).await?;
        let outcome = decode_ack(&reply);
        self.record(outcome).await
    }

    /// Count decode failures; too many in a row desynchronizes the session
    async fn record<R>(&mut self, outcome: et312_core::Result<R>) -> Result<R> {
        match outcome {
            Ok(value) => {
                self.consecutive_failures = 0;
                Ok(value)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.needs_drain = true;

                if self.consecutive_failures >= self.config.max_consecutive_failures {
                    warn!(
                        error = %e,
                        failures = self.consecutive_failures,
                        "Repeated protocol failures, session desynchronized"
                    );
                    return Err(self.desynchronize().await);
                }

                warn!(error = %e, failures = self.consecutive_failures, "Protocol error");
                Err(Error::Protocol(e))
            }
        }
    }

    /// Drop to `Disconnected`, leaving the box unkeyed when it still listens
    async fn desynchronize(&mut self) -> Error {
        self.in_flight = false;
        self.consecutive_failures = 0;

        let key = self.session.key();
        self.session.disconnect();
        if let Some(key) = key {
            self.release_box(key).await;
        }

        Error::Desynchronized
    }

    /// Switch the box and the local transport to `rate`
    ///
    /// Only 19200 and 38400 baud are supported by the box.
    pub async fn change_baud_rate(&mut self, rate: u32) -> Result<()> {
        let ubrr = baud::ubrr_for(rate).ok_or(Error::UnsupportedBaudRate(rate))?;
        self.ensure_ready()?;

        let current = self.transport.speed();
        if current == rate {
            return Ok(());
        }

        info!("Changing line speed {} -> {}", current, rate);
        self.request_ack(Command::Write, &register_payload(MemoryAddress::BAUD_RATE, &[ubrr]))
            .await?;

        if let Err(e) = self.transport.set_speed(rate).await {
            return Err(self.transport_failed(e).await);
        }
        self.needs_drain = true;
        Ok(())
    }

    /// Orderly teardown
    ///
    /// Restores the base line speed, resets the box key so the next client
    /// can key it again, zeroes the local key, moves to `Closed` and
    /// releases the transport. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.session.state() == ConnectionState::Closed && !self.transport.is_open() {
            return Ok(());
        }

        if let Some(key) = self.session.key() {
            self.in_flight = false;
            self.release_box(key).await;
        }

        self.session.close();
        self.in_flight = false;

        if self.transport.is_open() {
            info!("Closing {}...", self.transport.describe());
            self.transport.close().await?;
        }

        Ok(())
    }

    /// Best effort: base speed back on both ends, then box key reset
    ///
    /// Failures are logged; a transport failure closes the session.
    async fn release_box(&mut self, key: SessionKey) {
        if let Err(e) = self.drain().await {
            warn!(error = %e, "Could not drain before releasing the box");
            self.fail(e).await;
            return;
        }

        let base_speed = self.base_speed;
        if self.transport.speed() != base_speed {
            if let Some(ubrr) = baud::ubrr_for(base_speed) {
                match self.write_keyed(key, MemoryAddress::BAUD_RATE, &[ubrr]).await {
                    Ok(()) => {
                        if let Err(e) = self.transport.set_speed(base_speed).await {
                            self.transport_failed(e).await;
                            return;
                        }
                        debug!("Line speed restored to {}", base_speed);
                    }
                    Err(Error::Transport(e)) => {
                        self.transport_failed(e).await;
                        return;
                    }
                    Err(e) => warn!(error = %e, "Could not restore line speed {}", base_speed),
                }
            }
        }

        match self.write_keyed(key, MemoryAddress::BOX_KEY, &[0]).await {
            Ok(()) => debug!("Box key reset"),
            Err(Error::Transport(e)) => {
                self.transport_failed(e).await;
            }
            Err(e) => warn!(error = %e, "Could not reset box key; it stays keyed until power-cycled"),
        }
    }

    async fn write_keyed(&mut self, key: SessionKey, address: MemoryAddress, data: &[u8]) -> Result<()> {
        let reply = self
            .round_trip(key, Command::Write, &register_payload(address, data), 1)
            .await?;
        decode_ack(&reply)?;
        Ok(())
    }

    async fn fail(&mut self, e: Error) -> Error {
        match e {
            Error::Transport(e) => self.transport_failed(e).await,
            other => other,
        }
    }

    /// Channel failures end the session
    async fn transport_failed(&mut self, e: et312_transport::Error) -> Error {
        error!(error = %e, "Transport failure, closing session");
        self.in_flight = false;
        self.session.close();
        if let Err(close_err) = self.transport.close().await {
            debug!(error = %close_err, "Transport close after failure also failed");
        }
        Error::Transport(e)
    }
}

/// Returns the session to `Disconnected` if a handshake does not finish,
/// including when the `connect` future is dropped
struct HandshakeGuard {
    session: Option<Session>,
}

impl HandshakeGuard {
    fn new(session: Session) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn disarm(mut self) {
        self.session = None;
    }
}

impl Drop for HandshakeGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.abort_handshake();
        }
    }
}

impl<T: ByteTransport> Drop for Connection<T> {
    fn drop(&mut self) {
        if self.session.is_connected() {
            warn!("Connection dropped while connected; box keeps its key until power-cycled");
            self.session.close();
        }
    }
}

/// Address followed by data, as the write command expects
pub(crate) fn register_payload(address: MemoryAddress, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + data.len());
    payload.extend_from_slice(&address.to_be_bytes());
    payload.extend_from_slice(data);
    payload
}

fn decode_framed(bytes: &[u8], expected: Reply) -> et312_core::Result<Packet> {
    if bytes == [constants::ERROR_REPLY] {
        return Err(et312_core::Error::DeviceRejected);
    }

    let packet = parse_response(bytes, None)?;
    if packet.opcode != u8::from(expected) {
        return Err(et312_core::Error::UnexpectedReply {
            expected: expected.name(),
            actual: packet.opcode,
        });
    }
    Ok(packet)
}

fn decode_ack(bytes: &[u8]) -> et312_core::Result<()> {
    match bytes {
        [constants::WRITE_ACK] => Ok(()),
        [constants::ERROR_REPLY] => Err(et312_core::Error::DeviceRejected),
        [other, ..] => Err(et312_core::Error::UnexpectedReply {
            expected: "WRITE_ACK",
            actual: *other,
        }),
        [] => Err(et312_core::Error::PacketTooShort {
            expected: 1,
            actual: 0,
        }),
    }
}
