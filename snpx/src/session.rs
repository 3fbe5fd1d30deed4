/*!
SNPX session.

A [`Session`] owns one transport and the assignment table that belongs to it.
Requests are strictly sequential: each call writes one frame and blocks until
the matching reply has been read and validated. A reply that arrives after its
request timed out carries an older sequence number; it is discarded when the
next request reads its own reply. The connection is closed when
the session is dropped, when [`Session::disconnect`] is called, or as soon as a
socket-level failure is observed.
*/

use crate::assignment::{Assignment, AssignmentTable, Resolution};
use crate::config::ClientConfig;
use crate::error::{ProtocolError, Result, SnpxError};
use crate::packet::{self, PacketType, Reply, Request, Segment, HELLO};
use crate::position::{PositionKind, PositionReader};
use crate::protocol::{register_offset, CLEAR_ASSIGNMENTS, REGISTERS_PER_SLOT};
use crate::signal::{SignalGroup, SignalKind};
use crate::transport::{TcpTransport, Transport};
use crate::value::VarType;
use bytes::Bytes;
use std::net::ToSocketAddrs;
use tracing::{debug, info, warn};

/// Sequence distance below which a differing reply counts as late, not foreign
const STALE_WINDOW: u16 = 0x8000;

/// One controller connection plus its assignment table
pub struct Session<T: Transport = TcpTransport> {
    transport: T,
    assignments: AssignmentTable,
    sequence: u16,
    config: ClientConfig,
}

impl Session<TcpTransport> {
    /// Connect to `host:port` with default settings
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with(ClientConfig::new(host, port))
    }

    /// Connect using a full configuration
    pub fn connect_with(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let peer = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(SnpxError::Connection)?
            .next()
            .ok_or_else(|| {
                SnpxError::Connection(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address found for {}", config.host),
                ))
            })?;

        let transport = TcpTransport::connect(peer, config.connect_timeout(), config.read_timeout())?;
        Self::open(transport, config)
    }
}

impl<T: Transport> Session<T> {
    /// Run the handshake over an already connected transport
    pub fn open(transport: T, config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut session = Self {
            transport,
            assignments: AssignmentTable::new(),
            sequence: 0,
            config,
        };
        // On failure the session drops here and closes the transport
        session.handshake()?;
        Ok(session)
    }

    fn handshake(&mut self) -> Result<()> {
        let frame = self.exchange(&HELLO)?;
        match packet::decode(&frame) {
            Ok(reply) if reply.packet_type == PacketType::Welcome => {}
            _ => {
                let kind = frame.first().copied().unwrap_or_default();
                return Err(ProtocolError::HandshakeFailed(kind).into());
            }
        }

        self.send_request(&Request::open_protocol())?;

        if self.config.clear_assignments_on_connect {
            self.clear_assignments()?;
        }

        info!("✅ SNPX session ready ({} axes)", self.config.axis_count);
        Ok(())
    }

    /// Write one frame and read one frame, closing the transport on fatal errors
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        if !self.transport.is_open() {
            return Err(SnpxError::ConnectionClosed);
        }

        let sent = self.transport.send(frame);
        self.check(sent)?;
        self.receive()
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let received = self.transport.receive();
        self.check(received)
    }

    fn check<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!("Connection lost: {}", e);
                if let Err(close_err) = self.transport.close() {
                    warn!("Failed to close transport: {}", close_err);
                }
            }
        }
        result
    }

    fn next_sequence(&mut self) -> u16 {
        self.sequence = self.sequence.wrapping_add(1).max(1);
        self.sequence
    }

    /// Send one request and return its validated reply
    pub fn send_request(&mut self, request: &Request) -> Result<Reply> {
        let sequence = self.next_sequence();
        debug!(
            "#{} {:?} {:?} address {} length {}",
            sequence, request.service, request.segment, request.address, request.length
        );

        let mut frame = self.exchange(&request.encode(sequence))?;
        loop {
            let actual = packet::frame_sequence(&frame)?;
            if !is_stale(sequence, actual) {
                break;
            }
            debug!("#{} discarding late reply #{}", sequence, actual);
            frame = self.receive()?;
        }

        let reply = packet::decode(&frame)?;
        if reply.sequence != sequence {
            return Err(ProtocolError::SequenceMismatch {
                expected: sequence,
                actual: reply.sequence,
            }
            .into());
        }
        Ok(reply)
    }

    /// Write command text to the controller's command segment
    pub fn send_command(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(SnpxError::out_of_range("command text must not be empty"));
        }
        let request = Request::command(text)?;
        debug!("command: {}", text);
        self.send_request(&request)?;
        Ok(())
    }

    /// Drop every assignment, on the controller and locally
    pub fn clear_assignments(&mut self) -> Result<()> {
        self.send_command(CLEAR_ASSIGNMENTS)?;
        self.assignments.clear();
        Ok(())
    }

    /// Bind `variable` to a slot, registering it on the controller when needed
    ///
    /// Without an explicit slot the lowest free range is used. Calling this again
    /// for an already bound variable returns its slot without any wire traffic.
    pub fn set_assignment(&mut self, variable: &str, var_type: VarType, slot: Option<u16>) -> Result<u16> {
        self.register(variable, var_type, slot, None)
    }

    /// Like [`Session::set_assignment`] with an explicit size in slot cells
    pub fn set_assignment_sized(
        &mut self,
        variable: &str,
        var_type: VarType,
        slot: Option<u16>,
        size: u16,
    ) -> Result<u16> {
        self.register(variable, var_type, slot, Some(size))
    }

    /// Slot of `variable`, creating the assignment on first use
    pub fn resolve_or_create(&mut self, variable: &str, var_type: VarType) -> Result<u16> {
        self.register(variable, var_type, None, None)
    }

    pub fn check_slot_available(&self, slot: u16, size: u16) -> bool {
        self.assignments.check_available(slot, size)
    }

    pub fn next_available_slot(&self, size: u16) -> Result<u16> {
        self.assignments.next_available(size)
    }

    pub fn assignments(&self) -> &AssignmentTable {
        &self.assignments
    }

    pub(crate) fn register(
        &mut self,
        variable: &str,
        var_type: VarType,
        slot: Option<u16>,
        size: Option<u16>,
    ) -> Result<u16> {
        validate_variable(variable)?;

        match self.assignments.plan(variable, var_type, slot, size)? {
            Resolution::Existing(slot) => Ok(slot),
            Resolution::Fresh(assignment) => {
                self.send_command(&assignment.setasg_command())?;
                info!(
                    "📌 {} ({}) assigned to slots {}..{}",
                    assignment.variable,
                    assignment.var_type,
                    assignment.slot,
                    assignment.end()
                );
                let slot = assignment.slot;
                self.assignments.insert(assignment);
                Ok(slot)
            }
        }
    }

    pub(crate) fn assignment(&self, variable: &str) -> Option<&Assignment> {
        self.assignments.get(variable)
    }

    /// Read the register block behind `size` cells starting at `slot`
    pub(crate) fn read_slots(&mut self, slot: u16, size: u16) -> Result<Bytes> {
        let reply = self.send_request(&Request::read(
            Segment::Register,
            register_offset(slot),
            size * REGISTERS_PER_SLOT,
        ))?;
        Ok(reply.data)
    }

    /// Write `data` into the register block behind `size` cells starting at `slot`
    pub(crate) fn write_slots(&mut self, slot: u16, size: u16, data: Vec<u8>) -> Result<()> {
        self.send_request(&Request::write(
            Segment::Register,
            register_offset(slot),
            size * REGISTERS_PER_SLOT,
            data,
        ))?;
        Ok(())
    }

    /// Block access to one digital signal group
    pub fn signal(&mut self, kind: SignalKind) -> SignalGroup<'_, T> {
        SignalGroup::new(self, kind)
    }

    pub fn joint_position(&mut self) -> PositionReader<'_, T> {
        PositionReader::new(self, PositionKind::Joint)
    }

    pub fn cartesian_position(&mut self) -> PositionReader<'_, T> {
        PositionReader::new(self, PositionKind::Cartesian)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Close the connection
    pub fn disconnect(mut self) -> Result<()> {
        info!("👋 Disconnecting");
        self.transport.close()
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if self.transport.is_open() {
            if let Err(e) = self.transport.close() {
                warn!("Failed to close transport: {}", e);
            }
        }
    }
}

/// A reply to an earlier request of this session
fn is_stale(expected: u16, actual: u16) -> bool {
    let behind = expected.wrapping_sub(actual);
    behind != 0 && behind < STALE_WINDOW
}

/// Variable names travel inside space-separated command text
fn validate_variable(variable: &str) -> Result<()> {
    if variable.is_empty() || !variable.is_ascii() || variable.chars().any(char::is_whitespace) {
        return Err(SnpxError::out_of_range(format!(
            "invalid variable name {variable:?}"
        )));
    }
    Ok(())
}
