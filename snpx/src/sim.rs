/*!
In-memory SNPX controller.

[`SimulatedController`] answers frames the way a controller does: it greets the
hello frame, accepts the protocol-open request, executes `CLRASG`/`SETASG`
command text, and serves register and bit memory. Variables live in a name map
and are copied into register memory when they get assigned, so position
snapshots and system variables can be staged before a session reads them.

The handle is cheap to clone; every clone shares the same state. One clone
can drive a [`Session`](crate::Session) as its [`Transport`] while another
inspects or manipulates the controller from the outside.
*/

use crate::error::{Result, SnpxError};
use crate::packet::{encode_rejection, Reply, Request, Segment, ServiceCode, Status};
use crate::position::{PositionKind, POSITION_CELLS};
use crate::protocol::{HEADER_LEN, MAX_SLOT, SLOT_BYTES};
use crate::signal::{pack_bits, unpack_bits, SignalKind};
use crate::transport::Transport;
use crate::value::{Value, VarType};
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Request could not be parsed or is not supported
pub const STATUS_BAD_REQUEST: Status = Status { major: 0x05, minor: 0x01 };

/// Address or length outside controller memory
pub const STATUS_INVALID_ADDRESS: Status = Status { major: 0x05, minor: 0x02 };

/// Request arrived before the hello/open exchange
pub const STATUS_NOT_READY: Status = Status { major: 0x05, minor: 0x03 };

const REGISTER_BYTES: usize = MAX_SLOT as usize * SLOT_BYTES;

type Outcome = std::result::Result<Vec<u8>, Status>;

struct Binding {
    variable: String,
    bytes: Range<usize>,
}

struct ControllerState {
    open: bool,
    welcomed: bool,
    protocol_open: bool,
    pending: VecDeque<Vec<u8>>,
    registers: Vec<u8>,
    bindings: Vec<Binding>,
    variables: HashMap<String, Vec<u8>>,
    bits: HashMap<(Segment, u32), bool>,
    commands: Vec<String>,
    requests: Vec<Request>,
    reject_next: Option<Status>,
    drop_next: bool,
    delay_next: bool,
    held: Option<Vec<u8>>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            open: true,
            welcomed: false,
            protocol_open: false,
            pending: VecDeque::new(),
            registers: vec![0; REGISTER_BYTES],
            bindings: Vec::new(),
            variables: HashMap::new(),
            bits: HashMap::new(),
            commands: Vec::new(),
            requests: Vec::new(),
            reject_next: None,
            drop_next: false,
            delay_next: false,
            held: None,
        }
    }

    fn handle(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() >= HEADER_LEN && frame.iter().all(|&b| b == 0) {
            debug!("sim: hello");
            self.welcomed = true;
            self.protocol_open = false;
            return Some(Reply::welcome().encode().to_vec());
        }

        let sequence = frame.get(2..4).map_or(0, |b| u16::from_le_bytes([b[0], b[1]]));
        let request = match Request::decode(frame) {
            Ok((_, request)) => request,
            Err(e) => {
                warn!("sim: rejecting undecodable request: {}", e);
                return Some(encode_rejection(sequence, STATUS_BAD_REQUEST).to_vec());
            }
        };
        self.requests.push(request.clone());

        if self.drop_next {
            self.drop_next = false;
            return None;
        }
        if let Some(status) = self.reject_next.take() {
            return Some(encode_rejection(sequence, status).to_vec());
        }

        match self.execute(&request) {
            Ok(data) => Some(Reply::ack(sequence, data).encode().to_vec()),
            Err(status) => {
                debug!("sim: rejecting {:?} with {:?}", request.service, status);
                Some(encode_rejection(sequence, status).to_vec())
            }
        }
    }

    fn execute(&mut self, request: &Request) -> Outcome {
        if !self.welcomed {
            return Err(STATUS_NOT_READY);
        }
        if request.service == ServiceCode::OpenProtocol {
            self.protocol_open = true;
            return Ok(Vec::new());
        }
        if !self.protocol_open {
            return Err(STATUS_NOT_READY);
        }

        match (request.service, request.segment) {
            (ServiceCode::WriteMemory, Segment::Command) => {
                let text = request
                    .data
                    .get(..usize::from(request.length))
                    .and_then(|raw| std::str::from_utf8(raw).ok())
                    .ok_or(STATUS_BAD_REQUEST)?;
                self.run_command(text)?;
                Ok(Vec::new())
            }
            (ServiceCode::ReadMemory, Segment::Register) => {
                let range = self.register_range(request.address, request.length)?;
                Ok(self.registers[range].to_vec())
            }
            (ServiceCode::WriteMemory, Segment::Register) => {
                self.write_registers(request.address, request.length, &request.data)?;
                Ok(Vec::new())
            }
            (ServiceCode::ReadMemory, segment @ (Segment::InputBits | Segment::OutputBits)) => {
                let values: Vec<bool> = (0..u32::from(request.length))
                    .map(|i| self.bit(segment, u32::from(request.address) + i))
                    .collect();
                Ok(pack_bits(&values))
            }
            (ServiceCode::WriteMemory, segment @ (Segment::InputBits | Segment::OutputBits)) => {
                let values = unpack_bits(&request.data, usize::from(request.length))
                    .map_err(|_| STATUS_BAD_REQUEST)?;
                self.store_bits(segment, u32::from(request.address), &values);
                Ok(Vec::new())
            }
            _ => Err(STATUS_BAD_REQUEST),
        }
    }

    fn run_command(&mut self, text: &str) -> std::result::Result<(), Status> {
        let mut tokens = text.split_whitespace();
        match tokens.next() {
            Some("CLRASG") => self.bindings.clear(),
            Some("SETASG") => {
                let mut number = || -> std::result::Result<usize, Status> {
                    tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or(STATUS_BAD_REQUEST)
                };
                let first = number()?;
                let words = number()?;
                let variable = tokens.next().ok_or(STATUS_BAD_REQUEST)?.to_string();
                // Multiplier
                tokens.next().ok_or(STATUS_BAD_REQUEST)?;

                if first == 0 || words == 0 || (first - 1 + words) * 2 > self.registers.len() {
                    return Err(STATUS_INVALID_ADDRESS);
                }
                let bytes = (first - 1) * 2..(first - 1 + words) * 2;
                self.bindings
                    .retain(|b| b.variable != variable && (b.bytes.end <= bytes.start || b.bytes.start >= bytes.end));

                let window = &mut self.registers[bytes.clone()];
                window.fill(0);
                if let Some(stored) = self.variables.get(&variable) {
                    let n = stored.len().min(window.len());
                    window[..n].copy_from_slice(&stored[..n]);
                }
                debug!("sim: {} bound to registers {:?}", variable, bytes);
                self.bindings.push(Binding { variable, bytes });
            }
            _ => return Err(STATUS_BAD_REQUEST),
        }
        self.commands.push(text.to_string());
        Ok(())
    }

    fn register_range(&self, address: u16, words: u16) -> std::result::Result<Range<usize>, Status> {
        let start = usize::from(address) * 2;
        let end = start + usize::from(words) * 2;
        if words == 0 || end > self.registers.len() {
            return Err(STATUS_INVALID_ADDRESS);
        }
        Ok(start..end)
    }

    fn write_registers(&mut self, address: u16, words: u16, data: &[u8]) -> std::result::Result<(), Status> {
        let range = self.register_range(address, words)?;
        let payload = data.get(..range.len()).ok_or(STATUS_BAD_REQUEST)?;
        self.registers[range.clone()].copy_from_slice(payload);

        for binding in &self.bindings {
            if binding.bytes.start < range.end && range.start < binding.bytes.end {
                self.variables
                    .insert(binding.variable.clone(), self.registers[binding.bytes.clone()].to_vec());
            }
        }
        Ok(())
    }

    fn store_variable(&mut self, name: &str, bytes: Vec<u8>) {
        if let Some(binding) = self.bindings.iter().find(|b| b.variable == name) {
            let window = &mut self.registers[binding.bytes.clone()];
            window.fill(0);
            let n = bytes.len().min(window.len());
            window[..n].copy_from_slice(&bytes[..n]);
        }
        self.variables.insert(name.to_string(), bytes);
    }

    fn bit(&self, segment: Segment, address: u32) -> bool {
        self.bits.get(&(segment, address)).copied().unwrap_or(false)
    }

    fn store_bits(&mut self, segment: Segment, address: u32, values: &[bool]) {
        for (offset, &value) in (0u32..).zip(values) {
            self.bits.insert((segment, address + offset), value);
        }
    }
}

/// Shared handle to a simulated controller
#[derive(Clone)]
pub struct SimulatedController {
    inner: Arc<Mutex<ControllerState>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    /// Empty controller, connection open
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ControllerState::new())),
        }
    }

    /// Controller with a parked robot, a few system variables and some live inputs
    pub fn with_demo_state() -> Self {
        let controller = Self::new();
        controller.set_position(
            "POS[G1:0]",
            &[850.0, 0.0, 600.0, 180.0, 0.0, 0.0],
            &[0.0, -15.0, 30.0, 0.0, -45.0, 90.0],
        );
        controller.set_reals("$ANGTOL[1]", &[1200.13]);
        controller.set_raw("$MCR.$GENOVERRIDE", 100i32.to_le_bytes().to_vec());
        controller.set_raw("$TP_CURPROG", b"MAIN".to_vec());
        controller.set_signals(SignalKind::Di, 1, &[true, false, true, true]);
        controller.set_signals(SignalKind::Ui, 1, &[true, true, false, true]);
        controller
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer one frame; `None` means no reply is sent
    pub fn handle_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        self.state().handle(frame)
    }

    /// Stage consecutive REAL values behind a variable name
    pub fn set_reals(&self, name: &str, values: &[f32]) {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.set_raw(name, bytes);
    }

    /// Stage a position block: Cartesian values first, joint values at their offset
    pub fn set_position(&self, name: &str, cartesian: &[f32], joints: &[f32]) {
        let mut bytes = vec![0u8; usize::from(POSITION_CELLS) * SLOT_BYTES];
        for (kind, values) in [(PositionKind::Cartesian, cartesian), (PositionKind::Joint, joints)] {
            let start = kind.data_offset();
            for (chunk, value) in bytes[start..].chunks_exact_mut(SLOT_BYTES).zip(values) {
                chunk.copy_from_slice(&value.to_le_bytes());
            }
        }
        self.set_raw(name, bytes);
    }

    /// Stage a typed value behind a variable name
    pub fn set_value(&self, name: &str, value: &Value) -> Result<()> {
        let var_type = value.var_type();
        let bytes = var_type.encode(value, var_type.default_size())?;
        self.set_raw(name, bytes);
        Ok(())
    }

    fn set_raw(&self, name: &str, bytes: Vec<u8>) {
        self.state().store_variable(name, bytes);
    }

    /// Raw bytes currently stored for a variable
    pub fn variable(&self, name: &str) -> Option<Vec<u8>> {
        self.state().variables.get(name).cloned()
    }

    pub fn value(&self, name: &str, var_type: VarType) -> Option<Value> {
        self.variable(name).and_then(|bytes| var_type.decode(&bytes).ok())
    }

    /// Drive signals from the controller side, 1-based like the client API
    pub fn set_signals(&self, kind: SignalKind, start_index: u16, values: &[bool]) {
        let address = u32::from(kind.base_address()) + u32::from(start_index.max(1)) - 1;
        self.state().store_bits(kind.segment(), address, values);
    }

    pub fn signals(&self, kind: SignalKind, start_index: u16, count: u16) -> Vec<bool> {
        let address = u32::from(kind.base_address()) + u32::from(start_index.max(1)) - 1;
        let state = self.state();
        (0..u32::from(count))
            .map(|i| state.bit(kind.segment(), address + i))
            .collect()
    }

    /// Command texts executed so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn setasg_count(&self) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| c.starts_with("SETASG"))
            .count()
    }

    /// Every decoded request received so far, hello frames excluded
    pub fn requests(&self) -> Vec<Request> {
        self.state().requests.clone()
    }

    /// Reject the next request with `status`
    pub fn reject_next(&self, status: Status) {
        self.state().reject_next = Some(status);
    }

    /// Swallow the next request without replying
    pub fn drop_next_reply(&self) {
        self.state().drop_next = true;
    }

    /// Hold back the reply to the next request until another request arrives
    ///
    /// Only affects the in-memory transport; the late reply is queued ahead of
    /// the reply to that following request.
    pub fn delay_next_reply(&self) {
        self.state().delay_next = true;
    }
}

impl Transport for SimulatedController {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let mut state = self.state();
        if !state.open {
            return Err(SnpxError::ConnectionClosed);
        }
        let reply = state.handle(frame);
        if state.delay_next {
            state.delay_next = false;
            state.held = reply;
            return Ok(());
        }
        if let Some(late) = state.held.take() {
            state.pending.push_back(late);
        }
        if let Some(reply) = reply {
            state.pending.push_back(reply);
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let mut state = self.state();
        if !state.open {
            return Err(SnpxError::ConnectionClosed);
        }
        state.pending.pop_front().ok_or(SnpxError::Timeout(Duration::ZERO))
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state();
        state.open = false;
        state.pending.clear();
        state.held = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }
}
