/*!
# SNPX Robot Controller Client

Synchronous client for the SNPX protocol, the SRTP-derived binary protocol robot
controllers expose for I/O signals, positions and system variables over TCP.

## Core Types

- [`Session`] - One connection plus the assignment table it owns
- [`AssignmentTable`] - Variable-to-slot bookkeeping with first-fit allocation
- [`Request`] / [`Reply`] - Frames of the packet codec
- [`SignalGroup`] - DI/DO/UI/UO/SI/SO block access
- [`PositionReader`] - Joint and Cartesian position snapshots
- [`SimulatedController`] - In-memory controller for tests and demos

## Modules

- [`packet`] - 56-byte header framing, encode/decode
- [`value`] - Variable types and their codec table
- [`assignment`] - Assignment table
- [`transport`] - Transport trait and TCP implementation
- [`session`] - Handshake, request/response exchange, assignment registration
- [`signal`], [`position`], [`sysvar`] - Typed accessors
- [`config`] - Client configuration
- [`error`] - Error types

## Usage

```no_run
use snpx::{Session, SignalKind, Value, VarType};

let mut session = Session::connect("192.168.1.10", snpx::protocol::DEFAULT_PORT)?;

session.signal(SignalKind::Do).write(&[true, false, true], 1)?;
let inputs = session.signal(SignalKind::Di).read(8, 1)?;

let joints = session.joint_position().read()?;

session.write_sys_var("$ANGTOL[1]", VarType::Real, &Value::Real(1200.13))?;
let tol = session.read_sys_var("$ANGTOL[1]", VarType::Real)?;

session.disconnect()?;
# Ok::<(), snpx::SnpxError>(())
```
*/

pub mod assignment;
pub mod config;
pub mod error;
pub mod packet;
pub mod position;
pub mod session;
pub mod signal;
pub mod sim;
pub mod sysvar;
pub mod transport;
pub mod value;

// Re-export commonly used types
pub use assignment::{Assignment, AssignmentTable, Resolution};
pub use config::ClientConfig;
pub use error::{ProtocolError, Result, SnpxError};
pub use packet::{Reply, Request, Segment, ServiceCode};
pub use position::{PositionKind, PositionReader, POSITION_CELLS};
pub use session::Session;
pub use signal::{SignalGroup, SignalKind};
pub use sim::SimulatedController;
pub use transport::{TcpTransport, Transport};
pub use value::{Value, VarType};

/// Version information for the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Size of the fixed frame header in bytes
    pub const HEADER_LEN: usize = 56;

    /// Default controller TCP port
    pub const DEFAULT_PORT: u16 = 60008;

    /// Highest assignment slot number (slots are 1-based)
    pub const MAX_SLOT: u16 = 80;

    /// Controller registers (16-bit words) behind one slot cell
    pub const REGISTERS_PER_SLOT: u16 = 2;

    /// Bytes behind one slot cell
    pub const SLOT_BYTES: usize = 4;

    /// Largest request data carried inside the header
    pub const INLINE_DATA_MAX: usize = 6;

    /// Size of the inline data area of an acknowledge
    pub const REPLY_INLINE_LEN: usize = 6;

    /// Command clearing every controller-side assignment
    pub const CLEAR_ASSIGNMENTS: &str = "CLRASG";

    /// Register word offset of a slot
    pub const fn register_offset(slot: u16) -> u16 {
        (slot - 1) * REGISTERS_PER_SLOT
    }
}
