/*!
Digital signal groups.

Each signal kind maps to a bit segment and a base offset inside it. Indices are
1-based; index `n` of a kind lives at bit address `base + n - 1`.
*/

use crate::error::{Result, SnpxError};
use crate::packet::{Request, Segment};
use crate::session::Session;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Digital signal kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    /// Digital inputs
    Di,
    /// Digital outputs
    Do,
    /// User operator panel inputs
    Ui,
    /// User operator panel outputs
    Uo,
    /// Safety inputs
    Si,
    /// Safety outputs
    So,
}

impl SignalKind {
    pub const ALL: [SignalKind; 6] = [Self::Di, Self::Do, Self::Ui, Self::Uo, Self::Si, Self::So];

    pub fn segment(self) -> Segment {
        match self {
            Self::Di | Self::Ui | Self::Si => Segment::InputBits,
            Self::Do | Self::Uo | Self::So => Segment::OutputBits,
        }
    }

    /// Bit offset of index 1 inside the segment
    pub fn base_address(self) -> u16 {
        match self {
            Self::Di | Self::Do => 0,
            Self::Ui | Self::Uo => 6000,
            Self::Si | Self::So => 7000,
        }
    }

    /// Highest valid index
    pub fn capacity(self) -> u16 {
        match self {
            Self::Di | Self::Do => 1024,
            _ => 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Di => "DI",
            Self::Do => "DO",
            Self::Ui => "UI",
            Self::Uo => "UO",
            Self::Si => "SI",
            Self::So => "SO",
        }
    }

    /// Bit address of `start_index`, after checking that `count` indices fit
    pub fn address_of(self, start_index: u16, count: u16) -> Result<u16> {
        if start_index == 0 {
            return Err(SnpxError::out_of_range(format!("{self} indices start at 1")));
        }
        let last = u32::from(start_index) + u32::from(count) - 1;
        if last > u32::from(self.capacity()) {
            return Err(SnpxError::out_of_range(format!(
                "{self}[{start_index}..={last}] exceeds {self}[{}]",
                self.capacity()
            )));
        }
        Ok(self.base_address() + start_index - 1)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = SnpxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SnpxError::config(format!("unknown signal kind: {s:?}")))
    }
}

/// Block reads and writes on one signal kind of a session
pub struct SignalGroup<'a, T: Transport> {
    session: &'a mut Session<T>,
    kind: SignalKind,
}

impl<'a, T: Transport> SignalGroup<'a, T> {
    pub(crate) fn new(session: &'a mut Session<T>, kind: SignalKind) -> Self {
        Self { session, kind }
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Read `count` signals starting at `start_index`
    ///
    /// The controller is asked for whole bytes; surplus bits are discarded.
    pub fn read(&mut self, count: u16, start_index: u16) -> Result<Vec<bool>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let address = self.kind.address_of(start_index, count)?;
        let requested = count.div_ceil(8) * 8;
        debug!("read {}[{}] x{}", self.kind, start_index, count);

        let reply = self
            .session
            .send_request(&Request::read(self.kind.segment(), address, requested))?;
        unpack_bits(&reply.data, usize::from(count))
    }

    /// Write `values` to consecutive signals starting at `start_index`
    pub fn write(&mut self, values: &[bool], start_index: u16) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let count = u16::try_from(values.len())
            .map_err(|_| SnpxError::out_of_range(format!("{} values exceed {}", values.len(), self.kind)))?;
        let address = self.kind.address_of(start_index, count)?;
        debug!("write {}[{}] {:?}", self.kind, start_index, values);

        self.session
            .send_request(&Request::write(self.kind.segment(), address, count, pack_bits(values)))?;
        Ok(())
    }
}

/// Pack booleans LSB first, eight per byte
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; values.len().div_ceil(8)];
    for (i, &on) in values.iter().enumerate() {
        if on {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// Unpack `count` booleans, LSB first
pub fn unpack_bits(data: &[u8], count: usize) -> Result<Vec<bool>> {
    if data.len() * 8 < count {
        return Err(SnpxError::malformed(format!(
            "{count} bits requested, reply carried {} bytes",
            data.len()
        )));
    }
    Ok((0..count).map(|i| data[i / 8] & (1 << (i % 8)) != 0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::packet::ServiceCode;
    use crate::sim::SimulatedController;

    fn open() -> (SimulatedController, Session<SimulatedController>) {
        let controller = SimulatedController::new();
        let session = Session::open(controller.clone(), ClientConfig::default()).unwrap();
        (controller, session)
    }

    #[test]
    fn test_address_map() {
        assert_eq!(SignalKind::Di.address_of(1, 1).unwrap(), 0);
        assert_eq!(SignalKind::Uo.address_of(3, 1).unwrap(), 6002);
        assert_eq!(SignalKind::So.address_of(1000, 1).unwrap(), 7999);
        assert_eq!(SignalKind::Do.segment(), Segment::OutputBits);
        assert_eq!(SignalKind::Si.segment(), Segment::InputBits);

        assert!(matches!(SignalKind::Di.address_of(0, 1), Err(SnpxError::OutOfRange(_))));
        assert!(matches!(SignalKind::Ui.address_of(999, 3), Err(SnpxError::OutOfRange(_))));
        assert!(SignalKind::Do.address_of(1017, 8).is_ok());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("do".parse::<SignalKind>().unwrap(), SignalKind::Do);
        assert_eq!("SI".parse::<SignalKind>().unwrap(), SignalKind::Si);
        assert!("AI".parse::<SignalKind>().is_err());
    }

    #[test]
    fn test_bit_packing() {
        assert_eq!(pack_bits(&[true, false, true]), vec![0b0000_0101]);
        let mut values = vec![false; 9];
        values[8] = true;
        assert_eq!(pack_bits(&values), vec![0x00, 0x01]);

        assert_eq!(unpack_bits(&[0b0000_0101], 3).unwrap(), vec![true, false, true]);
        assert!(matches!(unpack_bits(&[0xFF], 9), Err(SnpxError::MalformedPacket(_))));
    }

    #[test]
    fn test_digital_round_trip() {
        let (_controller, mut session) = open();
        session.signal(SignalKind::Do).write(&[true, false, true], 1).unwrap();
        assert_eq!(
            session.signal(SignalKind::Do).read(3, 1).unwrap(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_wide_block_round_trip() {
        let (controller, mut session) = open();
        let values: Vec<bool> = (0..60).map(|i| i % 3 == 0 || i == 59).collect();

        session.signal(SignalKind::Do).write(&values, 1).unwrap();
        let write = controller.requests().pop().unwrap();
        assert_eq!(write.service, ServiceCode::WriteMemory);
        assert_eq!(write.length, 60);
        assert_eq!(write.data.len(), 8);
        assert!(!write.is_inline());

        assert_eq!(session.signal(SignalKind::Do).read(60, 1).unwrap(), values);
        assert_eq!(controller.signals(SignalKind::Do, 1, 60), values);
        assert!(session.is_connected());
    }

    #[test]
    fn test_kinds_do_not_alias() {
        let (controller, mut session) = open();
        session.signal(SignalKind::Uo).write(&[true], 2).unwrap();

        assert_eq!(session.signal(SignalKind::Do).read(2, 1).unwrap(), vec![false, false]);
        assert_eq!(session.signal(SignalKind::Ui).read(2, 1).unwrap(), vec![false, false]);
        assert_eq!(controller.signals(SignalKind::Uo, 1, 3), vec![false, true, false]);
    }

    #[test]
    fn test_read_rounds_up_to_bytes() {
        let (controller, mut session) = open();
        controller.set_signals(SignalKind::Di, 5, &[true, true]);

        let values = session.signal(SignalKind::Di).read(3, 4).unwrap();
        assert_eq!(values, vec![false, true, true]);

        let request = controller.requests().pop().unwrap();
        assert_eq!(request.service, ServiceCode::ReadMemory);
        assert_eq!((request.address, request.length), (3, 8));
    }

    #[test]
    fn test_empty_operations_send_nothing() {
        let (controller, mut session) = open();
        let before = controller.requests().len();

        assert!(session.signal(SignalKind::Di).read(0, 1).unwrap().is_empty());
        session.signal(SignalKind::Do).write(&[], 1).unwrap();
        assert_eq!(controller.requests().len(), before);
    }

    #[test]
    fn test_out_of_range_sends_nothing() {
        let (controller, mut session) = open();
        let before = controller.requests().len();

        assert!(matches!(
            session.signal(SignalKind::Do).write(&[true, true], 1024),
            Err(SnpxError::OutOfRange(_))
        ));
        assert!(matches!(
            session.signal(SignalKind::Di).read(1, 0),
            Err(SnpxError::OutOfRange(_))
        ));
        assert_eq!(controller.requests().len(), before);
    }
}
