/*!
Joint and Cartesian position readers.

Both readers stream the same position variable through one REAL assignment of
[`POSITION_CELLS`] cells (50 registers). The block carries the Cartesian
values X, Y, Z, W, P, R plus any extended axes from register 0, and the joint
values from register [`JOINT_REGISTER_OFFSET`].
*/

use crate::error::{Result, SnpxError};
use crate::protocol::SLOT_BYTES;
use crate::session::Session;
use crate::transport::Transport;
use crate::value::{decode_reals, VarType};
use serde::{Deserialize, Serialize};

/// Slot cells registered for the position block
pub const POSITION_CELLS: u16 = 25;

/// First register of the joint values inside the position block
pub const JOINT_REGISTER_OFFSET: usize = 26;

/// Representation of a position snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionKind {
    Joint,
    Cartesian,
}

impl PositionKind {
    /// Number of REAL values in one snapshot
    pub fn value_count(self, axis_count: usize) -> usize {
        match self {
            Self::Joint => axis_count,
            Self::Cartesian => 6 + axis_count.saturating_sub(6),
        }
    }

    /// Byte offset of the first value inside the position block
    pub fn data_offset(self) -> usize {
        match self {
            Self::Joint => JOINT_REGISTER_OFFSET * 2,
            Self::Cartesian => 0,
        }
    }
}

/// Reads position snapshots through a session
pub struct PositionReader<'a, T: Transport> {
    session: &'a mut Session<T>,
    kind: PositionKind,
}

impl<'a, T: Transport> PositionReader<'a, T> {
    pub(crate) fn new(session: &'a mut Session<T>, kind: PositionKind) -> Self {
        Self { session, kind }
    }

    pub fn kind(&self) -> PositionKind {
        self.kind
    }

    /// Controller variable behind the position block
    pub fn variable(&self) -> &str {
        &self.session.config().position_variable
    }

    /// Read one snapshot, registering the position block on first use
    pub fn read(&mut self) -> Result<Vec<f32>> {
        let count = self.kind.value_count(self.session.config().axis_count);
        let variable = self.variable().to_string();

        let slot = self
            .session
            .register(&variable, VarType::Real, None, Some(POSITION_CELLS))?;
        let data = self.session.read_slots(slot, POSITION_CELLS)?;

        let start = self.kind.data_offset();
        let values = data.get(start..start + count * SLOT_BYTES).ok_or_else(|| {
            SnpxError::malformed(format!(
                "position block has {} bytes, {:?} values need {}",
                data.len(),
                self.kind,
                start + count * SLOT_BYTES
            ))
        })?;
        decode_reals(values, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::sim::SimulatedController;

    #[test]
    fn test_value_counts() {
        assert_eq!(PositionKind::Joint.value_count(6), 6);
        assert_eq!(PositionKind::Joint.value_count(4), 4);
        assert_eq!(PositionKind::Cartesian.value_count(6), 6);
        assert_eq!(PositionKind::Cartesian.value_count(4), 6);
        assert_eq!(PositionKind::Cartesian.value_count(8), 8);
    }

    #[test]
    fn test_joint_values_fit_for_every_axis_count() {
        let block = usize::from(POSITION_CELLS) * SLOT_BYTES;
        for axes in 1..=9 {
            for kind in [PositionKind::Joint, PositionKind::Cartesian] {
                assert!(kind.data_offset() + kind.value_count(axes) * SLOT_BYTES <= block);
            }
        }
        assert!(PositionKind::Cartesian.value_count(9) * SLOT_BYTES <= PositionKind::Joint.data_offset());
    }

    #[test]
    fn test_both_readers_share_one_block() {
        let controller = SimulatedController::new();
        let cartesian = [850.0, 0.0, 600.0, 180.0, 0.0, 0.0];
        let joints = [10.0, -20.5, 30.25, 0.0, -90.0, 180.0];
        controller.set_position("POS[G1:0]", &cartesian, &joints);

        let mut session = Session::open(controller.clone(), ClientConfig::default()).unwrap();
        assert_eq!(session.joint_position().read().unwrap(), joints.to_vec());
        assert_eq!(session.cartesian_position().read().unwrap(), cartesian.to_vec());
        assert_eq!(session.joint_position().read().unwrap(), joints.to_vec());

        assert_eq!(controller.setasg_count(), 1);
        assert_eq!(controller.commands()[1], "SETASG 1 50 POS[G1:0] 0.0");
        assert_eq!(session.next_available_slot(1).unwrap(), 26);

        // The whole block is read every time
        let request = controller.requests().pop().unwrap();
        assert_eq!((request.address, request.length), (0, 50));
    }

    #[test]
    fn test_cartesian_with_extended_axes() {
        let controller = SimulatedController::new();
        let cartesian = [500.0, 0.0, 750.5, 180.0, 0.0, 90.0, 1200.0];
        let joints = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 1200.0];
        controller.set_position("POS[G1:0]", &cartesian, &joints);

        let config = ClientConfig {
            axis_count: 7,
            ..ClientConfig::default()
        };
        let mut session = Session::open(controller.clone(), config).unwrap();

        let mut reader = session.cartesian_position();
        assert_eq!(reader.variable(), "POS[G1:0]");
        assert_eq!(reader.read().unwrap(), cartesian.to_vec());
        assert_eq!(session.joint_position().read().unwrap(), joints.to_vec());
        assert_eq!(session.assignments().get("POS[G1:0]").map(|a| a.size), Some(POSITION_CELLS));
    }

    #[test]
    fn test_configured_variable_name() {
        let controller = SimulatedController::new();
        controller.set_position("POS[G2:0]", &[1.0; 6], &[2.0; 6]);

        let config = ClientConfig {
            position_variable: "POS[G2:0]".to_string(),
            ..ClientConfig::default()
        };
        let mut session = Session::open(controller.clone(), config).unwrap();
        assert_eq!(session.joint_position().read().unwrap(), vec![2.0; 6]);
        assert_eq!(controller.commands()[1], "SETASG 1 50 POS[G2:0] 0.0");
    }
}
