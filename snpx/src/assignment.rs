/*!
Assignment table.

Controller variables must be bound to a numbered slot range before their values
can be streamed. The table tracks those bindings for one session, guarantees
that no two ranges overlap, and hands out new ranges first-fit from slot 1.
*/

use crate::error::{Result, SnpxError};
use crate::protocol::{MAX_SLOT, REGISTERS_PER_SLOT};
use crate::value::VarType;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A variable bound to `[slot, slot + size)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub variable: String,
    pub var_type: VarType,
    pub slot: u16,
    pub size: u16,
}

impl Assignment {
    /// One past the last slot of the range
    pub fn end(&self) -> u16 {
        self.slot + self.size
    }

    /// Command text registering this assignment on the controller
    pub fn setasg_command(&self) -> String {
        format!(
            "SETASG {} {} {} {}",
            (self.slot - 1) * REGISTERS_PER_SLOT + 1,
            self.size * REGISTERS_PER_SLOT,
            self.variable,
            self.var_type.codec().multiplier
        )
    }
}

/// Outcome of planning an assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The variable is already bound as requested; nothing to register
    Existing(u16),
    /// A new binding that must be registered, then inserted
    Fresh(Assignment),
}

/// Ordered slot map plus reverse lookup by variable name
#[derive(Debug, Default, Clone)]
pub struct AssignmentTable {
    by_slot: BTreeMap<u16, Assignment>,
    by_name: HashMap<String, u16>,
}

impl AssignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot bound to `variable`, if any
    pub fn find(&self, variable: &str) -> Option<u16> {
        self.by_name.get(variable).copied()
    }

    pub fn get(&self, variable: &str) -> Option<&Assignment> {
        self.find(variable).and_then(|slot| self.by_slot.get(&slot))
    }

    /// Assignments in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Assignment> {
        self.by_slot.values()
    }

    pub fn len(&self) -> usize {
        self.by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }

    /// True iff `[slot, slot + size)` lies within 1..=80 and touches no assignment
    pub fn check_available(&self, slot: u16, size: u16) -> bool {
        in_bounds(slot, size) && self.holder(slot, size, None).is_none()
    }

    /// Lowest slot where a range of `size` fits
    pub fn next_available(&self, size: u16) -> Result<u16> {
        self.first_fit(size, None)
    }

    /// Decide how `variable` should be bound without touching the table
    ///
    /// `size` of `None` keeps an existing binding's size, or uses the type default
    /// for a new one. Re-planning a variable with the same type (and the same slot,
    /// when one is given) resolves to the existing binding; any other request for a
    /// known variable produces a fresh binding that replaces the old one on insert.
    pub fn plan(
        &self,
        variable: &str,
        var_type: VarType,
        slot: Option<u16>,
        size: Option<u16>,
    ) -> Result<Resolution> {
        let existing = self.get(variable);

        if let Some(current) = existing {
            let same_shape =
                current.var_type == var_type && size.map_or(true, |s| s == current.size);
            let same_slot = slot.map_or(true, |s| s == current.slot);
            if same_shape && same_slot {
                return Ok(Resolution::Existing(current.slot));
            }
        }

        let size = size
            .or_else(|| existing.filter(|a| a.var_type == var_type).map(|a| a.size))
            .unwrap_or_else(|| var_type.default_size());
        if size == 0 {
            return Err(SnpxError::out_of_range(format!(
                "assignment size for {variable} must be at least 1"
            )));
        }

        let slot = match slot {
            Some(slot) => {
                self.ensure_available(slot, size, variable)?;
                slot
            }
            None => self.first_fit(size, Some(variable))?,
        };

        Ok(Resolution::Fresh(Assignment {
            variable: variable.to_string(),
            var_type,
            slot,
            size,
        }))
    }

    /// Record a binding, replacing any previous binding of the same variable
    pub fn insert(&mut self, assignment: Assignment) {
        if let Some(old) = self.by_name.remove(&assignment.variable) {
            self.by_slot.remove(&old);
        }
        debug!(
            "assignment {} -> slots {}..{}",
            assignment.variable,
            assignment.slot,
            assignment.end()
        );
        self.by_name.insert(assignment.variable.clone(), assignment.slot);
        self.by_slot.insert(assignment.slot, assignment);
    }

    pub fn clear(&mut self) {
        self.by_slot.clear();
        self.by_name.clear();
    }

    fn ensure_available(&self, slot: u16, size: u16, variable: &str) -> Result<()> {
        if !in_bounds(slot, size) {
            return Err(SnpxError::out_of_range(format!(
                "slots {slot}..{} fall outside 1..={MAX_SLOT}",
                u32::from(slot) + u32::from(size)
            )));
        }
        match self.holder(slot, size, Some(variable)) {
            Some(holder) => Err(SnpxError::AssignmentConflict {
                slot,
                size,
                holder: holder.variable.clone(),
            }),
            None => Ok(()),
        }
    }

    fn first_fit(&self, size: u16, exclude: Option<&str>) -> Result<u16> {
        if size == 0 {
            return Err(SnpxError::out_of_range("assignment size must be at least 1"));
        }
        (1..=MAX_SLOT)
            .find(|&slot| in_bounds(slot, size) && self.holder(slot, size, exclude).is_none())
            .ok_or(SnpxError::NoAssignmentSlot { size })
    }

    /// First assignment overlapping `[slot, slot + size)`, ignoring `exclude`
    fn holder(&self, slot: u16, size: u16, exclude: Option<&str>) -> Option<&Assignment> {
        let end = u32::from(slot) + u32::from(size);
        self.by_slot
            .values()
            .take_while(|a| u32::from(a.slot) < end)
            .find(|a| a.end() > slot && Some(a.variable.as_str()) != exclude)
    }
}

fn in_bounds(slot: u16, size: u16) -> bool {
    slot >= 1 && size >= 1 && u32::from(slot) + u32::from(size) - 1 <= u32::from(MAX_SLOT)
}
