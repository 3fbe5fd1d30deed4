/*!
System variable access.

Any controller variable can be read or written by name once it is bound to a
slot range; the binding is created on first use and reused afterwards.
*/

use crate::error::{Result, SnpxError};
use crate::session::Session;
use crate::transport::Transport;
use crate::value::{Value, VarType};
use tracing::debug;

impl<T: Transport> Session<T> {
    /// Cells the variable occupies, or would occupy once registered
    fn cells_for(&self, name: &str, var_type: VarType) -> u16 {
        self.assignment(name)
            .filter(|a| a.var_type == var_type)
            .map_or_else(|| var_type.default_size(), |a| a.size)
    }

    /// Read a system variable as `var_type`
    pub fn read_sys_var(&mut self, name: &str, var_type: VarType) -> Result<Value> {
        let slot = self.resolve_or_create(name, var_type)?;
        let cells = self.cells_for(name, var_type);

        let data = self.read_slots(slot, cells)?;
        let value = var_type.decode(&data)?;
        debug!("{} = {}", name, value);
        Ok(value)
    }

    /// Write `value` to a system variable declared as `var_type`
    ///
    /// The value is validated and encoded before anything is sent, so a type
    /// mismatch or an oversized string never reaches the controller.
    pub fn write_sys_var(&mut self, name: &str, var_type: VarType, value: &Value) -> Result<()> {
        if value.var_type() != var_type {
            return Err(SnpxError::TypeMismatch {
                expected: var_type,
                found: value.var_type(),
            });
        }
        let cells = self.cells_for(name, var_type);
        let data = var_type.encode(value, cells)?;

        let slot = self.resolve_or_create(name, var_type)?;
        debug!("{} := {}", name, value);
        self.write_slots(slot, cells, data)
    }
}
