use crate::error::BridgeError;
use crate::runtime::Runtime;
use std::mem;
use tracing::{debug, warn};

/// A machine instance living inside the module, owned by exactly one host
/// value. It isn't `Clone`, and `free` consumes it, so nothing can call into
/// a machine after it's gone:
///
/// ```compile_fail
/// # use chip8_host::{BridgeError, Machine, Runtime};
/// # fn run(rt: &mut Runtime) -> Result<(), BridgeError> {
/// let machine = Machine::new(rt)?;
/// machine.free(rt)?;
/// machine.exit(rt)?;
/// # Ok(())
/// # }
/// ```
///
/// Dropping a machine without freeing it leaks it inside the module.
#[derive(Debug)]
pub struct Machine {
    raw: u32,
}

impl Machine {
    pub fn new(rt: &mut Runtime) -> Result<Machine, BridgeError> {
        let raw = rt.construct_instance()?;
        if raw == 0 {
            return Err(BridgeError::NullPointer("constructInstance"));
        }
        debug!(raw, "machine constructed");
        Ok(Machine { raw })
    }

    /// the module-side reference
    pub fn raw(&self) -> u32 {
        self.raw
    }

    /// load a program image; its contents are opaque to the host
    pub fn load_rom(&self, rt: &mut Runtime, rom: &[u8]) -> Result<(), BridgeError> {
        debug!(raw = self.raw, len = rom.len(), "loading program");
        rt.load_program(self.raw, rom)
    }

    /// has the program finished
    pub fn exit(&self, rt: &mut Runtime) -> Result<bool, BridgeError> {
        rt.query_exit(self.raw)
    }

    /// Destroy the module-side instance. The stored reference is zeroed
    /// before the destructor runs; if the destructor faults the machine is
    /// still gone.
    pub fn free(mut self, rt: &mut Runtime) -> Result<(), BridgeError> {
        let raw = mem::replace(&mut self.raw, 0);
        debug!(raw, "freeing machine");
        rt.destroy_instance(raw)
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        if self.raw != 0 {
            warn!(raw = self.raw, "machine dropped without being freed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use wasmer::wat2wasm;

    const FIXTURE: &str = include_str!("../tests/fixtures/rusty_chip.wat");

    fn runtime() -> Runtime {
        let wasm = wat2wasm(FIXTURE.as_bytes()).unwrap();
        Runtime::new(&wasm, &HostConfig::default()).unwrap()
    }

    #[test]
    fn test_program_load_ok() -> Result<(), BridgeError> {
        let mut rt = runtime();
        let m = Machine::new(&mut rt)?;
        m.load_rom(&mut rt, &[0x00, 0xe0])?; // clear screen
        assert!(!m.exit(&mut rt)?);
        // the module saw the length through the argument slot
        assert_eq!(rt.read_word(m.raw() + 4)?, 2);
        m.free(&mut rt)
    }

    #[test]
    fn test_exit_program() -> Result<(), BridgeError> {
        let mut rt = runtime();
        let m = Machine::new(&mut rt)?;
        m.load_rom(&mut rt, &[0x00, 0xfd])?;
        assert!(m.exit(&mut rt)?);
        m.free(&mut rt)
    }

    #[test]
    fn test_random_source_in_range() -> Result<(), BridgeError> {
        let mut rt = runtime();
        let m = Machine::new(&mut rt)?;
        // the module stores floor(random * 256); it faults if random is out of [0, 1)
        assert!(rt.read_word(m.raw() + 8)? < 256);
        m.free(&mut rt)
    }

    #[test]
    fn test_load_fault_still_releases() -> Result<(), BridgeError> {
        let mut rt = runtime();
        let m = Machine::new(&mut rt)?;
        let err = m.load_rom(&mut rt, &[]).unwrap_err();
        assert_eq!(err.fault_message(), Some("EMPTY_ROM"));
        assert_eq!(rt.ledger().allocations(), 1);
        assert!(rt.ledger().is_balanced());
        m.free(&mut rt)
    }

    #[test]
    fn test_one_construct_one_destroy() -> Result<(), BridgeError> {
        let mut rt = runtime();
        let m = Machine::new(&mut rt)?;
        m.free(&mut rt)?;
        assert_eq!(rt.instance_counts(), (1, 1));
        Ok(())
    }

    #[test]
    fn test_destructor_fault_surfaces() {
        let mut rt = runtime();
        // a null reference makes the module's destructor throw
        let m = Machine { raw: 0 };
        let err = m.free(&mut rt).unwrap_err();
        assert_eq!(err.fault_message(), Some("NULL_POINTER_PASSED_TO_RUST"));
        assert_eq!(rt.instance_counts(), (0, 1));
    }
}
