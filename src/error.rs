use std::io;
use thiserror::Error;
use wasmer::{CompileError, ExportError, InstantiationError, MemoryAccessError, RuntimeError};

/// A fault the module raised through its error callback. The message is the
/// decoded text, untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ModuleFault {
    pub message: String,
}

impl ModuleFault {
    pub fn new(message: impl Into<String>) -> Self {
        ModuleFault {
            message: message.into(),
        }
    }
}

/// Everything that can go wrong while talking to the module.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to compile module: {0}")]
    Compile(#[from] CompileError),

    #[error("failed to instantiate module: {0}")]
    Instantiate(#[from] InstantiationError),

    #[error("module export `{name}` is unusable: {source}")]
    Export {
        name: String,
        #[source]
        source: ExportError,
    },

    #[error("linear memory access failed: {0}")]
    MemoryAccess(#[from] MemoryAccessError),

    /// the module signalled an unrecoverable condition
    #[error("module fault: {0}")]
    Fault(#[from] ModuleFault),

    #[error("module trapped: {0}")]
    Trap(RuntimeError),

    #[error("argument slot {index} is past the slot capacity of {capacity} words")]
    ArgumentSlotOverflow { index: usize, capacity: usize },

    #[error("argument slot word {index} from base {base:#x} is past the end of 32-bit memory")]
    ArgumentSlotOutOfRange { base: u32, index: usize },

    #[error("{0} returned a null pointer")]
    NullPointer(&'static str),

    #[error("{0} is too large for 32-bit linear memory")]
    TooLarge(usize),

    #[error("bad configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<RuntimeError> for BridgeError {
    /// faults raised through the error callback come back wrapped in a
    /// `RuntimeError`; unwrap them so callers see the module's own message
    fn from(err: RuntimeError) -> Self {
        match err.downcast::<ModuleFault>() {
            Ok(fault) => BridgeError::Fault(fault),
            Err(err) => BridgeError::Trap(err),
        }
    }
}

impl BridgeError {
    /// the module's message, if this is a module fault
    pub fn fault_message(&self) -> Option<&str> {
        match self {
            BridgeError::Fault(fault) => Some(fault.message.as_str()),
            _ => None,
        }
    }
}
