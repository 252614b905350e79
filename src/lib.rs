//! # chip8-host
//!
//! Host side of a CHIP-8 interpreter that runs inside a sandboxed wasm module.
//! The host can't see into the module. It can only:
//!
//! * read and write the module's linear memory
//! * call the module's exports, which take and return plain numbers
//! * get told about faults, as a (pointer, length) string in that memory
//!
//! ## Design
//!
//! * never keep a view of linear memory around; the module can grow (and so
//!   reallocate) it on any call
//! * byte sequences go in through the module's allocator and always come back
//!   out through its free, even when the call in between fails
//! * one owner per machine instance; freeing it consumes the handle
//! * faults from the module are their own error type, not a panic
//! * abstract the display and the keyboard behind traits, like the
//!   interpreter doesn't need to know how they work
//!
//! Model
//!
//! ```text
//! Session
//!  |-- Runtime (store, exports, linear memory, argument slot, ledger)
//!  |    `-- Machine (handle on the module-side instance)
//!  |-- Framebuffer(Surface)
//!  |-- Keypad(KeyState) <- Input
//!  `-- main loop
//!       |-- input.pump(keypad)
//!       |-- machine.exit()?
//!       |-- framebuffer.present()
//!       `-- sleep(rest of the frame)
//! ```
pub mod config;
pub mod display;
pub mod error;
pub mod input;
pub mod logging;
pub mod machine;
pub mod memory;
pub mod runtime;
pub mod session;

pub use config::{ExportNames, HostConfig};
pub use error::{BridgeError, ModuleFault};
pub use machine::Machine;
pub use runtime::Runtime;
pub use session::{RunSummary, Session};
