use crate::error::BridgeError;
use std::cell::Cell;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use wasmer::{AsStoreRef, Memory, MemoryAccessError, MemoryView, WasmPtr};

// NB. addresses are u32 as per wasm32; lengths are u32 too since that's what
//     the module's allocator takes

/// how many 32-bit words the argument slot holds
pub const ARGUMENT_SLOT_WORDS: usize = 4;

/// Identity of the buffer currently backing linear memory. Wasm memory is only
/// ever replaced by growing it, and it never shrinks, so its size tells one
/// allocation apart from the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferIdentity {
    pub bytes: u64,
}

/// Live view onto the module's linear memory.
///
/// Views are never cached: every access asks the store for a fresh
/// `MemoryView`, and only the identity of the buffer is remembered so that a
/// reallocation shows up in the logs. A `MemoryView` borrows the store, and
/// calling into the module needs the store mutably, so a view can't be held
/// across a call.
#[derive(Debug)]
pub struct LinearMemory {
    memory: Memory,
    identity: Cell<Option<BufferIdentity>>,
    resyncs: Cell<u64>,
}

impl LinearMemory {
    pub fn new(memory: Memory) -> Self {
        LinearMemory {
            memory,
            identity: Cell::new(None),
            resyncs: Cell::new(0),
        }
    }

    /// get a view over the current buffer, re-synchronising if the module has
    /// reallocated it since the last access
    pub fn view<'a>(&self, store: &'a impl AsStoreRef) -> MemoryView<'a> {
        let view = self.memory.view(store);
        let current = BufferIdentity {
            bytes: view.data_size(),
        };
        if self.identity.get() != Some(current) {
            debug!(
                previous = ?self.identity.get().map(|i| i.bytes),
                current = current.bytes,
                "linear memory buffer changed; rebuilding view"
            );
            self.identity.set(Some(current));
            self.resyncs.set(self.resyncs.get() + 1);
        }
        view
    }

    /// identity of the buffer seen by the most recent view
    pub fn identity(&self) -> Option<BufferIdentity> {
        self.identity.get()
    }

    /// how many distinct buffers have been observed
    pub fn resync_count(&self) -> u64 {
        self.resyncs.get()
    }

    /// write a chunk of bytes into linear memory
    pub fn write_bytes(
        &self,
        store: &impl AsStoreRef,
        addr: u32,
        data: &[u8],
    ) -> Result<(), BridgeError> {
        self.view(store).write(addr as u64, data)?;
        Ok(())
    }

    /// copy a range of linear memory out
    pub fn read_bytes(
        &self,
        store: &impl AsStoreRef,
        addr: u32,
        len: u32,
    ) -> Result<Vec<u8>, BridgeError> {
        let view = self.view(store);
        if addr as u64 + len as u64 > view.data_size() {
            return Err(MemoryAccessError::HeapOutOfBounds.into());
        }
        let mut buf = vec![0u8; len as usize];
        view.read(addr as u64, &mut buf)?;
        Ok(buf)
    }

    /// decode a range of linear memory as UTF-8 text; bad sequences come out
    /// as U+FFFD rather than failing
    pub fn read_string(
        &self,
        store: &impl AsStoreRef,
        addr: u32,
        len: u32,
    ) -> Result<String, BridgeError> {
        let bytes = self.read_bytes(store, addr, len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// write a 32-bit word (little-endian, as wasm has it)
    pub fn write_word(
        &self,
        store: &impl AsStoreRef,
        addr: u32,
        value: u32,
    ) -> Result<(), BridgeError> {
        let view = self.view(store);
        WasmPtr::<u32>::new(addr).write(&view, value)?;
        Ok(())
    }

    /// read a 32-bit word
    pub fn read_word(&self, store: &impl AsStoreRef, addr: u32) -> Result<u32, BridgeError> {
        let view = self.view(store);
        Ok(WasmPtr::<u32>::new(addr).read(&view)?)
    }
}

/// The module's scratch area for scalar arguments that don't fit the call
/// signature, e.g. the length that goes with a pointer. It's a fixed-size side
/// channel, not a general way to pass parameters.
///
/// The base address is asked for once and kept for the life of the module.
#[derive(Debug, Default)]
pub struct ArgumentSlot {
    base: Option<u32>,
}

impl ArgumentSlot {
    pub fn new() -> Self {
        ArgumentSlot { base: None }
    }

    /// base address, if it has been resolved yet
    pub fn base(&self) -> Option<u32> {
        self.base
    }

    /// resolve the base address with `resolver` on first use
    pub fn resolve(
        &mut self,
        resolver: impl FnOnce() -> Result<u32, BridgeError>,
    ) -> Result<u32, BridgeError> {
        match self.base {
            Some(base) => Ok(base),
            None => {
                let base = resolver()?;
                debug!(base = format_args!("{:#x}", base), "resolved argument slot");
                self.base = Some(base);
                Ok(base)
            }
        }
    }

    /// address of word `index` counting from `base`
    pub fn word_addr(base: u32, index: usize) -> Result<u32, BridgeError> {
        if index >= ARGUMENT_SLOT_WORDS {
            return Err(BridgeError::ArgumentSlotOverflow {
                index,
                capacity: ARGUMENT_SLOT_WORDS,
            });
        }
        4u32.checked_mul(index as u32)
            .and_then(|offset| base.checked_add(offset))
            .ok_or(BridgeError::ArgumentSlotOutOfRange { base, index })
    }
}

/// A host byte sequence copied into module memory. It can only be made by
/// the runtime's allocator path and only be given back through its release
/// path, which consumes it.
#[must_use = "a marshalled buffer leaks module memory unless it is released"]
#[derive(Debug, PartialEq, Eq)]
pub struct Marshalled {
    ptr: u32,
    len: u32,
}

impl Marshalled {
    pub(crate) fn new(ptr: u32, len: u32) -> Self {
        Marshalled { ptr, len }
    }

    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn into_parts(self) -> (u32, u32) {
        (self.ptr, self.len)
    }
}

/// Book-keeping of every allocate/free pair the host has issued.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AllocationLedger {
    allocations: u64,
    frees: u64,
    live: BTreeMap<u32, u32>,
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_alloc(&mut self, ptr: u32, len: u32) {
        self.allocations += 1;
        if let Some(old) = self.live.insert(ptr, len) {
            warn!(ptr, old, len, "allocator handed out a live pointer twice");
        }
    }

    pub fn record_free(&mut self, ptr: u32, len: u32) {
        self.frees += 1;
        match self.live.remove(&ptr) {
            Some(allocated) if allocated == len => {}
            Some(allocated) => {
                warn!(ptr, allocated, len, "freed with a different length");
            }
            None => warn!(ptr, len, "freed a pointer that isn't live"),
        }
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn frees(&self) -> u64 {
        self.frees
    }

    /// live (pointer, length) pairs
    pub fn live(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.live.iter().map(|(p, l)| (*p, *l))
    }

    pub fn live_bytes(&self) -> u64 {
        self.live.values().map(|l| *l as u64).sum()
    }

    /// every allocation has been freed exactly once
    pub fn is_balanced(&self) -> bool {
        self.allocations == self.frees && self.live.is_empty()
    }
}
