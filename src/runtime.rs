//! # runtime
//!
//! Hosts the sandboxed interpreter module. The module can't hand us structured
//! values: everything crosses as numbers, with bytes copied through its linear
//! memory. A call that takes a byte sequence goes:
//!
//!  1. ask the module to allocate `len` bytes, copy the bytes in
//!  2. put `len` into word 0 of the argument slot
//!  3. call the export with the pointer
//!  4. free the allocation again, whatever happened in 3
//!
//! Faults the module raises come back through the error callback import as a
//! (pointer, length) string and surface as `BridgeError::Fault`.
use crate::config::{ExportNames, HostConfig};
use crate::error::{BridgeError, ModuleFault};
use crate::memory::{AllocationLedger, ArgumentSlot, LinearMemory, Marshalled};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use wasmer::{
    AsStoreRef, Function, FunctionEnv, FunctionEnvMut, Imports, Instance, Module, Store,
    TypedFunction, WasmTypeList,
};

/// state the host imports need
struct HostEnv {
    memory: Option<LinearMemory>,
    rng: StdRng,
}

/// turn the (pointer, length) the module threw into a fault, reading through
/// a freshly synchronised view
pub(crate) fn decode_fault(
    memory: &LinearMemory,
    store: &impl AsStoreRef,
    ptr: u32,
    len: u32,
) -> ModuleFault {
    match memory.read_string(store, ptr, len) {
        Ok(message) => ModuleFault::new(message),
        Err(err) => ModuleFault::new(format!(
            "unreadable fault message at {:#x}+{}: {}",
            ptr, len, err
        )),
    }
}

fn error_callback(mut env: FunctionEnvMut<HostEnv>, ptr: i32, len: i32) -> Result<(), ModuleFault> {
    let (host, store) = env.data_and_store_mut();
    let fault = match &host.memory {
        Some(memory) => decode_fault(memory, &store, ptr as u32, len as u32),
        None => ModuleFault::new("fault raised before linear memory was bound"),
    };
    warn!(message = %fault.message, "module raised a fault");
    Err(fault)
}

fn random_source(mut env: FunctionEnvMut<HostEnv>) -> f64 {
    env.data_mut().rng.gen::<f64>()
}

fn typed<Args, Rets>(
    instance: &Instance,
    store: &Store,
    name: &str,
) -> Result<TypedFunction<Args, Rets>, BridgeError>
where
    Args: WasmTypeList,
    Rets: WasmTypeList,
{
    instance
        .exports
        .get_typed_function(store, name)
        .map_err(|source| BridgeError::Export {
            name: name.to_string(),
            source,
        })
}

/// the module's export surface, resolved and type-checked up front
struct Exports {
    construct: TypedFunction<(), i32>,
    destroy: TypedFunction<i32, ()>,
    load_program: TypedFunction<(i32, i32), ()>,
    query_exit: TypedFunction<i32, i32>,
    allocate: TypedFunction<i32, i32>,
    free: TypedFunction<(i32, i32), ()>,
    argument_slot_base: TypedFunction<(), i32>,
}

impl Exports {
    fn resolve(instance: &Instance, store: &Store, names: &ExportNames) -> Result<Self, BridgeError> {
        Ok(Exports {
            construct: typed(instance, store, &names.construct)?,
            destroy: typed(instance, store, &names.destroy)?,
            load_program: typed(instance, store, &names.load_program)?,
            query_exit: typed(instance, store, &names.query_exit)?,
            allocate: typed(instance, store, &names.allocate)?,
            free: typed(instance, store, &names.free)?,
            argument_slot_base: typed(instance, store, &names.argument_slot_base)?,
        })
    }
}

/// An instantiated interpreter module and everything needed to talk to it.
pub struct Runtime {
    store: Store,
    exports: Exports,
    memory: LinearMemory,
    slot: ArgumentSlot,
    ledger: AllocationLedger,
    constructed: u64,
    destroyed: u64,
}

impl Runtime {
    /// compile and instantiate a module from its binary (or, with the `wat`
    /// feature, its text form)
    pub fn new(wasm: &[u8], config: &HostConfig) -> Result<Runtime, BridgeError> {
        let names = &config.exports;
        let mut store = Store::default();
        let module = Module::new(&store, wasm)?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let env = FunctionEnv::new(&mut store, HostEnv { memory: None, rng });

        let mut imports = Imports::new();
        imports.define(
            &names.import_module,
            &names.error_callback,
            Function::new_typed_with_env(&mut store, &env, error_callback),
        );
        imports.define(
            &names.import_module,
            &names.random_source,
            Function::new_typed_with_env(&mut store, &env, random_source),
        );

        let instance = Instance::new(&mut store, &module, &imports)?;
        let memory = instance
            .exports
            .get_memory(&names.memory)
            .map_err(|source| BridgeError::Export {
                name: names.memory.clone(),
                source,
            })?
            .clone();
        env.as_mut(&mut store).memory = Some(LinearMemory::new(memory.clone()));
        let exports = Exports::resolve(&instance, &store, names)?;

        let memory = LinearMemory::new(memory);
        info!(bytes = memory.view(&store).data_size(), "module instantiated");
        Ok(Runtime {
            store,
            exports,
            memory,
            slot: ArgumentSlot::new(),
            ledger: AllocationLedger::new(),
            constructed: 0,
            destroyed: 0,
        })
    }

    pub fn from_file(path: impl AsRef<Path>, config: &HostConfig) -> Result<Runtime, BridgeError> {
        let wasm = fs::read(path)?;
        Self::new(&wasm, config)
    }

    /// copy `bytes` into freshly allocated module memory
    pub fn pass_bytes(&mut self, bytes: &[u8]) -> Result<Marshalled, BridgeError> {
        let len = u32::try_from(bytes.len()).map_err(|_| BridgeError::TooLarge(bytes.len()))?;
        let ptr = self.exports.allocate.call(&mut self.store, len as i32)? as u32;
        if ptr == 0 && len > 0 {
            return Err(BridgeError::NullPointer("allocate"));
        }
        self.ledger.record_alloc(ptr, len);
        let buf = Marshalled::new(ptr, len);
        debug!(ptr, len, "marshalled bytes");

        // the allocation may have grown memory; write_bytes takes a fresh view
        if let Err(err) = self.memory.write_bytes(&self.store, ptr, bytes) {
            if let Err(release) = self.release(buf) {
                warn!(error = %release, "failed to release after a failed copy");
            }
            return Err(err);
        }
        Ok(buf)
    }

    /// give a marshalled buffer back to the module's allocator
    pub fn release(&mut self, buf: Marshalled) -> Result<(), BridgeError> {
        let (ptr, len) = buf.into_parts();
        self.ledger.record_free(ptr, len);
        debug!(ptr, len, "released marshalled bytes");
        self.exports
            .free
            .call(&mut self.store, ptr as i32, len as i32)?;
        Ok(())
    }

    /// Marshal `bytes`, run `f` with the buffer, then release the buffer on
    /// every path. An error from `f` wins over an error from the release.
    pub fn with_marshalled<T>(
        &mut self,
        bytes: &[u8],
        f: impl FnOnce(&mut Runtime, &Marshalled) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let buf = self.pass_bytes(bytes)?;
        let result = f(self, &buf);
        let released = self.release(buf);
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release)) => {
                warn!(error = %release, "release failed after a failed call");
                Err(err)
            }
        }
    }

    /// write a scalar into word `index` of the argument slot
    pub fn set_scalar_argument(&mut self, value: u32, index: usize) -> Result<(), BridgeError> {
        let base = self.slot.resolve(|| {
            Ok(self.exports.argument_slot_base.call(&mut self.store)? as u32)
        })?;
        let addr = ArgumentSlot::word_addr(base, index)?;
        self.memory.write_word(&self.store, addr, value)
    }

    pub(crate) fn construct_instance(&mut self) -> Result<u32, BridgeError> {
        let raw = self.exports.construct.call(&mut self.store)? as u32;
        self.constructed += 1;
        Ok(raw)
    }

    pub(crate) fn destroy_instance(&mut self, raw: u32) -> Result<(), BridgeError> {
        self.destroyed += 1;
        self.exports.destroy.call(&mut self.store, raw as i32)?;
        Ok(())
    }

    pub(crate) fn load_program(&mut self, raw: u32, program: &[u8]) -> Result<(), BridgeError> {
        self.with_marshalled(program, |rt, buf| {
            rt.set_scalar_argument(buf.len(), 0)?;
            rt.exports
                .load_program
                .call(&mut rt.store, raw as i32, buf.ptr() as i32)?;
            Ok(())
        })
    }

    pub(crate) fn query_exit(&mut self, raw: u32) -> Result<bool, BridgeError> {
        Ok(self.exports.query_exit.call(&mut self.store, raw as i32)? != 0)
    }

    /// copy bytes out of module memory
    pub fn read_bytes(&self, addr: u32, len: u32) -> Result<Vec<u8>, BridgeError> {
        self.memory.read_bytes(&self.store, addr, len)
    }

    pub fn read_word(&self, addr: u32) -> Result<u32, BridgeError> {
        self.memory.read_word(&self.store, addr)
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    pub fn ledger(&self) -> &AllocationLedger {
        &self.ledger
    }

    /// argument slot base address, once something has needed it
    pub fn argument_slot_base(&self) -> Option<u32> {
        self.slot.base()
    }

    /// (constructed, destroyed) machine instances
    pub fn instance_counts(&self) -> (u64, u64) {
        (self.constructed, self.destroyed)
    }
}
