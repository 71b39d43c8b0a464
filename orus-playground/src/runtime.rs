//! Host side of the Orus runtime artifact.
//!
//! The artifact is a wasm module that exposes a small string-in /
//! string-out surface. [`Runtime`] is that surface as seen by the
//! bridge; [`WasmRuntime`] implements it on top of `wasmi`.
//!
//! Strings cross the boundary as `(ptr, len)` pairs into the module's
//! exported `memory`. Results come back packed into an `i64` as
//! `(ptr << 32) | len`.

use wasmi::{Caller, Engine, Extern, Instance, Linker, Memory, Module, Store, TypedFunc};

use crate::error::{LoadError, RuntimeFault};

pub const EXPORT_MEMORY: &str = "memory";
pub const EXPORT_INIT: &str = "orus_init";
pub const EXPORT_IS_READY: &str = "orus_is_ready";
pub const EXPORT_ALLOC: &str = "orus_alloc";
pub const EXPORT_RUN_SOURCE: &str = "orus_run_source";
pub const EXPORT_LAST_ERROR: &str = "orus_last_error";
pub const EXPORT_CLEAR_ERROR: &str = "orus_clear_error";
pub const EXPORT_REGISTER_BUILTINS: &str = "orus_register_builtins";
pub const EXPORT_TEARDOWN: &str = "orus_teardown";

/// Host import the artifact calls to emit program output.
pub const IMPORT_MODULE: &str = "env";
pub const IMPORT_WRITE: &str = "orus_write";

/// Callable surface of a loaded runtime.
///
/// Every method takes `&mut self`: the underlying VM is single-threaded
/// and the handle serializes access to it.
pub trait Runtime: Send {
    fn is_ready(&mut self) -> Result<bool, RuntimeFault>;
    fn initialize(&mut self) -> Result<(), RuntimeFault>;
    /// No-op for artifacts that do not ship builtins.
    fn register_builtins(&mut self) -> Result<(), RuntimeFault>;
    fn clear_last_error(&mut self) -> Result<(), RuntimeFault>;
    fn run_source(&mut self, source: &str) -> Result<String, RuntimeFault>;
    /// `None` when no error was recorded since the last clear.
    fn last_error(&mut self) -> Result<Option<String>, RuntimeFault>;
    fn teardown(&mut self) -> Result<(), RuntimeFault> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HostState {
    output: String,
}

pub struct WasmRuntime {
    store: Store<HostState>,
    memory: Memory,
    init: TypedFunc<(), ()>,
    is_ready: TypedFunc<(), i32>,
    alloc: TypedFunc<i32, i32>,
    run_source: TypedFunc<(i32, i32), i64>,
    last_error: TypedFunc<(), i64>,
    clear_error: TypedFunc<(), ()>,
    register_builtins: Option<TypedFunc<(), ()>>,
    teardown: Option<TypedFunc<(), ()>>,
}

impl WasmRuntime {
    /// Compile and instantiate the payload, resolving every entry point
    /// up front so a malformed artifact fails at load time, not at the
    /// first run.
    pub fn instantiate(payload: &[u8]) -> Result<Self, LoadError> {
        let engine = Engine::default();
        let module =
            Module::new(&engine, payload).map_err(|err| LoadError::Instantiate(err.to_string()))?;

        let mut linker = <Linker<HostState>>::new(&engine);
        linker
            .func_wrap(IMPORT_MODULE, IMPORT_WRITE, host_write)
            .map_err(|err| LoadError::Instantiate(err.to_string()))?;

        let mut store = Store::new(&engine, HostState::default());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .map_err(|err| LoadError::Instantiate(err.to_string()))?;

        let memory = instance
            .get_memory(&store, EXPORT_MEMORY)
            .ok_or_else(|| LoadError::MissingEntryPoint(EXPORT_MEMORY.to_string()))?;

        Ok(Self {
            memory,
            init: required(&instance, &store, EXPORT_INIT)?,
            is_ready: required(&instance, &store, EXPORT_IS_READY)?,
            alloc: required(&instance, &store, EXPORT_ALLOC)?,
            run_source: required(&instance, &store, EXPORT_RUN_SOURCE)?,
            last_error: required(&instance, &store, EXPORT_LAST_ERROR)?,
            clear_error: required(&instance, &store, EXPORT_CLEAR_ERROR)?,
            register_builtins: instance
                .get_typed_func(&store, EXPORT_REGISTER_BUILTINS)
                .ok(),
            teardown: instance.get_typed_func(&store, EXPORT_TEARDOWN).ok(),
            store,
        })
    }

    fn read_packed(&self, packed: i64) -> Result<String, RuntimeFault> {
        let (ptr, len) = unpack(packed);
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = guest_bytes(self.memory.data(&self.store), ptr, len).ok_or_else(|| {
            RuntimeFault::new(format!("result out of bounds: {len} bytes at {ptr}"))
        })?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

impl Runtime for WasmRuntime {
    fn is_ready(&mut self) -> Result<bool, RuntimeFault> {
        Ok(self.is_ready.call(&mut self.store, ())? != 0)
    }

    fn initialize(&mut self) -> Result<(), RuntimeFault> {
        self.init.call(&mut self.store, ())?;
        Ok(())
    }

    fn register_builtins(&mut self) -> Result<(), RuntimeFault> {
        if let Some(register) = &self.register_builtins {
            register.call(&mut self.store, ())?;
        }
        Ok(())
    }

    fn clear_last_error(&mut self) -> Result<(), RuntimeFault> {
        self.clear_error.call(&mut self.store, ())?;
        Ok(())
    }

    fn run_source(&mut self, source: &str) -> Result<String, RuntimeFault> {
        let bytes = source.as_bytes();
        let len = i32::try_from(bytes.len())
            .map_err(|_| RuntimeFault::new("source is too large for the runtime"))?;
        let ptr = self.alloc.call(&mut self.store, len)?;
        self.memory
            .write(&mut self.store, ptr as u32 as usize, bytes)
            .map_err(|err| RuntimeFault::new(format!("source does not fit in memory: {err}")))?;

        self.store.data_mut().output.clear();
        let packed = self.run_source.call(&mut self.store, (ptr, len))?;
        let returned = self.read_packed(packed)?;

        let mut text = std::mem::take(&mut self.store.data_mut().output);
        text.push_str(&returned);
        Ok(text)
    }

    fn last_error(&mut self) -> Result<Option<String>, RuntimeFault> {
        let packed = self.last_error.call(&mut self.store, ())?;
        let message = self.read_packed(packed)?;
        Ok(if message.is_empty() { None } else { Some(message) })
    }

    fn teardown(&mut self) -> Result<(), RuntimeFault> {
        if let Some(teardown) = &self.teardown {
            teardown.call(&mut self.store, ())?;
        }
        Ok(())
    }
}

fn required<Params, Results>(
    instance: &Instance,
    store: &Store<HostState>,
    name: &str,
) -> Result<TypedFunc<Params, Results>, LoadError>
where
    Params: wasmi::WasmParams,
    Results: wasmi::WasmResults,
{
    instance
        .get_typed_func::<Params, Results>(store, name)
        .map_err(|_| LoadError::MissingEntryPoint(name.to_string()))
}

fn host_write(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> Result<(), wasmi::Error> {
    let Some(memory) = caller.get_export(EXPORT_MEMORY).and_then(Extern::into_memory) else {
        return Err(wasmi::Error::new("orus_write called without exported memory"));
    };
    let (ptr, len) = (ptr as u32 as usize, len as u32 as usize);
    let Some(bytes) = guest_bytes(memory.data(&caller), ptr, len) else {
        return Err(wasmi::Error::new(format!(
            "orus_write out of bounds: {len} bytes at {ptr}"
        )));
    };
    let text = String::from_utf8_lossy(bytes).into_owned();
    caller.data_mut().output.push_str(&text);
    Ok(())
}

/// `len` bytes at `ptr`, or `None` if the range leaves linear memory.
fn guest_bytes(memory: &[u8], ptr: usize, len: usize) -> Option<&[u8]> {
    memory.get(ptr..ptr.checked_add(len)?)
}

fn unpack(packed: i64) -> (usize, usize) {
    let raw = packed as u64;
    ((raw >> 32) as usize, (raw & 0xFFFF_FFFF) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestArtifact;

    fn runtime() -> WasmRuntime {
        WasmRuntime::instantiate(&TestArtifact::new().payload()).expect("instantiate")
    }

    #[test]
    fn unpacks_pointer_and_length() {
        assert_eq!(unpack((1024_i64 << 32) | 7), (1024, 7));
        assert_eq!(unpack(0), (0, 0));
    }

    #[test]
    fn guest_ranges_stay_inside_memory() {
        let memory = [1u8, 2, 3, 4];
        assert_eq!(guest_bytes(&memory, 1, 2), Some(&memory[1..3]));
        assert_eq!(guest_bytes(&memory, 4, 0), Some(&memory[4..4]));
        assert_eq!(guest_bytes(&memory, 3, 2), None);
        assert_eq!(guest_bytes(&memory, usize::MAX, 2), None);
    }

    #[test]
    fn oversized_result_length_is_a_fault() {
        let runtime = runtime();
        let packed = (16_i64 << 32) | 0xFFFF_FFFF;
        let err = runtime.read_packed(packed).expect_err("out of bounds");
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn reports_ready_only_after_initialize() {
        let mut runtime = runtime();
        assert!(!runtime.is_ready().expect("query"));
        runtime.initialize().expect("init");
        assert!(runtime.is_ready().expect("query"));
    }

    #[test]
    fn echoes_source_through_linear_memory() {
        let mut runtime = runtime();
        runtime.initialize().expect("init");
        let out = runtime.run_source("5\n10\n").expect("run");
        assert_eq!(out, "5\n10\n");
        assert_eq!(runtime.last_error().expect("query"), None);
    }

    #[test]
    fn records_and_clears_last_error() {
        let mut runtime = runtime();
        runtime.initialize().expect("init");
        let out = runtime.run_source("!Error: divide by zero").expect("run");
        assert!(out.is_empty());
        assert_eq!(
            runtime.last_error().expect("query").as_deref(),
            Some("Error: divide by zero")
        );
        runtime.clear_last_error().expect("clear");
        assert_eq!(runtime.last_error().expect("query"), None);
    }

    #[test]
    fn captures_host_writes_as_output() {
        let mut runtime = runtime();
        runtime.initialize().expect("init");
        let out = runtime.run_source(">printed").expect("run");
        assert_eq!(out, "printed");
    }

    #[test]
    fn surfaces_traps_as_faults() {
        let mut runtime = runtime();
        runtime.initialize().expect("init");
        assert!(runtime.run_source("#boom").is_err());
    }

    #[test]
    fn rejects_artifact_without_run_entry_point() {
        let payload = TestArtifact::new()
            .without_export(EXPORT_RUN_SOURCE)
            .payload();
        let err = WasmRuntime::instantiate(&payload).err().expect("must fail");
        assert_eq!(err, LoadError::MissingEntryPoint(EXPORT_RUN_SOURCE.to_string()));
    }

    #[test]
    fn rejects_bytes_that_are_not_wasm() {
        let err = WasmRuntime::instantiate(b"not wasm").err().expect("must fail");
        assert!(matches!(err, LoadError::Instantiate(_)));
    }
}
