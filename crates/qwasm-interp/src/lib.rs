//! Runs modules generated with `qwasm-dsl` in the `wasmi` interpreter.
//!
//! # Host interface
//!
//! Generated code reports runtime failures through two imports of the
//! `imports` module, both followed by a trap:
//! - `insist(message_index: i32)`: a runtime check failed
//! - `throw(kind: i64, message_index: i32)`: an exception was thrown
//!
//! [`Instance`] links both, resolves the message index against the table
//! embedded in the `qwasm.messages` custom section, and returns the report
//! as [`InterpError::Insist`] or [`InterpError::Exception`] from the call
//! that trapped.  Further imports can be defined with
//! [`Instance::with_imports`].  Linear memory is found under whatever name
//! the module exports it.

pub mod error;

use tracing::debug;
use wasmi::{Caller, Engine, Linker, Memory, Store, WasmParams, WasmResults};
use wasmparser::{ExternalKind, Parser, Payload};

use qwasm_dsl::{ExceptionKind, MessageTable, IMPORT_MODULE, MESSAGES_SECTION};

pub use error::{InterpError, InterpResult};

/// State the host callbacks work on.
#[derive(Debug, Default)]
pub struct HostState {
    messages: MessageTable,
    /// Report of the last failed check or throw, until a call picks it up.
    pending: Option<InterpError>,
}

impl HostState {
    pub fn messages(&self) -> &MessageTable {
        &self.messages
    }

    fn report_insist(&mut self, index: i32) {
        let report = match self.messages.get(index as u32) {
            Some(entry) => InterpError::Insist {
                file: entry.file.clone(),
                line: entry.line,
                message: entry.message.clone(),
            },
            None => InterpError::Trap(format!("insist with unknown message {index}")),
        };
        self.pending = Some(report);
    }

    fn report_throw(&mut self, kind: i64, index: i32) {
        let report = match (ExceptionKind::try_from(kind as u64), self.messages.get(index as u32)) {
            (Ok(kind), Some(entry)) => InterpError::Exception {
                kind,
                file: entry.file.clone(),
                line: entry.line,
                message: entry.message.clone(),
            },
            (Ok(kind), None) => InterpError::Trap(format!("{kind} thrown with unknown message {index}")),
            (Err(err), _) => InterpError::Trap(err.to_string()),
        };
        self.pending = Some(report);
    }
}

/// Read the message table out of a binary; empty if the module has none.
pub fn read_messages(wasm: &[u8]) -> InterpResult<MessageTable> {
    for payload in Parser::new(0).parse_all(wasm) {
        if let Payload::CustomSection(reader) = payload? {
            if reader.name() == MESSAGES_SECTION {
                return Ok(MessageTable::from_json(reader.data())?);
            }
        }
    }
    Ok(MessageTable::new())
}

/// Name under which a binary exports its linear memory, if it does.
pub fn memory_export(wasm: &[u8]) -> InterpResult<Option<String>> {
    for payload in Parser::new(0).parse_all(wasm) {
        if let Payload::ExportSection(reader) = payload? {
            for export in reader {
                let export = export?;
                if export.kind == ExternalKind::Memory {
                    return Ok(Some(export.name.to_string()));
                }
            }
        }
    }
    Ok(None)
}

/// An instantiated module.
pub struct Instance {
    store: Store<HostState>,
    instance: wasmi::Instance,
    memory: Option<Memory>,
}

impl Instance {
    /// Instantiate `wasm` with the runtime-error callbacks linked.
    pub fn new(wasm: &[u8]) -> InterpResult<Self> {
        Self::with_imports(wasm, |_, _| Ok(()))
    }

    /// Instantiate `wasm`; `define` can add imports beyond the runtime-error
    /// callbacks.
    pub fn with_imports(
        wasm: &[u8],
        define: impl FnOnce(&mut Store<HostState>, &mut Linker<HostState>) -> InterpResult<()>,
    ) -> InterpResult<Self> {
        let messages = read_messages(wasm)?;
        let memory_name = memory_export(wasm)?;
        let engine = Engine::default();
        let module = wasmi::Module::new(&engine, wasm)?;
        let mut store = Store::new(
            &engine,
            HostState {
                messages,
                pending: None,
            },
        );
        let mut linker = <Linker<HostState>>::new(&engine);

        linker
            .func_wrap(IMPORT_MODULE, "insist", |mut caller: Caller<'_, HostState>, index: i32| {
                caller.data_mut().report_insist(index);
            })
            .map_err(|e| InterpError::Link(e.to_string()))?;
        linker
            .func_wrap(
                IMPORT_MODULE,
                "throw",
                |mut caller: Caller<'_, HostState>, kind: i64, index: i32| {
                    caller.data_mut().report_throw(kind, index);
                },
            )
            .map_err(|e| InterpError::Link(e.to_string()))?;
        define(&mut store, &mut linker)?;

        let instance = linker.instantiate(&mut store, &module)?.start(&mut store)?;
        let memory = memory_name
            .as_deref()
            .and_then(|name| instance.get_memory(&store, name));
        debug!(bytes = wasm.len(), messages = store.data().messages.len(), "module instantiated");
        Ok(Self {
            store,
            instance,
            memory,
        })
    }

    /// Call export `name`.  A trap is reported as the failed check or
    /// exception that caused it, if any.
    pub fn call<P: WasmParams, R: WasmResults>(&mut self, name: &str, args: P) -> InterpResult<R> {
        let func = self
            .instance
            .get_typed_func::<P, R>(&self.store, name)
            .map_err(|_| InterpError::MissingExport(name.to_string()))?;
        match func.call(&mut self.store, args) {
            Ok(result) => Ok(result),
            Err(err) => match self.store.data_mut().pending.take() {
                Some(report) => Err(report),
                None => Err(InterpError::Trap(err.to_string())),
            },
        }
    }

    pub fn messages(&self) -> &MessageTable {
        self.store.data().messages()
    }

    fn memory(&self) -> InterpResult<Memory> {
        self.memory
            .ok_or_else(|| InterpError::MissingExport("memory".to_string()))
    }

    /// Copy `len` bytes of linear memory starting at `offset`.
    pub fn read_memory(&self, offset: usize, len: usize) -> InterpResult<Vec<u8>> {
        let data = self.memory()?.data(&self.store);
        offset
            .checked_add(len)
            .and_then(|end| data.get(offset..end))
            .map(<[u8]>::to_vec)
            .ok_or(InterpError::MemoryAccess { offset, len })
    }

    /// Overwrite linear memory starting at `offset`.
    pub fn write_memory(&mut self, offset: usize, bytes: &[u8]) -> InterpResult<()> {
        let memory = self.memory()?;
        let len = bytes.len();
        let data = memory.data_mut(&mut self.store);
        let target = offset
            .checked_add(len)
            .and_then(|end| data.get_mut(offset..end))
            .ok_or(InterpError::MemoryAccess { offset, len })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Read a little-endian `u32` from linear memory.
    pub fn read_u32(&self, offset: usize) -> InterpResult<u32> {
        let bytes = self.read_memory(offset, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes);
        Ok(u32::from_le_bytes(word))
    }

    /// Current memory size in bytes.
    pub fn memory_len(&self) -> InterpResult<usize> {
        Ok(self.memory()?.data(&self.store).len())
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("messages", &self.store.data().messages.len())
            .field("memory", &self.memory.is_some())
            .finish()
    }
}
