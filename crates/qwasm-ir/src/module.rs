//! Module assembly: collects definitions and emits a validated binary.

use std::borrow::Cow;
use std::collections::HashMap;

use tracing::debug;
use wasm_encoder::{
    CodeSection, ConstExpr, CustomSection, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, GlobalSection, GlobalType, ImportSection, MemorySection, MemoryType, Module,
    TypeSection, ValType,
};

use crate::error::{IrError, IrResult};
use crate::lower::{lower_body, Symbols};
use crate::node::{Block, Literal};
use crate::optimize;

/// A function with a complete body.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<ValType>,
    pub result: Option<ValType>,
    /// Declared locals, indexed after the parameters.
    pub locals: Vec<ValType>,
    pub body: Block,
}

/// Linear memory declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDef {
    pub min_pages: u64,
    pub max_pages: Option<u64>,
    /// Export name, if the memory is visible to the host.
    pub export: Option<String>,
}

#[derive(Debug, Clone)]
struct FunctionImport {
    module: String,
    field: String,
    name: String,
    params: Vec<ValType>,
    result: Option<ValType>,
}

#[derive(Debug, Clone)]
struct GlobalImport {
    module: String,
    field: String,
    name: String,
    ty: ValType,
    mutable: bool,
}

#[derive(Debug, Clone)]
struct GlobalDef {
    name: String,
    mutable: bool,
    init: Literal,
}

/// Accumulates everything that goes into one WASM module.
#[derive(Debug, Clone, Default)]
pub struct ModuleBuilder {
    functions: Vec<FunctionDef>,
    function_imports: Vec<FunctionImport>,
    global_imports: Vec<GlobalImport>,
    globals: Vec<GlobalDef>,
    memory: Option<MemoryDef>,
    /// (export name, internal function name)
    exports: Vec<(String, String)>,
    custom: Vec<(String, Vec<u8>)>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Definitions ──────────────────────────────────────────────────────

    pub fn set_memory(&mut self, memory: MemoryDef) {
        self.memory = Some(memory);
    }

    pub fn memory(&self) -> Option<&MemoryDef> {
        self.memory.as_ref()
    }

    /// Raise the initial memory size to at least `min_pages`.  Fails if the
    /// module has no memory or the maximum is lower.
    pub fn reserve_memory(&mut self, min_pages: u64) -> bool {
        match &mut self.memory {
            Some(memory) if memory.max_pages.map_or(true, |max| max >= min_pages) => {
                memory.min_pages = memory.min_pages.max(min_pages);
                true
            }
            _ => false,
        }
    }

    pub fn add_function(&mut self, def: FunctionDef) {
        self.functions.push(def);
    }

    pub fn functions(&self) -> &[FunctionDef] {
        &self.functions
    }

    /// Import a host function as `name`.
    pub fn import_function(
        &mut self,
        module: impl Into<String>,
        field: impl Into<String>,
        name: impl Into<String>,
        params: Vec<ValType>,
        result: Option<ValType>,
    ) {
        self.function_imports.push(FunctionImport {
            module: module.into(),
            field: field.into(),
            name: name.into(),
            params,
            result,
        });
    }

    /// Import a host global as `name`.
    pub fn import_global(
        &mut self,
        module: impl Into<String>,
        field: impl Into<String>,
        name: impl Into<String>,
        ty: ValType,
        mutable: bool,
    ) {
        self.global_imports.push(GlobalImport {
            module: module.into(),
            field: field.into(),
            name: name.into(),
            ty,
            mutable,
        });
    }

    pub fn add_global(&mut self, name: impl Into<String>, mutable: bool, init: Literal) {
        self.globals.push(GlobalDef {
            name: name.into(),
            mutable,
            init,
        });
    }

    /// Replace the initializer of a defined global.  Returns `false` if no
    /// global of that name is defined.
    pub fn set_global_init(&mut self, name: &str, init: Literal) -> bool {
        match self.globals.iter_mut().find(|g| g.name == name) {
            Some(global) => {
                global.init = init;
                true
            }
            None => false,
        }
    }

    pub fn export_function(&mut self, export: impl Into<String>, name: impl Into<String>) {
        self.exports.push((export.into(), name.into()));
    }

    /// Set the contents of a custom section, replacing an earlier one of the
    /// same name.
    pub fn set_custom_section(&mut self, name: impl Into<String>, data: Vec<u8>) {
        let name = name.into();
        match self.custom.iter_mut().find(|(n, _)| *n == name) {
            Some((_, bytes)) => *bytes = data,
            None => self.custom.push((name, data)),
        }
    }

    /// Whether a function (defined or imported) of that name exists.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
            || self.function_imports.iter().any(|f| f.name == name)
    }

    /// Whether a global (defined or imported) of that name exists.
    pub fn has_global(&self, name: &str) -> bool {
        self.globals.iter().any(|g| g.name == name)
            || self.global_imports.iter().any(|g| g.name == name)
    }

    /// Run the optimiser over every defined function.
    pub fn optimize(&mut self, level: u32) {
        for def in &mut self.functions {
            optimize::optimize_block(&mut def.body, level);
        }
        debug!(level, functions = self.functions.len(), "optimized module");
    }

    // ── Emission ─────────────────────────────────────────────────────────

    /// Whether [`finish`](Self::finish) would succeed.
    pub fn validate(&self) -> bool {
        self.finish().is_ok()
    }

    /// Encode the module and validate the result.
    pub fn finish(&self) -> IrResult<Vec<u8>> {
        let symbols = self.symbols()?;
        let mut types = TypeInterner::default();

        let mut module = Module::new();

        // Type indices first, so the type section is complete before it is emitted.
        let import_types: Vec<u32> = self
            .function_imports
            .iter()
            .map(|f| types.intern(&f.params, f.result))
            .collect();
        let function_types: Vec<u32> = self
            .functions
            .iter()
            .map(|f| types.intern(&f.params, f.result))
            .collect();
        module.section(&types.section);

        // 1. Imports
        let mut imports = ImportSection::new();
        for (import, ty) in self.function_imports.iter().zip(&import_types) {
            imports.import(&import.module, &import.field, EntityType::Function(*ty));
        }
        for import in &self.global_imports {
            imports.import(
                &import.module,
                &import.field,
                EntityType::Global(GlobalType {
                    val_type: import.ty,
                    mutable: import.mutable,
                    shared: false,
                }),
            );
        }
        module.section(&imports);

        // 2. Function declarations
        let mut func_section = FunctionSection::new();
        for ty in &function_types {
            func_section.function(*ty);
        }
        module.section(&func_section);

        // 3. Memory
        if let Some(memory) = &self.memory {
            let mut memories = MemorySection::new();
            memories.memory(MemoryType {
                minimum: memory.min_pages,
                maximum: memory.max_pages,
                memory64: false,
                shared: false,
                page_size_log2: None,
            });
            module.section(&memories);
        }

        // 4. Globals
        let mut globals = GlobalSection::new();
        for global in &self.globals {
            let (val_type, init) = match global.init {
                Literal::I32(v) => (ValType::I32, ConstExpr::i32_const(v)),
                Literal::I64(v) => (ValType::I64, ConstExpr::i64_const(v)),
                Literal::F32(v) => (ValType::F32, ConstExpr::f32_const(v)),
                Literal::F64(v) => (ValType::F64, ConstExpr::f64_const(v)),
            };
            globals.global(
                GlobalType {
                    val_type,
                    mutable: global.mutable,
                    shared: false,
                },
                &init,
            );
        }
        module.section(&globals);

        // 5. Exports
        let mut exports = ExportSection::new();
        if let Some(name) = self.memory.as_ref().and_then(|m| m.export.as_deref()) {
            exports.export(name, ExportKind::Memory, 0);
        }
        for (export, name) in &self.exports {
            let idx = symbols
                .functions
                .get(name)
                .copied()
                .ok_or_else(|| IrError::UnresolvedSymbol(format!("exported function `{name}`")))?;
            exports.export(export, ExportKind::Func, idx);
        }
        module.section(&exports);

        // 6. Code
        let mut code = CodeSection::new();
        for def in &self.functions {
            let mut f = Function::new(def.locals.iter().map(|ty| (1, *ty)));
            lower_body(&def.body, &symbols, &mut f)?;
            code.function(&f);
        }
        module.section(&code);

        // 7. Custom sections
        for (name, data) in &self.custom {
            module.section(&CustomSection {
                name: Cow::Borrowed(name.as_str()),
                data: Cow::Borrowed(data.as_slice()),
            });
        }

        let wasm_bytes = module.finish();
        wasmparser::validate(&wasm_bytes)
            .map_err(|e| IrError::ValidationFailed(format!("{e}")))?;

        debug!(
            functions = self.functions.len(),
            imports = self.function_imports.len(),
            bytes = wasm_bytes.len(),
            "emitted module"
        );
        Ok(wasm_bytes)
    }

    fn symbols(&self) -> IrResult<Symbols> {
        let mut functions = HashMap::new();
        let names = self
            .function_imports
            .iter()
            .map(|f| &f.name)
            .chain(self.functions.iter().map(|f| &f.name));
        for (idx, name) in names.enumerate() {
            if functions.insert(name.clone(), idx as u32).is_some() {
                return Err(IrError::Internal(format!("duplicate function `{name}`")));
            }
        }

        let mut globals = HashMap::new();
        let names = self
            .global_imports
            .iter()
            .map(|g| &g.name)
            .chain(self.globals.iter().map(|g| &g.name));
        for (idx, name) in names.enumerate() {
            if globals.insert(name.clone(), idx as u32).is_some() {
                return Err(IrError::Internal(format!("duplicate global `{name}`")));
            }
        }

        Ok(Symbols { functions, globals })
    }
}

/// De-duplicating function type table.
#[derive(Default)]
struct TypeInterner {
    section: TypeSection,
    seen: Vec<(Vec<ValType>, Option<ValType>)>,
}

impl TypeInterner {
    fn intern(&mut self, params: &[ValType], result: Option<ValType>) -> u32 {
        if let Some(idx) = self
            .seen
            .iter()
            .position(|(p, r)| p.as_slice() == params && *r == result)
        {
            return idx as u32;
        }
        self.section
            .ty()
            .function(params.iter().copied(), result.into_iter());
        self.seen.push((params.to_vec(), result));
        (self.seen.len() - 1) as u32
    }
}
