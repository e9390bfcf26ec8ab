//! The compilation context.
//!
//! A [`Module`] owns everything generated for one WASM module: the
//! [`ModuleBuilder`], the stack of functions under construction (each with
//! its block stack, branch targets and local bitmaps), unique-name counters,
//! the runtime message table and caller-registered auxiliary data.
//!
//! Every construction call takes the module explicitly.  At most one module
//! is alive per thread; a second [`Module::new`] on the same thread fails
//! with [`DslError::ModuleAlreadyActive`] until the first is disposed.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use qwasm_ir::{Block, Expression, FunctionDef, MemoryDef, ModuleBuilder, Statement, ValType};

use crate::config::ModuleConfig;
use crate::error::{DslError, DslResult};
use crate::exception::ExceptionKind;
use crate::expr::{PrimitiveExpr, RawExpr};
use crate::function::{FunctionProxy, ParamList, ReturnType};
use crate::local_bit::{BitmapPool, BitmapStats, LocalBit};
use crate::messages::{Message, MessageTable, MESSAGES_SECTION};
use crate::types::DslType;
use crate::variable::Global;

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Host module that runtime callbacks and imports are taken from.
pub const IMPORT_MODULE: &str = "imports";

const INSIST_FUNCTION: &str = "qwasm.insist";
const THROW_FUNCTION: &str = "qwasm.throw";

/// Caller-chosen key for [`Module::add_garbage_collected_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcHandle(pub u64);

// ── Per-function state ──────────────────────────────────────────────────────

/// Where `BREAK` and `CONTINUE` of one loop go.
pub(crate) struct BranchTarget {
    pub(crate) break_label: String,
    pub(crate) continue_label: String,
    /// Re-tested before continuing, for loops that test at the bottom.
    pub(crate) condition: Option<PrimitiveExpr<bool>>,
}

struct FunctionFrame {
    name: String,
    params: Vec<ValType>,
    result: Option<ValType>,
    locals: Vec<ValType>,
    /// Active blocks; the function body is at the bottom.
    blocks: Vec<Block>,
    branch_targets: Vec<BranchTarget>,
    bitmaps: Rc<BitmapPool>,
}

#[derive(Debug, Default)]
struct NameCounters {
    block: u64,
    function: u64,
    global: u64,
    if_: u64,
    loop_: u64,
}

fn next_name(counter: &mut u64, prefix: &str) -> String {
    let n = *counter;
    *counter += 1;
    format!("{prefix}{n}")
}

// ══════════════════════════════════════════════════════════════════════════════
// Module
// ══════════════════════════════════════════════════════════════════════════════

pub struct Module {
    id: u64,
    config: ModuleConfig,
    names: NameCounters,
    builder: ModuleBuilder,
    frames: Vec<FunctionFrame>,
    messages: MessageTable,
    garbage: HashMap<GcHandle, Box<dyn Any>>,
}

impl Module {
    /// Start a module with the default configuration.
    pub fn new() -> DslResult<Self> {
        Self::with_config(ModuleConfig::default())
    }

    pub fn with_config(config: ModuleConfig) -> DslResult<Self> {
        if ACTIVE.with(|active| active.replace(true)) {
            return Err(DslError::ModuleAlreadyActive);
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let mut builder = ModuleBuilder::new();
        builder.set_memory(MemoryDef {
            min_pages: config.initial_pages,
            max_pages: config.maximum_pages,
            export: config.memory_export.clone(),
        });
        debug!(id, debug_checks = config.debug_checks, "module initialized");
        Ok(Self {
            id,
            config,
            names: NameCounters::default(),
            builder,
            frames: Vec::new(),
            messages: MessageTable::new(),
            garbage: HashMap::new(),
        })
    }

    /// Whether a module is alive on the current thread.
    pub fn is_active() -> bool {
        ACTIVE.with(Cell::get)
    }

    /// Release the module and everything registered with it.
    pub fn dispose(self) {
        drop(self);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// The underlying builder, for inspection.
    pub fn builder(&self) -> &ModuleBuilder {
        &self.builder
    }

    // ── Unique names ─────────────────────────────────────────────────────

    pub fn unique_block_name(&mut self, prefix: &str) -> String {
        next_name(&mut self.names.block, prefix)
    }

    pub fn unique_function_name(&mut self, prefix: &str) -> String {
        next_name(&mut self.names.function, prefix)
    }

    pub fn unique_global_name(&mut self, prefix: &str) -> String {
        next_name(&mut self.names.global, prefix)
    }

    pub fn unique_if_name(&mut self, prefix: &str) -> String {
        next_name(&mut self.names.if_, prefix)
    }

    pub fn unique_loop_name(&mut self, prefix: &str) -> String {
        next_name(&mut self.names.loop_, prefix)
    }

    // ── Functions ────────────────────────────────────────────────────────

    fn frame(&self) -> &FunctionFrame {
        match self.frames.last() {
            Some(frame) => frame,
            None => panic!("no function is being generated"),
        }
    }

    fn frame_mut(&mut self) -> &mut FunctionFrame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => panic!("no function is being generated"),
        }
    }

    /// Make a new function the active one.  The previously active function
    /// is suspended until this one is closed.
    pub(crate) fn open_function(&mut self, name: String, params: Vec<ValType>, result: Option<ValType>) {
        self.frames.push(FunctionFrame {
            blocks: vec![Block::named(format!("{name}.body"))],
            name,
            params,
            result,
            locals: Vec::new(),
            branch_targets: Vec::new(),
            bitmaps: BitmapPool::new(),
        });
    }

    /// Finish the active function and add it to the module.
    pub(crate) fn close_function(&mut self) {
        let Some(mut frame) = self.frames.pop() else {
            debug_assert!(false, "close_function without an open function");
            return;
        };
        debug_assert_eq!(frame.blocks.len(), 1, "unbalanced blocks in `{}`", frame.name);
        debug_assert!(frame.branch_targets.is_empty(), "unbalanced loops in `{}`", frame.name);
        debug_assert!(frame.bitmaps.all_free(), "local bits still in use at the end of `{}`", frame.name);

        let mut body = frame.blocks.swap_remove(0);
        if frame.result.is_some() {
            body.push(Statement::Unreachable);
        }
        debug!(
            function = %frame.name,
            locals = frame.locals.len(),
            bitmaps = frame.bitmaps.stats().bitmaps,
            "function generated"
        );
        self.builder.add_function(FunctionDef {
            name: frame.name,
            params: frame.params,
            result: frame.result,
            locals: frame.locals,
            body,
        });
    }

    /// Name of the function being generated.
    pub fn current_function(&self) -> Option<&str> {
        self.frames.last().map(|f| f.name.as_str())
    }

    /// Declare a fresh local of the active function.
    pub(crate) fn allocate_local(&mut self, ty: ValType) -> u32 {
        let frame = self.frame_mut();
        let index = (frame.params.len() + frame.locals.len()) as u32;
        frame.locals.push(ty);
        index
    }

    /// Allocate a boolean slot in one of the active function's bitmaps.
    pub(crate) fn allocate_bit(&mut self) -> Rc<LocalBit> {
        let pool = Rc::clone(&self.frame().bitmaps);
        pool.allocate(|| self.allocate_local(ValType::I64))
    }

    /// Occupancy of the active function's local bitmaps.
    pub fn bitmap_stats(&self) -> Option<BitmapStats> {
        self.frames.last().map(|f| f.bitmaps.stats())
    }

    // ── Blocks ───────────────────────────────────────────────────────────

    /// Append a statement to the active block.
    pub fn emit(&mut self, stmt: Statement) {
        match self.frame_mut().blocks.last_mut() {
            Some(block) => block.push(stmt),
            None => panic!("no active block"),
        }
    }

    pub(crate) fn push_block(&mut self, block: Block) {
        self.frame_mut().blocks.push(block);
    }

    pub(crate) fn pop_block(&mut self) -> Block {
        let frame = self.frame_mut();
        debug_assert!(frame.blocks.len() > 1, "popped the function body");
        frame.blocks.pop().unwrap_or_default()
    }

    /// A detached block with a unique label.  Fill it with
    /// [`with_block`](Self::with_block) and place it with
    /// [`attach`](Self::attach).
    pub fn new_block(&mut self, prefix: &str) -> Block {
        Block::named(self.unique_block_name(prefix))
    }

    /// Make `block` the active block while `f` runs, then hand it back.
    /// Blocks can be filled in several sessions, and several blocks can be
    /// generated in an interleaved order.
    pub fn with_block(&mut self, block: Block, f: impl FnOnce(&mut Module)) -> Block {
        self.push_block(block);
        f(self);
        self.pop_block()
    }

    /// Insert a finished block at the current position.
    pub fn attach(&mut self, block: Block) {
        self.emit(Statement::Block(block));
    }

    /// Generate a labelled block inline.  Returns its label.
    pub fn block(&mut self, prefix: &str, f: impl FnOnce(&mut Module)) -> String {
        let block = self.new_block(prefix);
        let block = self.with_block(block, f);
        let label = block.label.clone().unwrap_or_default();
        self.attach(block);
        label
    }

    /// Label of the active block.
    pub fn current_block(&self) -> Option<&str> {
        self.frames
            .last()
            .and_then(|f| f.blocks.last())
            .and_then(|b| b.label.as_deref())
    }

    // ── Branches ─────────────────────────────────────────────────────────

    pub(crate) fn push_branch_target(&mut self, target: BranchTarget) {
        self.frame_mut().branch_targets.push(target);
    }

    pub(crate) fn pop_branch_target(&mut self) -> Option<BranchTarget> {
        self.frame_mut().branch_targets.pop()
    }

    /// The target `level` loops out; 1 is the innermost loop.
    fn branch_target(&self, level: usize) -> &BranchTarget {
        let targets = &self.frame().branch_targets;
        debug_assert!(level >= 1, "branch level starts at 1");
        match targets.len().checked_sub(level.max(1)).and_then(|i| targets.get(i)) {
            Some(target) => target,
            None => panic!("no enclosing loop at level {level}"),
        }
    }

    /// Leave the loop `level` levels out.
    pub fn emit_break(&mut self, level: usize) {
        let label = self.branch_target(level).break_label.clone();
        self.emit(Statement::Br { label, cond: None });
    }

    /// Leave the loop `level` levels out if `cond` holds.
    pub fn emit_break_if(&mut self, cond: PrimitiveExpr<bool>, level: usize) {
        let label = self.branch_target(level).break_label.clone();
        let (cond, _bits) = cond.into_parts();
        self.emit(Statement::Br { label, cond: Some(cond) });
    }

    /// Start the next iteration of the loop `level` levels out.  Loops
    /// that test at the bottom re-test their condition first.
    pub fn emit_continue(&mut self, level: usize) {
        for stmt in self.continue_statements(level) {
            self.emit(stmt);
        }
    }

    /// Continue the loop `level` levels out if `cond` holds.
    pub fn emit_continue_if(&mut self, cond: PrimitiveExpr<bool>, level: usize) {
        let target = self.branch_target(level);
        let (cond, _bits) = cond.into_parts();
        if target.condition.is_none() {
            let label = target.continue_label.clone();
            self.emit(Statement::Br { label, cond: Some(cond) });
            return;
        }
        let mut then = Block::new();
        for stmt in self.continue_statements(level) {
            then.push(stmt);
        }
        self.emit(Statement::If {
            cond,
            then,
            otherwise: None,
        });
    }

    fn continue_statements(&self, level: usize) -> Vec<Statement> {
        let target = self.branch_target(level);
        match &target.condition {
            None => vec![Statement::Br {
                label: target.continue_label.clone(),
                cond: None,
            }],
            Some(condition) => {
                let (cond, _bits) = condition.clone().into_parts();
                vec![
                    Statement::Br {
                        label: target.continue_label.clone(),
                        cond: Some(cond),
                    },
                    Statement::Br {
                        label: target.break_label.clone(),
                        cond: None,
                    },
                ]
            }
        }
    }

    /// Return from a function without a result.
    pub fn emit_return(&mut self) {
        debug_assert!(self.frame().result.is_none(), "missing return value");
        self.emit(Statement::Return(None));
    }

    /// Return `value` from the active function.
    pub fn emit_return_value<E: RawExpr>(&mut self, value: E) {
        debug_assert!(self.frame().result.is_some(), "return value in a void function");
        let (value, _bits) = value.into_raw();
        self.emit(Statement::Return(Some(value)));
    }

    /// Trap unconditionally.
    pub fn emit_unreachable(&mut self) {
        self.emit(Statement::Unreachable);
    }

    // ── Runtime errors ───────────────────────────────────────────────────

    fn ensure_host_function(&mut self, name: &str, field: &str, params: Vec<ValType>) {
        if !self.builder.has_function(name) {
            self.builder.import_function(IMPORT_MODULE, field, name, params, None);
        }
    }

    /// Emit a check that traps through the host's `insist` callback when
    /// `cond` is false.  The location and message are recorded in the
    /// message table.
    pub fn emit_insist(&mut self, cond: PrimitiveExpr<bool>, file: &str, line: u32, message: Option<&str>) {
        self.ensure_host_function(INSIST_FUNCTION, "insist", vec![ValType::I32]);
        let index = self.messages.push(file, line, message);
        let (failed, _bits) = (!cond).into_parts();
        let mut then = Block::new();
        then.push(Statement::Call {
            func: INSIST_FUNCTION.to_string(),
            args: vec![Expression::i32(index as i32)],
        });
        then.push(Statement::Unreachable);
        self.emit(Statement::If {
            cond: failed,
            then,
            otherwise: None,
        });
    }

    /// Emit an unconditional exception of `kind` through the host's `throw`
    /// callback.
    pub fn emit_throw(&mut self, kind: ExceptionKind, file: &str, line: u32, message: Option<&str>) {
        self.ensure_host_function(THROW_FUNCTION, "throw", vec![ValType::I64, ValType::I32]);
        let index = self.messages.push(file, line, message);
        self.emit(Statement::Call {
            func: THROW_FUNCTION.to_string(),
            args: vec![Expression::i64(kind.code() as i64), Expression::i32(index as i32)],
        });
        self.emit(Statement::Unreachable);
    }

    pub fn messages(&self) -> &MessageTable {
        &self.messages
    }

    pub fn get_message(&self, index: u32) -> Option<&Message> {
        self.messages.get(index)
    }

    // ── Globals, imports and exports ─────────────────────────────────────

    /// Define a global.
    pub fn emit_global<T: DslType>(&mut self, name: &str, init: T::Literal, mutable: bool) {
        debug_assert!(!self.builder.has_global(name), "global `{name}` defined twice");
        self.builder.add_global(name, mutable, T::literal(init));
    }

    /// Import the host's mutable global `extern_name` as `intern_name`.
    pub fn emit_import<T: DslType>(&mut self, extern_name: &str, intern_name: &str) {
        debug_assert!(!self.builder.has_global(intern_name), "global `{intern_name}` defined twice");
        self.builder
            .import_global(IMPORT_MODULE, extern_name, intern_name, T::VAL_TYPE, true);
    }

    /// Make sure linear memory spans at least `pages` pages from the start.
    pub fn reserve_memory_pages(&mut self, pages: u64) -> DslResult<()> {
        if self.builder.reserve_memory(pages) {
            Ok(())
        } else {
            Err(DslError::MemoryLimit {
                required: pages,
                maximum: self.config.maximum_pages,
            })
        }
    }

    /// A handle to an existing global.
    pub fn get_global<T: DslType>(&self, name: &str) -> Option<Global<T>> {
        self.builder
            .has_global(name)
            .then(|| Global::wrap(name.to_string()))
    }

    pub(crate) fn set_global_init<T: DslType>(&mut self, name: &str, init: T::Literal) {
        let found = self.builder.set_global_init(name, T::literal(init));
        debug_assert!(found, "no defined global `{name}`");
    }

    /// Import host function `name` from the `imports` module.
    pub fn emit_function_import<P: ParamList, R: ReturnType>(&mut self, name: &str) -> FunctionProxy<P, R> {
        if !self.builder.has_function(name) {
            self.builder
                .import_function(IMPORT_MODULE, name, name, P::val_types(), R::VAL_TYPE);
        }
        FunctionProxy::new(name)
    }

    /// Export function `name` under its own name.
    pub fn emit_function_export(&mut self, name: &str) {
        self.builder.export_function(name, name);
    }

    // ── Auxiliary data ───────────────────────────────────────────────────

    /// Data owned by the module and dropped with it.  The first call for a
    /// handle creates the value with `make`; later calls return it.
    pub fn add_garbage_collected_data<C: Any>(&mut self, handle: GcHandle, make: impl FnOnce() -> C) -> DslResult<&mut C> {
        self.garbage
            .entry(handle)
            .or_insert_with(|| Box::new(make()))
            .downcast_mut::<C>()
            .ok_or(DslError::GarbageTypeMismatch)
    }

    // ── Output ───────────────────────────────────────────────────────────

    fn check_complete(&self) -> DslResult<()> {
        match self.frames.last() {
            Some(frame) => Err(DslError::FunctionStillOpen(frame.name.clone())),
            None => Ok(()),
        }
    }

    /// Whether the module encodes to a valid binary.
    pub fn validate(&self) -> bool {
        self.check_complete().is_ok() && self.builder.validate()
    }

    pub fn optimize(&mut self, level: u32) {
        self.builder.optimize(level);
    }

    /// Encode the module.  The message table is embedded as a custom
    /// section.
    pub fn binary(&mut self) -> DslResult<Vec<u8>> {
        self.check_complete()?;
        if !self.messages.is_empty() {
            let table = self.messages.to_json()?;
            self.builder.set_custom_section(MESSAGES_SECTION, table);
        }
        let wasm = self.builder.finish()?;
        debug!(id = self.id, bytes = wasm.len(), messages = self.messages.len(), "module serialized");
        Ok(wasm)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module #{}", self.id)?;
        match self.frames.last() {
            Some(frame) => write!(
                f,
                " in `{}` at block `{}` (depth {})",
                frame.name,
                self.current_block().unwrap_or("?"),
                frame.blocks.len()
            ),
            None => write!(f, " with {} functions", self.builder.functions().len()),
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("open_functions", &self.frames.len())
            .field("messages", &self.messages.len())
            .finish()
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        // branch conditions hold expressions; release them before the check
        for frame in &mut self.frames {
            for target in frame.branch_targets.drain(..) {
                if let Some(condition) = target.condition {
                    let _ = condition.into_parts();
                }
            }
        }
        self.garbage.clear();
        ACTIVE.with(|active| active.set(false));
        debug!(id = self.id, "module disposed");
    }
}
