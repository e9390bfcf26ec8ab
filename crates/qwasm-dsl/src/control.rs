//! Structured control flow: `If`, `Loop`, `DoWhile`, `While`.
//!
//! Every construct is a scope: its body is generated by a closure while
//! the construct's block is the active one, and the construct is emitted
//! into the enclosing block when the scope ends.
//!
//! A [`Loop`] lowers to a native `loop` around a labelled body block:
//!
//! ```text
//! loop $name            ;; CONTINUE: br $name
//!   block $name.body    ;; BREAK:    br $name.body
//!     ...
//!   end
//! end
//! ```
//!
//! Without a `CONTINUE` the body runs exactly once.

use qwasm_ir::{Block, Statement};

use crate::expr::{Expr, PrimitiveExpr};
use crate::module::{BranchTarget, Module};

/// Values usable as a branch condition.
pub trait IntoCondition {
    fn into_condition(self, m: &mut Module) -> PrimitiveExpr<bool>;
}

impl IntoCondition for PrimitiveExpr<bool> {
    fn into_condition(self, _m: &mut Module) -> PrimitiveExpr<bool> {
        self
    }
}

impl IntoCondition for bool {
    fn into_condition(self, _m: &mut Module) -> PrimitiveExpr<bool> {
        PrimitiveExpr::new(self)
    }
}

impl IntoCondition for Expr<bool> {
    /// A nullable condition must not be NULL; checked in debug mode.
    #[track_caller]
    fn into_condition(self, m: &mut Module) -> PrimitiveExpr<bool> {
        self.insist_not_null(m)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// If
// ══════════════════════════════════════════════════════════════════════════════

type Body<'a> = Box<dyn FnOnce(&mut Module) + 'a>;

/// A two-armed conditional.
///
/// ```ignore
/// If::new(m, x.val().lt(0))
///     .then(|m| y.set(m, 1))
///     .otherwise(|m| y.set(m, 2))
///     .emit(m);
/// ```
#[must_use = "an `If` does nothing until it is emitted"]
pub struct If<'a> {
    name: String,
    cond: PrimitiveExpr<bool>,
    then: Option<Body<'a>>,
    otherwise: Option<Body<'a>>,
}

impl<'a> If<'a> {
    #[track_caller]
    pub fn new(m: &mut Module, cond: impl IntoCondition) -> Self {
        let cond = cond.into_condition(m);
        Self {
            name: m.unique_if_name("if"),
            cond,
            then: None,
            otherwise: None,
        }
    }

    pub fn then(mut self, f: impl FnOnce(&mut Module) + 'a) -> Self {
        self.then = Some(Box::new(f));
        self
    }

    pub fn otherwise(mut self, f: impl FnOnce(&mut Module) + 'a) -> Self {
        self.otherwise = Some(Box::new(f));
        self
    }

    /// Generate both arms and emit the conditional.
    pub fn emit(self, m: &mut Module) {
        let then = m.with_block(Block::named(format!("{}.then", self.name)), |m| {
            if let Some(f) = self.then {
                f(m);
            }
        });
        let otherwise = self
            .otherwise
            .map(|f| m.with_block(Block::named(format!("{}.else", self.name)), f));
        let (cond, _bits) = self.cond.into_parts();
        m.emit(Statement::If {
            cond,
            then,
            otherwise,
        });
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Loops
// ══════════════════════════════════════════════════════════════════════════════

/// A loop whose body runs once unless it `CONTINUE`s.
pub struct Loop {
    name: String,
}

impl Loop {
    pub fn new(m: &mut Module, name: &str) -> Self {
        Self {
            name: m.unique_loop_name(name),
        }
    }

    /// Label a `CONTINUE` branches to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(self, m: &mut Module, f: impl FnOnce(&mut Module)) {
        emit_loop(m, self.name, None, f);
    }
}

/// Generate a loop body with the branch target pushed, then emit the loop.
/// A `condition` is tested at the bottom and by every `CONTINUE`.
fn emit_loop(m: &mut Module, name: String, condition: Option<PrimitiveExpr<bool>>, f: impl FnOnce(&mut Module)) {
    let body_label = format!("{name}.body");
    m.push_branch_target(BranchTarget {
        break_label: body_label.clone(),
        continue_label: name.clone(),
        condition,
    });
    let mut body = m.with_block(Block::named(body_label), f);
    if let Some(target) = m.pop_branch_target() {
        if let Some(condition) = target.condition {
            let (cond, _bits) = condition.into_parts();
            body.push(Statement::Br {
                label: name.clone(),
                cond: Some(cond),
            });
        }
    }
    m.emit(Statement::Loop { label: name, body });
}

/// A loop that runs its body, then repeats while the condition holds.
pub struct DoWhile {
    name: String,
    cond: PrimitiveExpr<bool>,
}

impl DoWhile {
    #[track_caller]
    pub fn new(m: &mut Module, name: &str, cond: impl IntoCondition) -> Self {
        let cond = cond.into_condition(m);
        Self {
            name: m.unique_loop_name(name),
            cond,
        }
    }

    pub fn body(self, m: &mut Module, f: impl FnOnce(&mut Module)) {
        emit_loop(m, self.name, Some(self.cond), f);
    }
}

/// A loop that tests its condition before every iteration, including the
/// first.
///
/// The condition is evaluated once on entry and once per iteration, so it
/// must be free of side effects.
pub struct While {
    name: String,
    cond: PrimitiveExpr<bool>,
}

impl While {
    #[track_caller]
    pub fn new(m: &mut Module, name: &str, cond: impl IntoCondition) -> Self {
        let cond = cond.into_condition(m);
        debug_assert!(!cond.has_side_effects(), "`While` condition with side effects");
        Self {
            name: m.unique_loop_name(name),
            cond,
        }
    }

    pub fn body(self, m: &mut Module, f: impl FnOnce(&mut Module)) {
        let entry = self.cond.clone();
        let name = self.name;
        let cond = self.cond;
        let then = m.with_block(Block::named(format!("{name}.entry")), |m| {
            emit_loop(m, name.clone(), Some(cond), f);
        });
        let (entry, _bits) = entry.into_parts();
        m.emit(Statement::If {
            cond: entry,
            then,
            otherwise: None,
        });
    }
}
