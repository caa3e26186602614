// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Builders for trees that passes synthesize from whole cloth.
//!
//! Rewriting passes (like the DSL patcher) need to conjure small trees that
//! did not come from any source file. These helpers keep those call sites
//! readable and make sure synthesized nodes satisfy the same invariants as
//! parsed ones.

use ecow::EcoString;

use super::{ConstantLit, EmptyTree, Expression, Local, LocalVariable, MethodDef, Send};
use crate::loc::Loc;
use crate::symbol_table::SymbolRef;

/// An empty tree at `loc`.
#[must_use]
pub fn empty_tree(loc: Loc) -> Expression {
    Expression::EmptyTree(EmptyTree::new(loc))
}

/// A local variable occurrence.
#[must_use]
pub fn local(loc: Loc, name: impl Into<EcoString>) -> Expression {
    Expression::Local(Local::new(loc, LocalVariable::new(name)))
}

/// A constant literal resolved in the innermost lexical scope.
#[must_use]
pub fn constant(loc: Loc, name: impl Into<EcoString>) -> Expression {
    Expression::ConstantLit(ConstantLit::new(loc, empty_tree(loc), name))
}

/// A constant literal under an explicit scope.
#[must_use]
pub fn scoped_constant(loc: Loc, scope: Expression, name: impl Into<EcoString>) -> Expression {
    Expression::ConstantLit(ConstantLit::new(loc, scope, name))
}

/// The untyped placeholder body: `T.untyped`.
#[must_use]
pub fn untyped(loc: Loc) -> Expression {
    Expression::Send(Send::new(
        loc,
        constant(loc, "T"),
        "untyped",
        Vec::new(),
        None,
    ))
}

/// A method definition with an unresolved symbol.
///
/// # Panics
///
/// Panics if any element of `args` is not a Reference node.
#[must_use]
pub fn method(
    loc: Loc,
    name: impl Into<EcoString>,
    args: Vec<Expression>,
    rhs: Expression,
    is_self: bool,
) -> Expression {
    Expression::MethodDef(MethodDef::new(
        loc,
        SymbolRef::none(),
        name,
        args,
        rhs,
        is_self,
    ))
}
