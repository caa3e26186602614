// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Structural deep copy with a forbidden-subtree sentinel.
//!
//! Some passes need a structurally independent copy of a tree *except* when
//! a designated subtree is reachable, in which case the clone must fail so
//! the caller can fall back to referencing the original. The sentinel is a
//! single node identity (`avoid`): every frame below the entry compares its
//! own address against it and aborts the whole clone on a match. The entry
//! frame skips the check, so the usual call shape — `tree.deep_copy()`,
//! i.e. avoid = the tree itself — means "refuse only if this node shows up
//! *again* somewhere underneath me".
//!
//! Failure travels through [`DeepCopyError`] on the internal result channel
//! and is converted to `None` exactly once, at the public entry points.
//! Unwinding via `?` drops any partially-built nodes on the way out.
//!
//! Cost: O(n) in the size of the tree, one allocation per cloned node, an
//! O(1) identity check per frame.

use std::ptr;

use thiserror::Error;

use super::{
    Array, ArraySplat, Assign, Block, BlockArg, Break, Cast, ClassDef, ConstDef, ConstantLit,
    EmptyTree, Expression, Hash, HashSplat, Ident, If, InsSeq, KeywordArg, Literal, Local,
    MethodDef, Next, OptionalArg, Rescue, RescueCase, RestArg, Retry, Return, SelfExpr, Send,
    ShadowArg, UnresolvedIdent, While, Yield, ZSuperArgs,
};

/// Raised (internally) when a clone reaches the avoided subtree, or when a
/// [`TreeRef`] is empty. Never escapes the public `deep_copy` entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deep copy reached the avoided subtree")]
pub struct DeepCopyError;

fn copy_child(
    child: &Expression,
    avoid: *const Expression,
) -> Result<Box<Expression>, DeepCopyError> {
    Ok(Box::new(child.deep_copy_inner(avoid, false)?))
}

fn copy_vec(
    children: &[Expression],
    avoid: *const Expression,
) -> Result<Vec<Expression>, DeepCopyError> {
    children
        .iter()
        .map(|child| child.deep_copy_inner(avoid, false))
        .collect()
}

impl Expression {
    /// Clones this tree, refusing if the tree's own root node reappears
    /// anywhere below itself (via a [`TreeRef`]).
    ///
    /// Returns `None` when the clone is refused.
    #[must_use]
    pub fn deep_copy(&self) -> Option<Expression> {
        self.copy_avoiding(self)
    }

    /// Clones this tree, refusing if `avoid` is reachable strictly below
    /// the root. Identity is by node address, never by structure; callers
    /// rely on the single-pointer check.
    #[must_use]
    pub fn copy_avoiding(&self, avoid: &Expression) -> Option<Expression> {
        self.deep_copy_inner(ptr::from_ref(avoid), true).ok()
    }

    /// The recursive protocol. `root` is true only for the entry frame,
    /// which skips the identity check; every child recurses with
    /// `root = false` and `avoid` unchanged.
    pub(crate) fn deep_copy_inner(
        &self,
        avoid: *const Expression,
        root: bool,
    ) -> Result<Expression, DeepCopyError> {
        if !root && ptr::eq(ptr::from_ref(self), avoid) {
            return Err(DeepCopyError);
        }
        let copied = match self {
            Expression::ClassDef(n) => Expression::ClassDef(ClassDef {
                loc: n.loc,
                symbol: n.symbol,
                name: copy_child(&n.name, avoid)?,
                ancestors: copy_vec(&n.ancestors, avoid)?,
                rhs: copy_vec(&n.rhs, avoid)?,
                kind: n.kind,
            }),
            Expression::MethodDef(n) => Expression::MethodDef(MethodDef {
                loc: n.loc,
                symbol: n.symbol,
                name: n.name.clone(),
                args: copy_vec(&n.args, avoid)?,
                rhs: copy_child(&n.rhs, avoid)?,
                is_self: n.is_self,
            }),
            Expression::ConstDef(n) => Expression::ConstDef(ConstDef {
                loc: n.loc,
                symbol: n.symbol,
                rhs: copy_child(&n.rhs, avoid)?,
            }),
            Expression::If(n) => Expression::If(If {
                loc: n.loc,
                cond: copy_child(&n.cond, avoid)?,
                thenp: copy_child(&n.thenp, avoid)?,
                elsep: copy_child(&n.elsep, avoid)?,
            }),
            Expression::While(n) => Expression::While(While {
                loc: n.loc,
                cond: copy_child(&n.cond, avoid)?,
                body: copy_child(&n.body, avoid)?,
            }),
            Expression::Break(n) => Expression::Break(Break {
                loc: n.loc,
                expr: copy_child(&n.expr, avoid)?,
            }),
            Expression::Next(n) => Expression::Next(Next {
                loc: n.loc,
                expr: copy_child(&n.expr, avoid)?,
            }),
            Expression::Return(n) => Expression::Return(Return {
                loc: n.loc,
                expr: copy_child(&n.expr, avoid)?,
            }),
            Expression::Yield(n) => Expression::Yield(Yield {
                loc: n.loc,
                expr: copy_child(&n.expr, avoid)?,
            }),
            Expression::Retry(n) => Expression::Retry(Retry { loc: n.loc }),
            Expression::RescueCase(n) => Expression::RescueCase(RescueCase {
                loc: n.loc,
                exceptions: copy_vec(&n.exceptions, avoid)?,
                var: copy_child(&n.var, avoid)?,
                body: copy_child(&n.body, avoid)?,
            }),
            Expression::Rescue(n) => Expression::Rescue(Rescue {
                loc: n.loc,
                body: copy_child(&n.body, avoid)?,
                rescue_cases: copy_vec(&n.rescue_cases, avoid)?,
                else_: copy_child(&n.else_, avoid)?,
                ensure: copy_child(&n.ensure, avoid)?,
            }),
            Expression::Ident(n) => Expression::Ident(Ident {
                loc: n.loc,
                symbol: n.symbol,
            }),
            Expression::Local(n) => Expression::Local(Local {
                loc: n.loc,
                local_variable: n.local_variable.clone(),
            }),
            Expression::UnresolvedIdent(n) => Expression::UnresolvedIdent(UnresolvedIdent {
                loc: n.loc,
                kind: n.kind,
                name: n.name.clone(),
            }),
            Expression::RestArg(n) => Expression::RestArg(RestArg {
                loc: n.loc,
                expr: copy_child(&n.expr, avoid)?,
            }),
            Expression::KeywordArg(n) => Expression::KeywordArg(KeywordArg {
                loc: n.loc,
                expr: copy_child(&n.expr, avoid)?,
            }),
            Expression::OptionalArg(n) => Expression::OptionalArg(OptionalArg {
                loc: n.loc,
                expr: copy_child(&n.expr, avoid)?,
                default: copy_child(&n.default, avoid)?,
            }),
            Expression::BlockArg(n) => Expression::BlockArg(BlockArg {
                loc: n.loc,
                expr: copy_child(&n.expr, avoid)?,
            }),
            Expression::ShadowArg(n) => Expression::ShadowArg(ShadowArg {
                loc: n.loc,
                expr: copy_child(&n.expr, avoid)?,
            }),
            Expression::Assign(n) => Expression::Assign(Assign {
                loc: n.loc,
                lhs: copy_child(&n.lhs, avoid)?,
                rhs: copy_child(&n.rhs, avoid)?,
            }),
            Expression::Send(n) => Expression::Send(Send {
                loc: n.loc,
                recv: copy_child(&n.recv, avoid)?,
                fun: n.fun.clone(),
                args: copy_vec(&n.args, avoid)?,
                block: match &n.block {
                    None => None,
                    Some(block) => Some(copy_child(block, avoid)?),
                },
            }),
            Expression::Cast(n) => Expression::Cast(Cast {
                loc: n.loc,
                type_name: n.type_name.clone(),
                arg: copy_child(&n.arg, avoid)?,
                kind: n.kind,
            }),
            Expression::Hash(n) => Expression::Hash(Hash {
                loc: n.loc,
                keys: copy_vec(&n.keys, avoid)?,
                values: copy_vec(&n.values, avoid)?,
            }),
            Expression::Array(n) => Expression::Array(Array {
                loc: n.loc,
                elems: copy_vec(&n.elems, avoid)?,
            }),
            Expression::Literal(n) => Expression::Literal(Literal {
                loc: n.loc,
                value: n.value.clone(),
            }),
            Expression::ConstantLit(n) => Expression::ConstantLit(ConstantLit {
                loc: n.loc,
                scope: copy_child(&n.scope, avoid)?,
                cnst: n.cnst.clone(),
            }),
            Expression::ArraySplat(n) => Expression::ArraySplat(ArraySplat {
                loc: n.loc,
                arg: copy_child(&n.arg, avoid)?,
            }),
            Expression::HashSplat(n) => Expression::HashSplat(HashSplat {
                loc: n.loc,
                arg: copy_child(&n.arg, avoid)?,
            }),
            Expression::ZSuperArgs(n) => Expression::ZSuperArgs(ZSuperArgs { loc: n.loc }),
            Expression::SelfExpr(n) => Expression::SelfExpr(SelfExpr {
                loc: n.loc,
                claz: n.claz,
            }),
            Expression::Block(n) => {
                let mut copied = Block::new(
                    n.loc,
                    copy_vec(&n.args, avoid)?,
                    n.body.deep_copy_inner(avoid, false)?,
                );
                // Post-construction state is copied explicitly.
                copied.symbol = n.symbol;
                Expression::Block(copied)
            }
            Expression::InsSeq(n) => Expression::InsSeq(InsSeq {
                loc: n.loc,
                stats: copy_vec(&n.stats, avoid)?,
                expr: copy_child(&n.expr, avoid)?,
            }),
            Expression::EmptyTree(n) => Expression::EmptyTree(EmptyTree { loc: n.loc }),
            Expression::TreeRef(n) => {
                let Some(tree) = &n.tree else {
                    return Err(DeepCopyError);
                };
                if ptr::eq(ptr::from_ref(tree.as_ref()), avoid) {
                    return Err(DeepCopyError);
                }
                // The indirection collapses: the copy owns a clone of the
                // referent, not another reference.
                tree.deep_copy_inner(avoid, false)?
            }
        };
        Ok(copied)
    }
}
