// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Command-class rewriting.
//!
//! Classes inheriting `Opus::Command` are invoked as `TheCommand.call(...)`,
//! but the user only writes the instance method `call`. This pass makes the
//! class-side entry point visible to the type checker: it duplicates the
//! instance method's signature and synthesizes a `def self.call` whose body
//! is an untyped placeholder. Both insertions are deep copies — the new
//! statements must not alias nodes still owned by the original method.

#[cfg(not(test))]
use crate::ast::{make, ClassDef, ClassDefKind};
#[cfg(test)]
use crate::ast::{make, ClassDef, ClassDefKind, Expression};
use crate::symbol_table::SymbolRef;

/// Does this class directly inherit `Opus::Command`?
///
/// The scope must be the root: either still-unresolved (`EmptyTree` scope on
/// `Opus`) or resolved to the root symbol.
fn is_command(klass: &ClassDef) -> bool {
    if klass.kind != ClassDefKind::Class || klass.ancestors.is_empty() {
        return false;
    }
    let Some(cnst) = klass.ancestors[0].as_constant_lit() else {
        return false;
    };
    if cnst.cnst != "Command" {
        return false;
    }
    let Some(scope) = cnst.scope.as_constant_lit() else {
        return false;
    };
    if scope.cnst != "Opus" {
        return false;
    }
    if scope.scope.is_empty_tree() {
        return true;
    }
    let Some(id) = scope.scope.as_ident() else {
        return false;
    };
    id.symbol == SymbolRef::root()
}

/// Rewrites a command class in place.
///
/// Finds the `call` method in the class body. If it exists, is not the
/// first statement, and the statement directly above it is a `Send` whose
/// receiver is itself a `Send` (the shape of a signature call — checked
/// structurally so this pass stays independent of the resolver), inserts
/// after it a deep copy of that signature and a synthesized `self.` variant
/// of the method.
pub fn patch_dsl(klass: &mut ClassDef) {
    if !is_command(klass) {
        return;
    }

    let mut i = 0;
    let mut found = false;
    for (idx, stat) in klass.rhs.iter().enumerate() {
        let Some(mdef) = stat.as_method_def() else {
            continue;
        };
        if mdef.name != "call" {
            continue;
        }
        i = idx;
        found = true;
        break;
    }
    // If we didn't find a `call` method, or if it was the first statement
    // (and thus couldn't have a signature above it). The position guard
    // doubles as the not-found guard when `i` was never set.
    if !found || i == 0 {
        return;
    }

    let looks_like_sig = klass.rhs[i - 1]
        .as_send()
        .is_some_and(|sig| sig.recv.as_send().is_some());
    if !looks_like_sig {
        return;
    }
    let Some(sig_copy) = klass.rhs[i - 1].deep_copy() else {
        return;
    };

    let call = klass.rhs[i]
        .as_method_def()
        .expect("statement at the call index must be a MethodDef");
    let mut new_args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        let Some(copy) = arg.deep_copy() else {
            return;
        };
        new_args.push(copy);
    }
    let self_call = make::method(
        call.loc,
        call.name.clone(),
        new_args,
        make::untyped(call.loc),
        true,
    );

    klass.rhs.insert(i + 1, sig_copy);
    klass.rhs.insert(i + 2, self_call);
}
