// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! The check pipeline: index, resolve, typecheck.
//!
//! Three passes, invoked in order by the language server on every re-check:
//!
//! 1. [`index`] — file bytes to one AST tree per file. Mutates only the
//!    file table.
//! 2. [`resolve`] — enters class/method/field/constant symbols, attaches
//!    them to the trees, resolves ancestors. Runs against the derived
//!    snapshot, never the indexed one.
//! 3. [`typecheck`] — declaration-level checks over the resolved trees.
//!
//! Passes report problems exclusively through the shared error queue; the
//! trees and symbol tables are the only other outputs. Note that a re-check
//! may legitimately see the same definition twice (the previously indexed
//! tree plus a freshly indexed copy of the same file), so redefinition
//! diagnostics are normal operation and the server silences them.

pub mod indexer;

use camino::Utf8PathBuf;
use ecow::{eco_format, EcoString};

pub use indexer::{parse_source, seq_of, IndexError, IndexErrorKind};

use crate::ast::{ConstDef, Expression, make};
use crate::diagnostics::{ErrorClass, ErrorLine, ErrorSection, TypeError};
use crate::loc::Loc;
use crate::symbol_table::{File, FileRef, GlobalState, SourceType, SymbolRef};

/// Indexes files into trees, one per file.
///
/// `input_names` are read from disk and admitted as Normal files;
/// `input_files` are already-admitted files whose registered source is
/// used. Parse-level problems become [`ErrorClass::ParseError`] diagnostics
/// on the queue; indexing always produces a tree per file regardless.
#[must_use]
pub fn index(
    gs: &mut GlobalState,
    input_names: &[Utf8PathBuf],
    input_files: &[FileRef],
) -> Vec<Expression> {
    let mut refs = Vec::with_capacity(input_names.len() + input_files.len());
    for path in input_names {
        let fref = match std::fs::read_to_string(path) {
            Ok(source) => gs.enter_file(File::new(path.clone(), source, SourceType::Normal)),
            Err(_) => {
                let fref =
                    gs.enter_file(File::new(path.clone(), String::new(), SourceType::Normal));
                gs.raise(TypeError::new(
                    Loc::new(fref, 0, 0),
                    ErrorClass::ParseError,
                    eco_format!("Unable to read file `{path}`"),
                ));
                fref
            }
        };
        refs.push(fref);
    }
    refs.extend_from_slice(input_files);

    let mut trees = Vec::with_capacity(refs.len());
    for fref in refs {
        let source = gs.file(fref).source.clone();
        let (stmts, errors) = parse_source(&source, fref);
        for error in errors {
            gs.raise(TypeError::new(
                error.loc,
                ErrorClass::ParseError,
                eco_format!("{error}"),
            ));
        }
        let file_loc = Loc::new(fref, 0, u32::try_from(source.len()).unwrap_or(u32::MAX));
        trees.push(seq_of(stmts, file_loc));
    }
    trees
}

/// Enters symbols for every definition in `trees` and resolves ancestors.
///
/// Returns the same trees with `symbol` fields filled in and constant
/// assignments rewritten into [`ConstDef`] nodes.
#[must_use]
pub fn resolve(gs: &mut GlobalState, mut trees: Vec<Expression>) -> Vec<Expression> {
    for tree in &mut trees {
        run_dsl_passes(tree);
        enter_names(gs, SymbolRef::root(), tree, false);
    }
    for tree in &trees {
        resolve_ancestors(gs, SymbolRef::root(), tree);
    }
    trees
}

/// Rewriter passes run before naming, so synthesized definitions get
/// symbols like hand-written ones.
fn run_dsl_passes(stmt: &mut Expression) {
    match stmt {
        Expression::ClassDef(class_def) => {
            crate::dsl::command::patch_dsl(class_def);
            for child in &mut class_def.rhs {
                run_dsl_passes(child);
            }
        }
        Expression::InsSeq(seq) => {
            for child in &mut seq.stats {
                run_dsl_passes(child);
            }
            run_dsl_passes(&mut seq.expr);
        }
        _ => {}
    }
}

/// Declaration-level checks over resolved trees.
///
/// Currently verifies that every declared ancestor names a known class,
/// raising [`ErrorClass::UnresolvedConstant`] with the inheriting class as
/// related information.
pub fn typecheck(gs: &GlobalState, trees: &[Expression]) {
    for tree in trees {
        check_ancestors(gs, SymbolRef::root(), tree);
    }
}

/// The namer walk: enters definitions under `owner`, attaches symbols to
/// nodes, raises redefinition diagnostics.
fn enter_names(gs: &mut GlobalState, owner: SymbolRef, stmt: &mut Expression, in_method: bool) {
    // Constant assignment becomes a ConstDef once its symbol exists.
    if stmt
        .as_assign()
        .is_some_and(|a| a.lhs.as_constant_lit().is_some())
    {
        let loc = stmt.loc();
        let Expression::Assign(assign) = std::mem::replace(stmt, make::empty_tree(loc)) else {
            unreachable!("guarded by as_assign above");
        };
        let name = assign
            .lhs
            .as_constant_lit()
            .map(|c| c.cnst.clone())
            .unwrap_or_default();
        let (symbol, _) = gs.enter_static_field(owner, name, assign.loc);
        *stmt = Expression::ConstDef(ConstDef::new(assign.loc, symbol, *assign.rhs));
        return;
    }

    match stmt {
        Expression::ClassDef(class_def) => {
            let symbol = enter_class_path(
                gs,
                owner,
                &class_def.name,
                class_def.kind == crate::ast::ClassDefKind::Module,
                class_def.loc,
            );
            class_def.symbol = symbol;
            for child in &mut class_def.rhs {
                enter_names(gs, symbol, child, false);
            }
        }
        Expression::MethodDef(method_def) => {
            let name = if method_def.is_self {
                eco_format!("self.{}", method_def.name)
            } else {
                method_def.name.clone()
            };
            let (symbol, fresh) = gs.enter_method(owner, name, method_def.loc);
            if !fresh {
                let previous = gs.symbol(symbol).definition_loc;
                gs.raise(TypeError::complex(
                    method_def.loc,
                    ErrorClass::RedefinitionOfMethod,
                    eco_format!("Method `{}` redefined", method_def.name),
                    vec![ErrorSection::new(
                        "Previous definition",
                        vec![ErrorLine::new(previous, "")],
                    )],
                ));
            }
            method_def.symbol = symbol;
            for arg in &method_def.args {
                if let Some(name) = reference_name(arg) {
                    let _ = gs.enter_method_argument(symbol, name, arg.loc());
                }
            }
            enter_names(gs, owner, &mut method_def.rhs, true);
        }
        Expression::InsSeq(seq) => {
            for child in &mut seq.stats {
                enter_names(gs, owner, child, in_method);
            }
            enter_names(gs, owner, &mut seq.expr, in_method);
        }
        Expression::Assign(assign) => {
            if let Some(ident) = assign.lhs.as_unresolved_ident() {
                if matches!(
                    ident.kind,
                    crate::ast::VarKind::Instance | crate::ast::VarKind::Class
                ) {
                    let (_, fresh) = gs.enter_field(owner, ident.name.clone(), ident.loc);
                    if !fresh && !in_method {
                        gs.raise(TypeError::new(
                            ident.loc,
                            ErrorClass::DuplicateVariableDeclaration,
                            eco_format!("Duplicate declaration of variable `{}`", ident.name),
                        ));
                    }
                }
            }
        }
        _ => {}
    }
}

/// Enters the class named by a constant path, creating intermediate
/// namespaces as modules. Returns the innermost symbol.
fn enter_class_path(
    gs: &mut GlobalState,
    owner: SymbolRef,
    name: &Expression,
    is_module: bool,
    loc: Loc,
) -> SymbolRef {
    let mut names = Vec::new();
    collect_const_path(name, &mut names);
    let mut cursor = owner;
    let last = names.len().saturating_sub(1);
    for (i, segment) in names.into_iter().enumerate() {
        let module = if i == last { is_module } else { true };
        let (symbol, _) = gs.enter_class(cursor, segment, module, loc);
        cursor = symbol;
    }
    cursor
}

fn collect_const_path(expr: &Expression, out: &mut Vec<EcoString>) {
    if let Some(cnst) = expr.as_constant_lit() {
        collect_const_path(&cnst.scope, out);
        out.push(cnst.cnst.clone());
    }
}

/// The resolver walk: records each class's ancestors on its symbol, and
/// flags reopenings that change the parent set.
fn resolve_ancestors(gs: &mut GlobalState, owner: SymbolRef, stmt: &Expression) {
    let Some(class_def) = stmt.as_class_def() else {
        if let Some(seq) = stmt.as_ins_seq() {
            for child in &seq.stats {
                resolve_ancestors(gs, owner, child);
            }
            resolve_ancestors(gs, owner, &seq.expr);
        }
        return;
    };
    let symbol = class_def.symbol;
    if symbol.exists() {
        let resolved: Vec<SymbolRef> = class_def
            .ancestors
            .iter()
            .filter_map(|ancestor| resolve_constant_path(gs, owner, ancestor))
            .collect();
        let recorded = gs.symbol(symbol).ancestors.clone();
        if recorded.is_empty() {
            gs.symbol_mut(symbol).ancestors = resolved;
        } else if !resolved.is_empty() && resolved != recorded {
            let previous = gs.symbol(symbol).definition_loc;
            gs.raise(TypeError::complex(
                class_def.loc,
                ErrorClass::RedefinitionOfParents,
                eco_format!(
                    "Parent of `{}` redefined",
                    gs.symbol_full_name(symbol)
                ),
                vec![ErrorSection::new(
                    "Previous definition",
                    vec![ErrorLine::new(previous, "")],
                )],
            ));
        }
        for child in &class_def.rhs {
            resolve_ancestors(gs, symbol, child);
        }
    }
}

/// The check walk: every declared ancestor must resolve to a known class.
fn check_ancestors(gs: &GlobalState, owner: SymbolRef, stmt: &Expression) {
    let Some(class_def) = stmt.as_class_def() else {
        if let Some(seq) = stmt.as_ins_seq() {
            for child in &seq.stats {
                check_ancestors(gs, owner, child);
            }
            check_ancestors(gs, owner, &seq.expr);
        }
        return;
    };
    for ancestor in &class_def.ancestors {
        if resolve_constant_path(gs, owner, ancestor).is_none() {
            gs.raise(TypeError::complex(
                ancestor.loc(),
                ErrorClass::UnresolvedConstant,
                eco_format!("Unable to resolve constant `{}`", const_path_name(ancestor)),
                vec![ErrorSection::new(
                    "Required for inheritance here",
                    vec![ErrorLine::new(class_def.name.loc(), "")],
                )],
            ));
        }
    }
    let symbol = class_def.symbol;
    let next_owner = if symbol.exists() { symbol } else { owner };
    for child in &class_def.rhs {
        check_ancestors(gs, next_owner, child);
    }
}

/// Resolves a constant path lexically: tries each enclosing scope from
/// `owner` outward to the root.
fn resolve_constant_path(gs: &GlobalState, owner: SymbolRef, expr: &Expression) -> Option<SymbolRef> {
    let mut names = Vec::new();
    collect_const_path(expr, &mut names);
    if names.is_empty() {
        return None;
    }
    let mut scope = owner;
    loop {
        if let Some(found) = resolve_in_scope(gs, scope, &names) {
            return Some(found);
        }
        if scope == SymbolRef::root() {
            return None;
        }
        scope = gs.symbol(scope).owner;
    }
}

fn resolve_in_scope(gs: &GlobalState, scope: SymbolRef, names: &[EcoString]) -> Option<SymbolRef> {
    let mut cursor = scope;
    for name in names {
        cursor = gs.find_class(cursor, name)?;
    }
    Some(cursor)
}

fn const_path_name(expr: &Expression) -> EcoString {
    let mut names = Vec::new();
    collect_const_path(expr, &mut names);
    let mut out = EcoString::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push_str("::");
        }
        out.push_str(name);
    }
    out
}

fn reference_name(expr: &Expression) -> Option<EcoString> {
    match expr {
        Expression::Local(local) => Some(local.local_variable.name.clone()),
        Expression::UnresolvedIdent(ident) => Some(ident.name.clone()),
        Expression::RestArg(arg) => reference_name(&arg.expr),
        Expression::KeywordArg(arg) => reference_name(&arg.expr),
        Expression::BlockArg(arg) => reference_name(&arg.expr),
        Expression::ShadowArg(arg) => reference_name(&arg.expr),
        Expression::OptionalArg(arg) => reference_name(&arg.expr),
        _ => None,
    }
}
