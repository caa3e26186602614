// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! File and symbol tables.
//!
//! [`GlobalState`] is the single source of truth for everything the pipeline
//! has learned about a workspace: which files exist, which symbols they
//! define, and which diagnostics have been raised. The language server keeps
//! two snapshots — an "indexed" state that only grows as files are admitted,
//! and a "resolved" state derived from it by [`GlobalState::deep_copy`] on
//! every full re-check.
//!
//! Both snapshots share one error queue: diagnostics raised while checking
//! the derived snapshot drain through the original. This mirrors the
//! pipeline's ownership story, where passes receive whichever snapshot they
//! operate on but errors always flow to the loop that owns the original.

use std::cell::RefCell;
use std::rc::Rc;

use camino::Utf8PathBuf;
use ecow::EcoString;

use crate::diagnostics::TypeError;
use crate::loc::Loc;

/// A reference to a file registered in a [`GlobalState`].
///
/// Id 0 is reserved as the "no file" sentinel; real files start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct FileRef(pub u32);

impl FileRef {
    /// The reserved "no file" reference.
    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    /// Returns true if this reference points at a real file.
    #[must_use]
    pub const fn exists(self) -> bool {
        self.0 != 0
    }

    /// The raw table index.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }
}

/// How a file entered the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    /// A regular workspace file, checked and reported against.
    Normal,
    /// A file shipped with the payload (standard library definitions).
    Payload,
    /// A deleted or invalidated file; kept so ids stay stable.
    TombStone,
}

/// A source file registered in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Path relative to the workspace root (or absolute for payload files).
    pub path: Utf8PathBuf,
    /// The full source text.
    pub source: String,
    /// How this file entered the workspace.
    pub source_type: SourceType,
}

impl File {
    /// Creates a new file entry.
    #[must_use]
    pub fn new(path: Utf8PathBuf, source: String, source_type: SourceType) -> Self {
        Self {
            path,
            source,
            source_type,
        }
    }
}

/// A reference to a symbol registered in a [`GlobalState`].
///
/// Id 0 is the "no symbol" sentinel (what AST nodes carry before the
/// resolver runs); id 1 is the root scope, whose display name is `<root>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SymbolRef(pub u32);

impl SymbolRef {
    /// The "no symbol" sentinel.
    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    /// The root scope.
    #[must_use]
    pub const fn root() -> Self {
        Self(1)
    }

    /// Returns true if this reference points at a real symbol.
    #[must_use]
    pub const fn exists(self) -> bool {
        self.0 != 0
    }

    /// The raw table index.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }
}

/// What kind of program construct a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// A class or module definition.
    ClassOrModule {
        /// True for `module`, false for `class`.
        is_module: bool,
    },
    /// A method definition.
    Method,
    /// An instance variable.
    Field,
    /// A constant (static field).
    StaticField,
    /// A method parameter.
    MethodArgument,
    /// A generic type member declared on a class.
    TypeMember,
    /// A generic type argument on a method.
    TypeArgument,
}

/// A named program construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// The symbol's own name (unqualified).
    pub name: EcoString,
    /// The enclosing symbol; the root owns itself.
    pub owner: SymbolRef,
    /// What kind of construct this is.
    pub kind: SymbolKind,
    /// Where the symbol is defined.
    pub definition_loc: Loc,
    /// Resolved ancestors, classes only. Empty until the resolver runs.
    pub ancestors: Vec<SymbolRef>,
}

impl Symbol {
    /// True for class and module symbols.
    #[must_use]
    pub const fn is_class(&self) -> bool {
        matches!(self.kind, SymbolKind::ClassOrModule { .. })
    }

    /// True for `module` symbols.
    #[must_use]
    pub const fn is_class_module(&self) -> bool {
        matches!(self.kind, SymbolKind::ClassOrModule { is_module: true })
    }

    /// True for `class` symbols.
    #[must_use]
    pub const fn is_class_class(&self) -> bool {
        matches!(self.kind, SymbolKind::ClassOrModule { is_module: false })
    }

    /// True for method symbols.
    #[must_use]
    pub const fn is_method(&self) -> bool {
        matches!(self.kind, SymbolKind::Method)
    }

    /// True for instance variable symbols.
    #[must_use]
    pub const fn is_field(&self) -> bool {
        matches!(self.kind, SymbolKind::Field)
    }

    /// True for constant symbols.
    #[must_use]
    pub const fn is_static_field(&self) -> bool {
        matches!(self.kind, SymbolKind::StaticField)
    }

    /// True for method parameter symbols.
    #[must_use]
    pub const fn is_method_argument(&self) -> bool {
        matches!(self.kind, SymbolKind::MethodArgument)
    }

    /// True for type member symbols.
    #[must_use]
    pub const fn is_type_member(&self) -> bool {
        matches!(self.kind, SymbolKind::TypeMember)
    }

    /// True for type argument symbols.
    #[must_use]
    pub const fn is_type_argument(&self) -> bool {
        matches!(self.kind, SymbolKind::TypeArgument)
    }
}

/// The workspace-wide file and symbol tables, plus the shared error queue.
#[derive(Debug)]
pub struct GlobalState {
    files: Vec<File>,
    symbols: Vec<Symbol>,
    error_queue: Rc<RefCell<Vec<TypeError>>>,
}

impl GlobalState {
    /// Creates an empty state with the reserved file slot and root symbol.
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: vec![File::new(
                Utf8PathBuf::new(),
                String::new(),
                SourceType::TombStone,
            )],
            symbols: vec![
                Symbol {
                    name: "<none>".into(),
                    owner: SymbolRef::none(),
                    kind: SymbolKind::ClassOrModule { is_module: true },
                    definition_loc: Loc::none(),
                    ancestors: Vec::new(),
                },
                Symbol {
                    name: "<root>".into(),
                    owner: SymbolRef::root(),
                    kind: SymbolKind::ClassOrModule { is_module: true },
                    definition_loc: Loc::none(),
                    ancestors: Vec::new(),
                },
            ],
            error_queue: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Number of file slots in use, including the reserved slot 0.
    #[must_use]
    pub fn files_used(&self) -> u32 {
        u32::try_from(self.files.len()).unwrap_or(u32::MAX)
    }

    /// Number of symbol slots in use, including the root.
    #[must_use]
    pub fn symbols_used(&self) -> u32 {
        u32::try_from(self.symbols.len()).unwrap_or(u32::MAX)
    }

    /// Looks up a file by reference.
    ///
    /// # Panics
    ///
    /// Panics if the reference does not belong to this state.
    #[must_use]
    pub fn file(&self, fref: FileRef) -> &File {
        &self.files[fref.0 as usize]
    }

    /// Looks up a symbol by reference.
    ///
    /// # Panics
    ///
    /// Panics if the reference does not belong to this state.
    #[must_use]
    pub fn symbol(&self, sref: SymbolRef) -> &Symbol {
        &self.symbols[sref.0 as usize]
    }

    /// Mutable symbol lookup, used by the resolver to record ancestors.
    pub fn symbol_mut(&mut self, sref: SymbolRef) -> &mut Symbol {
        &mut self.symbols[sref.0 as usize]
    }

    /// Admits a file into the workspace.
    ///
    /// If a live file with the same path is already registered, its content
    /// is replaced in place and the existing reference returned; the file id
    /// is stable across edits. Otherwise a new slot is appended.
    pub fn enter_file(&mut self, file: File) -> FileRef {
        for (i, existing) in self.files.iter_mut().enumerate().skip(1) {
            if existing.source_type != SourceType::TombStone && existing.path == file.path {
                *existing = file;
                return FileRef(u32::try_from(i).unwrap_or(u32::MAX));
            }
        }
        self.files.push(file);
        FileRef(u32::try_from(self.files.len() - 1).unwrap_or(u32::MAX))
    }

    /// Marks a file as deleted. Its id stays allocated.
    pub fn tombstone_file(&mut self, fref: FileRef) {
        let file = &mut self.files[fref.0 as usize];
        file.source_type = SourceType::TombStone;
        file.source.clear();
    }

    /// Finds a live file by path.
    #[must_use]
    pub fn find_file(&self, path: &str) -> FileRef {
        for (i, file) in self.files.iter().enumerate().skip(1) {
            if file.source_type != SourceType::TombStone && file.path == path {
                return FileRef(u32::try_from(i).unwrap_or(u32::MAX));
            }
        }
        FileRef::none()
    }

    /// Finds a class or module member of `owner` by name.
    #[must_use]
    pub fn find_class(&self, owner: SymbolRef, name: &str) -> Option<SymbolRef> {
        self.find_member(owner, name, true)
    }

    fn find_member(&self, owner: SymbolRef, name: &str, class_like: bool) -> Option<SymbolRef> {
        self.symbols.iter().enumerate().skip(2).find_map(|(i, sym)| {
            (sym.owner == owner && sym.name == name && sym.is_class() == class_like)
                .then(|| SymbolRef(u32::try_from(i).unwrap_or(u32::MAX)))
        })
    }

    fn enter_symbol(
        &mut self,
        owner: SymbolRef,
        name: EcoString,
        kind: SymbolKind,
        loc: Loc,
    ) -> (SymbolRef, bool) {
        let class_like = matches!(kind, SymbolKind::ClassOrModule { .. });
        if let Some(existing) = self.find_member(owner, &name, class_like) {
            return (existing, false);
        }
        self.symbols.push(Symbol {
            name,
            owner,
            kind,
            definition_loc: loc,
            ancestors: Vec::new(),
        });
        (
            SymbolRef(u32::try_from(self.symbols.len() - 1).unwrap_or(u32::MAX)),
            true,
        )
    }

    /// Enters a class or module under `owner`.
    ///
    /// Returns the symbol and whether it was newly created. Re-entering an
    /// existing class keeps its original definition location.
    pub fn enter_class(
        &mut self,
        owner: SymbolRef,
        name: EcoString,
        is_module: bool,
        loc: Loc,
    ) -> (SymbolRef, bool) {
        self.enter_symbol(owner, name, SymbolKind::ClassOrModule { is_module }, loc)
    }

    /// Enters a method under `owner`. Returns the symbol and whether it was
    /// newly created; a false flag means the method was already defined.
    pub fn enter_method(
        &mut self,
        owner: SymbolRef,
        name: EcoString,
        loc: Loc,
    ) -> (SymbolRef, bool) {
        self.enter_symbol(owner, name, SymbolKind::Method, loc)
    }

    /// Enters an instance variable under `owner`.
    pub fn enter_field(&mut self, owner: SymbolRef, name: EcoString, loc: Loc) -> (SymbolRef, bool) {
        self.enter_symbol(owner, name, SymbolKind::Field, loc)
    }

    /// Enters a constant under `owner`.
    pub fn enter_static_field(
        &mut self,
        owner: SymbolRef,
        name: EcoString,
        loc: Loc,
    ) -> (SymbolRef, bool) {
        self.enter_symbol(owner, name, SymbolKind::StaticField, loc)
    }

    /// Enters a method parameter under a method symbol.
    pub fn enter_method_argument(
        &mut self,
        owner: SymbolRef,
        name: EcoString,
        loc: Loc,
    ) -> (SymbolRef, bool) {
        self.enter_symbol(owner, name, SymbolKind::MethodArgument, loc)
    }

    /// The owner-chain-qualified name of a symbol, `<root>` for the root.
    #[must_use]
    pub fn symbol_full_name(&self, sref: SymbolRef) -> EcoString {
        if !sref.exists() || sref == SymbolRef::root() {
            return self.symbol(sref).name.clone();
        }
        let mut parts = Vec::new();
        let mut cursor = sref;
        while cursor != SymbolRef::root() {
            let sym = self.symbol(cursor);
            parts.push(sym.name.clone());
            cursor = sym.owner;
        }
        parts.reverse();
        let mut out = EcoString::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.push_str("::");
            }
            out.push_str(part);
        }
        out
    }

    /// Raises a diagnostic into the shared error queue.
    pub fn raise(&self, error: TypeError) {
        self.error_queue.borrow_mut().push(error);
    }

    /// Drains every queued diagnostic, leaving the queue empty.
    #[must_use]
    pub fn drain_errors(&self) -> Vec<TypeError> {
        std::mem::take(&mut *self.error_queue.borrow_mut())
    }

    /// Derives a fresh snapshot: file and symbol tables are cloned, the
    /// error queue is shared with the original.
    #[must_use]
    pub fn deep_copy(&self) -> GlobalState {
        GlobalState {
            files: self.files.clone(),
            symbols: self.symbols.clone(),
            error_queue: Rc::clone(&self.error_queue),
        }
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorClass;

    fn normal(path: &str, source: &str) -> File {
        File::new(Utf8PathBuf::from(path), source.to_string(), SourceType::Normal)
    }

    #[test]
    fn file_ids_start_at_one() {
        let mut gs = GlobalState::new();
        let a = gs.enter_file(normal("a.rb", ""));
        let b = gs.enter_file(normal("b.rb", ""));
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert_eq!(gs.files_used(), 3);
    }

    #[test]
    fn reentering_a_path_replaces_content_in_place() {
        let mut gs = GlobalState::new();
        let a = gs.enter_file(normal("a.rb", "old"));
        let a2 = gs.enter_file(normal("a.rb", "new"));
        assert_eq!(a, a2);
        assert_eq!(gs.file(a).source, "new");
        assert_eq!(gs.files_used(), 2);
    }

    #[test]
    fn tombstoned_path_gets_a_fresh_id() {
        let mut gs = GlobalState::new();
        let a = gs.enter_file(normal("a.rb", "x"));
        gs.tombstone_file(a);
        let b = gs.enter_file(normal("a.rb", "y"));
        assert_ne!(a, b);
        assert_eq!(gs.file(a).source_type, SourceType::TombStone);
    }

    #[test]
    fn enter_class_dedupes_by_owner_and_name() {
        let mut gs = GlobalState::new();
        let (foo, fresh) = gs.enter_class(SymbolRef::root(), "Foo".into(), false, Loc::none());
        let (foo2, fresh2) = gs.enter_class(SymbolRef::root(), "Foo".into(), false, Loc::none());
        assert_eq!(foo, foo2);
        assert!(fresh);
        assert!(!fresh2);
    }

    #[test]
    fn methods_and_classes_do_not_collide() {
        let mut gs = GlobalState::new();
        let (class, _) = gs.enter_class(SymbolRef::root(), "Foo".into(), false, Loc::none());
        let (method, fresh) = gs.enter_method(SymbolRef::root(), "Foo".into(), Loc::none());
        assert_ne!(class, method);
        assert!(fresh);
    }

    #[test]
    fn full_name_walks_the_owner_chain() {
        let mut gs = GlobalState::new();
        let (outer, _) = gs.enter_class(SymbolRef::root(), "Outer".into(), true, Loc::none());
        let (inner, _) = gs.enter_class(outer, "Inner".into(), false, Loc::none());
        let (m, _) = gs.enter_method(inner, "call".into(), Loc::none());
        assert_eq!(gs.symbol_full_name(SymbolRef::root()), "<root>");
        assert_eq!(gs.symbol_full_name(inner), "Outer::Inner");
        assert_eq!(gs.symbol_full_name(m), "Outer::Inner::call");
    }

    #[test]
    fn deep_copy_shares_the_error_queue() {
        let mut gs = GlobalState::new();
        let fref = gs.enter_file(normal("a.rb", "x"));
        let copy = gs.deep_copy();
        copy.raise(TypeError::new(
            Loc::new(fref, 0, 1),
            ErrorClass::UnresolvedConstant,
            "Unable to resolve constant `X`",
        ));
        let drained = gs.drain_errors();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].what, ErrorClass::UnresolvedConstant);
        assert!(copy.drain_errors().is_empty());
    }

    #[test]
    fn deep_copy_tables_are_independent() {
        let mut gs = GlobalState::new();
        gs.enter_file(normal("a.rb", "x"));
        let mut copy = gs.deep_copy();
        copy.enter_file(normal("b.rb", "y"));
        assert_eq!(gs.files_used(), 2);
        assert_eq!(copy.files_used(), 3);
    }
}
