// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic accumulation and LSP encoding.
//!
//! The pipeline raises [`TypeError`]s into the queue shared by both
//! snapshots; the loop drains them here, silences the classes that are
//! expected noise during a re-check, accumulates per file, and publishes.
//! LSP requires the *full* diagnostic set per publish — an empty array is
//! how a file gets cleared — so accumulated lists live until the next slow
//! path invalidates them.
//!
//! Encoding notes: internal positions are 1-based, the protocol's are
//! 0-based, so both endpoints shift by one on the way out. Locations in
//! payload files are rendered as `<path>#L<line>` so they open on a web
//! viewer; workspace files get `rootUri/<path>`.

use std::io::{self, BufRead, Write};

use corundum_core::diagnostics::{ErrorClass, TypeError};
use corundum_core::loc::Loc;
use corundum_core::symbol_table::{GlobalState, SourceType, SymbolRef};
use serde_json::{json, Value};

use crate::server::LspLoop;

/// Classes dropped at drain time.
///
/// A slow path may see a file's previously indexed tree *and* its fresh
/// tree, so redefinitions are routine rather than actionable. The set is a
/// static decision; there is deliberately no way to extend it at runtime.
fn silence_error(what: ErrorClass) -> bool {
    matches!(
        what,
        ErrorClass::RedefinitionOfMethod
            | ErrorClass::DuplicateVariableDeclaration
            | ErrorClass::RedefinitionOfParents
    )
}

impl<R: BufRead, W: Write> LspLoop<R, W> {
    /// Drains the shared queue into the per-file accumulator.
    ///
    /// `updated_errors` records which files need a publish; the trailing
    /// check is a cheap dedup for the common burst of errors against one
    /// file, not a set. Files that have become tombstones are dropped from
    /// the accumulator afterwards.
    pub(crate) fn drain_errors(&mut self) {
        for error in self.initial_gs.drain_errors() {
            if silence_error(error.what) {
                continue;
            }
            let file = error.loc.file;
            self.errors_accumulated.entry(file).or_default().push(error);

            if self.updated_errors.last() == Some(&file) {
                continue;
            }
            self.updated_errors.push(file);
        }
        let gs = &self.initial_gs;
        self.errors_accumulated
            .retain(|file, _| gs.file(*file).source_type != SourceType::TombStone);
    }

    /// Forgets every accumulated and pending-publish error. Called at the
    /// start of each slow path so stale diagnostics never mix with fresh
    /// ones.
    pub(crate) fn invalidate_all_errors(&mut self) {
        self.errors_accumulated.clear();
        self.updated_errors.clear();
    }

    /// Publishes one `textDocument/publishDiagnostics` per updated file,
    /// carrying that file's full accumulated set.
    pub(crate) fn push_errors(&mut self) -> io::Result<()> {
        self.drain_errors();

        let mut publishes = Vec::new();
        {
            let Some(final_gs) = &self.final_gs else {
                self.updated_errors.clear();
                return Ok(());
            };
            for &file in &self.updated_errors {
                if !file.exists() {
                    continue;
                }
                let file_data = final_gs.file(file);
                let uri = if file_data.source_type == SourceType::Payload {
                    file_data.path.to_string()
                } else {
                    self.local_name_to_remote(file_data.path.as_str())
                };

                let empty = Vec::new();
                let errors = self.errors_accumulated.get(&file).unwrap_or(&empty);
                let diagnostics: Vec<Value> = errors
                    .iter()
                    .map(|error| self.error_to_diagnostic(final_gs, error))
                    .collect();

                publishes.push(json!({"uri": uri, "diagnostics": diagnostics}));
            }
        }

        for params in publishes {
            self.send_notification("textDocument/publishDiagnostics", params)?;
        }
        self.updated_errors.clear();
        Ok(())
    }

    fn error_to_diagnostic(&self, gs: &GlobalState, error: &TypeError) -> Value {
        let mut diagnostic = json!({
            "range": loc_to_range(gs, error.loc),
            "code": error.what.code(),
            "message": error.formatted,
        });
        if error.is_complex() {
            let mut related = Vec::new();
            for section in &error.sections {
                for line in &section.messages {
                    let message_file = gs.file(line.loc.file);
                    let uri = if message_file.source_type == SourceType::Payload {
                        // Appending #L<line> makes the location open at the
                        // right spot on a web viewer.
                        let (start, _) = line.loc.position(gs);
                        format!("{}#L{}", message_file.path, start.line)
                    } else {
                        self.local_name_to_remote(message_file.path.as_str())
                    };
                    let message = if line.formatted_message.is_empty() {
                        section.header.clone()
                    } else {
                        line.formatted_message.clone()
                    };
                    related.push(json!({
                        "location": {"uri": uri, "range": loc_to_range(gs, line.loc)},
                        "message": message,
                    }));
                }
            }
            diagnostic["relatedInformation"] = Value::Array(related);
        }
        diagnostic
    }

    /// Encodes one symbol as a `SymbolInformation`, or nothing for kinds
    /// the protocol mapping does not cover.
    pub(crate) fn symbol_information(&self, gs: &GlobalState, sref: SymbolRef) -> Option<Value> {
        let sym = gs.symbol(sref);
        let kind = if sym.is_class() {
            if sym.is_class_module() {
                2
            } else {
                5
            }
        } else if sym.is_method() {
            if sym.name == "initialize" {
                9
            } else {
                6
            }
        } else if sym.is_field() {
            8
        } else if sym.is_static_field() {
            14
        } else if sym.is_method_argument() {
            13
        } else if sym.is_type_member() || sym.is_type_argument() {
            26
        } else {
            return None;
        };
        Some(json!({
            "name": sym.name,
            "kind": kind,
            "location": self.loc_to_location(gs, sym.definition_loc),
            "containerName": gs.symbol_full_name(sym.owner),
        }))
    }

    pub(crate) fn loc_to_location(&self, gs: &GlobalState, loc: Loc) -> Value {
        let uri = self.local_name_to_remote(gs.file(loc.file).path.as_str());
        json!({"uri": uri, "range": loc_to_range(gs, loc)})
    }
}

/// Encodes a range. All LSP numbers are zero-based, ours are 1-based.
pub(crate) fn loc_to_range(gs: &GlobalState, loc: Loc) -> Value {
    let (start, end) = loc.position(gs);
    json!({
        "start": {"line": start.line - 1, "character": start.column - 1},
        "end": {"line": end.line - 1, "character": end.column - 1},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Opts;
    use crate::transport::Transport;
    use camino::Utf8PathBuf;
    use corundum_core::diagnostics::{ErrorLine, ErrorSection};
    use corundum_core::symbol_table::{File, FileRef};
    use std::io::Cursor;

    type TestLoop = LspLoop<Cursor<Vec<u8>>, Vec<u8>>;

    fn test_loop() -> TestLoop {
        LspLoop::new(
            Transport::new(Cursor::new(Vec::new()), Vec::new()),
            Opts::default(),
        )
    }

    fn enter(gs: &mut GlobalState, path: &str, source: &str, source_type: SourceType) -> FileRef {
        gs.enter_file(File::new(
            Utf8PathBuf::from(path),
            source.to_string(),
            source_type,
        ))
    }

    #[test]
    fn ranges_shift_to_zero_based() {
        let mut gs = GlobalState::new();
        let fref = enter(&mut gs, "a.rb", "class Foo\nend\n", SourceType::Normal);
        let range = loc_to_range(&gs, Loc::new(fref, 6, 9));
        assert_eq!(range["start"]["line"], 0);
        assert_eq!(range["start"]["character"], 6);
        assert_eq!(range["end"]["character"], 9);

        let range = loc_to_range(&gs, Loc::new(fref, 10, 13));
        assert_eq!(range["start"]["line"], 1);
        assert_eq!(range["start"]["character"], 0);
    }

    #[test]
    fn drain_silences_the_static_classes() {
        let mut lsp = test_loop();
        let fref = enter(&mut lsp.initial_gs, "a.rb", "x", SourceType::Normal);
        let loc = Loc::new(fref, 0, 1);
        lsp.initial_gs.raise(TypeError::new(
            loc,
            ErrorClass::RedefinitionOfMethod,
            "Method `x` redefined",
        ));
        lsp.initial_gs.raise(TypeError::new(
            loc,
            ErrorClass::DuplicateVariableDeclaration,
            "Duplicate declaration of variable `@x`",
        ));
        lsp.initial_gs.raise(TypeError::new(
            loc,
            ErrorClass::RedefinitionOfParents,
            "Parent of `X` redefined",
        ));
        lsp.initial_gs.raise(TypeError::new(
            loc,
            ErrorClass::UnresolvedConstant,
            "Unable to resolve constant `Y`",
        ));
        lsp.drain_errors();

        let accumulated = &lsp.errors_accumulated[&fref];
        assert_eq!(accumulated.len(), 1);
        assert_eq!(accumulated[0].what, ErrorClass::UnresolvedConstant);
        assert_eq!(lsp.updated_errors, vec![fref]);
    }

    #[test]
    fn trailing_dedup_records_each_file_once_per_burst() {
        let mut lsp = test_loop();
        let a = enter(&mut lsp.initial_gs, "a.rb", "x", SourceType::Normal);
        let b = enter(&mut lsp.initial_gs, "b.rb", "y", SourceType::Normal);
        for file in [a, a, b, b, a] {
            lsp.initial_gs.raise(TypeError::new(
                Loc::new(file, 0, 1),
                ErrorClass::UnresolvedConstant,
                "Unable to resolve constant `Z`",
            ));
        }
        lsp.drain_errors();
        // Trailing check only: a, b, a — not a set.
        assert_eq!(lsp.updated_errors, vec![a, b, a]);
    }

    #[test]
    fn tombstoned_files_are_dropped_from_the_accumulator() {
        let mut lsp = test_loop();
        let fref = enter(&mut lsp.initial_gs, "a.rb", "x", SourceType::Normal);
        lsp.initial_gs.raise(TypeError::new(
            Loc::new(fref, 0, 1),
            ErrorClass::UnresolvedConstant,
            "Unable to resolve constant `Z`",
        ));
        lsp.drain_errors();
        assert!(lsp.errors_accumulated.contains_key(&fref));

        lsp.initial_gs.tombstone_file(fref);
        lsp.drain_errors();
        assert!(!lsp.errors_accumulated.contains_key(&fref));
    }

    #[test]
    fn invalidate_clears_everything() {
        let mut lsp = test_loop();
        let fref = enter(&mut lsp.initial_gs, "a.rb", "x", SourceType::Normal);
        lsp.initial_gs.raise(TypeError::new(
            Loc::new(fref, 0, 1),
            ErrorClass::UnresolvedConstant,
            "Unable to resolve constant `Z`",
        ));
        lsp.drain_errors();
        lsp.invalidate_all_errors();
        assert!(lsp.errors_accumulated.is_empty());
        assert!(lsp.updated_errors.is_empty());
    }

    #[test]
    fn payload_locations_render_as_web_anchors() {
        let mut lsp = test_loop();
        lsp.root_uri = "file:///w".to_string();
        let normal = enter(&mut lsp.initial_gs, "a.rb", "class A\nend\n", SourceType::Normal);
        let payload = enter(
            &mut lsp.initial_gs,
            "core/string.rbi",
            "line one\nclass String\nend\n",
            SourceType::Payload,
        );
        let gs = lsp.initial_gs.deep_copy();

        let error = TypeError::complex(
            Loc::new(normal, 0, 5),
            ErrorClass::UnresolvedConstant,
            "Unable to resolve constant `Q`",
            vec![ErrorSection::new(
                "Defined in the standard library:",
                vec![ErrorLine::new(Loc::new(payload, 9, 14), "")],
            )],
        );
        let diagnostic = lsp.error_to_diagnostic(&gs, &error);
        let related = diagnostic["relatedInformation"].as_array().unwrap();
        assert_eq!(related[0]["location"]["uri"], "core/string.rbi#L2");
        assert_eq!(related[0]["message"], "Defined in the standard library:");
    }

    #[test]
    fn workspace_related_locations_use_the_root_uri() {
        let mut lsp = test_loop();
        lsp.root_uri = "file:///w".to_string();
        let normal = enter(&mut lsp.initial_gs, "a.rb", "class A\nend\n", SourceType::Normal);
        let gs = lsp.initial_gs.deep_copy();
        let error = TypeError::complex(
            Loc::new(normal, 0, 5),
            ErrorClass::UnresolvedConstant,
            "Unable to resolve constant `Q`",
            vec![ErrorSection::new(
                "Previous definition",
                vec![ErrorLine::new(Loc::new(normal, 6, 7), "defined here")],
            )],
        );
        let diagnostic = lsp.error_to_diagnostic(&gs, &error);
        let related = diagnostic["relatedInformation"].as_array().unwrap();
        assert_eq!(related[0]["location"]["uri"], "file:///w/a.rb");
        assert_eq!(related[0]["message"], "defined here");
    }

    #[test]
    fn simple_errors_carry_no_related_information() {
        let mut lsp = test_loop();
        lsp.root_uri = "file:///w".to_string();
        let fref = enter(&mut lsp.initial_gs, "a.rb", "x", SourceType::Normal);
        let gs = lsp.initial_gs.deep_copy();
        let error = TypeError::new(
            Loc::new(fref, 0, 1),
            ErrorClass::ParseError,
            "unexpected `end`",
        );
        let diagnostic = lsp.error_to_diagnostic(&gs, &error);
        assert!(diagnostic.get("relatedInformation").is_none());
        assert_eq!(diagnostic["code"], 2001);
    }

    #[test]
    fn member_symbol_kinds_map_to_the_protocol_numbers() {
        let mut lsp = test_loop();
        lsp.root_uri = "file:///w".to_string();
        let fref = enter(&mut lsp.initial_gs, "a.rb", "class A\nend\n", SourceType::Normal);
        let loc = Loc::new(fref, 0, 7);
        let (class, _) = lsp
            .initial_gs
            .enter_class(SymbolRef::root(), "A".into(), false, loc);
        let (method, _) = lsp.initial_gs.enter_method(class, "go".into(), loc);
        let (arg, _) = lsp.initial_gs.enter_method_argument(method, "x".into(), loc);
        let (field, _) = lsp.initial_gs.enter_field(class, "@count".into(), loc);
        let (constant, _) = lsp.initial_gs.enter_static_field(class, "MAX".into(), loc);
        let gs = lsp.initial_gs.deep_copy();

        assert_eq!(lsp.symbol_information(&gs, method).unwrap()["kind"], 6);
        assert_eq!(lsp.symbol_information(&gs, arg).unwrap()["kind"], 13);
        assert_eq!(lsp.symbol_information(&gs, field).unwrap()["kind"], 8);
        assert_eq!(lsp.symbol_information(&gs, constant).unwrap()["kind"], 14);
        assert_eq!(
            lsp.symbol_information(&gs, method).unwrap()["containerName"],
            "A"
        );
    }

    #[test]
    fn module_and_class_kinds_differ() {
        let mut lsp = test_loop();
        lsp.root_uri = "file:///w".to_string();
        let fref = enter(&mut lsp.initial_gs, "a.rb", "module M\nend\n", SourceType::Normal);
        let (module, _) =
            lsp.initial_gs
                .enter_class(SymbolRef::root(), "M".into(), true, Loc::new(fref, 0, 8));
        let (class, _) =
            lsp.initial_gs
                .enter_class(SymbolRef::root(), "C".into(), false, Loc::new(fref, 0, 8));
        let gs = lsp.initial_gs.deep_copy();
        assert_eq!(lsp.symbol_information(&gs, module).unwrap()["kind"], 2);
        assert_eq!(lsp.symbol_information(&gs, class).unwrap()["kind"], 5);
    }
}
