// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! The LSP event loop.
//!
//! Strictly single-threaded: one read, one dispatch, one write, repeat.
//! The loop owns two symbol-table snapshots — `initial_gs` grows as files
//! are admitted and is never resolved against; `final_gs` is derived from
//! it on every slow path and answers symbol queries. Inbound replies to
//! server-issued requests are consumed by the pending-reply registry before
//! method dispatch ever sees them.
//!
//! Blocking happens in exactly two places: reading the next message, and
//! the synchronous pipeline passes. New requests are not serviced while a
//! re-check runs; clients observe latency, never reordering.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use camino::Utf8PathBuf;
use corundum_core::ast::Expression;
use corundum_core::diagnostics::TypeError;
use corundum_core::pipeline;
use corundum_core::symbol_table::{File, FileRef, GlobalState, SourceType, SymbolRef};
use serde_json::{json, Value};
use tracing::info;

use crate::methods::{get_method, MethodKind, METHOD_NOT_FOUND};
use crate::transport::Transport;

/// What the loop was configured with at startup.
#[derive(Debug, Clone, Default)]
pub struct Opts {
    /// Workspace files indexed on `initialized`.
    pub input_file_names: Vec<Utf8PathBuf>,
}

/// One branch of a pending reply continuation.
///
/// Continuations are data, not closures: the reply handler dispatches on
/// the action with full access to the loop, which keeps handlers single-
/// shot and on the loop context by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyAction {
    /// Do nothing with the payload.
    Ignore,
    /// Treat the payload as `[{uri, content}]` edits and re-check them.
    ApplyWatchedFileEdits,
}

/// The two-branch continuation registered for a server-issued request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingReply {
    pub(crate) on_result: ReplyAction,
    pub(crate) on_error: ReplyAction,
}

/// The event loop state. Generic over the transport streams so tests can
/// drive a whole session from memory.
pub struct LspLoop<R, W> {
    pub(crate) transport: Transport<R, W>,
    pub(crate) opts: Opts,
    pub(crate) root_uri: String,
    pub(crate) initial_gs: GlobalState,
    pub(crate) final_gs: Option<GlobalState>,
    pub(crate) indexed: Vec<Option<Expression>>,
    pub(crate) errors_accumulated: HashMap<FileRef, Vec<TypeError>>,
    pub(crate) updated_errors: Vec<FileRef>,
    pub(crate) awaiting_response: HashMap<String, PendingReply>,
    pub(crate) request_counter: u64,
}

impl<R: BufRead, W: Write> LspLoop<R, W> {
    /// Creates a loop over the given transport.
    pub fn new(transport: Transport<R, W>, opts: Opts) -> Self {
        Self {
            transport,
            opts,
            root_uri: String::new(),
            initial_gs: GlobalState::new(),
            final_gs: None,
            indexed: Vec::new(),
            errors_accumulated: HashMap::new(),
            updated_errors: Vec::new(),
            awaiting_response: HashMap::new(),
            request_counter: 0,
        }
    }

    /// Runs until `exit`, end of stream, or a framing error.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            let document = match self.transport.read_message() {
                Ok(Some(document)) => document,
                Ok(None) => {
                    info!("eof");
                    return Ok(());
                }
                Err(error) => {
                    info!("terminating on framing error: {error}");
                    return Ok(());
                }
            };

            if self.handle_replies(&document)? {
                continue;
            }

            let method_name = document
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let method = get_method(method_name);
            assert!(
                matches!(method.kind, MethodKind::ClientInitiated | MethodKind::Both),
                "client sent a server-initiated method"
            );

            if method.is_notification {
                info!("Processing notification {}", method.name);
                match method.name.as_str() {
                    "workspace/didChangeWatchedFiles" => {
                        let params = document.get("params").cloned().unwrap_or(Value::Null);
                        self.send_request(
                            "ReadFile",
                            params,
                            PendingReply {
                                on_result: ReplyAction::ApplyWatchedFileEdits,
                                on_error: ReplyAction::Ignore,
                            },
                        )?;
                    }
                    "textDocument/didChange" => self.handle_did_change(&document)?,
                    "initialized" => {
                        self.re_index(true);
                        self.run_slow_path(Vec::new());
                        self.push_errors()?;
                    }
                    "exit" => return Ok(()),
                    _ => {}
                }
            } else {
                info!("Processing request {}", method.name);
                let mut result = Value::Null;
                let mut error_code = 0;
                let mut error_string = String::new();
                match method.name.as_str() {
                    "initialize" => {
                        self.root_uri = document["params"]["rootUri"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string();
                        result = json!({
                            "capabilities": {
                                "textDocumentSync": 1,
                                "documentSymbolProvider": true,
                            }
                        });
                    }
                    "shutdown" => {
                        // Reply carries the default value: null.
                    }
                    "textDocument/documentSymbol" => {
                        let uri = document["params"]["textDocument"]["uri"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string();
                        result = self.document_symbols(&uri);
                    }
                    _ => {
                        assert!(!method.is_supported, "failing a supported method");
                        error_code = METHOD_NOT_FOUND;
                        error_string = format!("Unknown method: {}", method.name);
                    }
                }
                if error_code == 0 {
                    self.send_result(&document, result)?;
                } else {
                    self.send_error(&document, error_code, &error_string)?;
                }
            }
        }
    }

    fn handle_did_change(&mut self, document: &Value) -> io::Result<()> {
        let edits = &document["params"];
        assert!(edits.is_object(), "didChange params must be an object");
        let uri = edits["textDocument"]["uri"].as_str().unwrap_or_default();
        let content = edits["contentChanges"][0]["text"]
            .as_str()
            .unwrap_or_default();
        if uri.starts_with(&self.root_uri) {
            let file = File::new(
                Utf8PathBuf::from(self.remote_name_to_local(uri)),
                content.to_string(),
                SourceType::Normal,
            );
            self.try_fast_path(vec![file]);
            self.push_errors()?;
        }
        Ok(())
    }

    /// Consumes inbound reply documents. Returns true when the document was
    /// a reply (even one nobody was waiting for).
    fn handle_replies(&mut self, document: &Value) -> io::Result<bool> {
        if let Some(result) = document.get("result") {
            if let Some(id) = document.get("id").and_then(Value::as_str) {
                if let Some(pending) = self.awaiting_response.remove(id) {
                    self.run_reply_action(pending.on_result, result)?;
                }
            }
            return Ok(true);
        }
        if let Some(error) = document.get("error") {
            if let Some(id) = document.get("id").and_then(Value::as_str) {
                if let Some(pending) = self.awaiting_response.remove(id) {
                    self.run_reply_action(pending.on_error, error)?;
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn run_reply_action(&mut self, action: ReplyAction, payload: &Value) -> io::Result<()> {
        match action {
            ReplyAction::Ignore => {}
            ReplyAction::ApplyWatchedFileEdits => {
                let Some(edits) = payload.as_array() else {
                    return Ok(());
                };
                let mut files = Vec::new();
                for change in edits {
                    let uri = change["uri"].as_str().unwrap_or_default();
                    let content = change["content"].as_str().unwrap_or_default();
                    if uri.starts_with(&self.root_uri) {
                        files.push(File::new(
                            Utf8PathBuf::from(self.remote_name_to_local(uri)),
                            content.to_string(),
                            SourceType::Normal,
                        ));
                    }
                }
                self.try_fast_path(files);
                self.push_errors()?;
            }
        }
        Ok(())
    }

    /// Issues a server→client request and registers its continuation.
    pub(crate) fn send_request(
        &mut self,
        method: &str,
        params: Value,
        reply: PendingReply,
    ) -> io::Result<()> {
        let meta = get_method(method);
        assert!(!meta.is_notification, "requests must not be notifications");
        assert!(
            matches!(meta.kind, MethodKind::ServerInitiated | MethodKind::Both),
            "server may only issue server-initiated requests"
        );
        self.request_counter += 1;
        let id = format!("ruby-typer-req-{}", self.request_counter);
        let request = json!({"id": id, "method": method, "params": params});
        self.awaiting_response.insert(id, reply);
        self.transport.write_message(&request)
    }

    /// Emits a server→client notification.
    pub(crate) fn send_notification(&mut self, method: &str, params: Value) -> io::Result<()> {
        let meta = get_method(method);
        assert!(meta.is_notification, "notifications only");
        assert!(
            matches!(meta.kind, MethodKind::ServerInitiated | MethodKind::Both),
            "server may only emit server-initiated notifications"
        );
        self.transport
            .write_message(&json!({"method": method, "params": params}))
    }

    fn send_result(&mut self, for_request: &Value, result: Value) -> io::Result<()> {
        let id = for_request.get("id").cloned().unwrap_or(Value::Null);
        self.transport.write_message(&json!({"id": id, "result": result}))
    }

    fn send_error(&mut self, for_request: &Value, code: i64, message: &str) -> io::Result<()> {
        let id = for_request.get("id").cloned().unwrap_or(Value::Null);
        self.transport.write_message(&json!({
            "id": id,
            "error": {"code": code, "message": message},
        }))
    }

    /// The incremental re-check. Reserved as an optimization point; today
    /// it defers to the full re-check, which is always correct.
    pub(crate) fn try_fast_path(&mut self, changed_files: Vec<File>) {
        self.run_slow_path(changed_files);
    }

    /// The full re-check.
    ///
    /// Working set = a deep copy of every indexed tree (clones that refuse
    /// are skipped and that tree simply sits this pass out) plus fresh
    /// trees for the changed files. `indexed` itself is only rebuilt by
    /// [`Self::re_index`]; an edited file therefore contributes both its
    /// previously indexed tree and its fresh one, and the resulting
    /// redefinition diagnostics are silenced at drain time.
    pub(crate) fn run_slow_path(&mut self, changed_files: Vec<File>) {
        info!("Taking slow path");
        self.invalidate_all_errors();

        let mut working: Vec<Expression> = Vec::new();
        for tree in self.indexed.iter().flatten() {
            if let Some(copy) = tree.deep_copy() {
                working.push(copy);
            }
        }

        let changed_refs: Vec<FileRef> = changed_files
            .into_iter()
            .map(|file| self.initial_gs.enter_file(file))
            .collect();
        working.extend(pipeline::index(&mut self.initial_gs, &[], &changed_refs));

        let mut final_gs = self.initial_gs.deep_copy();
        let resolved = pipeline::resolve(&mut final_gs, working);
        pipeline::typecheck(&final_gs, &resolved);
        self.final_gs = Some(final_gs);
    }

    /// Rebuilds `indexed` from scratch: the configured input files when
    /// `initial`, else every Normal file already registered.
    pub(crate) fn re_index(&mut self, initial: bool) {
        self.indexed.clear();
        let trees = if initial {
            pipeline::index(&mut self.initial_gs, &self.opts.input_file_names, &[])
        } else {
            let input_files: Vec<FileRef> = (1..self.initial_gs.files_used())
                .map(FileRef)
                .filter(|fref| self.initial_gs.file(*fref).source_type == SourceType::Normal)
                .collect();
            pipeline::index(&mut self.initial_gs, &[], &input_files)
        };
        for tree in trees {
            let id = tree.loc().file.id() as usize;
            if id >= self.indexed.len() {
                self.indexed.resize_with(id + 1, || None);
            }
            self.indexed[id] = Some(tree);
        }
    }

    fn document_symbols(&self, uri: &str) -> Value {
        let mut result = Vec::new();
        if let Some(final_gs) = &self.final_gs {
            let fref = self.uri_to_file_ref(final_gs, uri);
            if fref.exists() {
                for idx in 1..final_gs.symbols_used() {
                    let sref = SymbolRef(idx);
                    if final_gs.symbol(sref).definition_loc.file == fref {
                        if let Some(info) = self.symbol_information(final_gs, sref) {
                            result.push(info);
                        }
                    }
                }
            }
        }
        Value::Array(result)
    }

    /// Strips the workspace prefix off a client uri.
    pub(crate) fn remote_name_to_local(&self, uri: &str) -> String {
        assert!(uri.starts_with(&self.root_uri), "uri outside the workspace");
        uri[self.root_uri.len() + 1..].to_string()
    }

    /// Prefixes a workspace-relative path with the workspace uri.
    pub(crate) fn local_name_to_remote(&self, path: &str) -> String {
        format!("{}/{path}", self.root_uri)
    }

    /// Maps a client uri to a file registered in `gs`.
    pub(crate) fn uri_to_file_ref(&self, gs: &GlobalState, uri: &str) -> FileRef {
        if !uri.starts_with(&self.root_uri) {
            return FileRef::none();
        }
        let needle = self.remote_name_to_local(uri);
        gs.find_file(&needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame_all(messages: &[Value]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for message in messages {
            let body = message.to_string();
            bytes.extend(format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes());
        }
        bytes
    }

    fn decode_frames(bytes: &[u8]) -> Vec<Value> {
        let mut transport = Transport::new(Cursor::new(bytes.to_vec()), Vec::new());
        let mut out = Vec::new();
        while let Ok(Some(document)) = transport.read_message() {
            out.push(document);
        }
        out
    }

    fn run_session(messages: &[Value]) -> Vec<Value> {
        let input = frame_all(messages);
        let mut lsp = LspLoop::new(
            Transport::new(Cursor::new(input), Vec::new()),
            Opts::default(),
        );
        lsp.run().unwrap();
        decode_frames(&lsp.transport.writer)
    }

    fn initialize_msg() -> Value {
        json!({"id": 1, "method": "initialize", "params": {"rootUri": "file:///w"}})
    }

    fn initialized_msg() -> Value {
        json!({"method": "initialized", "params": {}})
    }

    fn did_change(uri: &str, text: &str) -> Value {
        json!({
            "method": "textDocument/didChange",
            "params": {
                "textDocument": {"uri": uri, "version": 2},
                "contentChanges": [{"text": text}],
            }
        })
    }

    fn exit_msg() -> Value {
        json!({"method": "exit"})
    }

    fn reply_for<'out>(out: &'out [Value], id: i64) -> &'out Value {
        out.iter()
            .find(|m| m.get("id").is_some_and(|v| v == &json!(id)))
            .unwrap_or_else(|| panic!("no reply with id {id} in {out:?}"))
    }

    fn notifications<'out>(out: &'out [Value], method: &str) -> Vec<&'out Value> {
        out.iter()
            .filter(|m| m.get("method").is_some_and(|v| v == &json!(method)))
            .collect()
    }

    #[test]
    fn initialize_handshake_reports_capabilities() {
        let out = run_session(&[initialize_msg(), exit_msg()]);
        let reply = reply_for(&out, 1);
        assert_eq!(reply["result"]["capabilities"]["textDocumentSync"], 1);
        assert_eq!(
            reply["result"]["capabilities"]["documentSymbolProvider"],
            true
        );
    }

    #[test]
    fn shutdown_replies_null() {
        let out = run_session(&[
            initialize_msg(),
            json!({"id": 7, "method": "shutdown"}),
            exit_msg(),
        ]);
        let reply = reply_for(&out, 7);
        assert_eq!(reply["result"], Value::Null);
    }

    #[test]
    fn unknown_methods_get_method_not_found() {
        let out = run_session(&[
            initialize_msg(),
            json!({"id": 9, "method": "textDocument/hover", "params": {}}),
            exit_msg(),
        ]);
        let reply = reply_for(&out, 9);
        assert_eq!(reply["error"]["code"], -32601);
        assert_eq!(reply["error"]["message"], "Unknown method: textDocument/hover");
    }

    #[test]
    fn document_symbol_lists_classes_and_methods() {
        let out = run_session(&[
            initialize_msg(),
            initialized_msg(),
            did_change("file:///w/u.rb", "class Foo; def bar; end; end"),
            json!({
                "id": 2,
                "method": "textDocument/documentSymbol",
                "params": {"textDocument": {"uri": "file:///w/u.rb"}},
            }),
            exit_msg(),
        ]);
        let result = reply_for(&out, 2)["result"].as_array().unwrap().clone();
        assert_eq!(result.len(), 2);

        assert_eq!(result[0]["name"], "Foo");
        assert_eq!(result[0]["kind"], 5);
        assert_eq!(result[0]["containerName"], "<root>");
        assert_eq!(result[0]["location"]["uri"], "file:///w/u.rb");
        assert_eq!(result[0]["location"]["range"]["start"]["line"], 0);

        assert_eq!(result[1]["name"], "bar");
        assert_eq!(result[1]["kind"], 6);
        assert_eq!(result[1]["containerName"], "Foo");
    }

    #[test]
    fn document_symbol_for_unknown_uri_is_empty() {
        let out = run_session(&[
            initialize_msg(),
            initialized_msg(),
            json!({
                "id": 3,
                "method": "textDocument/documentSymbol",
                "params": {"textDocument": {"uri": "file:///elsewhere/x.rb"}},
            }),
            exit_msg(),
        ]);
        assert_eq!(reply_for(&out, 3)["result"], json!([]));
    }

    #[test]
    fn initialize_constructor_maps_to_kind_9() {
        let out = run_session(&[
            initialize_msg(),
            initialized_msg(),
            did_change("file:///w/u.rb", "class Foo\n  def initialize\n  end\nend\n"),
            json!({
                "id": 2,
                "method": "textDocument/documentSymbol",
                "params": {"textDocument": {"uri": "file:///w/u.rb"}},
            }),
            exit_msg(),
        ]);
        let result = reply_for(&out, 2)["result"].as_array().unwrap().clone();
        let ctor = result.iter().find(|s| s["name"] == "initialize").unwrap();
        assert_eq!(ctor["kind"], 9);
    }

    #[test]
    fn silenced_classes_never_reach_the_client() {
        // One silenced error (method redefinition) and one real one
        // (unresolvable superclass) in the same file.
        let source = "class Foo\n  def bar\n  end\n  def bar\n  end\nend\nclass Child < Missing\nend\n";
        let out = run_session(&[
            initialize_msg(),
            initialized_msg(),
            did_change("file:///w/u.rb", source),
            exit_msg(),
        ]);
        let published = notifications(&out, "textDocument/publishDiagnostics");
        assert_eq!(published.len(), 1);
        let params = &published[0]["params"];
        assert_eq!(params["uri"], "file:///w/u.rb");
        let diagnostics = params["diagnostics"].as_array().unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0]["code"], 5001);
        assert_eq!(
            diagnostics[0]["message"],
            "Unable to resolve constant `Missing`"
        );
        assert!(diagnostics[0]["relatedInformation"].is_array());
        let related = diagnostics[0]["relatedInformation"].as_array().unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0]["message"], "Required for inheritance here");
        assert_eq!(related[0]["location"]["uri"], "file:///w/u.rb");
    }

    #[test]
    fn fixing_a_file_invalidates_its_accumulated_errors() {
        let out = run_session(&[
            initialize_msg(),
            initialized_msg(),
            did_change("file:///w/u.rb", "class Child < Missing\nend\n"),
            did_change("file:///w/u.rb", "class Child\nend\n"),
            exit_msg(),
        ]);
        // First edit publishes one diagnostic. The second edit invalidates
        // all accumulated errors and the re-check is clean, so no further
        // publish happens for the file.
        let published = notifications(&out, "textDocument/publishDiagnostics");
        assert_eq!(published.len(), 1);
        let diagnostics = published[0]["params"]["diagnostics"].as_array().unwrap();
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn did_change_outside_the_workspace_is_ignored() {
        let out = run_session(&[
            initialize_msg(),
            initialized_msg(),
            did_change("file:///elsewhere/u.rb", "class Broken < Missing\nend\n"),
            exit_msg(),
        ]);
        assert!(notifications(&out, "textDocument/publishDiagnostics").is_empty());
    }

    #[test]
    fn watched_file_changes_round_trip_through_read_file() {
        let changes = json!({"changes": [
            {"uri": "file:///w/a.rb", "type": 2},
            {"uri": "file:///w/b.rb", "type": 2},
        ]});
        let out = run_session(&[
            initialize_msg(),
            initialized_msg(),
            json!({"method": "workspace/didChangeWatchedFiles", "params": changes}),
            json!({"id": "ruby-typer-req-1", "result": [
                {"uri": "file:///w/a.rb", "content": "class A\nend\n"},
                {"uri": "file:///w/b.rb", "content": "class B < A\nend\n"},
            ]}),
            json!({
                "id": 2,
                "method": "textDocument/documentSymbol",
                "params": {"textDocument": {"uri": "file:///w/b.rb"}},
            }),
            exit_msg(),
        ]);

        let request = out
            .iter()
            .find(|m| m.get("method").is_some_and(|v| v == &json!("ReadFile")))
            .expect("server should issue a ReadFile request");
        assert_eq!(request["id"], "ruby-typer-req-1");

        let result = reply_for(&out, 2)["result"].as_array().unwrap().clone();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["name"], "B");
        assert_eq!(result[0]["kind"], 5);
    }

    #[test]
    fn replies_with_unknown_ids_are_ignored() {
        let out = run_session(&[
            initialize_msg(),
            json!({"id": "nobody-waits-for-this", "result": []}),
            json!({"id": 4, "method": "shutdown"}),
            exit_msg(),
        ]);
        assert_eq!(reply_for(&out, 4)["result"], Value::Null);
    }

    #[test]
    fn reply_handlers_are_single_shot() {
        let changes = json!({"changes": [{"uri": "file:///w/a.rb", "type": 2}]});
        let out = run_session(&[
            initialize_msg(),
            initialized_msg(),
            json!({"method": "workspace/didChangeWatchedFiles", "params": changes}),
            json!({"id": "ruby-typer-req-1", "result": [
                {"uri": "file:///w/a.rb", "content": "class A < Missing\nend\n"},
            ]}),
            // The second delivery of the same id must be dropped silently.
            json!({"id": "ruby-typer-req-1", "result": [
                {"uri": "file:///w/a.rb", "content": "class A < Missing\nend\n"},
            ]}),
            exit_msg(),
        ]);
        let published = notifications(&out, "textDocument/publishDiagnostics");
        assert_eq!(published.len(), 1);
    }

    #[test]
    fn eof_terminates_cleanly_without_exit() {
        let out = run_session(&[initialize_msg()]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn request_ids_count_up() {
        let changes = json!({"changes": []});
        let out = run_session(&[
            initialize_msg(),
            json!({"method": "workspace/didChangeWatchedFiles", "params": changes}),
            json!({"method": "workspace/didChangeWatchedFiles", "params": changes}),
            exit_msg(),
        ]);
        let requests = out
            .iter()
            .filter(|m| m.get("method").is_some_and(|v| v == &json!("ReadFile")))
            .collect::<Vec<_>>();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["id"], "ruby-typer-req-1");
        assert_eq!(requests[1]["id"], "ruby-typer-req-2");
    }
}
