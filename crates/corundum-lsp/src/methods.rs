// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! The LSP method registry.
//!
//! Every method the loop understands is statically registered with its
//! direction and notification flag. Lookups never fail: an unknown name
//! comes back as a synthetic unsupported entry, so the caller can always
//! answer with `MethodNotFound` instead of special-casing dispatch misses.

use ecow::EcoString;

/// JSON-RPC error code for an unrecognized method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Which side may initiate a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Sent by the client to the server.
    ClientInitiated,
    /// Sent by the server to the client.
    ServerInitiated,
    /// Valid in both directions.
    Both,
}

/// One entry of the method registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LspMethod {
    /// The wire method name.
    pub name: EcoString,
    /// True for notifications (no reply expected).
    pub is_notification: bool,
    /// Which side initiates the method.
    pub kind: MethodKind,
    /// False for synthetic entries representing unknown methods.
    pub is_supported: bool,
}

const REGISTRY: &[(&str, bool, MethodKind)] = &[
    ("initialize", false, MethodKind::ClientInitiated),
    ("initialized", true, MethodKind::ClientInitiated),
    ("shutdown", false, MethodKind::ClientInitiated),
    ("exit", true, MethodKind::ClientInitiated),
    ("textDocument/didChange", true, MethodKind::ClientInitiated),
    (
        "workspace/didChangeWatchedFiles",
        true,
        MethodKind::ClientInitiated,
    ),
    ("textDocument/documentSymbol", false, MethodKind::ClientInitiated),
    (
        "textDocument/publishDiagnostics",
        true,
        MethodKind::ServerInitiated,
    ),
    ("ReadFile", false, MethodKind::ServerInitiated),
];

/// Looks up a method by name.
///
/// Unknown names yield a synthetic unsupported client-initiated request so
/// downstream code can reply `MethodNotFound`.
#[must_use]
pub fn get_method(name: &str) -> LspMethod {
    for &(registered, is_notification, kind) in REGISTRY {
        if registered == name {
            return LspMethod {
                name: registered.into(),
                is_notification,
                kind,
                is_supported: true,
            };
        }
    }
    LspMethod {
        name: name.into(),
        is_notification: false,
        kind: MethodKind::ClientInitiated,
        is_supported: false,
    }
}
