// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Corundum Language Server Protocol server.
//!
//! This binary exposes the `corundum-core` pipeline over the Language
//! Server Protocol: a single-threaded, `Content-Length`-framed JSON-RPC
//! loop on stdin/stdout. Workspace files to index at startup are passed as
//! command-line arguments.

/// Diagnostic accumulation and LSP encoding.
mod diagnostics;
/// The LSP method registry.
mod methods;
/// The event loop.
mod server;
/// Framed JSON-RPC transport.
mod transport;

use camino::Utf8PathBuf;
use tracing_subscriber::EnvFilter;

use server::{LspLoop, Opts};
use transport::Transport;

/// Entry point for the corundum language server.
///
/// Initialises tracing, then serves over stdin/stdout until the client
/// disconnects or sends `exit`.
fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        // LSP is consumed by editors/tools, so logs should be plain text
        // (no ANSI escapes), and stdout belongs to the protocol.
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts {
        input_file_names: std::env::args().skip(1).map(Utf8PathBuf::from).collect(),
    };

    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();

    let mut lsp = LspLoop::new(Transport::new(stdin, stdout), opts);
    lsp.run()
}
