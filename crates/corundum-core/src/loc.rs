// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Source location tracking.
//!
//! Every AST node and diagnostic carries a [`Loc`]: a file reference plus a
//! byte offset range into that file. Line/column positions are derived on
//! demand from the file source, 1-based (the LSP layer converts to the
//! protocol's 0-based convention at the edge).

use crate::symbol_table::{FileRef, GlobalState};

/// A source location: a byte range within one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Loc {
    /// The file this location belongs to.
    pub file: FileRef,
    /// Start byte offset (inclusive).
    pub begin_pos: u32,
    /// End byte offset (exclusive).
    pub end_pos: u32,
}

/// A 1-based line/column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// Line number, 1-based.
    pub line: u32,
    /// Column number, 1-based.
    pub column: u32,
}

impl Loc {
    /// Creates a new location.
    #[must_use]
    pub const fn new(file: FileRef, begin_pos: u32, end_pos: u32) -> Self {
        Self {
            file,
            begin_pos,
            end_pos,
        }
    }

    /// A location that points nowhere (reserved file id 0).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            file: FileRef::none(),
            begin_pos: 0,
            end_pos: 0,
        }
    }

    /// Returns true if this location points at a real file.
    #[must_use]
    pub const fn exists(self) -> bool {
        self.file.exists()
    }

    /// Computes the 1-based start and end positions of this location.
    ///
    /// Offsets past the end of the file clamp to the final position.
    #[must_use]
    pub fn position(self, gs: &GlobalState) -> (Position, Position) {
        let source = gs.file(self.file).source.as_str();
        (
            offset_to_position(source, self.begin_pos),
            offset_to_position(source, self.end_pos),
        )
    }
}

impl From<Loc> for miette::SourceSpan {
    fn from(loc: Loc) -> Self {
        (
            loc.begin_pos as usize,
            loc.end_pos.saturating_sub(loc.begin_pos) as usize,
        )
            .into()
    }
}

fn offset_to_position(source: &str, offset: u32) -> Position {
    let offset = (offset as usize).min(source.len());
    let mut line = 1;
    let mut line_start = 0;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    #[expect(
        clippy::cast_possible_truncation,
        reason = "source files over 4GB are not supported"
    )]
    let column = (offset - line_start) as u32 + 1;
    Position { line, column }
}
