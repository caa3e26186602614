// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Fuzz target for indexer crash safety testing.
//!
//! This target feeds arbitrary byte sequences to the declaration indexer
//! and asserts that it never panics. The indexer must handle all input
//! gracefully, producing trees plus recovered errors.
//!
//! Invalid UTF-8 bytes are converted via lossy conversion (U+FFFD
//! replacement) so the scanner still gets exercised with unusual character
//! sequences.
//!
//! # Success Criteria
//!
//! The indexer passes fuzzing if:
//! - It never panics on any input (including replacement characters from invalid UTF-8)
//! - It always returns statements and a Vec<IndexError>
//! - No assertions fail while building trees

#![no_main]

use corundum_core::pipeline::parse_source;
use corundum_core::symbol_table::FileRef;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Convert to UTF-8 using lossy conversion so invalid bytes become U+FFFD
    // replacement characters rather than being skipped entirely.
    let source = String::from_utf8_lossy(data);

    // Success = no panic. We don't care if there are errors.
    let (_trees, _errors) = parse_source(&source, FileRef(1));
});
