// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! DSL rewriting passes.
//!
//! These run between indexing and resolution and mutate class bodies to
//! make implicit DSL-generated methods visible to the type checker.

pub mod command;
