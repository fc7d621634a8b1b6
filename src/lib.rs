//! Purpose: Shared core library crate used by the `cellmap` CLI and tests.
//! Exports: `core` (raster store, color tables, loader, errors) and `notice`.
//! Role: Library backing the binary; the loader is usable with any `RasterStore`.
//! Invariants: A `RasterContext` holds at most one open raster at a time.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod core;
pub mod notice;
