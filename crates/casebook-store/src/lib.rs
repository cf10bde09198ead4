//! Casebook persistence crate - checkpoint ledgers and the restore export.
//!
//! Both stores are whole-file JSON documents rewritten on every checkpoint.
//! Writes go through a temp file and an atomic rename so an interrupted
//! write never destroys the previous checkpoint, and a corrupt file is
//! renamed aside (never silently overwritten) before starting fresh.

pub mod export;
pub mod ledger;

pub use export::{ExportFile, ExportRecord};
pub use ledger::Ledger;
