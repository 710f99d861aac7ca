//! JSON-file backed persistence for usage counters and generated notes.

mod json_file;
mod notes;
mod usage;

pub use json_file::JsonFileStore;
pub use notes::NotesStore;
pub use usage::UsageStore;
