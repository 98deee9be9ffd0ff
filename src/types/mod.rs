pub mod entry;
pub mod path;

pub use entry::{BlockLocation, EntryKind, FileEntry};
pub use path::{PathError, RemotePath};
