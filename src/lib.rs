pub mod authority;
pub mod checksum;
pub mod client;
pub mod error;
pub mod types;
mod util;

pub use client::{Client, ConnectOptions, Session};
pub use error::{ClientError, Result};
pub use types::{BlockLocation, EntryKind, FileEntry, RemotePath};
