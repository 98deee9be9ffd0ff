use serde::{Deserialize, Serialize};

use super::path::RemotePath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    File,
    Directory,
}

/// One chunk of a file's data together with the endpoints that hold
/// its replicas. Present on a `FileEntry` only when the listing
/// requested block detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockLocation {
    pub offset: u64,
    pub length: u64,
    pub hosts: Vec<String>,
}

/// Authority-side state of a single namespace entry at the time of the
/// listing call. Not cached, never refreshed in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: RemotePath,
    pub kind: EntryKind,
    pub size_bytes: u64,
    pub modified_ms: u64,
    pub replication: u16,
    pub block_size_bytes: u64,
    pub permissions: u16,
    pub owner: String,
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_locations: Option<Vec<BlockLocation>>,
}

impl FileEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Unix-style permission string, e.g. `rwxr-xr-x`.
    pub fn permission_string(&self) -> String {
        let mut out = String::with_capacity(9);
        for shift in [6u16, 3, 0] {
            let bits = (self.permissions >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }
}
