pub mod memory;
pub mod rest;

use crate::checksum::BlockChecksum;
use crate::types::{FileEntry, RemotePath};

/// Failure reported by the remote authority or by the transport carrying
/// the conversation. The client maps these into its public error
/// taxonomy, attaching the paths it was working on.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("no such entry")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("'{0}' is not a directory")]
    NotADirectory(String),
    #[error("directory is not empty")]
    NotEmpty,
    #[error("authority unavailable: {0}")]
    Unavailable(String),
    #[error("identity rejected: {0}")]
    Rejected(String),
    #[error("transfer failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Defaults the authority applies when the session does not pin its own
/// replication or block size. Reported by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityDefaults {
    pub replication: u16,
    pub block_size: u64,
}

/// Parameters for creating a remote file.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub overwrite: bool,
    pub replication: u16,
    pub block_size: u64,
    pub owner: String,
}

/// Pull side of a remote file read. Chunk sizes are chosen by the
/// implementation and carry no block alignment guarantees.
pub trait FileSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AuthorityError>;
}

/// Push side of a remote file write. Nothing is visible in the namespace
/// until `commit` returns; dropping an uncommitted sink leaves the
/// destination state undefined.
pub trait FileSink: Send {
    async fn write(&mut self, data: &[u8]) -> Result<(), AuthorityError>;
    async fn commit(self) -> Result<(), AuthorityError>;
}

/// The remote filesystem authority, reduced to the operation set the
/// client needs. Implementations do not retry and do not lock; conflicting
/// namespace mutations are serialized by the authority itself.
pub trait Authority: Send + Sync {
    type Source: FileSource;
    type Sink: FileSink;

    /// URI of the remote endpoint, for diagnostics.
    fn endpoint(&self) -> &str;

    async fn handshake(&self, identity: &str) -> Result<AuthorityDefaults, AuthorityError>;

    /// `None` when the path does not exist.
    async fn status(&self, path: &RemotePath) -> Result<Option<FileEntry>, AuthorityError>;

    /// Single-level listing. Listing a file yields the file itself.
    async fn list(
        &self,
        path: &RemotePath,
        locations: bool,
    ) -> Result<Vec<FileEntry>, AuthorityError>;

    /// Creates the directory and all missing ancestors.
    async fn mkdirs(&self, path: &RemotePath) -> Result<(), AuthorityError>;

    /// Returns whether anything was removed. An absent path is `Ok(false)`.
    async fn delete(&self, path: &RemotePath, recursive: bool) -> Result<bool, AuthorityError>;

    async fn rename(&self, src: &RemotePath, dst: &RemotePath) -> Result<(), AuthorityError>;

    async fn open(&self, path: &RemotePath) -> Result<Self::Source, AuthorityError>;

    async fn create(
        &self,
        path: &RemotePath,
        opts: CreateOptions,
    ) -> Result<Self::Sink, AuthorityError>;

    /// Per-block checksum metadata recorded when the file was written.
    async fn checksums(&self, path: &RemotePath) -> Result<Vec<BlockChecksum>, AuthorityError>;
}
