mod transfer;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_stream::try_stream;
use futures::Stream;
use tracing::{debug, info, instrument};

use crate::authority::{Authority, AuthorityError};
use crate::error::{ClientError, Result};
use crate::types::{FileEntry, RemotePath};

/// Session policy fixed at connect time. Everything left unset falls
/// back to the authority-side default reported by the handshake.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub identity: String,
    pub replication: Option<u16>,
    pub block_size: Option<u64>,
    /// Budget applied to each remote call. `None` means unbounded.
    pub timeout: Option<Duration>,
}

/// Resolved per-connection state. Never mutated after `connect`;
/// changing policy requires a new session.
#[derive(Debug, Clone)]
pub struct Session {
    identity: String,
    replication: u16,
    block_size: u64,
    timeout: Option<Duration>,
}

impl Session {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn replication(&self) -> u16 {
        self.replication
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// One logical session to a remote filesystem authority. Safe to share
/// across tasks; the client adds no locking of its own and relies on the
/// authority to serialize conflicting namespace mutations.
pub struct Client<A: Authority> {
    authority: A,
    session: Session,
    closed: AtomicBool,
}

impl<A: Authority> Client<A> {
    /// Opens a session: validates the options locally, then performs one
    /// handshake round trip to prove the authority is reachable and
    /// willing to serve this identity.
    pub async fn connect(authority: A, options: ConnectOptions) -> Result<Self> {
        if options.identity.is_empty() {
            return Err(ClientError::Config {
                reason: "identity must not be empty".to_owned(),
            });
        }
        if options.replication == Some(0) {
            return Err(ClientError::Config {
                reason: "replication factor must be at least 1".to_owned(),
            });
        }
        if options.block_size == Some(0) {
            return Err(ClientError::Config {
                reason: "block size must be positive".to_owned(),
            });
        }

        let handshake = authority.handshake(&options.identity);
        let defaults = match options.timeout {
            Some(budget) => tokio::time::timeout(budget, handshake)
                .await
                .map_err(|_| ClientError::Timeout {
                    op: "connect",
                    path: authority.endpoint().to_owned(),
                    timeout: budget,
                })?,
            None => handshake.await,
        }
        .map_err(|err| ClientError::Connection {
            uri: authority.endpoint().to_owned(),
            reason: err.to_string(),
        })?;

        let session = Session {
            identity: options.identity,
            replication: options.replication.unwrap_or(defaults.replication),
            block_size: options.block_size.unwrap_or(defaults.block_size),
            timeout: options.timeout,
        };
        info!(
            "connected to '{}' as '{}' (replication {}, block size {})",
            authority.endpoint(),
            session.identity,
            session.replication,
            session.block_size,
        );
        Ok(Self {
            authority,
            session,
            closed: AtomicBool::new(false),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Creates the directory and all missing ancestors. Succeeds silently
    /// when the directory already exists.
    #[instrument(err, skip(self))]
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let path = self.parse(path)?;
        self.bounded("mkdir", &path, async {
            self.authority
                .mkdirs(&path)
                .await
                .map_err(|err| self.remote_err(err, &path))
        })
        .await
    }

    /// Removes the entry. An absent path is a no-op success; a non-empty
    /// directory requires `recursive`.
    #[instrument(err, skip(self))]
    pub async fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        let path = self.parse(path)?;
        self.bounded("delete", &path, async {
            let existed = self
                .authority
                .delete(&path, recursive)
                .await
                .map_err(|err| self.remote_err(err, &path))?;
            if !existed {
                debug!("'{path}' was already absent");
            }
            Ok(())
        })
        .await
    }

    /// Atomically relocates an entry. Never overwrites: an existing
    /// destination must be deleted first.
    #[instrument(err, skip(self))]
    pub async fn rename(&self, source: &str, dest: &str) -> Result<()> {
        let source = self.parse(source)?;
        let dest = self.parse(dest)?;
        self.bounded("rename", &source, async {
            self.authority
                .rename(&source, &dest)
                .await
                .map_err(|err| match err {
                    AuthorityError::AlreadyExists => ClientError::AlreadyExists {
                        path: dest.to_string(),
                    },
                    other => self.remote_err(other, &source),
                })
        })
        .await
    }

    /// Authority-side state of a single entry.
    #[instrument(err, skip(self))]
    pub async fn status(&self, path: &str) -> Result<FileEntry> {
        let path = self.parse(path)?;
        self.bounded("status", &path, async {
            self.authority
                .status(&path)
                .await
                .map_err(|err| self.remote_err(err, &path))?
                .ok_or_else(|| ClientError::NotFound {
                    path: path.to_string(),
                })
        })
        .await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.status(path).await {
            Ok(_) => Ok(true),
            Err(ClientError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Single-level listing. The sequence is produced lazily and reflects
    /// authority state at call time; re-listing requires a fresh call.
    pub fn list_status<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Stream<Item = Result<FileEntry>> + 'a {
        try_stream! {
            let path = self.parse(path)?;
            let entries = self
                .bounded("list", &path, async {
                    self.authority
                        .list(&path, false)
                        .await
                        .map_err(|err| self.remote_err(err, &path))
                })
                .await?;
            for entry in entries {
                yield entry;
            }
        }
    }

    /// Recursive listing yielding file entries only, each populated with
    /// block placement. Directories are traversed but not yielded.
    pub fn list_files<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Stream<Item = Result<FileEntry>> + 'a {
        try_stream! {
            let start = self.parse(path)?;
            let mut pending = VecDeque::from([start]);
            while let Some(dir) = pending.pop_front() {
                let entries = self
                    .bounded("list", &dir, async {
                        self.authority
                            .list(&dir, true)
                            .await
                            .map_err(|err| self.remote_err(err, &dir))
                    })
                    .await?;
                for entry in entries {
                    if entry.is_directory() {
                        pending.push_back(entry.path.clone());
                    } else {
                        yield entry;
                    }
                }
            }
        }
    }

    /// Marks the session closed; subsequent operations fail. The
    /// underlying connection is released when the client value drops, so
    /// resources go away on every exit path. Double-close is a no-op.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("session to '{}' closed", self.authority.endpoint());
        }
    }

    pub(crate) fn authority(&self) -> &A {
        &self.authority
    }

    pub(crate) fn parse(&self, path: &str) -> Result<RemotePath> {
        self.ensure_open()?;
        Ok(path.parse::<RemotePath>()?)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Connection {
                uri: self.authority.endpoint().to_owned(),
                reason: "session is closed".to_owned(),
            });
        }
        Ok(())
    }

    pub(crate) async fn bounded<T>(
        &self,
        op: &'static str,
        path: &RemotePath,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.session.timeout {
            Some(budget) => match tokio::time::timeout(budget, fut).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout {
                    op,
                    path: path.to_string(),
                    timeout: budget,
                }),
            },
            None => fut.await,
        }
    }

    pub(crate) fn remote_err(&self, err: AuthorityError, path: &RemotePath) -> ClientError {
        match err {
            AuthorityError::NotFound => ClientError::NotFound {
                path: path.to_string(),
            },
            AuthorityError::AlreadyExists => ClientError::AlreadyExists {
                path: path.to_string(),
            },
            AuthorityError::NotADirectory(conflict) => {
                ClientError::PathConflict { path: conflict }
            }
            AuthorityError::NotEmpty => ClientError::NotEmpty {
                path: path.to_string(),
            },
            AuthorityError::Unavailable(reason) | AuthorityError::Rejected(reason) => {
                ClientError::Connection {
                    uri: self.authority.endpoint().to_owned(),
                    reason,
                }
            }
            AuthorityError::Io(err) => ClientError::Io {
                path: path.to_string(),
                reason: err.to_string(),
            },
            AuthorityError::Protocol(reason) => ClientError::Io {
                path: path.to_string(),
                reason,
            },
        }
    }
}

impl<A: Authority> Drop for Client<A> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use futures::TryStreamExt;

    use crate::authority::memory::MemoryAuthority;
    use crate::authority::{Authority, AuthorityDefaults};
    use crate::error::ClientError;

    use super::{Client, ConnectOptions};

    async fn connect(authority: MemoryAuthority) -> Client<MemoryAuthority> {
        Client::connect(
            authority,
            ConnectOptions {
                identity: "root".to_owned(),
                replication: Some(2),
                block_size: Some(8),
                timeout: None,
            },
        )
        .await
        .unwrap()
    }

    fn local_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> camino::Utf8PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content)
            .unwrap();
        camino::Utf8PathBuf::from_path_buf(path).unwrap()
    }

    #[tokio::test]
    async fn test_connect_validates_options() {
        for options in [
            ConnectOptions::default(),
            ConnectOptions {
                identity: "root".to_owned(),
                replication: Some(0),
                ..Default::default()
            },
            ConnectOptions {
                identity: "root".to_owned(),
                block_size: Some(0),
                ..Default::default()
            },
        ] {
            let err = Client::connect(MemoryAuthority::new(), options)
                .await
                .err()
                .unwrap();
            assert!(matches!(err, ClientError::Config { .. }), "got {err}");
        }
    }

    #[tokio::test]
    async fn test_session_merges_authority_defaults() {
        let authority = MemoryAuthority::with_defaults(AuthorityDefaults {
            replication: 3,
            block_size: 1024,
        });
        let client = Client::connect(
            authority,
            ConnectOptions {
                identity: "root".to_owned(),
                replication: Some(2),
                block_size: None,
                timeout: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(client.session().replication(), 2);
        assert_eq!(client.session().block_size(), 1024);
        assert_eq!(client.session().identity(), "root");
    }

    #[tokio::test]
    async fn test_mkdir_is_idempotent() {
        let client = connect(MemoryAuthority::new()).await;
        client.mkdir("/com/cas").await.unwrap();
        client.mkdir("/com/cas").await.unwrap();
        assert!(client.status("/com/cas").await.unwrap().is_directory());
    }

    #[tokio::test]
    async fn test_mkdir_over_file_is_a_conflict() {
        let client = connect(MemoryAuthority::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(&dir, "cas", b"data");
        client.upload(&local, "/com", true).await.unwrap();
        let err = client.mkdir("/com/cas").await.unwrap_err();
        assert!(
            matches!(&err, ClientError::PathConflict { path } if path == "/com/cas"),
            "got {err}"
        );
        // conflict anywhere on the ancestor chain reports the same way
        let err = client.mkdir("/com/cas/deeper").await.unwrap_err();
        assert!(matches!(&err, ClientError::PathConflict { path } if path == "/com/cas"));
    }

    #[tokio::test]
    async fn test_upload_then_download_roundtrip() {
        let client = connect(MemoryAuthority::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let content = b"0123456789abcdef0123456789".as_slice();
        let local = local_file(&dir, "hdfs.txt", content);

        let dest = client.upload(&local, "/com/cas", false).await.unwrap();
        assert_eq!(dest.as_str(), "/com/cas/hdfs.txt");

        let out_dir =
            camino::Utf8PathBuf::from_path_buf(dir.path().join("out")).unwrap();
        std::fs::create_dir(&out_dir).unwrap();
        let copy = client
            .download("/com/cas/hdfs.txt", &out_dir, true)
            .await
            .unwrap();
        assert_eq!(copy, out_dir.join("hdfs.txt"));
        assert_eq!(std::fs::read(copy).unwrap(), content);
    }

    #[tokio::test]
    async fn test_upload_overwrite_rules() {
        let client = connect(MemoryAuthority::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let first = local_file(&dir, "hdfs.txt", b"first");
        client.upload(&first, "/com/cas", false).await.unwrap();

        let err = client.upload(&first, "/com/cas", false).await.unwrap_err();
        assert!(
            matches!(&err, ClientError::AlreadyExists { path } if path == "/com/cas/hdfs.txt"),
            "got {err}"
        );

        let second = local_file(&dir, "hdfs.txt", b"second content");
        client.upload(&second, "/com/cas", true).await.unwrap();
        let local_out = local_file(&dir, "out.txt", b"");
        client
            .download("/com/cas/hdfs.txt", &local_out, true)
            .await
            .unwrap();
        assert_eq!(std::fs::read(local_out).unwrap(), b"second content");
    }

    #[tokio::test]
    async fn test_upload_keeps_local_source() {
        let client = connect(MemoryAuthority::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(&dir, "hdfs.txt", b"data");
        client.upload(&local, "/com/cas", false).await.unwrap();
        assert!(local.exists());
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let client = connect(MemoryAuthority::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = camino::Utf8PathBuf::from_path_buf(dir.path().join("x")).unwrap();
        let err = client.download("/no/such/file", &dest, true).await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_download_directory_is_a_conflict() {
        let client = connect(MemoryAuthority::new()).await;
        client.mkdir("/com/cas").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = camino::Utf8PathBuf::from_path_buf(dir.path().join("x")).unwrap();
        let err = client.download("/com/cas", &dest, false).await.unwrap_err();
        assert!(matches!(err, ClientError::PathConflict { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_download_checksum_mismatch_leaves_no_partial_file() {
        let authority = MemoryAuthority::new();
        let client = connect(authority.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(&dir, "hdfs.txt", b"0123456789abcdef");
        client.upload(&local, "/com/cas", false).await.unwrap();

        authority
            .corrupt(&"/com/cas/hdfs.txt".parse().unwrap(), 10)
            .unwrap();

        let dest = camino::Utf8PathBuf::from_path_buf(dir.path().join("copy")).unwrap();
        let err = client
            .download("/com/cas/hdfs.txt", &dest, true)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ClientError::ChecksumMismatch { block: 1, .. }),
            "got {err}"
        );
        assert!(!dest.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.starts_with("temp-"))
            .collect();
        assert!(leftovers.is_empty(), "leftover temp files: {leftovers:?}");

        // corruption is invisible without verification
        client
            .download("/com/cas/hdfs.txt", &dest, false)
            .await
            .unwrap();
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn test_delete_semantics() {
        let client = connect(MemoryAuthority::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(&dir, "hdfs.txt", b"data");
        client.upload(&local, "/com/cas", false).await.unwrap();

        let err = client.delete("/com/cas", false).await.unwrap_err();
        assert!(
            matches!(&err, ClientError::NotEmpty { path } if path == "/com/cas"),
            "got {err}"
        );

        client.delete("/com/cas", true).await.unwrap();
        let names: Vec<_> = client
            .list_status("/com")
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.path.to_string())
            .collect();
        assert!(!names.contains(&"/com/cas".to_owned()));

        // idempotent: deleting the already-absent path succeeds
        client.delete("/com/cas", true).await.unwrap();
        client.delete("/never/existed", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_moves_and_never_overwrites() {
        let client = connect(MemoryAuthority::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let a = local_file(&dir, "a.txt", b"content a");
        let b = local_file(&dir, "b.txt", b"content b");
        client.upload(&a, "/com/cas", false).await.unwrap();
        client.upload(&b, "/com/cas", false).await.unwrap();

        let err = client
            .rename("/com/cas/a.txt", "/com/cas/b.txt")
            .await
            .unwrap_err();
        assert!(
            matches!(&err, ClientError::AlreadyExists { path } if path == "/com/cas/b.txt"),
            "got {err}"
        );
        // no partial mutation: both entries still in place
        assert!(client.exists("/com/cas/a.txt").await.unwrap());
        assert_eq!(
            client.status("/com/cas/b.txt").await.unwrap().size_bytes,
            b"content b".len() as u64
        );

        client.rename("/com/cas/a.txt", "/cls.txt").await.unwrap();
        assert!(!client.exists("/com/cas/a.txt").await.unwrap());
        assert!(client.exists("/cls.txt").await.unwrap());

        let err = client.rename("/ghost", "/cls2.txt").await.unwrap_err();
        assert!(matches!(&err, ClientError::NotFound { path } if path == "/ghost"));

        // directories move the same way
        client.mkdir("/tmp").await.unwrap();
        client.rename("/tmp", "/cls").await.unwrap();
        assert!(client.status("/cls").await.unwrap().is_directory());
    }

    #[tokio::test]
    async fn test_list_status_shows_kinds() {
        let client = connect(MemoryAuthority::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(&dir, "hdfs.txt", b"data");
        client.mkdir("/com").await.unwrap();
        client.upload(&local, "/", true).await.unwrap();

        let entries = client
            .list_status("/")
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.path.as_str() == "/com" && e.is_directory()));
        assert!(entries.iter().any(|e| e.path.as_str() == "/hdfs.txt" && e.is_file()));
        // single-level listing carries no block detail
        assert!(entries.iter().all(|e| e.block_locations.is_none()));
    }

    #[tokio::test]
    async fn test_list_status_missing_path() {
        let client = connect(MemoryAuthority::new()).await;
        let err = client
            .list_status("/ghost")
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_recursive_listing_scenario() {
        let client = connect(MemoryAuthority::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let content = b"hello distributed filesystem";
        let local = local_file(&dir, "hdfs.txt", content);

        client.mkdir("/com/cas").await.unwrap();
        client.upload(&local, "/com/cas", true).await.unwrap();

        let entries = client
            .list_files("/")
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert!(entry.path.as_str().ends_with("/com/cas/hdfs.txt"));
        assert_eq!(entry.size_bytes, content.len() as u64);
        assert!(entry.is_file());
        // recursive listing populates block placement
        let locations = entry.block_locations.as_ref().unwrap();
        assert!(!locations.is_empty());
        assert_eq!(
            locations.iter().map(|l| l.length).sum::<u64>(),
            content.len() as u64
        );
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let client = connect(MemoryAuthority::new()).await;
        client.close();
        client.close(); // double close is a no-op
        let err = client.mkdir("/com").await.unwrap_err();
        assert!(matches!(err, ClientError::Connection { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_invalid_paths_are_config_errors() {
        let client = connect(MemoryAuthority::new()).await;
        for path in ["relative/path", "/a//b", "/a/./b", "/a/../b", ""] {
            let err = client.mkdir(path).await.unwrap_err();
            assert!(matches!(err, ClientError::Config { .. }), "path {path:?}: {err}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        struct StalledAuthority;

        impl Authority for StalledAuthority {
            type Source = crate::authority::memory::MemorySource;
            type Sink = crate::authority::memory::MemorySink;

            fn endpoint(&self) -> &str {
                "memory://stalled"
            }

            async fn handshake(
                &self,
                _identity: &str,
            ) -> Result<AuthorityDefaults, crate::authority::AuthorityError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("the handshake never completes")
            }

            async fn status(
                &self,
                _path: &crate::types::RemotePath,
            ) -> Result<Option<crate::types::FileEntry>, crate::authority::AuthorityError> {
                unimplemented!()
            }

            async fn list(
                &self,
                _path: &crate::types::RemotePath,
                _locations: bool,
            ) -> Result<Vec<crate::types::FileEntry>, crate::authority::AuthorityError> {
                unimplemented!()
            }

            async fn mkdirs(
                &self,
                _path: &crate::types::RemotePath,
            ) -> Result<(), crate::authority::AuthorityError> {
                unimplemented!()
            }

            async fn delete(
                &self,
                _path: &crate::types::RemotePath,
                _recursive: bool,
            ) -> Result<bool, crate::authority::AuthorityError> {
                unimplemented!()
            }

            async fn rename(
                &self,
                _src: &crate::types::RemotePath,
                _dst: &crate::types::RemotePath,
            ) -> Result<(), crate::authority::AuthorityError> {
                unimplemented!()
            }

            async fn open(
                &self,
                _path: &crate::types::RemotePath,
            ) -> Result<Self::Source, crate::authority::AuthorityError> {
                unimplemented!()
            }

            async fn create(
                &self,
                _path: &crate::types::RemotePath,
                _opts: crate::authority::CreateOptions,
            ) -> Result<Self::Sink, crate::authority::AuthorityError> {
                unimplemented!()
            }

            async fn checksums(
                &self,
                _path: &crate::types::RemotePath,
            ) -> Result<Vec<crate::checksum::BlockChecksum>, crate::authority::AuthorityError>
            {
                unimplemented!()
            }
        }

        let err = Client::connect(
            StalledAuthority,
            ConnectOptions {
                identity: "root".to_owned(),
                timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        )
        .await
        .err()
        .unwrap();
        assert!(
            matches!(err, ClientError::Timeout { op: "connect", .. }),
            "got {err}"
        );
    }
}
