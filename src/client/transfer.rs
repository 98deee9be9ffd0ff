use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, instrument};

use crate::authority::{Authority, CreateOptions, FileSink, FileSource};
use crate::checksum::{BlockChecksum, BlockHasher};
use crate::error::{ClientError, Result};
use crate::types::RemotePath;
use crate::util::timestamp_now_ms;

use super::Client;

const COPY_CHUNK: usize = 64 * 1024;

impl<A: Authority> Client<A> {
    /// Streams a local file to `remote_dir`, preserving the source file
    /// name. The local source is never deleted; callers wanting move
    /// semantics remove it themselves after success, so the two steps
    /// stay independently retryable.
    #[instrument(err, skip(self))]
    pub async fn upload(
        &self,
        local: &Utf8Path,
        remote_dir: &str,
        overwrite: bool,
    ) -> Result<RemotePath> {
        let dir = self.parse(remote_dir)?;
        let name = local.file_name().ok_or_else(|| ClientError::Io {
            path: local.to_string(),
            reason: "local path has no file name".to_owned(),
        })?;
        let dest = dir.join(name)?;

        self.bounded("upload", &dest, async {
            let mut file = tokio::fs::File::open(local).await.map_err(|err| {
                ClientError::Io {
                    path: local.to_string(),
                    reason: err.to_string(),
                }
            })?;
            self.authority()
                .mkdirs(&dir)
                .await
                .map_err(|err| self.remote_err(err, &dir))?;
            let mut sink = self
                .authority()
                .create(
                    &dest,
                    CreateOptions {
                        overwrite,
                        replication: self.session().replication(),
                        block_size: self.session().block_size(),
                        owner: self.session().identity().to_owned(),
                    },
                )
                .await
                .map_err(|err| self.remote_err(err, &dest))?;

            let mut buf = vec![0u8; COPY_CHUNK];
            let mut sent = 0u64;
            loop {
                let n = file.read(&mut buf).await.map_err(|err| ClientError::Io {
                    path: local.to_string(),
                    reason: err.to_string(),
                })?;
                if n == 0 {
                    break;
                }
                sink.write(&buf[..n])
                    .await
                    .map_err(|err| self.remote_err(err, &dest))?;
                sent += n as u64;
            }
            sink.commit()
                .await
                .map_err(|err| self.remote_err(err, &dest))?;
            info!("uploaded '{local}' to '{dest}' ({sent} bytes)");
            Ok(dest.clone())
        })
        .await
    }

    /// Materializes a local copy of a remote file. The bytes land in a
    /// `temp-` sibling first and are renamed into place only after the
    /// transfer (and, when requested, checksum verification) succeeds, so
    /// a failed download never leaves a partial file behind.
    #[instrument(err, skip(self))]
    pub async fn download(
        &self,
        remote: &str,
        local: &Utf8Path,
        verify_checksum: bool,
    ) -> Result<Utf8PathBuf> {
        let remote = self.parse(remote)?;

        self.bounded("download", &remote, async {
            let entry = self
                .authority()
                .status(&remote)
                .await
                .map_err(|err| self.remote_err(err, &remote))?
                .ok_or_else(|| ClientError::NotFound {
                    path: remote.to_string(),
                })?;
            if entry.is_directory() {
                return Err(ClientError::PathConflict {
                    path: remote.to_string(),
                });
            }

            let dest = if local.is_dir() {
                local.join(remote.file_name().expect("file entries are never the root"))
            } else {
                local.to_owned()
            };

            if verify_checksum && entry.block_size_bytes == 0 {
                return Err(ClientError::Io {
                    path: remote.to_string(),
                    reason: "authority reported a zero block size".to_owned(),
                });
            }
            let recorded = if verify_checksum {
                Some(
                    self.authority()
                        .checksums(&remote)
                        .await
                        .map_err(|err| self.remote_err(err, &remote))?,
                )
            } else {
                None
            };

            let tmp = add_temp_prefix(&dest)?;
            let mut file = tokio::fs::File::create(&tmp).await.map_err(|err| {
                ClientError::Io {
                    path: tmp.to_string(),
                    reason: err.to_string(),
                }
            })?;
            let cleanup = scopeguard::guard((), |_| {
                let _ = std::fs::remove_file(&tmp);
            });

            let mut source = self
                .authority()
                .open(&remote)
                .await
                .map_err(|err| self.remote_err(err, &remote))?;
            let mut hasher = verify_checksum.then(|| BlockHasher::new(entry.block_size_bytes));
            let mut received = 0u64;
            while let Some(chunk) = source
                .next_chunk()
                .await
                .map_err(|err| self.remote_err(err, &remote))?
            {
                if let Some(hasher) = hasher.as_mut() {
                    hasher.update(&chunk);
                }
                file.write_all(&chunk).await.map_err(|err| ClientError::Io {
                    path: tmp.to_string(),
                    reason: err.to_string(),
                })?;
                received += chunk.len() as u64;
            }
            file.flush().await.map_err(|err| ClientError::Io {
                path: tmp.to_string(),
                reason: err.to_string(),
            })?;
            drop(file);

            if let Some(hasher) = hasher {
                let recorded = recorded.expect("fetched above when verifying");
                verify_blocks(&hasher.finish(), &recorded, &remote)?;
            }

            std::fs::rename(&tmp, &dest).map_err(|err| ClientError::Io {
                path: dest.to_string(),
                reason: err.to_string(),
            })?;
            scopeguard::ScopeGuard::into_inner(cleanup);
            info!("downloaded '{remote}' to '{dest}' ({received} bytes)");
            Ok(dest)
        })
        .await
    }
}

fn verify_blocks(
    computed: &[BlockChecksum],
    recorded: &[BlockChecksum],
    path: &RemotePath,
) -> Result<()> {
    for (index, (have, want)) in computed.iter().zip(recorded).enumerate() {
        if have != want {
            return Err(ClientError::ChecksumMismatch {
                path: path.to_string(),
                block: index,
            });
        }
    }
    if computed.len() != recorded.len() {
        return Err(ClientError::ChecksumMismatch {
            path: path.to_string(),
            block: computed.len().min(recorded.len()),
        });
    }
    Ok(())
}

/// Sibling path the bytes are staged under until the transfer completes.
fn add_temp_prefix(path: &Utf8Path) -> Result<Utf8PathBuf> {
    let name = path.file_name().ok_or_else(|| ClientError::Io {
        path: path.to_string(),
        reason: "destination has no file name".to_owned(),
    })?;
    let staged = format!("temp-{}-{}", timestamp_now_ms(), name);
    Ok(match path.parent() {
        Some(parent) => parent.join(staged),
        None => Utf8PathBuf::from(staged),
    })
}
