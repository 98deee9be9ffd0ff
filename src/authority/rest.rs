use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::io::ReaderStream;

use crate::checksum::BlockChecksum;
use crate::error::ClientError;
use crate::types::{FileEntry, RemotePath};

use super::{Authority, AuthorityDefaults, AuthorityError, CreateOptions, FileSink, FileSource};

const UPLOAD_BUFFER: usize = 256 * 1024;

lazy_static! {
    static ref ENDPOINT_RE: Regex =
        Regex::new(r"^https?://[^/:\s]+:\d+$").expect("endpoint regex is valid");
}

/// Authority reached over a WebHDFS-style REST gateway. Each trait call
/// is one HTTP round trip; file bodies are streamed in both directions.
#[derive(Debug, Clone)]
pub struct RestAuthority {
    endpoint: String,
    identity: String,
    http: reqwest::Client,
}

impl RestAuthority {
    pub fn new(endpoint: &str, identity: &str) -> Result<Self, ClientError> {
        if !ENDPOINT_RE.is_match(endpoint) {
            return Err(ClientError::Config {
                reason: format!("authority URI '{endpoint}' is not scheme://host:port"),
            });
        }
        Ok(Self {
            endpoint: endpoint.to_owned(),
            identity: identity.to_owned(),
            http: reqwest::Client::new(),
        })
    }

    fn url(&self, path: &RemotePath) -> String {
        format!("{}/fs/v1{}", self.endpoint, path)
    }

    fn query<'a>(&'a self, op: &'a str) -> Vec<(&'a str, String)> {
        vec![("op", op.to_owned()), ("identity", self.identity.clone())]
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse {
    entries: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct DeleteResponse {
    deleted: bool,
}

#[derive(Deserialize)]
struct ChecksumsResponse {
    blocks: Vec<BlockChecksum>,
}

fn send_err(err: reqwest::Error) -> AuthorityError {
    AuthorityError::Unavailable(err.to_string())
}

fn map_error(status: StatusCode, body: &str) -> AuthorityError {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return match parsed.kind.as_str() {
            "NOT_FOUND" => AuthorityError::NotFound,
            "ALREADY_EXISTS" => AuthorityError::AlreadyExists,
            "NOT_A_DIRECTORY" => {
                AuthorityError::NotADirectory(parsed.path.unwrap_or(parsed.message))
            }
            "NOT_EMPTY" => AuthorityError::NotEmpty,
            "IDENTITY_REJECTED" => AuthorityError::Rejected(parsed.message),
            other => AuthorityError::Protocol(format!("{status}: {other}: {}", parsed.message)),
        };
    }
    match status {
        StatusCode::NOT_FOUND => AuthorityError::NotFound,
        StatusCode::CONFLICT => AuthorityError::AlreadyExists,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AuthorityError::Rejected(body.to_owned())
        }
        _ => AuthorityError::Unavailable(format!("{status}: {body}")),
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, AuthorityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(map_error(status, &body))
}

pub struct RestSource {
    response: reqwest::Response,
}

impl FileSource for RestSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AuthorityError> {
        self.response
            .chunk()
            .await
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .map_err(send_err)
    }
}

pub struct RestSink {
    body: DuplexStream,
    request: tokio::task::JoinHandle<Result<(), AuthorityError>>,
}

impl FileSink for RestSink {
    async fn write(&mut self, data: &[u8]) -> Result<(), AuthorityError> {
        self.body.write_all(data).await.map_err(AuthorityError::Io)
    }

    async fn commit(self) -> Result<(), AuthorityError> {
        let RestSink { mut body, request } = self;
        body.shutdown().await.map_err(AuthorityError::Io)?;
        drop(body);
        request
            .await
            .map_err(|err| AuthorityError::Protocol(format!("upload task failed: {err}")))?
    }
}

impl Authority for RestAuthority {
    type Source = RestSource;
    type Sink = RestSink;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn handshake(&self, identity: &str) -> Result<AuthorityDefaults, AuthorityError> {
        let response = self
            .http
            .get(self.url(&RemotePath::root()))
            .query(&[("op", "DEFAULTS"), ("identity", identity)])
            .send()
            .await
            .map_err(send_err)?;
        check(response)
            .await?
            .json()
            .await
            .map_err(|err| AuthorityError::Protocol(err.to_string()))
    }

    async fn status(&self, path: &RemotePath) -> Result<Option<FileEntry>, AuthorityError> {
        let response = self
            .http
            .get(self.url(path))
            .query(&self.query("STATUS"))
            .send()
            .await
            .map_err(send_err)?;
        match check(response).await {
            Ok(response) => response
                .json()
                .await
                .map(Some)
                .map_err(|err| AuthorityError::Protocol(err.to_string())),
            Err(AuthorityError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list(
        &self,
        path: &RemotePath,
        locations: bool,
    ) -> Result<Vec<FileEntry>, AuthorityError> {
        let mut query = self.query("LIST");
        query.push(("locations", locations.to_string()));
        let response = self
            .http
            .get(self.url(path))
            .query(&query)
            .send()
            .await
            .map_err(send_err)?;
        let list: ListResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|err| AuthorityError::Protocol(err.to_string()))?;
        Ok(list.entries)
    }

    async fn mkdirs(&self, path: &RemotePath) -> Result<(), AuthorityError> {
        let response = self
            .http
            .put(self.url(path))
            .query(&self.query("MKDIRS"))
            .send()
            .await
            .map_err(send_err)?;
        check(response).await.map(|_| ())
    }

    async fn delete(&self, path: &RemotePath, recursive: bool) -> Result<bool, AuthorityError> {
        let mut query = self.query("DELETE");
        query.push(("recursive", recursive.to_string()));
        let response = self
            .http
            .delete(self.url(path))
            .query(&query)
            .send()
            .await
            .map_err(send_err)?;
        let deleted: DeleteResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|err| AuthorityError::Protocol(err.to_string()))?;
        Ok(deleted.deleted)
    }

    async fn rename(&self, src: &RemotePath, dst: &RemotePath) -> Result<(), AuthorityError> {
        let mut query = self.query("RENAME");
        query.push(("destination", dst.to_string()));
        let response = self
            .http
            .put(self.url(src))
            .query(&query)
            .send()
            .await
            .map_err(send_err)?;
        check(response).await.map(|_| ())
    }

    async fn open(&self, path: &RemotePath) -> Result<Self::Source, AuthorityError> {
        let response = self
            .http
            .get(self.url(path))
            .query(&self.query("OPEN"))
            .send()
            .await
            .map_err(send_err)?;
        Ok(RestSource {
            response: check(response).await?,
        })
    }

    async fn create(
        &self,
        path: &RemotePath,
        opts: CreateOptions,
    ) -> Result<Self::Sink, AuthorityError> {
        let mut query = self.query("CREATE");
        query.push(("overwrite", opts.overwrite.to_string()));
        query.push(("replication", opts.replication.to_string()));
        query.push(("blockSize", opts.block_size.to_string()));
        let (local, remote) = tokio::io::duplex(UPLOAD_BUFFER);
        let request = self
            .http
            .put(self.url(path))
            .query(&query)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(remote)))
            .send();
        let task = tokio::spawn(async move {
            let response = request.await.map_err(send_err)?;
            check(response).await.map(|_| ())
        });
        Ok(RestSink {
            body: local,
            request: task,
        })
    }

    async fn checksums(&self, path: &RemotePath) -> Result<Vec<BlockChecksum>, AuthorityError> {
        let response = self
            .http
            .get(self.url(path))
            .query(&self.query("CHECKSUMS"))
            .send()
            .await
            .map_err(send_err)?;
        let checksums: ChecksumsResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|err| AuthorityError::Protocol(err.to_string()))?;
        Ok(checksums.blocks)
    }
}
