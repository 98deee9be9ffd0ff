use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::checksum::{BlockChecksum, BlockHasher};
use crate::types::{BlockLocation, EntryKind, FileEntry, RemotePath};
use crate::util::timestamp_now_ms;

use super::{Authority, AuthorityDefaults, AuthorityError, CreateOptions, FileSink, FileSource};

const READ_CHUNK: usize = 64 * 1024;
const FILE_PERMISSIONS: u16 = 0o644;
const DIR_PERMISSIONS: u16 = 0o755;
const GROUP: &str = "supergroup";

// Host pool used to synthesize block placements.
const HOSTS: [&str; 4] = [
    "dn-1.local:9866",
    "dn-2.local:9866",
    "dn-3.local:9866",
    "dn-4.local:9866",
];

/// Authority implementation holding the whole namespace in process
/// memory. Serves as the test double and as a local development target;
/// semantics match what the client expects from a real authority,
/// including checksum metadata and synthesized block placement.
#[derive(Clone)]
pub struct MemoryAuthority {
    inner: Arc<Inner>,
}

struct Inner {
    defaults: AuthorityDefaults,
    root: Mutex<Node>,
    identity: Mutex<String>,
}

struct FileNode {
    data: Vec<u8>,
    replication: u16,
    block_size: u64,
    modified_ms: u64,
    owner: String,
    checksums: Vec<BlockChecksum>,
}

enum Node {
    Directory {
        children: BTreeMap<String, Node>,
        modified_ms: u64,
        owner: String,
    },
    File(FileNode),
}

impl Node {
    fn new_dir(owner: &str) -> Self {
        Node::Directory {
            children: BTreeMap::new(),
            modified_ms: timestamp_now_ms(),
            owner: owner.to_owned(),
        }
    }

    fn get(&self, path: &RemotePath) -> Option<&Node> {
        let mut node = self;
        for segment in path.segments() {
            match node {
                Node::Directory { children, .. } => node = children.get(segment)?,
                Node::File(_) => return None,
            }
        }
        Some(node)
    }

    fn entry(&self, path: &RemotePath, defaults: &AuthorityDefaults) -> FileEntry {
        match self {
            Node::Directory {
                modified_ms, owner, ..
            } => FileEntry {
                path: path.clone(),
                kind: EntryKind::Directory,
                size_bytes: 0,
                modified_ms: *modified_ms,
                replication: 0,
                block_size_bytes: defaults.block_size,
                permissions: DIR_PERMISSIONS,
                owner: owner.clone(),
                group: GROUP.to_owned(),
                block_locations: None,
            },
            Node::File(file) => FileEntry {
                path: path.clone(),
                kind: EntryKind::File,
                size_bytes: file.data.len() as u64,
                modified_ms: file.modified_ms,
                replication: file.replication,
                block_size_bytes: file.block_size,
                permissions: FILE_PERMISSIONS,
                owner: file.owner.clone(),
                group: GROUP.to_owned(),
                block_locations: None,
            },
        }
    }
}

impl MemoryAuthority {
    pub fn new() -> Self {
        Self::with_defaults(AuthorityDefaults {
            replication: 3,
            block_size: 128 * 1024 * 1024,
        })
    }

    pub fn with_defaults(defaults: AuthorityDefaults) -> Self {
        Self {
            inner: Arc::new(Inner {
                defaults,
                root: Mutex::new(Node::new_dir("dfs")),
                identity: Mutex::new("dfs".to_owned()),
            }),
        }
    }

    /// Fault injection for tests: flips one data byte without touching
    /// the recorded checksums.
    pub fn corrupt(&self, path: &RemotePath, offset: usize) -> Result<(), AuthorityError> {
        let mut root = self.inner.root.lock();
        match root.get_mut_node(path) {
            Some(Node::File(file)) if offset < file.data.len() => {
                file.data[offset] ^= 0xff;
                Ok(())
            }
            Some(Node::File(_)) | None => Err(AuthorityError::NotFound),
            Some(Node::Directory { .. }) => Err(AuthorityError::NotADirectory(path.to_string())),
        }
    }

    fn locations_for(&self, file: &FileNode) -> Vec<BlockLocation> {
        let replication = file.replication.max(1) as usize;
        file.checksums
            .iter()
            .enumerate()
            .map(|(index, block)| BlockLocation {
                offset: block.offset,
                length: block.length,
                hosts: (0..replication.min(HOSTS.len()))
                    .map(|replica| HOSTS[(index + replica) % HOSTS.len()].to_owned())
                    .collect(),
            })
            .collect()
    }
}

impl Default for MemoryAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    fn get_mut_node(&mut self, path: &RemotePath) -> Option<&mut Node> {
        let mut node = self;
        for segment in path.segments() {
            match node {
                Node::Directory { children, .. } => node = children.get_mut(segment)?,
                Node::File(_) => return None,
            }
        }
        Some(node)
    }

    /// Walks to the parent directory of `path`, creating missing
    /// ancestors when `create` is set. Fails when a file sits on the way.
    fn parent_dir<'a>(
        &'a mut self,
        path: &RemotePath,
        owner: &str,
        create: bool,
    ) -> Result<Option<&'a mut BTreeMap<String, Node>>, AuthorityError> {
        let segments: Vec<_> = path.segments().collect();
        let mut node = self;
        let mut walked = RemotePath::root();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            walked = walked.join(segment).expect("segment comes from a valid path");
            let children = match node {
                Node::Directory { children, .. } => children,
                Node::File(_) => unreachable!("walk stops at files below"),
            };
            if create && !children.contains_key(*segment) {
                children.insert(segment.to_string(), Node::new_dir(owner));
            }
            match children.get_mut(*segment) {
                Some(Node::Directory { .. }) => {}
                Some(Node::File(_)) => {
                    return Err(AuthorityError::NotADirectory(walked.to_string()))
                }
                None => return Ok(None),
            }
            node = children.get_mut(*segment).expect("just checked");
        }
        match node {
            Node::Directory { children, .. } => Ok(Some(children)),
            Node::File(_) => unreachable!("loop never leaves a file node"),
        }
    }
}

pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
}

impl FileSource for MemorySource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AuthorityError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + READ_CHUNK).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(chunk))
    }
}

pub struct MemorySink {
    inner: Arc<Inner>,
    path: RemotePath,
    opts: CreateOptions,
    buf: Vec<u8>,
}

impl FileSink for MemorySink {
    async fn write(&mut self, data: &[u8]) -> Result<(), AuthorityError> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn commit(self) -> Result<(), AuthorityError> {
        let mut root = self.inner.root.lock();
        // The namespace may have changed since `create`; re-check.
        check_create_target(&root, &self.path, &self.opts)?;
        let name = self
            .path
            .file_name()
            .ok_or_else(|| AuthorityError::Protocol("cannot write to the namespace root".to_owned()))?
            .to_owned();
        let children = root
            .parent_dir(&self.path, &self.opts.owner, true)?
            .expect("ancestors were just created");
        let mut hasher = BlockHasher::new(self.opts.block_size);
        hasher.update(&self.buf);
        children.insert(
            name,
            Node::File(FileNode {
                data: self.buf,
                replication: self.opts.replication,
                block_size: self.opts.block_size,
                modified_ms: timestamp_now_ms(),
                owner: self.opts.owner,
                checksums: hasher.finish(),
            }),
        );
        Ok(())
    }
}

fn check_create_target(
    root: &Node,
    path: &RemotePath,
    opts: &CreateOptions,
) -> Result<(), AuthorityError> {
    match root.get(path) {
        None => Ok(()),
        Some(Node::File(_)) if opts.overwrite => Ok(()),
        Some(Node::File(_)) => Err(AuthorityError::AlreadyExists),
        Some(Node::Directory { .. }) => Err(AuthorityError::NotADirectory(path.to_string())),
    }
}

impl Authority for MemoryAuthority {
    type Source = MemorySource;
    type Sink = MemorySink;

    fn endpoint(&self) -> &str {
        "memory://authority"
    }

    async fn handshake(&self, identity: &str) -> Result<AuthorityDefaults, AuthorityError> {
        if identity.is_empty() {
            return Err(AuthorityError::Rejected("empty identity".to_owned()));
        }
        *self.inner.identity.lock() = identity.to_owned();
        Ok(self.inner.defaults)
    }

    async fn status(&self, path: &RemotePath) -> Result<Option<FileEntry>, AuthorityError> {
        let root = self.inner.root.lock();
        Ok(root.get(path).map(|node| node.entry(path, &self.inner.defaults)))
    }

    async fn list(
        &self,
        path: &RemotePath,
        locations: bool,
    ) -> Result<Vec<FileEntry>, AuthorityError> {
        let root = self.inner.root.lock();
        let node = root.get(path).ok_or(AuthorityError::NotFound)?;
        let mut entries = match node {
            Node::File(_) => vec![node.entry(path, &self.inner.defaults)],
            Node::Directory { children, .. } => children
                .iter()
                .map(|(name, child)| {
                    let child_path = path.join(name).expect("child names are single segments");
                    child.entry(&child_path, &self.inner.defaults)
                })
                .collect(),
        };
        if locations {
            for entry in &mut entries {
                if let Some(Node::File(file)) = root.get(&entry.path) {
                    entry.block_locations = Some(self.locations_for(file));
                }
            }
        }
        Ok(entries)
    }

    async fn mkdirs(&self, path: &RemotePath) -> Result<(), AuthorityError> {
        let owner = self.inner.identity.lock().clone();
        let mut root = self.inner.root.lock();
        let mut node = &mut *root;
        let mut walked = RemotePath::root();
        for segment in path.segments() {
            walked = walked.join(segment).expect("segment comes from a valid path");
            let children = match node {
                Node::Directory { children, .. } => children,
                Node::File(_) => unreachable!("walk stops at files below"),
            };
            if !children.contains_key(segment) {
                children.insert(segment.to_owned(), Node::new_dir(&owner));
            }
            match children.get_mut(segment) {
                Some(Node::Directory { .. }) => {}
                Some(Node::File(_)) | None => {
                    return Err(AuthorityError::NotADirectory(walked.to_string()))
                }
            }
            node = children.get_mut(segment).expect("just inserted or checked");
        }
        Ok(())
    }

    async fn delete(&self, path: &RemotePath, recursive: bool) -> Result<bool, AuthorityError> {
        let owner = self.inner.identity.lock().clone();
        let mut root = self.inner.root.lock();
        if path.is_root() {
            let Node::Directory { children, .. } = &mut *root else {
                unreachable!("root is a directory");
            };
            if !children.is_empty() && !recursive {
                return Err(AuthorityError::NotEmpty);
            }
            children.clear();
            return Ok(true);
        }
        let name = path.file_name().expect("non-root path has a name").to_owned();
        // A file on the ancestor chain means the path cannot exist, and
        // deleting an absent path is a no-op.
        let Some(children) = (match root.parent_dir(path, &owner, false) {
            Ok(children) => children,
            Err(AuthorityError::NotADirectory(_)) => return Ok(false),
            Err(err) => return Err(err),
        }) else {
            return Ok(false);
        };
        let non_empty_dir = match children.get(&name) {
            None => return Ok(false),
            Some(Node::Directory { children: sub, .. }) => !sub.is_empty(),
            Some(Node::File(_)) => false,
        };
        if non_empty_dir && !recursive {
            return Err(AuthorityError::NotEmpty);
        }
        children.remove(&name);
        Ok(true)
    }

    async fn rename(&self, src: &RemotePath, dst: &RemotePath) -> Result<(), AuthorityError> {
        if src.is_root() || dst.is_root() {
            return Err(AuthorityError::Protocol(
                "cannot rename the namespace root".to_owned(),
            ));
        }
        let owner = self.inner.identity.lock().clone();
        let mut root = self.inner.root.lock();
        if root.get(src).is_none() {
            return Err(AuthorityError::NotFound);
        }
        if root.get(dst).is_some() {
            return Err(AuthorityError::AlreadyExists);
        }
        let src_name = src.file_name().expect("not the root").to_owned();
        let dst_name = dst.file_name().expect("not the root").to_owned();

        let src_children = root
            .parent_dir(src, &owner, false)?
            .ok_or(AuthorityError::NotFound)?;
        let moved = src_children.remove(&src_name).ok_or(AuthorityError::NotFound)?;

        let failure = match root.parent_dir(dst, &owner, false) {
            Ok(Some(dst_children)) => {
                dst_children.insert(dst_name, moved);
                return Ok(());
            }
            Ok(None) => AuthorityError::NotFound,
            Err(err) => err,
        };
        // Moving a directory under itself removes the destination parent
        // together with the source; putting the subtree back leaves the
        // namespace unchanged.
        restore(&mut root, src, &owner, src_name, moved);
        Err(failure)
    }

    async fn open(&self, path: &RemotePath) -> Result<Self::Source, AuthorityError> {
        let root = self.inner.root.lock();
        match root.get(path) {
            Some(Node::File(file)) => Ok(MemorySource {
                data: file.data.clone(),
                pos: 0,
            }),
            Some(Node::Directory { .. }) => Err(AuthorityError::NotADirectory(path.to_string())),
            None => Err(AuthorityError::NotFound),
        }
    }

    async fn create(
        &self,
        path: &RemotePath,
        opts: CreateOptions,
    ) -> Result<Self::Sink, AuthorityError> {
        let root = self.inner.root.lock();
        check_create_target(&root, path, &opts)?;
        drop(root);
        Ok(MemorySink {
            inner: self.inner.clone(),
            path: path.clone(),
            opts,
            buf: Vec::new(),
        })
    }

    async fn checksums(&self, path: &RemotePath) -> Result<Vec<BlockChecksum>, AuthorityError> {
        let root = self.inner.root.lock();
        match root.get(path) {
            Some(Node::File(file)) => Ok(file.checksums.clone()),
            Some(Node::Directory { .. }) => Err(AuthorityError::NotADirectory(path.to_string())),
            None => Err(AuthorityError::NotFound),
        }
    }
}

fn restore(root: &mut Node, src: &RemotePath, owner: &str, name: String, node: Node) {
    root.parent_dir(src, owner, true)
        .expect("source parent existed a moment ago")
        .expect("source parent existed a moment ago")
        .insert(name, node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{Authority, CreateOptions, FileSink};

    async fn put_file(authority: &MemoryAuthority, path: &str, data: &[u8]) {
        let path = path.parse().unwrap();
        let mut sink = authority
            .create(
                &path,
                CreateOptions {
                    overwrite: true,
                    replication: 2,
                    block_size: 8,
                    owner: "root".to_owned(),
                },
            )
            .await
            .unwrap();
        sink.write(data).await.unwrap();
        sink.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_mkdirs_and_status() {
        let authority = MemoryAuthority::new();
        let path: RemotePath = "/com/cas".parse().unwrap();
        authority.mkdirs(&path).await.unwrap();
        authority.mkdirs(&path).await.unwrap();
        let entry = authority.status(&path).await.unwrap().unwrap();
        assert!(entry.is_directory());
        let parent = authority
            .status(&path.parent().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(parent.is_directory());
    }

    #[tokio::test]
    async fn test_mkdirs_through_file() {
        let authority = MemoryAuthority::new();
        put_file(&authority, "/com/cas", b"data").await;
        let err = authority
            .mkdirs(&"/com/cas/sub".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthorityError::NotADirectory(p) if p == "/com/cas"));
    }

    #[tokio::test]
    async fn test_create_records_checksums() {
        let authority = MemoryAuthority::new();
        put_file(&authority, "/f", b"0123456789abc").await;
        let checksums = authority
            .checksums(&"/f".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(checksums.len(), 2);
        assert_eq!(checksums[1].offset, 8);
        assert_eq!(checksums[1].length, 5);
    }

    #[tokio::test]
    async fn test_list_with_locations() {
        let authority = MemoryAuthority::new();
        put_file(&authority, "/dir/f", b"0123456789abc").await;
        let entries = authority
            .list(&"/dir".parse().unwrap(), true)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        let locations = entries[0].block_locations.as_ref().unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].hosts.len(), 2);
        // plain listing omits the detail entirely
        let entries = authority
            .list(&"/dir".parse().unwrap(), false)
            .await
            .unwrap();
        assert_eq!(entries[0].block_locations, None);
    }

    #[tokio::test]
    async fn test_rename_into_own_subtree_is_undone() {
        let authority = MemoryAuthority::new();
        authority.mkdirs(&"/a/b".parse().unwrap()).await.unwrap();
        let err = authority
            .rename(&"/a".parse().unwrap(), &"/a/b/c".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthorityError::NotFound));
        assert!(authority
            .status(&"/a/b".parse().unwrap())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_absent_is_false() {
        let authority = MemoryAuthority::new();
        assert!(!authority
            .delete(&"/ghost".parse().unwrap(), true)
            .await
            .unwrap());
        assert!(!authority
            .delete(&"/no/such/dir".parse().unwrap(), false)
            .await
            .unwrap());
    }
}
