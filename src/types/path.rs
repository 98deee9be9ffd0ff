use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Absolute slash-delimited path addressing an entry in the authority's
/// namespace. Relative paths and `.`/`..`/empty segments are rejected
/// outright instead of being collapsed.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct RemotePath(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path '{0}' is not absolute")]
    NotAbsolute(String),
    #[error("remote path '{path}' contains unsupported segment '{segment}'")]
    BadSegment { path: String, segment: String },
}

impl RemotePath {
    pub fn root() -> Self {
        RemotePath("/".to_owned())
    }

    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        if !s.starts_with('/') {
            return Err(PathError::NotAbsolute(s.to_owned()));
        }
        if s == "/" {
            return Ok(Self::root());
        }
        let trimmed = s.strip_suffix('/').unwrap_or(s);
        for segment in trimmed[1..].split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(PathError::BadSegment {
                    path: s.to_owned(),
                    segment: segment.to_owned(),
                });
            }
        }
        Ok(RemotePath(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Path segments, root-first. Empty for the root itself.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Final segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn parent(&self) -> Option<RemotePath> {
        if self.is_root() {
            return None;
        }
        let segments: Vec<_> = self.segments().collect();
        match segments.len() {
            1 => Some(Self::root()),
            n => Some(RemotePath(format!("/{}", segments[..n - 1].iter().join("/")))),
        }
    }

    /// Appends one segment. The segment must not contain slashes.
    pub fn join(&self, name: &str) -> Result<RemotePath, PathError> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(PathError::BadSegment {
                path: self.0.clone(),
                segment: name.to_owned(),
            });
        }
        if self.is_root() {
            Ok(RemotePath(format!("/{name}")))
        } else {
            Ok(RemotePath(format!("{}/{name}", self.0)))
        }
    }

    pub fn starts_with(&self, ancestor: &RemotePath) -> bool {
        if ancestor.is_root() {
            return true;
        }
        self.0 == ancestor.0 || self.0.starts_with(&format!("{}/", ancestor.0))
    }
}

impl FromStr for RemotePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl Serialize for RemotePath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RemotePath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{PathError, RemotePath};

    #[test]
    fn test_parse() {
        assert_eq!(RemotePath::parse("/").unwrap(), RemotePath::root());
        assert_eq!(RemotePath::parse("/com/cas").unwrap().as_str(), "/com/cas");
        assert_eq!(RemotePath::parse("/com/cas/").unwrap().as_str(), "/com/cas");
        assert_eq!(RemotePath::parse(""), Err(PathError::Empty));
        RemotePath::parse("com/cas").unwrap_err();
        RemotePath::parse("//").unwrap_err();
        RemotePath::parse("/com//cas").unwrap_err();
        RemotePath::parse("/com/./cas").unwrap_err();
        RemotePath::parse("/com/../cas").unwrap_err();
    }

    #[test]
    fn test_parent_and_name() {
        let path = RemotePath::parse("/com/cas/hdfs.txt").unwrap();
        assert_eq!(path.file_name(), Some("hdfs.txt"));
        assert_eq!(path.parent().unwrap().as_str(), "/com/cas");
        assert_eq!(
            RemotePath::parse("/com").unwrap().parent(),
            Some(RemotePath::root())
        );
        assert_eq!(RemotePath::root().parent(), None);
        assert_eq!(RemotePath::root().file_name(), None);
    }

    #[test]
    fn test_join() {
        let dir = RemotePath::parse("/com/cas").unwrap();
        assert_eq!(dir.join("hdfs.txt").unwrap().as_str(), "/com/cas/hdfs.txt");
        assert_eq!(RemotePath::root().join("tmp").unwrap().as_str(), "/tmp");
        dir.join("a/b").unwrap_err();
        dir.join("..").unwrap_err();
        dir.join("").unwrap_err();
    }

    #[test]
    fn test_starts_with() {
        let root = RemotePath::root();
        let dir = RemotePath::parse("/com/cas").unwrap();
        let file = RemotePath::parse("/com/cas/hdfs.txt").unwrap();
        let sibling = RemotePath::parse("/com/cassandra").unwrap();
        assert!(file.starts_with(&dir));
        assert!(dir.starts_with(&dir));
        assert!(file.starts_with(&root));
        assert!(!sibling.starts_with(&dir));
        assert!(!dir.starts_with(&file));
    }
}
