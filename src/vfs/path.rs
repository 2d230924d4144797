//! Volume path handling.

use crate::error::{Error, Result};
use crate::vfs::directory::validate_name;
use std::fmt;

/// A validated absolute path inside a volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumePath {
    components: Vec<String>,
}

impl VolumePath {
    /// The root directory.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse a path string.
    ///
    /// Paths must be absolute (start with /). Repeated and trailing slashes
    /// are ignored.
    pub fn parse(path: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(Error::InvalidPath(format!(
                "{}: path must be absolute (start with /)",
                path
            )));
        }

        let components: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        for component in &components {
            validate_name(component)
                .map_err(|_| Error::InvalidPath(format!("{}: bad component {:?}", path, component)))?;
        }

        Ok(Self { components })
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Get the parent path.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            Some(Self {
                components: self.components[..self.components.len() - 1].to_vec(),
            })
        }
    }

    /// Get the last component.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join a child path component.
    pub fn join(&self, name: &str) -> Result<Self> {
        validate_name(name)?;
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(Self { components })
    }

    /// Get the depth of this path.
    pub fn depth(&self) -> usize {
        self.components.len()
    }
}

impl fmt::Display for VolumePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "/{}", self.components.join("/"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root() {
        let path = VolumePath::parse("/").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "/");
        assert_eq!(path, VolumePath::root());
    }

    #[test]
    fn test_parse_nested() {
        let path = VolumePath::parse("/a/b").unwrap();
        assert_eq!(path.components(), &["a", "b"]);
        assert_eq!(path.depth(), 2);
        assert_eq!(path.to_string(), "/a/b");
    }

    #[test]
    fn test_parse_extra_slashes() {
        let path = VolumePath::parse("//a///b/").unwrap();
        assert_eq!(path.components(), &["a", "b"]);
    }

    #[test]
    fn test_parse_relative_fails() {
        assert!(matches!(VolumePath::parse("a/b"), Err(Error::InvalidPath(_))));
        assert!(matches!(VolumePath::parse(""), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_dot_components_rejected() {
        assert!(VolumePath::parse("/a/../b").is_err());
        assert!(VolumePath::parse("/./b").is_err());
    }

    #[test]
    fn test_parent_and_name() {
        let path = VolumePath::parse("/foo/bar/baz").unwrap();
        assert_eq!(path.parent().unwrap().to_string(), "/foo/bar");
        assert_eq!(path.name(), Some("baz"));
        assert!(VolumePath::root().parent().is_none());
        assert_eq!(VolumePath::root().name(), None);
    }

    #[test]
    fn test_join() {
        let path = VolumePath::parse("/foo").unwrap();
        assert_eq!(path.join("bar").unwrap().to_string(), "/foo/bar");
        assert!(path.join("bar/baz").is_err());
        assert!(path.join("..").is_err());
        assert!(path.join("").is_err());
    }
}
