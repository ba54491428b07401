//! Normalized, case-insensitive paths into the virtual cloud tree.
//!
//! Every cache key is a [`CloudPath`]. Paths use `/` as the separator no
//! matter what the client sent, collapse `.`/`..`/empty segments, and compare
//! case-insensitively because the upstream services treat `Docs` and `docs`
//! as the same node.

use relative_path::{Component, RelativePath};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A path in the virtual tree exposed to WebDAV clients.
///
/// The display form keeps the casing it was created with; equality, hashing
/// and ordering use a lowercased key.
///
/// # Examples
///
/// ```
/// use skydav_core::path::CloudPath;
///
/// let path = CloudPath::new("/Docs//Reports/./q1.pdf");
/// assert_eq!(path.as_str(), "Docs/Reports/q1.pdf");
/// assert_eq!(path.to_string(), "/Docs/Reports/q1.pdf");
/// assert_eq!(path, CloudPath::new("docs/reports/Q1.PDF"));
/// ```
#[derive(Debug, Clone)]
pub struct CloudPath {
    display: String,
    key: String,
}

impl CloudPath {
    /// The root of the tree.
    pub fn root() -> Self {
        CloudPath {
            display: String::new(),
            key: String::new(),
        }
    }

    /// Create a path from client input.
    ///
    /// Backslashes are treated as separators, leading and trailing slashes
    /// are dropped, and `..` never climbs above the root.
    pub fn new(path: impl AsRef<str>) -> Self {
        let raw = path.as_ref().replace('\\', "/");
        let mut segments: Vec<&str> = Vec::new();
        for component in RelativePath::new(raw.trim_start_matches('/')).components() {
            match component {
                Component::Normal(name) => segments.push(name),
                Component::ParentDir => {
                    segments.pop();
                }
                Component::CurDir => {}
            }
        }
        let display = segments.join("/");
        let key = display.to_lowercase();
        CloudPath { display, key }
    }

    /// Check if this is the root path.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.display.is_empty()
    }

    /// The path without a leading slash, in its original casing.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// The lowercased comparison key.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a single name.
    pub fn join(&self, name: impl AsRef<str>) -> Self {
        if self.is_root() {
            CloudPath::new(name)
        } else {
            CloudPath::new(format!("{}/{}", self.display, name.as_ref()))
        }
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<CloudPath> {
        if self.is_root() {
            return None;
        }
        Some(match self.display.rfind('/') {
            Some(idx) => CloudPath::new(&self.display[..idx]),
            None => CloudPath::root(),
        })
    }

    /// The final component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        Some(match self.display.rfind('/') {
            Some(idx) => &self.display[idx + 1..],
            None => &self.display,
        })
    }

    /// Iterate over the components of this path.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.display.split('/').filter(|s| !s.is_empty())
    }

    /// Number of components (0 for the root).
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// True if `self` sits exactly one segment below `parent`.
    pub fn is_direct_child_of(&self, parent: &CloudPath) -> bool {
        if self.is_root() {
            return false;
        }
        let rest = if parent.is_root() {
            self.key.as_str()
        } else {
            match self
                .key
                .strip_prefix(parent.key.as_str())
                .and_then(|r| r.strip_prefix('/'))
            {
                Some(rest) => rest,
                None => return false,
            }
        };
        !rest.is_empty() && !rest.contains('/')
    }

    /// True if `self` equals `ancestor` or lies anywhere beneath it.
    pub fn is_at_or_below(&self, ancestor: &CloudPath) -> bool {
        if ancestor.is_root() {
            return true;
        }
        match self.key.strip_prefix(ancestor.key.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }
}

impl PartialEq for CloudPath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CloudPath {}

impl Hash for CloudPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for CloudPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CloudPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for CloudPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.display)
    }
}

impl From<&str> for CloudPath {
    fn from(s: &str) -> Self {
        CloudPath::new(s)
    }
}

impl From<String> for CloudPath {
    fn from(s: String) -> Self {
        CloudPath::new(s)
    }
}
