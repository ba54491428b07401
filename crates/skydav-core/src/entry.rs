//! Snapshots of remote nodes.
//!
//! [`Entry`] is a closed sum over the three kinds of node the cache stores.
//! Folders carry their children only when a listing was requested; the cache
//! itself never retains them (see [`crate::cache`]).

use crate::path::CloudPath;
use std::time::SystemTime;

/// A public (shared) link published for a file or folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicLink {
    /// Public URL of the shared resource.
    pub url: String,
    /// When the link was published, if the backend reports it.
    pub created: Option<SystemTime>,
}

impl PublicLink {
    /// Create a link with an unknown publication time.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            created: None,
        }
    }
}

/// Content hash as reported by the backend.
///
/// The engine never interprets hashes; different providers use different
/// algorithms, so this is an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap a provider hash.
    pub fn new(hash: impl Into<String>) -> Self {
        ContentHash(hash.into())
    }

    /// The raw hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Snapshot of a remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Location in the virtual tree.
    pub path: CloudPath,
    /// Size in bytes.
    pub size: u64,
    /// Creation time, if reported.
    pub created: Option<SystemTime>,
    /// Last modification time.
    pub modified: SystemTime,
    /// Published links.
    pub public_links: Vec<PublicLink>,
    /// Provider hash.
    pub hash: Option<ContentHash>,
}

impl FileInfo {
    /// A file with the given size, modified now.
    pub fn new(path: impl Into<CloudPath>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            created: None,
            modified: SystemTime::now(),
            public_links: Vec::new(),
            hash: None,
        }
    }

    /// Attach a content hash.
    #[must_use]
    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.hash = Some(hash);
        self
    }
}

/// Snapshot of a remote folder, without its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    /// Location in the virtual tree.
    pub path: CloudPath,
    /// Total size in bytes, if the backend reports it.
    pub size: u64,
    /// Creation time, if reported.
    pub created: Option<SystemTime>,
    /// Last modification time.
    pub modified: SystemTime,
    /// Published links.
    pub public_links: Vec<PublicLink>,
    /// Approximate number of child files.
    pub files_count: Option<u64>,
    /// Approximate number of child folders.
    pub folders_count: Option<u64>,
}

impl FolderInfo {
    /// An empty folder snapshot with unknown counts.
    pub fn new(path: impl Into<CloudPath>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            created: None,
            modified: SystemTime::now(),
            public_links: Vec::new(),
            files_count: None,
            folders_count: None,
        }
    }

    /// Set the approximate child counts.
    #[must_use]
    pub fn with_counts(mut self, files: u64, folders: u64) -> Self {
        self.files_count = Some(files);
        self.folders_count = Some(folders);
        self
    }

    /// Adjust the approximate child counts after a child of the given kind
    /// appeared (`delta > 0`) or disappeared (`delta < 0`).
    ///
    /// Unknown counts stay unknown; known counts saturate at zero.
    pub fn adjust_counts(&mut self, child_is_folder: bool, delta: i64) {
        let slot = if child_is_folder {
            &mut self.folders_count
        } else {
            &mut self.files_count
        };
        if let Some(count) = slot.as_mut() {
            *count = count.saturating_add_signed(delta);
        }
    }
}

/// A folder snapshot plus, when a listing was fetched, its direct children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// The folder's own metadata.
    pub info: FolderInfo,
    /// Direct children. `None` means the listing was not requested or not
    /// known; `Some(vec![])` means the folder is known to be empty.
    pub children: Option<Vec<Entry>>,
}

impl Folder {
    /// A folder without a listing.
    pub fn new(info: FolderInfo) -> Self {
        Self {
            info,
            children: None,
        }
    }

    /// A folder with a complete listing.
    pub fn with_children(info: FolderInfo, children: Vec<Entry>) -> Self {
        Self {
            info,
            children: Some(children),
        }
    }
}

/// A foreign (shared) resource mounted at a path of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Mount point in the virtual tree.
    pub path: CloudPath,
    /// Public URL or identifier of the linked resource.
    pub target: String,
    /// Whether the target is a folder.
    pub is_folder: bool,
    /// Size of the target, if known.
    pub size: u64,
}

impl LinkInfo {
    /// A link to `target` mounted at `path`.
    pub fn new(path: impl Into<CloudPath>, target: impl Into<String>, is_folder: bool) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
            is_folder,
            size: 0,
        }
    }
}

/// A node of the remote tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A regular file.
    File(FileInfo),
    /// A folder, optionally with its listing.
    Folder(Folder),
    /// A mounted shared resource.
    Link(LinkInfo),
}

impl Entry {
    /// Shorthand for a file entry.
    pub fn file(path: impl Into<CloudPath>, size: u64) -> Self {
        Entry::File(FileInfo::new(path, size))
    }

    /// Shorthand for a folder entry without a listing.
    pub fn folder(path: impl Into<CloudPath>) -> Self {
        Entry::Folder(Folder::new(FolderInfo::new(path)))
    }

    /// Shorthand for a folder entry with a complete listing.
    pub fn folder_with_children(path: impl Into<CloudPath>, children: Vec<Entry>) -> Self {
        Entry::Folder(Folder::with_children(FolderInfo::new(path), children))
    }

    /// Location of this node.
    pub fn path(&self) -> &CloudPath {
        match self {
            Entry::File(f) => &f.path,
            Entry::Folder(f) => &f.info.path,
            Entry::Link(l) => &l.path,
        }
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.path().file_name().unwrap_or("")
    }

    /// True for folders and links to folders.
    pub fn is_folder(&self) -> bool {
        match self {
            Entry::File(_) => false,
            Entry::Folder(_) => true,
            Entry::Link(l) => l.is_folder,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Entry::File(f) => f.size,
            Entry::Folder(f) => f.info.size,
            Entry::Link(l) => l.size,
        }
    }

    /// Direct children if this is a folder with a listing attached.
    pub fn children(&self) -> Option<&[Entry]> {
        match self {
            Entry::Folder(Folder {
                children: Some(children),
                ..
            }) => Some(children),
            Entry::File(_) | Entry::Folder(_) | Entry::Link(_) => None,
        }
    }

    /// This snapshot with any attached listing removed.
    pub fn without_children(&self) -> Entry {
        match self {
            Entry::Folder(f) => Entry::Folder(Folder::new(f.info.clone())),
            Entry::File(_) | Entry::Link(_) => self.clone(),
        }
    }

    /// Split off the attached listing, if any.
    pub fn into_parts(self) -> (Entry, Option<Vec<Entry>>) {
        match self {
            Entry::Folder(Folder { info, children }) => {
                (Entry::Folder(Folder::new(info)), children)
            }
            other @ (Entry::File(_) | Entry::Link(_)) => (other, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_accessors() {
        let file = Entry::file("/docs/a.txt", 12);
        assert_eq!(file.name(), "a.txt");
        assert_eq!(file.size(), 12);
        assert!(!file.is_folder());
        assert!(file.children().is_none());

        let link = Entry::Link(LinkInfo::new("/shared", "https://cloud/public/xyz", true));
        assert!(link.is_folder());
    }

    #[test]
    fn test_without_children() {
        let folder = Entry::folder_with_children("/docs", vec![Entry::file("/docs/a.txt", 1)]);
        assert_eq!(folder.children().map(<[Entry]>::len), Some(1));

        let bare = folder.without_children();
        assert!(bare.children().is_none());
        assert_eq!(bare.path(), folder.path());
    }

    #[test]
    fn test_empty_listing_is_distinct_from_unknown() {
        let empty = Entry::folder_with_children("/empty", Vec::new());
        assert_eq!(empty.children(), Some(&[][..]));
        assert!(Entry::folder("/empty").children().is_none());
    }

    #[test]
    fn test_adjust_counts() {
        let mut info = FolderInfo::new("/docs").with_counts(2, 1);
        info.adjust_counts(false, 1);
        info.adjust_counts(true, -1);
        assert_eq!(info.files_count, Some(3));
        assert_eq!(info.folders_count, Some(0));

        info.adjust_counts(true, -5);
        assert_eq!(info.folders_count, Some(0));

        let mut unknown = FolderInfo::new("/x");
        unknown.adjust_counts(false, 1);
        assert_eq!(unknown.files_count, None);
    }
}
