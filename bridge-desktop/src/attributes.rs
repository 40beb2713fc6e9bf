//! Union filesystem aware attribute provider
//!
//! Resolves a host path to the identity of the physical file behind it. On a
//! mergerfs mount the `user.mergerfs.*` extended attributes name the branch and
//! the branch-relative path directly; elsewhere the canonical path is stripped
//! of the configured union roots and branch directories.

use async_trait::async_trait;
use bridge_traits::attributes::{AttributeProvider, FileInode, MediaFile, ResolveError};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

const XATTR_BASEPATH: &str = "user.mergerfs.basepath";
const XATTR_RELPATH: &str = "user.mergerfs.relpath";
const XATTR_FULLPATH: &str = "user.mergerfs.fullpath";

/// Bytes hashed from each end of a file for the partial content hash
const PARTIAL_HASH_CHUNK: u64 = 64 * 1024;

/// Layout of the union filesystem on this host
#[derive(Debug, Clone, Default)]
pub struct UnionFsOptions {
    /// Mount points of the merged view (e.g. `/mnt/merged`)
    pub union_roots: Vec<PathBuf>,
    /// Underlying branch directories (e.g. `/mnt/disk1`)
    pub branches: Vec<PathBuf>,
    /// Compute a partial content hash for every resolved file
    pub partial_hash: bool,
}

#[derive(Debug)]
struct UnionAttributes {
    basepath: String,
    relpath: String,
    fullpath: PathBuf,
}

/// [`AttributeProvider`] backed by the local filesystem
#[derive(Debug, Clone)]
pub struct UnionFsAttributeProvider {
    options: Arc<UnionFsOptions>,
}

impl UnionFsAttributeProvider {
    pub fn new(options: UnionFsOptions) -> Self {
        // Symlinked roots would never prefix a canonical path, so canonicalize
        // them up front when they exist.
        let canonical = |paths: Vec<PathBuf>| -> Vec<PathBuf> {
            paths
                .into_iter()
                .map(|p| fs::canonicalize(&p).unwrap_or(p))
                .collect()
        };

        Self {
            options: Arc::new(UnionFsOptions {
                union_roots: canonical(options.union_roots),
                branches: canonical(options.branches),
                partial_hash: options.partial_hash,
            }),
        }
    }
}

#[async_trait]
impl AttributeProvider for UnionFsAttributeProvider {
    async fn resolve(&self, path: &Path) -> Result<MediaFile, ResolveError> {
        let options = Arc::clone(&self.options);
        let path = path.to_path_buf();
        let display = path.display().to_string();

        tokio::task::spawn_blocking(move || resolve_blocking(&options, &path))
            .await
            .map_err(|e| ResolveError::unresolvable(display, format!("resolver task failed: {}", e)))?
    }
}

fn resolve_blocking(options: &UnionFsOptions, path: &Path) -> Result<MediaFile, ResolveError> {
    let display_path = path.display().to_string();

    let (real_path, relative_path, branch) = match read_union_attributes(path) {
        Some(attrs) => {
            trace!(path = %display_path, branch = %attrs.basepath, "Union attributes found");
            (
                attrs.fullpath,
                rooted(Path::new(&attrs.relpath)),
                Some(attrs.basepath),
            )
        }
        None => {
            let canonical = fs::canonicalize(path).map_err(|e| io_failure(&display_path, &e))?;
            let (relative, branch) = strip_known_prefix(options, &canonical);
            (canonical, relative, branch)
        }
    };

    let metadata = fs::metadata(&real_path).map_err(|e| io_failure(&display_path, &e))?;
    if !metadata.is_file() {
        return Err(ResolveError::unresolvable(display_path, "not a regular file"));
    }

    let size = metadata.len();
    let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);

    let content_hash = if options.partial_hash {
        Some(partial_hash(&real_path, size).map_err(|e| io_failure(&display_path, &e))?)
    } else {
        None
    };

    debug!(
        path = %display_path,
        real_path = %real_path.display(),
        relative_path = %relative_path.display(),
        size,
        "Resolved media file"
    );

    Ok(MediaFile {
        source_path: path.to_path_buf(),
        inode: inode_of(&metadata),
        real_path,
        relative_path,
        branch,
        size,
        modified_at,
        content_hash,
    })
}

fn io_failure(path: &str, error: &io::Error) -> ResolveError {
    let reason = match error.kind() {
        io::ErrorKind::NotFound => "file not found".to_string(),
        io::ErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => error.to_string(),
    };
    ResolveError::unresolvable(path, reason)
}

/// Strip the longest configured union root or branch prefix.
///
/// Returns the branch-independent path and, when the prefix was a branch, the
/// branch it was found on.
fn strip_known_prefix(options: &UnionFsOptions, canonical: &Path) -> (PathBuf, Option<String>) {
    let roots = options.union_roots.iter().map(|root| (root, false));
    let branches = options.branches.iter().map(|branch| (branch, true));

    let best = roots
        .chain(branches)
        .filter_map(|(prefix, is_branch)| {
            canonical
                .strip_prefix(prefix)
                .ok()
                .map(|rest| (prefix, is_branch, rest))
        })
        .max_by_key(|(prefix, _, _)| prefix.components().count());

    match best {
        Some((prefix, is_branch, rest)) => {
            let branch = is_branch.then(|| prefix.display().to_string());
            (rooted(rest), branch)
        }
        None => (canonical.to_path_buf(), None),
    }
}

/// Anchor a relative path at `/` so every view produces the same shape
fn rooted(path: &Path) -> PathBuf {
    let mut rooted = PathBuf::from("/");
    for component in path.components() {
        if let Component::Normal(part) = component {
            rooted.push(part);
        }
    }
    rooted
}

fn partial_hash(path: &Path, size: u64) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    hasher.update(size.to_le_bytes());

    let mut buffer = Vec::with_capacity(PARTIAL_HASH_CHUNK as usize);
    (&mut file).take(PARTIAL_HASH_CHUNK).read_to_end(&mut buffer)?;
    hasher.update(&buffer);

    if size > PARTIAL_HASH_CHUNK * 2 {
        buffer.clear();
        file.seek(SeekFrom::Start(size - PARTIAL_HASH_CHUNK))?;
        file.take(PARTIAL_HASH_CHUNK).read_to_end(&mut buffer)?;
        hasher.update(&buffer);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(unix)]
fn inode_of(metadata: &fs::Metadata) -> Option<FileInode> {
    use std::os::unix::fs::MetadataExt;
    Some(FileInode {
        device: metadata.dev(),
        inode: metadata.ino(),
    })
}

#[cfg(not(unix))]
fn inode_of(_metadata: &fs::Metadata) -> Option<FileInode> {
    None
}

fn read_union_attributes(path: &Path) -> Option<UnionAttributes> {
    let basepath = read_xattr(path, XATTR_BASEPATH)?;
    let relpath = read_xattr(path, XATTR_RELPATH)?;
    let fullpath = read_xattr(path, XATTR_FULLPATH)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(&basepath).join(relpath.trim_start_matches('/')));

    Some(UnionAttributes {
        basepath,
        relpath,
        fullpath,
    })
}

#[cfg(target_os = "linux")]
fn read_xattr(path: &Path, name: &str) -> Option<String> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let c_name = CString::new(name).ok()?;

    // SAFETY: both strings are NUL-terminated and outlive the call; a null
    // buffer with size 0 only queries the value length.
    let len = unsafe { libc::getxattr(c_path.as_ptr(), c_name.as_ptr(), std::ptr::null_mut(), 0) };
    if len <= 0 {
        return None;
    }

    let mut buffer = vec![0u8; len as usize];
    // SAFETY: `buffer` is writable for `buffer.len()` bytes.
    let read = unsafe {
        libc::getxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            buffer.as_mut_ptr().cast(),
            buffer.len(),
        )
    };
    if read < 0 {
        return None;
    }
    buffer.truncate(read as usize);

    // mergerfs may include trailing NULs
    let value = String::from_utf8(buffer).ok()?;
    let value = value.trim_end_matches('\0');
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(not(target_os = "linux"))]
fn read_xattr(_path: &Path, _name: &str) -> Option<String> {
    None
}
