//! Cache layer (spec.md §6 external interface, supplemented as ambient
//! stack per SPEC_FULL.md): where node bytes and metadata actually live
//! on disk. The network subsystem only ever asks this layer for a path
//! to read/write through or for the appledoubleheader blob's validity —
//! directory structure, eviction, and quota are the cache layer's
//! business, not ours.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::DavError;
use crate::node::Node;

/// Sidecar metadata persisted next to a cached file (spec.md §3 fields
/// that must survive a daemon restart).
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CacheMeta {
    pub last_modified: i64,
    pub entity_tag: Option<String>,
    pub appledoubleheader_uid: Option<u32>,
}

/// External contract the transaction engine and operations layer depend
/// on; `DiskCache` is the only implementation but the trait exists so
/// tests can substitute an in-memory double.
pub trait CacheLayer: Send + Sync {
    fn path_for_node(&self, node: &Node) -> PathBuf;
    fn meta_path_for_node(&self, node: &Node) -> PathBuf;

    fn open_for_read(&self, node: &Node) -> Result<File, DavError>;
    fn open_for_write(&self, node: &Node, truncate: bool) -> Result<File, DavError>;
    fn discard(&self, node: &Node) -> Result<(), DavError>;

    fn load_meta(&self, node: &Node) -> CacheMeta;
    fn save_meta(&self, node: &Node, meta: &CacheMeta) -> Result<(), DavError>;

    fn node_appledoubleheader_valid(&self, node: &Node, uid: u32) -> bool;
}

/// Per-node file plus a `.meta.json` sidecar, locked with `fs2` on
/// write so a concurrent background-download handoff can't race a
/// foreground truncate.
pub struct DiskCache {
    root: PathBuf,
    lock: Mutex<()>,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DavError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| DavError::Io(format!("creating cache root {}: {e}", root.display())))?;
        Ok(Self { root, lock: Mutex::new(()) })
    }

    fn node_file_name(node: &Node) -> String {
        format!("{:016x}", node.fileid)
    }
}

impl CacheLayer for DiskCache {
    fn path_for_node(&self, node: &Node) -> PathBuf {
        self.root.join(Self::node_file_name(node))
    }

    fn meta_path_for_node(&self, node: &Node) -> PathBuf {
        let mut p = self.path_for_node(node).into_os_string();
        p.push(".meta.json");
        PathBuf::from(p)
    }

    fn open_for_read(&self, node: &Node) -> Result<File, DavError> {
        File::open(self.path_for_node(node)).map_err(|e| DavError::Io(format!("opening cache file for read: {e}")))
    }

    fn open_for_write(&self, node: &Node, truncate: bool) -> Result<File, DavError> {
        let _guard = self.lock.lock().expect("cache lock poisoned");
        let path = self.path_for_node(node);
        let mut opts = OpenOptions::new();
        opts.create(true).write(true);
        if truncate {
            opts.truncate(true);
        } else {
            opts.append(true);
        }
        let file = opts.open(&path).map_err(|e| DavError::Io(format!("opening cache file for write: {e}")))?;
        fs2::FileExt::lock_exclusive(&file).map_err(|e| DavError::Io(format!("locking cache file: {e}")))?;
        Ok(file)
    }

    fn discard(&self, node: &Node) -> Result<(), DavError> {
        let _guard = self.lock.lock().expect("cache lock poisoned");
        let path = self.path_for_node(node);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| DavError::Io(format!("removing cache file: {e}")))?;
        }
        let meta_path = self.meta_path_for_node(node);
        if meta_path.exists() {
            std::fs::remove_file(&meta_path).ok();
        }
        Ok(())
    }

    fn load_meta(&self, node: &Node) -> CacheMeta {
        let path = self.meta_path_for_node(node);
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save_meta(&self, node: &Node, meta: &CacheMeta) -> Result<(), DavError> {
        let path = self.meta_path_for_node(node);
        let json = serde_json::to_string(meta).map_err(|e| DavError::Io(format!("serializing cache metadata: {e}")))?;
        std::fs::write(path, json).map_err(|e| DavError::Io(format!("writing cache metadata: {e}")))
    }

    fn node_appledoubleheader_valid(&self, node: &Node, uid: u32) -> bool {
        let meta = self.load_meta(node);
        meta.appledoubleheader_uid == Some(uid) && node.appledoubleheader().is_some()
    }
}

/// Reads up to `len` bytes starting at `offset` from a cache file,
/// mirroring the byte-range `read` operation's access pattern (spec.md
/// §4.I).
pub fn read_range(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>, DavError> {
    file.seek(SeekFrom::Start(offset)).map_err(|e| DavError::Io(format!("seeking cache file: {e}")))?;
    let mut buf = vec![0u8; len];
    let mut total = 0;
    loop {
        let n = file.read(&mut buf[total..]).map_err(|e| DavError::Io(format!("reading cache file: {e}")))?;
        if n == 0 {
            break;
        }
        total += n;
        if total == buf.len() {
            break;
        }
    }
    buf.truncate(total);
    Ok(buf)
}

pub fn append_all(file: &mut File, data: &[u8]) -> Result<(), DavError> {
    file.write_all(data).map_err(|e| DavError::Io(format!("writing cache file: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let node = Node::new("a.txt", NodeType::File, 42);

        let mut wf = cache.open_for_write(&node, true).unwrap();
        append_all(&mut wf, b"hello world").unwrap();
        drop(wf);

        let mut rf = cache.open_for_read(&node).unwrap();
        let data = read_range(&mut rf, 0, 5).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn meta_round_trips_through_json_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let node = Node::new("a.txt", NodeType::File, 7);

        let meta = CacheMeta {
            last_modified: 12345,
            entity_tag: Some("\"v1\"".into()),
            appledoubleheader_uid: Some(501),
        };
        cache.save_meta(&node, &meta).unwrap();
        let loaded = cache.load_meta(&node);
        assert_eq!(loaded.last_modified, 12345);
        assert_eq!(loaded.entity_tag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn discard_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let node = Node::new("a.txt", NodeType::File, 9);
        let mut wf = cache.open_for_write(&node, true).unwrap();
        append_all(&mut wf, b"x").unwrap();
        drop(wf);
        cache.save_meta(&node, &CacheMeta::default()).unwrap();

        cache.discard(&node).unwrap();
        assert!(!cache.path_for_node(&node).exists());
        assert!(!cache.meta_path_for_node(&node).exists());
    }
}
