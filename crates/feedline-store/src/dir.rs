//! Directory-backed document store
//!
//! Layout:
//! ```text
//! {root}/
//! ├── {namespace}.jsonl       # one document per line, ordered by _id
//! └── {namespace}.jsonl.tmp   # only while a bulk write is committing
//! ```
//!
//! Each bulk write loads the namespace, applies the operations, writes the
//! result to `.tmp` and renames it over the live file. A write therefore
//! costs the size of the whole namespace, so loading a feed of N documents
//! in batches reads and rewrites O(N²/batch) documents. Fine for the feeds
//! this is meant for; large feeds want a bigger batch size.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::collection::{Collection, IdGenerator};
use crate::document::Document;
use crate::error::StoreError;
use crate::ops::{BulkWriteResult, WriteOperation};
use crate::{DocumentStore, NamespaceInfo, validate_namespace};

const EXTENSION: &str = "jsonl";

pub struct DirStore {
    root: PathBuf,
    // Serializes load → apply → rename per store handle
    write_lock: Mutex<()>,
    ids: IdGenerator,
}

impl std::fmt::Debug for DirStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Leaves `.tmp` files alone, so it is safe while a writer is committing.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(root).map_err(|e| StoreError::io(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
            ids: IdGenerator::new(),
        })
    }

    /// Open the store for a writing run, removing stale `.tmp` files left by
    /// interrupted writes.
    pub fn open_for_writing(root: &Path) -> Result<Self, StoreError> {
        let store = Self::open(root)?;
        cleanup_tmp_files(root)?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_path(&self, namespace: &str) -> Result<PathBuf, StoreError> {
        validate_namespace(namespace)?;
        Ok(self.root.join(format!("{namespace}.{EXTENSION}")))
    }

    /// Read all documents of a namespace (empty when it does not exist).
    pub fn documents(&self, namespace: &str) -> Result<Vec<Document>, StoreError> {
        let path = self.namespace_path(namespace)?;
        let coll = read_collection(&path)?;
        Ok(coll.documents().cloned().collect())
    }
}

impl DocumentStore for DirStore {
    fn bulk_write(
        &self,
        namespace: &str,
        ops: Vec<WriteOperation>,
    ) -> Result<BulkWriteResult, StoreError> {
        let path = self.namespace_path(namespace)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut coll = read_collection(&path)?;
        let result = coll.apply(ops, &self.ids);
        write_collection(&path, &coll)?;

        log::debug!(
            "{namespace}: +{} inserted, {} upserted, {} modified, {} failed",
            result.inserted,
            result.upserted,
            result.modified,
            result.failures.len()
        );
        Ok(result)
    }

    fn namespaces(&self) -> Result<Vec<NamespaceInfo>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut out = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.root, e))?.path();
            if path.extension().is_none_or(|ext| ext != EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let documents = count_lines(&path)?;
            out.push(NamespaceInfo {
                name: name.to_string(),
                documents,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

fn read_collection(path: &Path) -> Result<Collection, StoreError> {
    let mut coll = Collection::new();
    if !path.exists() {
        return Ok(coll);
    }
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StoreError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(&line).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        if !coll.restore(doc) {
            log::warn!("{}:{}: document without _id, dropped", path.display(), idx + 1);
        }
    }
    Ok(coll)
}

fn write_collection(path: &Path, coll: &Collection) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    let mut writer = BufWriter::new(file);
    for doc in coll.documents() {
        serde_json::to_writer(&mut writer, doc)?;
        writer.write_all(b"\n").map_err(|e| StoreError::io(&tmp, e))?;
    }
    writer.flush().map_err(|e| StoreError::io(&tmp, e))?;
    drop(writer);

    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

fn count_lines(path: &Path) -> Result<usize, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut n = 0;
    for line in BufReader::new(file).lines() {
        if !line.map_err(|e| StoreError::io(path, e))?.trim().is_empty() {
            n += 1;
        }
    }
    Ok(n)
}

fn cleanup_tmp_files(root: &Path) -> Result<(), StoreError> {
    let entries = fs::read_dir(root).map_err(|e| StoreError::io(root, e))?;
    for entry in entries {
        let path = entry.map_err(|e| StoreError::io(root, e))?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        }
    }
    Ok(())
}
