//! sled-backed storage of index generations and feed-job metadata.
//!
//! Layout per project:
//! - `{project}/g{gen}/docs`    doc id -> (document, length)
//! - `{project}/g{gen}/inv`     token -> {doc id -> weight}
//! - `{project}/g{gen}/ngram`   n-gram -> token set
//! - `{project}/g{gen}/suggest` normalized name -> trie terminal
//! - `{project}/meta`           live generation pointer, delta generation, build times
//!
//! A rebuild writes a whole new generation, then flips `live_generation` with a single insert;
//! readers of the store never see a half-written generation as live.

use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::StoreError;
use crate::index::Weight;
use crate::snapshot::{IndexSnapshot, SnapshotParts};
use crate::trie::Terminal;
use crate::DocId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

const PROJECTS_TREE: &str = "projects";
const JOBS_TREE: &str = "jobs";
const LIVE_GENERATION: &[u8] = b"live_generation";
const DELTA_GENERATION: &[u8] = b"delta_generation";
const GENERATION_TREES: [&str; 4] = ["docs", "inv", "ngram", "suggest"];

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    document: Document,
    length: u32,
}

fn generation_tree(project: &str, generation: u64, part: &str) -> String {
    format!("{project}/g{generation}/{part}")
}

fn meta_tree(project: &str) -> String {
    format!("{project}/meta")
}

fn built_at_key(generation: u64) -> String {
    format!("built_at/{generation}")
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StoreError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected 8 bytes, found {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

#[derive(Clone)]
pub struct SnapshotStore {
    db: sled::Db,
}

impl SnapshotStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self { db: sled::open(path)? })
    }

    /// A store deleted when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        Ok(Self { db: sled::Config::new().temporary(true).open()? })
    }

    pub fn projects(&self) -> Result<Vec<String>, StoreError> {
        let tree = self.db.open_tree(PROJECTS_TREE)?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (key, _) = item?;
            out.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(out)
    }

    pub fn live_generation(&self, project: &str) -> Result<Option<u64>, StoreError> {
        let meta = self.db.open_tree(meta_tree(project))?;
        meta.get(LIVE_GENERATION)?.map(|v| decode_u64(&v)).transpose()
    }

    /// Write every structure of `snapshot` under its generation. Not visible until `promote`.
    pub fn write_generation(&self, project: &str, snapshot: &IndexSnapshot) -> Result<(), StoreError> {
        let generation = snapshot.generation();

        let mut batch = sled::Batch::default();
        for doc_id in snapshot.document_ids() {
            if let Some(bytes) = snapshot.read_document(doc_id, |doc| {
                bincode::serialize(&StoredDocument {
                    document: doc.clone(),
                    length: snapshot.inverted().doc_length(doc_id),
                })
            }) {
                batch.insert(doc_id.as_bytes(), bytes?);
            }
        }
        self.db.open_tree(generation_tree(project, generation, "docs"))?.apply_batch(batch)?;

        let mut batch = sled::Batch::default();
        for (token, docs) in snapshot.inverted().entries() {
            batch.insert(token.as_bytes(), bincode::serialize(docs)?);
        }
        self.db.open_tree(generation_tree(project, generation, "inv"))?.apply_batch(batch)?;

        let mut batch = sled::Batch::default();
        for (gram, tokens) in snapshot.ngrams().entries() {
            batch.insert(gram.as_bytes(), bincode::serialize(tokens)?);
        }
        self.db.open_tree(generation_tree(project, generation, "ngram"))?.apply_batch(batch)?;

        let mut batch = sled::Batch::default();
        for (text, terminal) in snapshot.catalog().entries() {
            batch.insert(text.as_bytes(), bincode::serialize(&terminal)?);
        }
        self.db.open_tree(generation_tree(project, generation, "suggest"))?.apply_batch(batch)?;

        self.db
            .open_tree(meta_tree(project))?
            .insert(built_at_key(generation), snapshot.built_at().as_bytes())?;
        debug!(project, generation, docs = snapshot.len(), "generation written");
        Ok(())
    }

    /// Make `generation` live. Returns the generation it replaced.
    pub fn promote(&self, project: &str, generation: u64) -> Result<Option<u64>, StoreError> {
        self.db.open_tree(PROJECTS_TREE)?.insert(project.as_bytes(), Vec::<u8>::new())?;
        let meta = self.db.open_tree(meta_tree(project))?;
        let previous = meta.insert(LIVE_GENERATION, &generation.to_be_bytes()[..])?;
        self.db.flush()?;
        previous.map(|v| decode_u64(&v)).transpose()
    }

    pub fn drop_generation(&self, project: &str, generation: u64) -> Result<(), StoreError> {
        for part in GENERATION_TREES {
            self.db.drop_tree(generation_tree(project, generation, part))?;
        }
        self.db.open_tree(meta_tree(project))?.remove(built_at_key(generation))?;
        Ok(())
    }

    /// Rewrite one document of a live generation in place.
    pub fn put_document(&self, project: &str, generation: u64, doc: &Document, length: u32) -> Result<(), StoreError> {
        let bytes = bincode::serialize(&StoredDocument { document: doc.clone(), length })?;
        self.db.open_tree(generation_tree(project, generation, "docs"))?.insert(doc.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn delta_generation(&self, project: &str) -> Result<Option<u64>, StoreError> {
        let meta = self.db.open_tree(meta_tree(project))?;
        meta.get(DELTA_GENERATION)?.map(|v| decode_u64(&v)).transpose()
    }

    pub fn set_delta_generation(&self, project: &str, generation: u64) -> Result<(), StoreError> {
        self.db.open_tree(meta_tree(project))?.insert(DELTA_GENERATION, &generation.to_be_bytes()[..])?;
        Ok(())
    }

    /// Read the live generation of `project`, dropping any other generation left behind by an
    /// interrupted rebuild.
    pub fn load(&self, project: &str, config: &EngineConfig) -> Result<Option<IndexSnapshot>, StoreError> {
        let Some(generation) = self.live_generation(project)? else { return Ok(None) };
        self.sweep(project, generation)?;

        let mut documents = Vec::new();
        for item in self.db.open_tree(generation_tree(project, generation, "docs"))?.iter() {
            let (_, value) = item?;
            let stored: StoredDocument = bincode::deserialize(&value)?;
            documents.push((stored.document, stored.length));
        }
        let postings = self.read_tree::<HashMap<DocId, Weight>>(&generation_tree(project, generation, "inv"))?;
        let grams = self.read_tree::<HashSet<String>>(&generation_tree(project, generation, "ngram"))?;
        let suggestions = self.read_tree::<Terminal>(&generation_tree(project, generation, "suggest"))?;
        let built_at = self
            .db
            .open_tree(meta_tree(project))?
            .get(built_at_key(generation))?
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default();

        info!(project, generation, docs = documents.len(), "loaded live generation");
        let parts = SnapshotParts { generation, built_at, documents, postings, grams, suggestions };
        Ok(Some(IndexSnapshot::from_parts(parts, config)))
    }

    fn read_tree<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<(String, T)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.open_tree(name)?.iter() {
            let (key, value) = item?;
            out.push((String::from_utf8_lossy(&key).into_owned(), bincode::deserialize(&value)?));
        }
        Ok(out)
    }

    fn sweep(&self, project: &str, live: u64) -> Result<(), StoreError> {
        let prefix = format!("{project}/g");
        let live_prefix = format!("{project}/g{live}/");
        for name in self.db.tree_names() {
            let name = String::from_utf8_lossy(&name).into_owned();
            if name.starts_with(&prefix) && !name.starts_with(&live_prefix) {
                warn!(project, tree = %name, "dropping stale generation tree");
                self.db.drop_tree(name.as_bytes())?;
            }
        }
        Ok(())
    }

    pub fn save_job<T: Serialize>(&self, id: &str, job: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec(job)?;
        self.db.open_tree(JOBS_TREE)?.insert(id.as_bytes(), json)?;
        Ok(())
    }

    pub fn load_jobs<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.open_tree(JOBS_TREE)?.iter() {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
