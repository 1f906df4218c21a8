//! The template catalog: ordered, immutable source snapshots merged into one
//! read-only view.
//!
//! Sources are listed lowest precedence first. A later source's proto with the
//! same id replaces the earlier one whole; fields are never merged. The merged
//! map is recomputed from the snapshots whenever the source list changes, so a
//! `Catalog` value is never patched in place.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::builtin;
use crate::parser;
use crate::types::{FormulaError, Proto, TEMPLATE_LABEL};

/// Where a catalog source reads its protos from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Protos compiled into the binary.
    Builtin,
    /// A directory of `*.formula.toml` / `*.formula.json` files.
    Directory(PathBuf),
    /// A JSONL file with one proto per line.
    Jsonl(PathBuf),
}

/// A named, readable collection of protos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSource {
    pub name: String,
    pub kind: SourceKind,
}

impl CatalogSource {
    pub fn builtin() -> Self {
        Self {
            name: "builtin".into(),
            kind: SourceKind::Builtin,
        }
    }

    pub fn directory(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Directory(path.into()),
        }
    }

    pub fn jsonl(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Jsonl(path.into()),
        }
    }

    /// Reads the source into an immutable snapshot.
    pub fn read(&self) -> SourceSnapshot {
        match self.kind {
            SourceKind::Builtin => builtin::snapshot(&self.name),
            SourceKind::Directory(ref dir) => parser::read_directory(&self.name, dir),
            SourceKind::Jsonl(ref path) => parser::read_jsonl(&self.name, path),
        }
    }
}

/// The protos one source held at read time.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    pub name: String,
    pub protos: Vec<Arc<Proto>>,
    /// Malformed records dropped while reading.
    pub skipped: usize,
}

impl SourceSnapshot {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protos: Vec::new(),
            skipped: 0,
        }
    }

    pub fn from_protos(name: impl Into<String>, protos: Vec<Proto>) -> Self {
        Self {
            name: name.into(),
            protos: protos.into_iter().map(Arc::new).collect(),
            skipped: 0,
        }
    }
}

/// One entry of the merged view.
#[derive(Debug, Clone)]
struct Entry {
    proto: Arc<Proto>,
    /// Name of the source that won.
    origin: String,
}

/// Merged, read-only view over an ordered list of source snapshots.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    sources: Vec<CatalogSource>,
    snapshots: Vec<SourceSnapshot>,
    merged: BTreeMap<String, Entry>,
}

impl Catalog {
    /// Reads every source, in order, and merges them.
    pub fn load(sources: &[CatalogSource]) -> Self {
        let snapshots = sources.iter().map(CatalogSource::read).collect();
        let mut catalog = Self::from_snapshots(snapshots);
        catalog.sources = sources.to_vec();
        info!(
            sources = catalog.snapshots.len(),
            protos = catalog.merged.len(),
            "loaded template catalog"
        );
        catalog
    }

    /// Merges already-read snapshots, lowest precedence first.
    pub fn from_snapshots(snapshots: Vec<SourceSnapshot>) -> Self {
        let mut catalog = Self {
            sources: Vec::new(),
            snapshots,
            merged: BTreeMap::new(),
        };
        catalog.remerge();
        catalog
    }

    /// Adds a source above every existing one and returns the new view.
    pub fn push_source(&self, source: CatalogSource) -> Self {
        let mut next = self.push_snapshot(source.read());
        next.sources.push(source);
        next
    }

    /// Adds a snapshot above every existing one and returns the new view.
    pub fn push_snapshot(&self, snapshot: SourceSnapshot) -> Self {
        let mut snapshots = self.snapshots.clone();
        snapshots.push(snapshot);
        let mut next = Self::from_snapshots(snapshots);
        next.sources = self.sources.clone();
        next
    }

    /// Re-reads every source this catalog was loaded from.
    pub fn reload(&self) -> Self {
        Self::load(&self.sources)
    }

    fn remerge(&mut self) {
        self.merged.clear();
        for snapshot in &self.snapshots {
            for proto in &snapshot.protos {
                if let Some(prev) = self.merged.insert(
                    proto.id.clone(),
                    Entry {
                        proto: Arc::clone(proto),
                        origin: snapshot.name.clone(),
                    },
                ) {
                    debug!(id = %proto.id, from = %prev.origin, to = %snapshot.name, "proto overridden");
                }
            }
        }
    }

    /// Returns the bondable proto with `id`.
    ///
    /// Fails with `NotFound` when `id` is absent or the record lacks the
    /// `template` label.
    pub fn get(&self, id: &str) -> Result<Arc<Proto>, FormulaError> {
        match self.lookup(id) {
            Some(proto) if proto.is_bondable() => Ok(proto),
            _ => Err(FormulaError::NotFound(id.to_string())),
        }
    }

    /// Returns the raw record with `id`, labeled or not.
    pub fn lookup(&self, id: &str) -> Option<Arc<Proto>> {
        self.merged.get(id).map(|e| Arc::clone(&e.proto))
    }

    /// Name of the source whose record won for `id`.
    pub fn origin(&self, id: &str) -> Option<&str> {
        self.merged.get(id).map(|e| e.origin.as_str())
    }

    /// Lists bondable protos in id order, optionally restricted to those
    /// carrying `label`. The iterator can be cloned to restart it.
    pub fn list<'a>(&'a self, label: Option<&'a str>) -> ProtoIter<'a> {
        ProtoIter {
            inner: self.merged.values(),
            label,
        }
    }

    /// Number of records in the merged view (bondable or not).
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// The snapshots behind this view, lowest precedence first.
    pub fn snapshots(&self) -> &[SourceSnapshot] {
        &self.snapshots
    }
}

/// Iterator returned by [`Catalog::list`].
#[derive(Clone)]
pub struct ProtoIter<'a> {
    inner: btree_map::Values<'a, String, Entry>,
    label: Option<&'a str>,
}

impl<'a> Iterator for ProtoIter<'a> {
    type Item = &'a Proto;

    fn next(&mut self) -> Option<Self::Item> {
        let label = self.label;
        self.inner
            .by_ref()
            .map(|e| e.proto.as_ref())
            .find(|p| p.has_label(TEMPLATE_LABEL) && label.is_none_or(|l| p.has_label(l)))
    }
}
