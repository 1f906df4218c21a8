//! [`MolEngine`] -- the facade callers bond, schedule and finalize through.
//!
//! The engine owns the template catalog and two record stores: a durable,
//! audited one for mols and digests, and an ephemeral one for wisps. Its
//! operations are split across modules: bonding in `bonder`, scheduling in
//! `scheduler`, finalization in `lifecycle`.

use std::cell::RefCell;
use std::path::Path;

use tracing::debug;

use beads_core::digest::{Digest, Tombstone};
use beads_core::enums::Durability;
use beads_core::event::Event;
use beads_core::filter::{InstanceFilter, StepFilter};
use beads_core::instance::Instance;
use beads_core::step::{Step, split_step_id};
use beads_formula::Catalog;
use beads_storage::{SqliteStore, Storage, StorageError, Transaction};

use crate::error::{MolError, Result};

/// Actor recorded when the caller does not name one.
pub const DEFAULT_ACTOR: &str = "bd";

pub struct MolEngine {
    pub(crate) catalog: Catalog,
    pub(crate) durable: Box<dyn Storage>,
    pub(crate) ephemeral: Box<dyn Storage>,
    pub(crate) actor: String,
}

impl MolEngine {
    pub fn new(catalog: Catalog, durable: Box<dyn Storage>, ephemeral: Box<dyn Storage>) -> Self {
        Self {
            catalog,
            durable,
            ephemeral,
            actor: DEFAULT_ACTOR.to_string(),
        }
    }

    /// Opens both SQLite stores. The ephemeral one keeps no audit trail.
    ///
    /// Each database is stamped with the durability it was first opened as
    /// and refuses to be opened as the other kind.
    pub fn open(catalog: Catalog, durable: &Path, ephemeral: &Path) -> Result<Self> {
        let durable_store = SqliteStore::open(durable)?;
        claim_store(&durable_store, Durability::Durable, durable)?;
        let ephemeral_store = SqliteStore::open(ephemeral)?.without_audit();
        claim_store(&ephemeral_store, Durability::Ephemeral, ephemeral)?;
        Ok(Self::new(
            catalog,
            Box::new(durable_store),
            Box::new(ephemeral_store),
        ))
    }

    /// Both stores in memory.
    pub fn in_memory(catalog: Catalog) -> Result<Self> {
        let durable = SqliteStore::open_in_memory()?;
        let ephemeral = SqliteStore::open_in_memory()?.without_audit();
        Ok(Self::new(catalog, Box::new(durable), Box::new(ephemeral)))
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Swaps in a new catalog view. Existing instances are unaffected.
    pub fn set_catalog(&mut self, catalog: Catalog) {
        self.catalog = catalog;
    }

    pub(crate) fn store(&self, durability: Durability) -> &dyn Storage {
        match durability {
            Durability::Durable => self.durable.as_ref(),
            Durability::Ephemeral => self.ephemeral.as_ref(),
        }
    }

    pub(crate) fn stores(&self) -> [(Durability, &dyn Storage); 2] {
        [
            (Durability::Durable, self.durable.as_ref()),
            (Durability::Ephemeral, self.ephemeral.as_ref()),
        ]
    }

    // -- Lookups ---------------------------------------------------------------

    /// Finds an instance in whichever store holds it. An active record wins
    /// over a finalized one left in the other store; otherwise durable first.
    pub(crate) fn find_instance(&self, id: &str) -> Result<Option<Instance>> {
        let mut finalized = None;
        for (_, store) in self.stores() {
            match store.get_instance(id) {
                Ok(inst) if inst.is_terminal() => {
                    finalized.get_or_insert(inst);
                }
                Ok(inst) => return Ok(Some(inst)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(finalized)
    }

    pub(crate) fn find_tombstone(&self, id: &str) -> Result<Option<Tombstone>> {
        for (_, store) in self.stores() {
            if let Some(t) = store.get_tombstone(id)? {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }

    /// Like [`find_instance`](Self::find_instance), but distinguishes a burned
    /// id (`AlreadyFinalized`) from one that never existed (`NotFound`).
    pub(crate) fn require_live_instance(&self, id: &str) -> Result<Instance> {
        match self.find_instance(id)? {
            Some(inst) if inst.is_terminal() => Err(MolError::AlreadyFinalized(id.to_string())),
            Some(inst) => Ok(inst),
            None if self.find_tombstone(id)?.is_some() => {
                Err(MolError::AlreadyFinalized(id.to_string()))
            }
            None => Err(MolError::not_found("instance", id)),
        }
    }

    /// Finds a step and the instance that owns it.
    pub(crate) fn find_step(&self, id: &str) -> Result<Option<(Step, Instance)>> {
        let Some((instance_id, _)) = split_step_id(id) else {
            return Ok(None);
        };
        let Some(instance) = self.find_instance(instance_id)? else {
            return Ok(None);
        };
        match self.store(instance.durability).get_step(id) {
            Ok(step) => Ok(Some((step, instance))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // -- Queries ---------------------------------------------------------------

    pub fn get_instance(&self, id: &str) -> Result<Instance> {
        self.find_instance(id)?
            .ok_or_else(|| MolError::not_found("instance", id))
    }

    pub fn get_step(&self, id: &str) -> Result<Step> {
        self.find_step(id)?
            .map(|(step, _)| step)
            .ok_or_else(|| MolError::not_found("step", id))
    }

    /// Steps of an instance in ordinal order.
    pub fn list_steps(&self, instance_id: &str) -> Result<Vec<Step>> {
        let inst = self.get_instance(instance_id)?;
        Ok(self
            .store(inst.durability)
            .list_steps(instance_id, &StepFilter::default())?)
    }

    /// Instances from both stores, oldest first.
    pub fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        let mut all = Vec::new();
        for (_, store) in self.stores() {
            all.extend(store.list_instances(filter)?);
        }
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            all.truncate(limit as usize);
        }
        Ok(all)
    }

    /// Instances bonded under `parent`, from both stores.
    pub fn children(&self, parent: &str) -> Result<Vec<Instance>> {
        let children = self.list_instances(&InstanceFilter::children_of(parent))?;
        debug!(parent, count = children.len(), "listed fan-out children");
        Ok(children)
    }

    /// Newest digest for `instance_id`. Digests always live in the durable store.
    pub fn latest_digest(&self, instance_id: &str) -> Result<Digest> {
        self.durable
            .list_digests(Some(instance_id))?
            .into_iter()
            .next()
            .ok_or_else(|| MolError::not_found("digest", instance_id))
    }

    /// Digests newest first, optionally for one instance id.
    pub fn list_digests(&self, instance_id: Option<&str>) -> Result<Vec<Digest>> {
        Ok(self.durable.list_digests(instance_id)?)
    }

    /// Audit trail for an instance or step id. Wisps have none.
    pub fn events(&self, entity_id: &str, limit: u32) -> Result<Vec<Event>> {
        Ok(self.durable.get_events(entity_id, limit)?)
    }
}

/// Runs `body` in one transaction on `store` and hands back its value.
///
/// Storage errors from the body roll back and surface as
/// [`MolError::Storage`]. Any other engine error also rolls back and is
/// returned as the body produced it.
pub(crate) fn transact<T>(
    store: &dyn Storage,
    body: impl Fn(&dyn Transaction) -> Result<T>,
) -> Result<T> {
    let outcome: RefCell<Option<Result<T>>> = RefCell::new(None);
    let committed = store.run_in_transaction(&|tx| match body(tx) {
        Ok(value) => {
            *outcome.borrow_mut() = Some(Ok(value));
            Ok(())
        }
        Err(MolError::Storage(e)) => Err(e),
        Err(e) => {
            *outcome.borrow_mut() = Some(Err(e));
            Err(StorageError::Aborted)
        }
    });
    match committed {
        Ok(()) | Err(StorageError::Aborted) => outcome
            .into_inner()
            .unwrap_or(Err(MolError::Storage(StorageError::Aborted))),
        Err(e) => Err(e.into()),
    }
}

/// Config key holding the durability a database file serves.
const STORE_KIND_KEY: &str = "store.durability";

fn claim_store(store: &dyn Storage, kind: Durability, path: &Path) -> Result<()> {
    match store.get_config(STORE_KIND_KEY) {
        Ok(existing) if existing == kind.as_str() => Ok(()),
        Ok(existing) => Err(StorageError::validation(format!(
            "{} holds {existing} records and cannot be opened as {kind}",
            path.display()
        ))
        .into()),
        Err(e) if e.is_not_found() => {
            debug!(path = %path.display(), kind = kind.as_str(), "stamping store");
            Ok(store.set_config(STORE_KIND_KEY, kind.as_str())?)
        }
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for MolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MolEngine")
            .field("actor", &self.actor)
            .field("templates", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_formula::builtin;

    fn catalog() -> Catalog {
        Catalog::from_snapshots(vec![builtin::snapshot("builtin")])
    }

    #[test]
    fn open_stamps_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let durable = dir.path().join("beads.db");
        let ephemeral = dir.path().join("wisps.db");
        MolEngine::open(catalog(), &durable, &ephemeral).unwrap();
        let engine = MolEngine::open(catalog(), &durable, &ephemeral).unwrap();
        assert_eq!(engine.actor(), DEFAULT_ACTOR);
    }

    #[test]
    fn transact_rolls_back_on_engine_errors() {
        use beads_core::instance::InstanceBuilder;

        let store = SqliteStore::open_in_memory().unwrap();
        let inst = InstanceBuilder::new("mol-x").id("job").build();

        let err = transact(&store, |tx| -> Result<()> {
            tx.put_instance(&inst, "tester")?;
            Err(MolError::AlreadyFinalized("job".into()))
        })
        .unwrap_err();
        assert!(matches!(err, MolError::AlreadyFinalized(ref id) if id == "job"), "{err}");
        assert!(store.get_instance("job").unwrap_err().is_not_found());

        let value = transact(&store, |tx| {
            tx.put_instance(&inst, "tester")?;
            Ok(7)
        })
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(store.get_instance("job").unwrap().id, "job");

        let err = transact(&store, |tx| tx.put_instance(&inst, "tester").map_err(Into::into))
            .unwrap_err();
        assert!(
            matches!(err, MolError::Storage(StorageError::AlreadyExists { .. })),
            "{err}"
        );
    }

    #[test]
    fn swapped_paths_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let durable = dir.path().join("beads.db");
        let ephemeral = dir.path().join("wisps.db");
        MolEngine::open(catalog(), &durable, &ephemeral).unwrap();

        let err = MolEngine::open(catalog(), &ephemeral, &durable).unwrap_err();
        assert!(
            matches!(err, MolError::Storage(StorageError::Validation { .. })),
            "{err}"
        );
    }
}
