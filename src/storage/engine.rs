use super::mutation::{Access, Mutation, apply_mutation};
use super::policy::PolicySet;
use super::schema::Tables;
use crate::error::StorageError;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Committed {
    tables: Tables,
    seq: u64,
}

/// Embedded storage engine: committed tables plus the installed row-level
/// policies. Transactions work on snapshots and publish through [`commit`].
///
/// [`commit`]: Engine::commit
#[derive(Debug)]
pub struct Engine {
    state: RwLock<Committed>,
    policies: PolicySet,
}

impl Engine {
    pub fn new(policies: PolicySet) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(Committed::default()),
            policies,
        })
    }

    pub fn with_standard_policies() -> Arc<Self> {
        Self::new(PolicySet::standard())
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn committed_seq(&self) -> u64 {
        self.state.read().seq
    }

    pub(crate) fn snapshot(&self) -> Tables {
        self.state.read().tables.clone()
    }

    /// Re-applies `log` on the latest committed state under the write lock.
    /// Any failing statement aborts the whole log and nothing is published.
    pub(crate) fn commit(&self, log: &[Mutation], access: Access<'_>) -> Result<u64, StorageError> {
        let mut state = self.state.write();
        if log.is_empty() {
            return Ok(state.seq);
        }
        let mut next = state.tables.clone();
        for mutation in log {
            apply_mutation(&mut next, mutation, access)?;
        }
        state.tables = next;
        state.seq += 1;
        debug!(seq = state.seq, statements = log.len(), "transaction committed");
        Ok(state.seq)
    }
}
