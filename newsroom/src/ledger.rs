use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::types::Storage;

/// Set of source-item identifiers already consumed by earlier runs.
///
/// The ledger is a plain value: it is loaded once at the start of a run,
/// threaded through the workflow, and only its `pending` part is written
/// back at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    known: BTreeSet<String>,
    pending: BTreeSet<String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: ids.into_iter().map(Into::into).filter(|id: &String| is_valid_id(id)).collect(),
            pending: BTreeSet::new(),
        }
    }

    /// Load from storage. A failed load degrades to an empty ledger.
    pub async fn load(storage: &dyn Storage) -> Self {
        match storage.load_ledger().await {
            Ok(ids) => {
                info!("Loaded {} used article links", ids.len());
                Self::from_ids(ids)
            }
            Err(e) => {
                warn!("Could not load used article links, starting empty: {:#}", e);
                Self::new()
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.known.contains(id) || self.pending.contains(id)
    }

    /// Every identifier known to the ledger, committed or not.
    pub fn all_ids(&self) -> BTreeSet<String> {
        self.known.union(&self.pending).cloned().collect()
    }

    /// Record identifiers as consumed. Returns how many were new.
    pub fn record<'a, I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut added = 0;
        for id in ids {
            if !is_valid_id(id) || self.contains(id) {
                continue;
            }
            self.pending.insert(id.clone());
            added += 1;
        }
        debug!("Recorded {} new ledger ids ({} pending)", added, self.pending.len());
        added
    }

    /// Identifiers recorded since load that have not been persisted yet.
    pub fn pending(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    /// Append pending ids to storage. On success they become known; on
    /// failure they stay pending and the error is only logged.
    pub async fn persist(&mut self, storage: &dyn Storage) -> bool {
        if self.pending.is_empty() {
            debug!("No new article links to persist");
            return true;
        }

        let ids = self.pending();
        match storage.append_ledger(&ids).await {
            Ok(()) => {
                info!("Persisted {} new used article links", ids.len());
                let pending = std::mem::take(&mut self.pending);
                self.known.extend(pending);
                true
            }
            Err(e) => {
                warn!("Failed to persist {} used article links: {:#}", ids.len(), e);
                false
            }
        }
    }
}

fn is_valid_id(id: &str) -> bool {
    let id = id.trim();
    !id.is_empty() && id != "#"
}
