//! Shared id registry for the EMX session.
//!
//! Bidirectional mapping between client-assigned ids (`uid`) and
//! venue-assigned ids (`eid`), plus the set of eids with an amend in
//! flight. Both the execution codec and the streaming parser mutate it, but
//! always from the single engine task, so no locking is needed.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct SharedStorage {
    pub uid_to_eid: HashMap<String, String>,
    pub eid_to_uid: HashMap<String, String>,
    /// Eids for which a modify-order request is in flight. The next
    /// `accepted` for such an eid is an amend ack, not a new-order ack.
    pub eids_in_amend: HashSet<String>,
}

impl SharedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install both directions of a uid↔eid association. An amend re-keys:
    /// the eid is preserved and the old uid's forward mapping is replaced
    /// by the new uid's.
    pub fn map_ids(&mut self, uid: &str, eid: &str) {
        self.uid_to_eid.insert(uid.to_string(), eid.to_string());
        self.eid_to_uid.insert(eid.to_string(), uid.to_string());
    }

    pub fn eid_for(&self, uid: &str) -> Option<&String> {
        self.uid_to_eid.get(uid)
    }

    pub fn uid_for(&self, eid: &str) -> Option<&String> {
        self.eid_to_uid.get(eid)
    }

    /// Clear all maps before a reconnect.
    pub fn reset(&mut self) {
        self.uid_to_eid.clear();
        self.eid_to_uid.clear();
        self.eids_in_amend.clear();
    }
}
