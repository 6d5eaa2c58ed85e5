use bson::oid::ObjectId;
use dashmap::DashMap;

pub struct SessionEntry {
    pub organization_id: ObjectId,
}

/// Tracks live sessions by conversation id and guards finalization so a
/// session is finalized at most once.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    finalizing: DashMap<String, ()>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            finalizing: DashMap::new(),
        }
    }

    pub fn register(&self, conversation_id: &str, organization_id: ObjectId) {
        self.sessions
            .insert(conversation_id.to_string(), SessionEntry { organization_id });
    }

    pub fn unregister(&self, conversation_id: &str) {
        self.sessions.remove(conversation_id);
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Claims the finalization slot for a conversation. Returns false when
    /// another caller already holds it.
    pub fn begin_finalize(&self, conversation_id: &str) -> bool {
        self.finalizing
            .insert(conversation_id.to_string(), ())
            .is_none()
    }

    pub fn end_finalize(&self, conversation_id: &str) {
        self.finalizing.remove(conversation_id);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
