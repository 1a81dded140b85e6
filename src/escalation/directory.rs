//! Responder directory — queryable mapping of responder to expertise tags.
//!
//! Owned by an external directory collaborator; read-only during a cycle,
//! so queries need no locking.

use tracing::warn;

use crate::pipeline::types::Responder;

/// In-memory responder directory. Insertion order is preserved so selection
/// is deterministic for a given directory.
#[derive(Debug, Clone, Default)]
pub struct ResponderDirectory {
    responders: Vec<Responder>,
}

impl ResponderDirectory {
    pub fn new(responders: Vec<Responder>) -> Self {
        Self { responders }
    }

    /// Parse `TRIAGE_RESPONDERS` of the form
    /// `ana@x.com=network|linux,bo@x.com=billing`.
    /// Malformed entries are skipped with a warning.
    pub fn from_env() -> Self {
        let raw = std::env::var("TRIAGE_RESPONDERS").unwrap_or_default();
        let mut responders = Vec::new();
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            match entry.split_once('=') {
                Some((address, tags)) if !address.trim().is_empty() => {
                    let expertise: Vec<&str> = tags
                        .split('|')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .collect();
                    responders.push(Responder::new(address.trim(), &expertise));
                }
                _ => warn!(entry, "Skipping malformed responder entry"),
            }
        }
        Self { responders }
    }

    /// Responders whose expertise intersects the given tags, in directory
    /// order.
    pub fn with_expertise(&self, tags: &[String]) -> Vec<&Responder> {
        self.responders
            .iter()
            .filter(|r| r.has_any_expertise(tags))
            .collect()
    }

    /// All responders, in directory order.
    pub fn all(&self) -> &[Responder] {
        &self.responders
    }

    pub fn len(&self) -> usize {
        self.responders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }
}
