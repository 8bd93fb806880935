//! Application State

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use hearth_core::{
    PendingConfirmation, ProviderAdapter, ProviderAvailability, ProviderKind,
    SessionContextManager,
};

/// Base system prompt; capable shapes add the tool catalogue themselves
pub const SYSTEM_PROMPT: &str = "You are Hearth, a personal infrastructure assistant. \
You manage a small home lab: a virtualization cluster, network storage, cameras, and \
smart-home devices. Be concise and concrete. Use tools when the user asks about or \
wants to change real infrastructure; never invent readings you did not fetch.";

/// A suspended Confirm-tier call waiting for the human, keyed by call id
pub struct PendingEntry {
    pub kind: ProviderKind,
    pub session_id: String,
    pub pending: PendingConfirmation,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// All constructed provider adapters, capable shapes in preference order
    pub providers: Arc<Vec<Arc<dyn ProviderAdapter>>>,

    /// Per-session history, summaries, and entities
    pub context: Arc<SessionContextManager>,

    /// Suspended confirmations awaiting /api/confirm
    pub pending: Arc<RwLock<HashMap<String, PendingEntry>>>,
}

impl AppState {
    pub fn provider(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.iter().find(|p| p.kind() == kind).cloned()
    }

    /// Snapshot of which shapes are reachable right now
    pub fn availability(&self) -> ProviderAvailability {
        ProviderAvailability {
            capable: self
                .providers
                .iter()
                .filter(|p| p.kind().is_capable() && p.reachable())
                .map(|p| p.kind())
                .collect(),
            plain: self
                .providers
                .iter()
                .any(|p| p.kind() == ProviderKind::Plain && p.reachable()),
        }
    }
}
