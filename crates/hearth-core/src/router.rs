//! Message Router
//!
//! Stateless, first-match-wins classifier deciding which provider shape
//! should run the loop for one message. Re-evaluated per message; the only
//! history it sees is which provider handled the previous message.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::gateway::CallSource;
use crate::provider::{ProviderAvailability, ProviderKind};

/// Routing outcome, recomputed per message and never cached
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub provider: ProviderKind,
    pub reason: String,
}

const ACTION_KEYWORDS: &[&str] = &[
    "start", "stop", "restart", "reboot", "shutdown", "execute", "run", "kill", "search", "play",
    "pause", "announce", "remind", "schedule", "snapshot", "unlock", "turn on", "turn off", "set",
    "open", "close", "dim",
];

const QUERY_KEYWORDS: &[&str] = &[
    "status", "check", "show", "list", "how many", "how much", "what is", "what's", "is the",
    "are the", "when did", "who is", "usage",
];

static ENTITY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Numeric VM/container ids and vm/ct references
        r"(?i)\b(?:vm|vmid|ct|container|lxc)\s*#?\d+\b",
        r"\b\d{3,4}\b",
        // Node / named infrastructure
        r"(?i)\b(?:node|pve|host|server|nas|cluster|proxmox)\b",
        // Camera / NVR / presence / location vocabulary
        r"(?i)\b(?:camera|nvr|doorbell|driveway|garage|motion|presence|home|away)\b",
        // Smart-home targets
        r"(?i)\b(?:light|lights|thermostat|scene|speaker|heating)\b",
        // URLs
        r"https?://\S+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static routing pattern"))
    .collect()
});

fn contains_keyword(message: &str, keywords: &'static [&'static str]) -> Option<&'static str> {
    let lower = message.to_lowercase();
    keywords.iter().find_map(|kw| {
        let found = if kw.contains(' ') {
            lower.contains(kw)
        } else {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == *kw)
        };
        found.then_some(*kw)
    })
}

fn matches_entity(message: &str) -> bool {
    ENTITY_PATTERNS.iter().any(|re| re.is_match(message))
}

fn looks_like_follow_up(message: &str) -> bool {
    let trimmed = message.trim();
    let lower = trimmed.to_lowercase();

    let acknowledgement = matches!(
        lower.as_str(),
        "yes" | "no" | "ok" | "okay" | "sure" | "do it" | "go ahead" | "please" | "thanks"
    );
    let leading_conjunction = ["and ", "but ", "also ", "then ", "what about "]
        .iter()
        .any(|p| lower.starts_with(p));
    let pronoun_led = ["it ", "that ", "those ", "they ", "them "]
        .iter()
        .any(|p| lower.starts_with(p));
    let short_question = trimmed.ends_with('?') && trimmed.split_whitespace().count() <= 6;

    acknowledgement || leading_conjunction || pronoun_led || short_question
}

/// Decide which provider shape should handle this message.
///
/// First-match-wins ordered rules; steps only decide capable-vs-plain, the
/// concrete capable kind comes from the availability preference order.
pub fn route(
    message: &str,
    override_active: bool,
    last_provider: Option<ProviderKind>,
    source: CallSource,
    availability: &ProviderAvailability,
) -> RoutingDecision {
    let capable = |reason: String| -> RoutingDecision {
        match availability.best_capable() {
            Some(provider) => RoutingDecision { provider, reason },
            None => RoutingDecision {
                provider: ProviderKind::Plain,
                reason: "fallback: no capable provider reachable".into(),
            },
        }
    };

    if override_active {
        return capable("override".into());
    }

    if source == CallSource::Monitor {
        return capable("monitor-sourced message".into());
    }

    if let Some(keyword) = contains_keyword(message, ACTION_KEYWORDS) {
        return capable(format!("action keyword '{}'", keyword));
    }

    if matches_entity(message) {
        return capable("entity reference".into());
    }

    if let Some(keyword) = contains_keyword(message, QUERY_KEYWORDS) {
        // Query keywords route capable only when paired with something
        // concrete; a bare "what is love" stays conversational.
        if matches_entity(message) || contains_keyword(message, ACTION_KEYWORDS).is_some() {
            return capable(format!("query keyword '{}'", keyword));
        }
    }

    if looks_like_follow_up(message)
        && last_provider.map(ProviderKind::is_capable).unwrap_or(false)
    {
        return capable("follow-up continuity".into());
    }

    if !availability.has_capable() {
        return RoutingDecision {
            provider: ProviderKind::Plain,
            reason: "fallback: no capable provider reachable".into(),
        };
    }

    RoutingDecision {
        provider: ProviderKind::Plain,
        reason: "conversational".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn availability() -> ProviderAvailability {
        ProviderAvailability::default()
    }

    #[test]
    fn test_keyword_lookup_returns_matched_word() {
        assert_eq!(contains_keyword("please restart it", ACTION_KEYWORDS), Some("restart"));
        assert_eq!(contains_keyword("disk usage there", QUERY_KEYWORDS), Some("usage"));
        assert_eq!(contains_keyword("restarting", ACTION_KEYWORDS), None);
    }

    #[test]
    fn test_action_verb_routes_capable() {
        let decision = route(
            "restart vm 103",
            false,
            None,
            CallSource::Human,
            &availability(),
        );
        assert_eq!(decision.provider, ProviderKind::Structured);
        assert!(decision.reason.contains("restart"));
    }

    #[test]
    fn test_small_talk_routes_plain() {
        let decision = route(
            "hey, good morning",
            false,
            None,
            CallSource::Human,
            &availability(),
        );
        assert_eq!(decision.provider, ProviderKind::Plain);
        assert_eq!(decision.reason, "conversational");
    }

    #[test]
    fn test_entity_reference_routes_capable() {
        let decision = route(
            "anything on the driveway camera?",
            false,
            None,
            CallSource::Human,
            &availability(),
        );
        assert!(decision.provider.is_capable());
    }

    #[test]
    fn test_follow_up_continuity() {
        let followed = route(
            "and the other one?",
            false,
            Some(ProviderKind::Structured),
            CallSource::Human,
            &availability(),
        );
        assert!(followed.provider.is_capable());
        assert_eq!(followed.reason, "follow-up continuity");

        let cold = route(
            "and the other one?",
            false,
            Some(ProviderKind::Plain),
            CallSource::Human,
            &availability(),
        );
        assert_eq!(cold.provider, ProviderKind::Plain);
    }

    #[test]
    fn test_override_wins() {
        let decision = route(
            "hello there",
            true,
            None,
            CallSource::Human,
            &availability(),
        );
        assert!(decision.provider.is_capable());
        assert_eq!(decision.reason, "override");
    }

    #[test]
    fn test_no_capable_falls_back() {
        let only_plain = ProviderAvailability {
            capable: vec![],
            plain: true,
        };
        let decision = route(
            "restart vm 103",
            false,
            None,
            CallSource::Human,
            &only_plain,
        );
        assert_eq!(decision.provider, ProviderKind::Plain);
        assert!(decision.reason.contains("fallback"));
    }

    #[test]
    fn test_preference_order_is_configuration_driven() {
        let prefer_tagged = ProviderAvailability {
            capable: vec![ProviderKind::Tagged, ProviderKind::Structured],
            plain: true,
        };
        let decision = route(
            "stop vm 200",
            false,
            None,
            CallSource::Human,
            &prefer_tagged,
        );
        assert_eq!(decision.provider, ProviderKind::Tagged);
    }

    #[test]
    fn test_monitor_source_routes_capable() {
        let decision = route(
            "disk usage warning",
            false,
            None,
            CallSource::Monitor,
            &availability(),
        );
        assert!(decision.provider.is_capable());
    }
}
