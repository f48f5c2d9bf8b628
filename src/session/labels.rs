//! Session identity and resource labeling.
//!
//! Deliberately inert: everything here is pure data construction so it can
//! be called from any other component without ordering constraints.

use std::collections::HashMap;

use uuid::Uuid;

use crate::reaper::ReapFilter;

/// Library provenance marker attached to every managed resource.
pub const LABEL_MARKER: &str = "org.drydock";

/// Session identifier label. A resource lacking this label is never
/// touched by the reaper: absence is an explicit opt-out.
pub const LABEL_SESSION: &str = "org.drydock.session-id";

/// Flag marking a resource as managed by the reaper.
pub const LABEL_REAP: &str = "org.drydock.reap";

/// Opaque per-process session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build the label set for a resource created in `session`.
///
/// Caller-supplied `extra` labels are merged first; the reserved keys are
/// written last and can never be overridden. `reap` controls the
/// managed-by-reaper flag (omitted when the caller owns cleanup).
pub fn build_labels(
    session: SessionId,
    reap: bool,
    extra: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut labels = extra.clone();
    labels.insert(LABEL_MARKER.to_string(), "true".to_string());
    labels.insert(LABEL_SESSION.to_string(), session.to_string());
    if reap {
        labels.insert(LABEL_REAP.to_string(), "true".to_string());
    } else {
        labels.remove(LABEL_REAP);
    }
    labels
}

/// The reap filter matching every resource of `session`.
pub fn session_filter(session: SessionId) -> ReapFilter {
    ReapFilter::new()
        .label(LABEL_MARKER, "true")
        .label(LABEL_SESSION, session.to_string())
}

/// Label pairs for engine queries scoped to `session`.
pub fn session_label_pairs(session: SessionId) -> Vec<(String, String)> {
    vec![
        (LABEL_MARKER.to_string(), "true".to_string()),
        (LABEL_SESSION.to_string(), session.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_labels_is_stable() {
        let session = SessionId::random();
        let first = build_labels(session, true, &HashMap::new());
        let second = build_labels(session, true, &HashMap::new());
        assert_eq!(first, second);
    }

    #[test]
    fn test_reserved_keys_always_win() {
        let session = SessionId::random();
        let mut extra = HashMap::new();
        extra.insert(LABEL_SESSION.to_string(), "spoofed".to_string());
        extra.insert(LABEL_MARKER.to_string(), "false".to_string());
        extra.insert("team".to_string(), "db".to_string());

        let labels = build_labels(session, true, &extra);
        assert_eq!(labels.get(LABEL_SESSION), Some(&session.to_string()));
        assert_eq!(labels.get(LABEL_MARKER).map(String::as_str), Some("true"));
        assert_eq!(labels.get("team").map(String::as_str), Some("db"));
    }

    #[test]
    fn test_reap_flag_controlled_by_caller_mode() {
        let session = SessionId::random();
        let managed = build_labels(session, true, &HashMap::new());
        assert_eq!(managed.get(LABEL_REAP).map(String::as_str), Some("true"));

        let mut extra = HashMap::new();
        extra.insert(LABEL_REAP.to_string(), "true".to_string());
        let unmanaged = build_labels(session, false, &extra);
        assert!(!unmanaged.contains_key(LABEL_REAP));
    }

    #[test]
    fn test_session_filter_matches_own_labels_only() {
        let session = SessionId::random();
        let other = SessionId::random();

        let filter = session_filter(session);
        assert!(filter.matches(&build_labels(session, true, &HashMap::new())));
        assert!(!filter.matches(&build_labels(other, true, &HashMap::new())));
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::random(), SessionId::random());
    }
}
