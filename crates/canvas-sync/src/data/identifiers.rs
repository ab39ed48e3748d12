//! Identifier helpers for canvas entities
//!
//! Entities created on the canvas get a process-local placeholder id until the
//! backend assigns a permanent one. Placeholders share a prefix so that they can
//! never be mistaken for backend ids and are never sent over the wire.

use uuid::Uuid;

/// Prefix of every process-local placeholder id.
pub const PLACEHOLDER_PREFIX: &str = "draft-";

/// Mints a new placeholder id for a draft node or edge.
pub fn placeholder_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4())
}

/// Returns true if `id` was minted by [`placeholder_id`].
pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// Mints a new application id, stored as the `id` property of nodes and
/// relationships written by an adapter.
pub fn application_id() -> String {
    Uuid::new_v4().to_string()
}

/// Labels and relationship types cannot be bound as query parameters, so they
/// are interpolated into query text. Only `[A-Za-z0-9_]+` is accepted.
pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_charset() {
        assert!(is_valid_label("Person"));
        assert!(is_valid_label("KNOWS_WELL_2"));
        assert!(!is_valid_label(""));
        assert!(!is_valid_label("Person`) DETACH DELETE n //"));
        assert!(!is_valid_label("has space"));
        assert!(!is_valid_label("Straße"));
    }

    #[test]
    fn test_placeholder_ids_are_unique_and_detectable() {
        let a = placeholder_id();
        let b = placeholder_id();
        assert_ne!(a, b);
        assert!(is_placeholder(&a));
        assert!(!is_placeholder(&application_id()));
        assert!(!is_placeholder("42"));
    }
}
