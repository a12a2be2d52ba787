//! Identifier and timestamp helpers
//!
//! Story ids are short hex tokens (`3fa91c07`). Session ids are full
//! UUIDv7 strings so they sort by creation time.

/// Length of a story id in hex characters
pub const STORY_ID_LEN: usize = 8;

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a short hex story id
///
/// Taken from the random tail of a UUIDv7; the leading bits are the
/// timestamp and would collide for stories created in the same minute.
pub fn generate_story_id() -> String {
    let simple = uuid::Uuid::now_v7().simple().to_string();
    simple[simple.len() - STORY_ID_LEN..].to_string()
}

/// Generate a new session id
pub fn generate_session_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Check whether a string looks like a story id
pub fn is_story_id(s: &str) -> bool {
    s.len() == STORY_ID_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_story_id_format() {
        let id = generate_story_id();
        assert_eq!(id.len(), STORY_ID_LEN);
        assert!(is_story_id(&id));
    }

    #[test]
    fn test_story_ids_are_distinct() {
        let ids: HashSet<String> = (0..500).map(|_| generate_story_id()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_session_ids_sort_by_creation() {
        let first = generate_session_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generate_session_id();
        assert!(first < second);
    }

    #[test]
    fn test_is_story_id_rejects_non_hex() {
        assert!(!is_story_id("zzzzzzzz"));
        assert!(!is_story_id("abc"));
    }
}
