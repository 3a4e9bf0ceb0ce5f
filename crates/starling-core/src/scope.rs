//! Scoped channel naming
//!
//! Channel indices are keyed by `"{app_id}|{channel}"` so the same short
//! channel name used by different applications lands in distinct channels.
//! Clients only ever send the short name; the server composes the scoped
//! form before touching any index.

/// Separator between the application id and the client-visible channel name
pub const SCOPE_SEPARATOR: char = '|';

/// Compose the index key for a channel within an application
pub fn scoped_channel_name(app_id: &str, channel: &str) -> String {
    format!("{app_id}{SCOPE_SEPARATOR}{channel}")
}

/// Split a scoped channel name into `(app_id, channel)`.
///
/// A name without a separator is treated as belonging entirely to the
/// application part, matching how the diagnostics counter attributes
/// channels to applications.
pub fn split_scoped_name(scoped: &str) -> (&str, &str) {
    match scoped.split_once(SCOPE_SEPARATOR) {
        Some((app_id, channel)) => (app_id, channel),
        None => (scoped, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_and_split() {
        let scoped = scoped_channel_name("APP", "room1");
        assert_eq!(scoped, "APP|room1");
        assert_eq!(split_scoped_name(&scoped), ("APP", "room1"));
    }

    #[test]
    fn test_split_keeps_extra_separators_in_channel() {
        assert_eq!(split_scoped_name("APP|a|b"), ("APP", "a|b"));
    }

    #[test]
    fn test_split_without_separator() {
        assert_eq!(split_scoped_name("plain"), ("plain", ""));
    }
}
