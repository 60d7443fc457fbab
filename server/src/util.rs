//! Shared utility functions

/// Matches the `VARCHAR(100)` slug columns.
pub const MAX_SLUG_LENGTH: usize = 100;

/// Normalize free text into a URL-safe slug.
///
/// ASCII letters and digits are lowercased and kept, every other run of
/// characters collapses into a single `-`, and leading/trailing separators
/// are stripped. Non-ASCII letters are dropped. The result is cut to
/// [`MAX_SLUG_LENGTH`].
///
/// # Examples
///
/// ```
/// use warband_server::util::slugify;
///
/// assert_eq!(slugify("Guild Mgmt"), "guild-mgmt");
/// assert_eq!(slugify("  Add   Role!! "), "add-role");
/// ```
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_separator = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_ascii() {
            pending_separator = true;
        }
    }

    if slug.len() > MAX_SLUG_LENGTH {
        // Only ASCII is pushed, so byte and char offsets agree.
        slug.truncate(MAX_SLUG_LENGTH);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    slug
}

/// Use `explicit` when it holds a non-blank value, otherwise derive the slug
/// from `name`. Both paths are normalized.
pub fn slug_or_from_name(explicit: Option<&str>, name: &str) -> String {
    match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slugify(slug),
        None => slugify(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Officer"), "officer");
        assert_eq!(slugify("Guild Mgmt"), "guild-mgmt");
        assert_eq!(slugify("change_role permissions"), "change-role-permissions");
        assert_eq!(slugify("--Leader--"), "leader");
        assert_eq!(slugify("Raid  Lead 25"), "raid-lead-25");
        assert_eq!(slugify("Über Rank"), "ber-rank");
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_slugify_truncates() {
        let long = "a".repeat(150);
        assert_eq!(slugify(&long).len(), MAX_SLUG_LENGTH);

        let split = format!("{} b", "a".repeat(MAX_SLUG_LENGTH - 1));
        assert_eq!(slugify(&split), "a".repeat(MAX_SLUG_LENGTH - 1));
    }

    #[test]
    fn test_slug_or_from_name() {
        assert_eq!(slug_or_from_name(None, "View Roster"), "view-roster");
        assert_eq!(slug_or_from_name(Some("   "), "View Roster"), "view-roster");
        assert_eq!(slug_or_from_name(Some("Roster"), "View Roster"), "roster");
    }
}
