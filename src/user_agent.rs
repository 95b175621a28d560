//! Shared User-Agent string for all outbound HTTP traffic.
//!
//! Single source for the UA format so API and download traffic stay
//! consistent and easy to update (good citizenship; RFC 9308). Several of
//! the polite-pool APIs (Crossref, Unpaywall, OpenAlex) grant better service
//! when a contact address is included.

/// Default User-Agent, identifying the tool and a contact address.
#[must_use]
pub(crate) fn default_user_agent(contact_email: &str) -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("geoharvest/{version} (biomedical-literature-tool; mailto:{contact_email})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_version_and_contact() {
        let ua = default_user_agent("team@example.org");
        assert!(ua.contains(env!("CARGO_PKG_VERSION")));
        assert!(ua.contains("mailto:team@example.org"));
        assert!(ua.starts_with("geoharvest/"));
    }
}
