//! Glob-style domain-suffix route matching installed by `REGISTER_PBX`
//! (spec §4.11: "Pattern matching — e.g., `*@subdomain.tld` — is glob-style
//! on the domain suffix"). Only a single wildcard local-part is supported;
//! that's the entire pattern language the spec names, so no glob crate is
//! pulled in for it (SPEC_FULL.md §B).

/// Returns true if `pattern` matches `address`. `pattern` is either an exact
/// `local@domain` or `*@domain` (any local part at that domain).
pub fn matches(pattern: &str, address: &str) -> bool {
    match pattern.split_once('@') {
        Some(("*", domain)) => address
            .rsplit_once('@')
            .map(|(_, addr_domain)| addr_domain == domain)
            .unwrap_or(false),
        _ => pattern == address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_any_local_part_at_domain() {
        assert!(matches("*@sub.tld", "anyone@sub.tld"));
        assert!(!matches("*@sub.tld", "anyone@other.tld"));
    }

    #[test]
    fn exact_pattern_requires_full_match() {
        assert!(matches("bot@x.com", "bot@x.com"));
        assert!(!matches("bot@x.com", "other@x.com"));
    }

    #[test]
    fn non_wildcard_star_segment_is_not_special() {
        assert!(!matches("*bot@x.com", "anything@x.com"));
    }
}
