//! Host-to-subdomain resolution and subdomain name allocation (C1).

use rand::Rng;

/// Result of resolving a `Host` header against the configured apex domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResolution {
    /// `host == domain`: serve the management/status surface.
    Root,
    /// `host` is `<subdomain>.domain`.
    Subdomain(String),
    /// `host` is neither the apex nor a child of it.
    Invalid,
}

/// Strip an optional `:port` suffix and lowercase.
fn strip_port_lowercase(host: &str) -> String {
    let without_port = host.split(':').next().unwrap_or(host);
    without_port.to_lowercase()
}

/// Resolve a `Host` header against the apex `domain`.
pub fn extract(host: &str, domain: &str) -> HostResolution {
    let host = strip_port_lowercase(host);
    let domain = domain.to_lowercase();

    if host == domain {
        return HostResolution::Root;
    }
    let suffix = format!(".{domain}");
    match host.strip_suffix(&suffix) {
        Some(prefix) if !prefix.is_empty() => HostResolution::Subdomain(prefix.to_string()),
        _ => HostResolution::Invalid,
    }
}

/// Lowercase, collapse whitespace/invalid characters into single hyphens,
/// and trim leading/trailing hyphens. Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut collapsed = String::with_capacity(lowered.len());
    let mut last_was_dash = false;
    for ch in lowered.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            Some(ch)
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            Some('-')
        } else {
            None
        };
        match mapped {
            Some('-') => {
                if !last_was_dash {
                    collapsed.push('-');
                }
                last_was_dash = true;
            }
            Some(c) => {
                collapsed.push(c);
                last_was_dash = false;
            }
            None => {}
        }
    }
    collapsed.trim_matches('-').to_string()
}

/// `^[a-z0-9]([a-z0-9-]*[a-z0-9])?$`, no `--`.
pub fn is_valid(name: &str) -> bool {
    if name.is_empty() || name.contains("--") {
        return false;
    }
    let bytes = name.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes
        .iter()
        .all(|&b| is_alnum(b) || b == b'-')
}

/// Allocate a unique subdomain name for `name`/`owner`, consulting `taken`
/// to determine if a candidate is already in use.
pub fn allocate<F>(name: &str, owner: &str, mut taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    let base = normalize(&format!("{name}-{owner}"));
    let base = if is_valid(&base) {
        base
    } else {
        normalize(&format!("project-{owner}"))
    };

    if !taken(&base) {
        return base;
    }

    for n in 1..=1000 {
        let candidate = format!("{base}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
    }

    let suffix: String = {
        let mut rng = rand::rng();
        (0..8)
            .map(|_| {
                let digit = rng.random_range(0..16u8);
                std::char::from_digit(digit as u32, 16).unwrap()
            })
            .collect()
    };
    format!("{base}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn extract_root() {
        assert_eq!(extract("ex.com", "ex.com"), HostResolution::Root);
        assert_eq!(extract("EX.com:443", "ex.com"), HostResolution::Root);
    }

    #[test]
    fn extract_subdomain() {
        assert_eq!(
            extract("demo-alice.ex.com", "ex.com"),
            HostResolution::Subdomain("demo-alice".to_string())
        );
    }

    #[test]
    fn extract_invalid() {
        assert_eq!(extract("other.com", "ex.com"), HostResolution::Invalid);
        assert_eq!(extract(".ex.com", "ex.com"), HostResolution::Invalid);
    }

    #[test]
    fn normalize_collapses_and_trims() {
        assert_eq!(normalize("  My Project!! "), "my-project");
        assert_eq!(normalize("a___b"), "a-b");
        assert_eq!(normalize("--lead-trail--"), "lead-trail");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["Hello World", "a--b--c", "", "---", "already-normal"] {
            let once = normalize(s);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn validity() {
        assert!(is_valid("demo-alice"));
        assert!(is_valid("a"));
        assert!(!is_valid(""));
        assert!(!is_valid("-leading"));
        assert!(!is_valid("trailing-"));
        assert!(!is_valid("a--b"));
        assert!(!is_valid("Has-Upper"));
    }

    #[test]
    fn allocate_falls_back_on_invalid_base() {
        let name = allocate("", "alice", |_| false);
        assert_eq!(name, "project-alice");
    }

    #[test]
    fn allocate_appends_counter_on_collision() {
        let mut seen = HashSet::new();
        seen.insert("demo-alice".to_string());
        let name = allocate("demo", "alice", |c| seen.contains(c));
        assert_eq!(name, "demo-alice-1");
    }

    #[test]
    fn allocate_falls_back_to_random_suffix_after_1000_tries() {
        let name = allocate("demo", "alice", |_| true);
        assert!(name.starts_with("demo-alice-"));
        let suffix = name.strip_prefix("demo-alice-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
