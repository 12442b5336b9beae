//! Firewall rule evaluation (C3): method → path → pattern, first match wins,
//! fail-open on any internal error, honoring temporary approvals from C9.

use regex::Regex;
use tracing::warn;

use crate::firewall::cache::RuleCache;
use crate::models::{FirewallRule, Id, RuleType};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block { rule_id: Id, reason: String },
}

pub struct FirewallEvaluator<'a> {
    store: &'a dyn Store,
    cache: &'a RuleCache,
}

impl<'a> FirewallEvaluator<'a> {
    pub fn new(store: &'a dyn Store, cache: &'a RuleCache) -> Self {
        Self { store, cache }
    }

    async fn rules_for(&self, project_id: Id) -> Vec<FirewallRule> {
        if let Some(cached) = self.cache.get(project_id) {
            return cached;
        }
        let rules = self.store.firewall_rules(project_id).await;
        self.cache.set(project_id, rules.clone());
        rules
    }

    /// Evaluate a proxied request. Never panics; any internal fault is
    /// treated as `Allow` (the firewall must not turn a store outage into a
    /// public outage of the tunneled app).
    pub async fn evaluate(
        &self,
        project_id: Id,
        firewall_enabled: bool,
        method: &str,
        path: &str,
        client_ip: Option<&str>,
    ) -> Decision {
        if !firewall_enabled {
            return Decision::Allow;
        }

        if let Some(ip) = client_ip {
            let now = chrono::Utc::now();
            if self
                .store
                .find_approved(project_id, ip, method, path, now)
                .await
                .is_some()
            {
                return Decision::Allow;
            }
        }

        let rules = self.rules_for(project_id).await;
        let decision = classify(&rules, method, path);

        if let Decision::Block { rule_id, reason } = &decision {
            if let Some(ip) = client_ip {
                if let Err(e) = self
                    .store
                    .create_access_request(
                        project_id,
                        ip.to_string(),
                        method.to_string(),
                        path.to_string(),
                        Some(*rule_id),
                        reason.clone(),
                    )
                    .await
                {
                    warn!("failed to record firewall access request: {e}");
                }
            }
        }

        decision
    }
}

/// Pure matcher, split out from `evaluate` so it is trivially unit-testable
/// without a `Store`.
fn classify(rules: &[FirewallRule], method: &str, path: &str) -> Decision {
    let method_rules = rules.iter().filter(|r| r.rule_type == RuleType::Method);
    for rule in method_rules {
        if method.eq_ignore_ascii_case(&rule.value) {
            return Decision::Block {
                rule_id: rule.id,
                reason: format!(
                    "HTTP method '{method}' is blocked by firewall rule ID {}",
                    rule.id
                ),
            };
        }
    }

    let path_rules = rules.iter().filter(|r| r.rule_type == RuleType::Path);
    for rule in path_rules {
        let blocked = &rule.value;
        if path == blocked || path.starts_with(&format!("{blocked}/")) {
            return Decision::Block {
                rule_id: rule.id,
                reason: format!(
                    "Path '{path}' matches blocked path '{blocked}' (rule ID {})",
                    rule.id
                ),
            };
        }
    }

    let pattern_rules = rules.iter().filter(|r| r.rule_type == RuleType::Pattern);
    for rule in pattern_rules {
        match Regex::new(&format!("^(?:{})", rule.value)) {
            Ok(re) => {
                if re.is_match(path) {
                    return Decision::Block {
                        rule_id: rule.id,
                        reason: format!(
                            "Path '{path}' matches blocked pattern '{}' (rule ID {})",
                            rule.value, rule.id
                        ),
                    };
                }
            }
            Err(_) => {
                warn!(
                    "invalid regex pattern in firewall rule ID {}: {}",
                    rule.id, rule.value
                );
            }
        }
    }

    Decision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: Id, rule_type: RuleType, value: &str) -> FirewallRule {
        FirewallRule {
            id,
            project_id: 1,
            rule_type,
            value: value.to_string(),
            description: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn method_beats_path_and_pattern() {
        let rules = vec![
            rule(1, RuleType::Pattern, r"/api/.*"),
            rule(2, RuleType::Path, "/api/secret"),
            rule(3, RuleType::Method, "POST"),
        ];
        let decision = classify(&rules, "POST", "/api/secret");
        match decision {
            Decision::Block { rule_id, .. } => assert_eq!(rule_id, 3),
            Decision::Allow => panic!("expected block"),
        }
    }

    #[test]
    fn path_prefix_boundary_respected() {
        let rules = vec![rule(1, RuleType::Path, "/admin")];
        assert_eq!(classify(&rules, "GET", "/admin"), Decision::Block { rule_id: 1, reason: "Path '/admin' matches blocked path '/admin' (rule ID 1)".into() });
        assert_eq!(
            classify(&rules, "GET", "/admin/panel"),
            Decision::Block {
                rule_id: 1,
                reason: "Path '/admin/panel' matches blocked path '/admin' (rule ID 1)".into()
            }
        );
        assert_eq!(classify(&rules, "GET", "/adminpanel"), Decision::Allow);
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let rules = vec![
            rule(1, RuleType::Pattern, "(unclosed"),
            rule(2, RuleType::Pattern, "/ok.*"),
        ];
        match classify(&rules, "GET", "/ok/thing") {
            Decision::Block { rule_id, .. } => assert_eq!(rule_id, 2),
            Decision::Allow => panic!("expected block from second, valid rule"),
        }
    }

    #[test]
    fn no_rules_allows() {
        assert_eq!(classify(&[], "GET", "/anything"), Decision::Allow);
    }
}
