//! Bulk rule import/export (§4.9A, added): round-trips a project's firewall
//! rules through a flat shape, skipping invalid or duplicate values rather
//! than failing the whole batch.

use serde::{Deserialize, Serialize};

use crate::models::{FirewallRule, Id, RuleType};
use crate::store::Store;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleBundle {
    #[serde(default)]
    pub blocked_paths: Vec<String>,
    #[serde(default)]
    pub blocked_methods: Vec<String>,
    #[serde(default)]
    pub path_patterns: Vec<String>,
}

const VALID_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS",
];

pub fn export(rules: &[FirewallRule]) -> RuleBundle {
    let mut bundle = RuleBundle::default();
    for rule in rules {
        match rule.rule_type {
            RuleType::Path => bundle.blocked_paths.push(rule.value.clone()),
            RuleType::Method => bundle.blocked_methods.push(rule.value.clone()),
            RuleType::Pattern => bundle.path_patterns.push(rule.value.clone()),
        }
    }
    bundle
}

/// Import a bundle, skipping entries invalid for their type or already
/// present (duplicate on (project, type, value)). Returns the count added.
pub async fn import(store: &dyn Store, project_id: Id, bundle: RuleBundle) -> u64 {
    let mut added = 0u64;

    for mut path in bundle.blocked_paths {
        if !path.starts_with('/') {
            path = format!("/{path}");
        }
        if store
            .insert_firewall_rule(project_id, RuleType::Path, path, None)
            .await
            .is_ok()
        {
            added += 1;
        }
    }

    for method in bundle.blocked_methods {
        let method = method.to_uppercase();
        if !VALID_METHODS.contains(&method.as_str()) {
            continue;
        }
        if store
            .insert_firewall_rule(project_id, RuleType::Method, method, None)
            .await
            .is_ok()
        {
            added += 1;
        }
    }

    for pattern in bundle.path_patterns {
        if regex::Regex::new(&pattern).is_err() {
            continue;
        }
        if store
            .insert_firewall_rule(project_id, RuleType::Pattern, pattern, None)
            .await
            .is_ok()
        {
            added += 1;
        }
    }

    added
}
