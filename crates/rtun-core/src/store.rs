//! The transactional record store is out of scope for this crate (§1); this
//! module defines the narrow interface the rest of the engine needs against
//! it, plus an in-memory implementation sufficient to run the system
//! standalone and to drive the tests in §8.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{CoreError, Result};
use crate::models::*;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_agent(&self, id: Id) -> Option<Agent>;
    async fn get_agent_by_key(&self, api_key: &str) -> Option<Agent>;
    async fn record_heartbeat(&self, agent_id: Id, system_info: serde_json::Value) -> Result<()>;

    async fn get_project(&self, id: Id) -> Option<Project>;
    async fn get_project_by_subdomain(&self, subdomain: &str) -> Option<Project>;
    async fn subdomain_taken(&self, subdomain: &str) -> bool {
        self.get_project_by_subdomain(subdomain).await.is_some()
    }
    async fn put_project(&self, project: Project) -> Result<()>;

    async fn enqueue_command(
        &self,
        agent_id: Id,
        project_id: Id,
        action: CommandAction,
    ) -> Result<Command>;
    async fn pending_commands(&self, agent_id: Id) -> Vec<Command>;
    async fn complete_command(
        &self,
        command_id: Id,
        success: bool,
        message: String,
        pid: Option<u32>,
    ) -> Result<()>;

    async fn firewall_rules(&self, project_id: Id) -> Vec<FirewallRule>;
    async fn insert_firewall_rule(
        &self,
        project_id: Id,
        rule_type: RuleType,
        value: String,
        description: Option<String>,
    ) -> Result<FirewallRule>;
    async fn delete_firewall_rule(&self, project_id: Id, rule_id: Id) -> Result<()>;

    async fn access_requests(
        &self,
        project_id: Id,
        status: Option<AccessRequestStatus>,
    ) -> Vec<FirewallAccessRequest>;
    async fn get_access_request(&self, id: Id) -> Option<FirewallAccessRequest>;
    async fn create_access_request(
        &self,
        project_id: Id,
        client_ip: String,
        method: String,
        path: String,
        rule_id: Option<Id>,
        block_reason: String,
    ) -> Result<FirewallAccessRequest>;
    async fn set_access_request_status(
        &self,
        id: Id,
        status: AccessRequestStatus,
        approved_until: Option<DateTime<Utc>>,
    ) -> Result<()>;
    /// Bulk-revoke approved requests matching the given filters (at least one
    /// must be `Some`); returns the count revoked.
    async fn revoke_approved(
        &self,
        project_id: Option<Id>,
        ip_address: Option<&str>,
    ) -> Result<u64>;
    async fn find_approved(
        &self,
        project_id: Id,
        client_ip: &str,
        method: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> Option<FirewallAccessRequest>;
}

/// A process-local store backed by `DashMap`s, matching the concurrency
/// discipline §5 requires of the edge's other shared registries.
pub struct InMemoryStore {
    agents: DashMap<Id, Agent>,
    agents_by_key: DashMap<String, Id>,
    projects: DashMap<Id, Project>,
    projects_by_subdomain: DashMap<String, Id>,
    commands: DashMap<Id, Command>,
    rules: DashMap<Id, FirewallRule>,
    access_requests: DashMap<Id, FirewallAccessRequest>,
    next_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            agents_by_key: DashMap::new(),
            projects: DashMap::new(),
            projects_by_subdomain: DashMap::new(),
            commands: DashMap::new(),
            rules: DashMap::new(),
            access_requests: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> Id {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Seed an agent (test/bootstrap helper; not part of the `Store` trait
    /// since agent provisioning is part of the out-of-scope management UI).
    pub fn seed_agent(&self, agent: Agent) {
        self.agents_by_key.insert(agent.api_key.clone(), agent.id);
        self.agents.insert(agent.id, agent);
    }

    pub fn seed_project(&self, project: Project) {
        if let Some(sub) = &project.subdomain {
            self.projects_by_subdomain.insert(sub.clone(), project.id);
        }
        self.projects.insert(project.id, project);
    }

    pub fn allocate_id(&self) -> Id {
        self.next_id()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_agent(&self, id: Id) -> Option<Agent> {
        self.agents.get(&id).map(|a| a.clone())
    }

    async fn get_agent_by_key(&self, api_key: &str) -> Option<Agent> {
        let id = *self.agents_by_key.get(api_key)?;
        self.agents.get(&id).map(|a| a.clone())
    }

    async fn record_heartbeat(&self, agent_id: Id, system_info: serde_json::Value) -> Result<()> {
        let mut agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| CoreError::NotFound(format!("agent {agent_id}")))?;
        agent.last_heartbeat = Some(Utc::now());
        agent.status = AgentStatus::Online;
        agent.system_info = Some(system_info);
        Ok(())
    }

    async fn get_project(&self, id: Id) -> Option<Project> {
        self.projects.get(&id).map(|p| p.clone())
    }

    async fn get_project_by_subdomain(&self, subdomain: &str) -> Option<Project> {
        let id = *self.projects_by_subdomain.get(subdomain)?;
        self.projects.get(&id).map(|p| p.clone())
    }

    async fn put_project(&self, project: Project) -> Result<()> {
        if let Some(sub) = &project.subdomain {
            self.projects_by_subdomain.insert(sub.clone(), project.id);
        }
        self.projects.insert(project.id, project);
        Ok(())
    }

    async fn enqueue_command(
        &self,
        agent_id: Id,
        project_id: Id,
        action: CommandAction,
    ) -> Result<Command> {
        let command = Command {
            id: self.next_id(),
            agent_id,
            project_id,
            action,
            status: CommandStatus::Pending,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.commands.insert(command.id, command.clone());
        Ok(command)
    }

    async fn pending_commands(&self, agent_id: Id) -> Vec<Command> {
        self.commands
            .iter()
            .filter(|c| c.agent_id == agent_id && c.status == CommandStatus::Pending)
            .map(|c| c.clone())
            .collect()
    }

    async fn complete_command(
        &self,
        command_id: Id,
        success: bool,
        message: String,
        pid: Option<u32>,
    ) -> Result<()> {
        let project_id = {
            let mut command = self
                .commands
                .get_mut(&command_id)
                .ok_or_else(|| CoreError::NotFound(format!("command {command_id}")))?;
            // Idempotent: a command already in a terminal state is a no-op,
            // per §4.7's concurrent-poll note.
            if command.status != CommandStatus::Pending {
                return Ok(());
            }
            command.status = if success {
                CommandStatus::Completed
            } else {
                CommandStatus::Failed
            };
            command.result = Some(message);
            command.completed_at = Some(Utc::now());
            command.project_id
        };

        if let Some(mut project) = self.projects.get_mut(&project_id) {
            let action = self.commands.get(&command_id).map(|c| c.action);
            if !success {
                project.status = ProjectStatus::Error;
            } else if let Some(action) = action {
                match action {
                    CommandAction::Start | CommandAction::Restart => {
                        project.status = ProjectStatus::Running;
                        project.pid = pid;
                        project.last_started = Some(Utc::now());
                    }
                    CommandAction::Stop => {
                        project.status = ProjectStatus::Stopped;
                        project.pid = None;
                    }
                }
            }
            project.pending_action = None;
        }
        Ok(())
    }

    async fn firewall_rules(&self, project_id: Id) -> Vec<FirewallRule> {
        self.rules
            .iter()
            .filter(|r| r.project_id == project_id)
            .map(|r| r.clone())
            .collect()
    }

    async fn insert_firewall_rule(
        &self,
        project_id: Id,
        rule_type: RuleType,
        value: String,
        description: Option<String>,
    ) -> Result<FirewallRule> {
        let duplicate = self
            .rules
            .iter()
            .any(|r| r.project_id == project_id && r.rule_type == rule_type && r.value == value);
        if duplicate {
            return Err(CoreError::AlreadyExists(format!(
                "rule {rule_type:?}={value} on project {project_id}"
            )));
        }
        let rule = FirewallRule {
            id: self.next_id(),
            project_id,
            rule_type,
            value,
            description,
            created_at: Utc::now(),
        };
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn delete_firewall_rule(&self, project_id: Id, rule_id: Id) -> Result<()> {
        let removed = self
            .rules
            .remove_if(&rule_id, |_, r| r.project_id == project_id)
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("rule {rule_id}")))
        }
    }

    async fn access_requests(
        &self,
        project_id: Id,
        status: Option<AccessRequestStatus>,
    ) -> Vec<FirewallAccessRequest> {
        self.access_requests
            .iter()
            .filter(|r| {
                r.project_id == project_id && status.map(|s| s == r.status).unwrap_or(true)
            })
            .map(|r| r.clone())
            .collect()
    }

    async fn get_access_request(&self, id: Id) -> Option<FirewallAccessRequest> {
        self.access_requests.get(&id).map(|r| r.clone())
    }

    async fn create_access_request(
        &self,
        project_id: Id,
        client_ip: String,
        method: String,
        path: String,
        rule_id: Option<Id>,
        block_reason: String,
    ) -> Result<FirewallAccessRequest> {
        let request = FirewallAccessRequest {
            id: self.next_id(),
            project_id,
            client_ip,
            method,
            path,
            rule_id,
            block_reason,
            status: AccessRequestStatus::Pending,
            approved_until: None,
            created_at: Utc::now(),
        };
        self.access_requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn set_access_request_status(
        &self,
        id: Id,
        status: AccessRequestStatus,
        approved_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut request = self
            .access_requests
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("access request {id}")))?;
        request.status = status;
        request.approved_until = approved_until;
        Ok(())
    }

    async fn revoke_approved(
        &self,
        project_id: Option<Id>,
        ip_address: Option<&str>,
    ) -> Result<u64> {
        if project_id.is_none() && ip_address.is_none() {
            return Err(CoreError::Other(
                "revoke requires at least one filter".to_string(),
            ));
        }
        let now = Utc::now();
        let mut count = 0u64;
        for mut entry in self.access_requests.iter_mut() {
            if entry.status != AccessRequestStatus::Approved {
                continue;
            }
            if let Some(pid) = project_id {
                if entry.project_id != pid {
                    continue;
                }
            }
            if let Some(ip) = ip_address {
                if entry.client_ip != ip {
                    continue;
                }
            }
            entry.status = AccessRequestStatus::Revoked;
            entry.approved_until = Some(now);
            count += 1;
        }
        Ok(count)
    }

    async fn find_approved(
        &self,
        project_id: Id,
        client_ip: &str,
        method: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> Option<FirewallAccessRequest> {
        self.access_requests
            .iter()
            .find(|r| {
                r.project_id == project_id
                    && r.client_ip == client_ip
                    && r.method.eq_ignore_ascii_case(method)
                    && r.path == path
                    && r.status == AccessRequestStatus::Approved
                    && r.approved_until.map(|t| t > now).unwrap_or(false)
            })
            .map(|r| r.clone())
    }
}

pub type SharedStore = Arc<dyn Store>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project(id: Id) -> Project {
        Project {
            id,
            subdomain: Some(format!("demo-{id}")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn command_lifecycle_is_idempotent_on_completion() {
        let store = InMemoryStore::new();
        store.seed_project(sample_project(1));
        let cmd = store
            .enqueue_command(1, 1, CommandAction::Start)
            .await
            .unwrap();

        store
            .complete_command(cmd.id, true, "started".into(), Some(123))
            .await
            .unwrap();
        let project = store.get_project(1).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Running);
        assert_eq!(project.pid, Some(123));

        // A second completion report must not re-open the command or flip
        // the project back (§8 invariant 8: completed never re-enters pending).
        store
            .complete_command(cmd.id, false, "late duplicate".into(), None)
            .await
            .unwrap();
        let project = store.get_project(1).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Running);
    }

    #[tokio::test]
    async fn duplicate_rule_rejected() {
        let store = InMemoryStore::new();
        store
            .insert_firewall_rule(1, RuleType::Path, "/admin".into(), None)
            .await
            .unwrap();
        let second = store
            .insert_firewall_rule(1, RuleType::Path, "/admin".into(), None)
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn revoke_requires_a_filter() {
        let store = InMemoryStore::new();
        let err = store.revoke_approved(None, None).await;
        assert!(err.is_err());
    }
}
