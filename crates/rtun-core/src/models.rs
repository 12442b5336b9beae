//! Storage-agnostic domain entities (§3) plus the wire DTOs the edge's
//! thin administrative and agent REST surfaces exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Id,
    pub owner: String,
    pub name: String,
    pub api_key: String,
    pub status: AgentStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub system_info: Option<serde_json::Value>,
}

impl Agent {
    /// An agent is considered online by readers only if it heartbeat within
    /// `2 * heartbeat_interval` (§4.7 freshness rule).
    pub fn is_fresh(&self, heartbeat_interval_secs: u64, now: DateTime<Utc>) -> bool {
        match self.last_heartbeat {
            Some(ts) => {
                let window = chrono::Duration::seconds(2 * heartbeat_interval_secs as i64);
                now - ts <= window
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingAction {
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Id,
    pub owner: String,
    pub agent_id: Option<Id>,
    pub name: String,
    pub path: String,
    pub command: String,
    pub port: Option<u16>,
    pub subdomain: Option<String>,
    pub is_public: bool,
    pub status: ProjectStatus,
    pub pid: Option<u32>,
    pub pending_action: Option<PendingAction>,
    pub last_started: Option<DateTime<Utc>>,
    pub firewall_enabled: bool,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            id: 0,
            owner: String::new(),
            agent_id: None,
            name: String::new(),
            path: String::new(),
            command: "npm run dev".to_string(),
            port: None,
            subdomain: None,
            is_public: false,
            status: ProjectStatus::Stopped,
            pid: None,
            pending_action: None,
            last_started: None,
            firewall_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Id,
    pub agent_id: Id,
    pub project_id: Id,
    pub action: CommandAction,
    pub status: CommandStatus,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Path,
    Method,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: Id,
    pub project_id: Id,
    pub rule_type: RuleType,
    pub value: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRequestStatus {
    Pending,
    Approved,
    Rejected,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallAccessRequest {
    pub id: Id,
    pub project_id: Id,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub rule_id: Option<Id>,
    pub block_reason: String,
    pub status: AccessRequestStatus,
    pub approved_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A single captured line of child-process output (§3B, added).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectLog {
    pub project_id: Id,
    pub stream: LogStream,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

// --- wire DTOs for the agent REST surface (§6) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub system_info: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandProjectView {
    pub id: Id,
    pub name: String,
    pub path: String,
    pub command: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandView {
    pub id: Id,
    pub action: CommandAction,
    pub project: CommandProjectView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsResponse {
    pub commands: Vec<CommandView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteCommandRequest {
    pub success: bool,
    pub message: String,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub domain: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_freshness_window() {
        let now = Utc::now();
        let fresh = Agent {
            id: 1,
            owner: "alice".into(),
            name: "laptop".into(),
            api_key: "k".into(),
            status: AgentStatus::Online,
            last_heartbeat: Some(now - chrono::Duration::seconds(10)),
            system_info: None,
        };
        assert!(fresh.is_fresh(30, now));

        let stale = Agent {
            last_heartbeat: Some(now - chrono::Duration::seconds(61)),
            ..fresh.clone()
        };
        assert!(!stale.is_fresh(30, now));

        let never = Agent {
            last_heartbeat: None,
            ..fresh
        };
        assert!(!never.is_fresh(30, now));
    }

    #[test]
    fn command_view_round_trips() {
        let view = CommandView {
            id: 1,
            action: CommandAction::Start,
            project: CommandProjectView {
                id: 2,
                name: "demo".into(),
                path: "/srv/demo".into(),
                command: "npm run dev".into(),
                port: Some(3000),
            },
        };
        let json = serde_json::to_string(&view).unwrap();
        let back: CommandView = serde_json::from_str(&json).unwrap();
        assert_eq!(back.project.port, Some(3000));
    }
}
