//! Main agent loop (C8, §4.8): heartbeat and poll on their own intervals,
//! dispatch commands onto the process/tunnel managers, and self-restart by
//! re-exec once too many consecutive errors have piled up.

use std::collections::HashMap;
use std::time::Duration;

use rtun_core::config::AgentConfig;
use rtun_core::models::{CommandAction, CommandView, Id};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::process::{self, ManagedProcess};
use crate::rest::AgentApiClient;
use crate::system_info;
use crate::tunnel_client;

struct TunnelHandle {
    task: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct AgentWorker {
    api: AgentApiClient,
    config: AgentConfig,
    processes: Mutex<HashMap<Id, ManagedProcess>>,
    tunnels: Mutex<HashMap<Id, TunnelHandle>>,
    consecutive_errors: Mutex<u32>,
}

impl AgentWorker {
    pub fn new(api: AgentApiClient, config: AgentConfig) -> Self {
        Self {
            api,
            config,
            processes: Mutex::new(HashMap::new()),
            tunnels: Mutex::new(HashMap::new()),
            consecutive_errors: Mutex::new(0),
        }
    }

    /// Drive heartbeat/poll ticks until `shutdown` fires or the error budget
    /// is exhausted, in which case this returns `Ok(true)` so `main` can
    /// re-exec a fresh process in its place.
    pub async fn run(&self, shutdown: CancellationToken) -> bool {
        info!(server = %self.config.server_url, "agent starting");

        if !self.heartbeat().await {
            warn!("initial heartbeat failed; continuing, will retry on schedule");
        }

        let mut heartbeat_tick = tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval_secs));
        let mut poll_tick = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        heartbeat_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        poll_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping all managed work");
                    self.stop_everything().await;
                    return false;
                }
                _ = heartbeat_tick.tick() => {
                    self.heartbeat().await;
                }
                _ = poll_tick.tick() => {
                    self.poll_and_dispatch().await;
                }
            }

            if self.should_restart().await {
                warn!("too many consecutive errors, restarting agent process");
                self.stop_everything().await;
                return true;
            }
        }
    }

    async fn heartbeat(&self) -> bool {
        let info = system_info::collect();
        match self.api.heartbeat(info).await {
            Ok(true) => {
                self.reset_errors().await;
                true
            }
            Ok(false) => {
                warn!("heartbeat rejected by edge");
                self.bump_errors().await;
                false
            }
            Err(e) => {
                warn!("heartbeat request failed: {e}");
                self.bump_errors().await;
                false
            }
        }
    }

    async fn poll_and_dispatch(&self) {
        match self.api.poll_commands().await {
            Ok(commands) => {
                self.reset_errors().await;
                for command in commands {
                    self.execute_command(command).await;
                }
            }
            Err(e) => {
                warn!("command poll failed: {e}");
                self.bump_errors().await;
            }
        }
    }

    async fn execute_command(&self, command: CommandView) {
        let command_id = command.id;
        info!(command_id, project = %command.project.name, action = ?command.action, "executing command");

        let (success, message, pid) = match command.action {
            CommandAction::Start => self.start_project(&command).await,
            CommandAction::Stop => self.stop_project(command.project.id).await,
            CommandAction::Restart => {
                self.stop_project(command.project.id).await;
                tokio::time::sleep(Duration::from_secs(2)).await;
                self.start_project(&command).await
            }
        };

        if !success {
            warn!(command_id, "command failed: {message}");
        }
        if let Err(e) = self
            .api
            .complete_command(command_id, success, message, pid)
            .await
        {
            warn!(command_id, "failed to report command completion: {e}");
            self.bump_errors().await;
        } else {
            self.reset_errors().await;
        }
    }

    async fn start_project(&self, command: &CommandView) -> (bool, String, Option<u32>) {
        let project = &command.project;

        {
            let processes = self.processes.lock().await;
            if processes.contains_key(&project.id) {
                return (false, "project is already running".to_string(), None);
            }
        }

        match process::start(project.id, &project.path, &project.command, project.port).await {
            Ok(managed) => {
                let pid = managed.pid;
                self.processes.lock().await.insert(project.id, managed);

                if let Some(port) = project.port {
                    self.start_tunnel(project.id, port).await;
                } else {
                    warn!(project_id = project.id, "no port specified, tunnel not started");
                }

                (true, format!("project started successfully (pid {pid})"), Some(pid))
            }
            Err(e) => (false, e, None),
        }
    }

    async fn stop_project(&self, project_id: Id) -> (bool, String, Option<u32>) {
        self.stop_tunnel(project_id).await;

        let managed = self.processes.lock().await.remove(&project_id);
        match managed {
            Some(managed) => {
                let pid = managed.pid;
                match process::stop(managed).await {
                    Ok(()) => (true, format!("project stopped (pid {pid})"), Some(pid)),
                    Err(e) => (false, e, Some(pid)),
                }
            }
            None => (false, "project is not running".to_string(), None),
        }
    }

    async fn start_tunnel(&self, project_id: Id, local_port: u16) {
        let mut tunnels = self.tunnels.lock().await;
        if tunnels.contains_key(&project_id) {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(tunnel_client::run(
            self.config.server_url.clone(),
            self.config.api_key.clone(),
            project_id,
            local_port,
            Duration::from_secs(self.config.reconnect_delay_secs),
            cancel.clone(),
        ));
        tunnels.insert(project_id, TunnelHandle { task, cancel });
        info!(project_id, "tunnel started");
    }

    async fn stop_tunnel(&self, project_id: Id) {
        if let Some(handle) = self.tunnels.lock().await.remove(&project_id) {
            handle.cancel.cancel();
            let _ = handle.task.await;
            info!(project_id, "tunnel stopped");
        }
    }

    async fn stop_everything(&self) {
        let project_ids: Vec<Id> = self.processes.lock().await.keys().copied().collect();
        for project_id in project_ids {
            self.stop_tunnel(project_id).await;
            if let Some(managed) = self.processes.lock().await.remove(&project_id) {
                if let Err(e) = process::stop(managed).await {
                    error!(project_id, "error stopping process during shutdown: {e}");
                }
            }
        }
    }

    async fn bump_errors(&self) {
        let mut errors = self.consecutive_errors.lock().await;
        *errors += 1;
    }

    async fn reset_errors(&self) {
        let mut errors = self.consecutive_errors.lock().await;
        *errors = 0;
    }

    async fn should_restart(&self) -> bool {
        *self.consecutive_errors.lock().await >= self.config.max_consecutive_errors
    }
}

/// Re-exec the current binary with the original argv, then exit this
/// process. The new process re-reads config and starts a fresh worker.
pub fn restart_process() -> ! {
    let exe = std::env::current_exe().expect("current executable path is available");
    let args: Vec<String> = std::env::args().skip(1).collect();

    info!(?exe, ?args, "re-executing agent binary");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = std::process::Command::new(&exe).args(&args).exec();
        error!("re-exec failed: {err}");
        std::process::exit(1);
    }

    #[cfg(not(unix))]
    {
        match std::process::Command::new(&exe).args(&args).spawn() {
            Ok(_) => std::process::exit(0),
            Err(e) => {
                error!("failed to spawn replacement process: {e}");
                std::process::exit(1);
            }
        }
    }
}
