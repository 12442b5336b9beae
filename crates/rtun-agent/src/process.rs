//! Local child-process lifecycle for a tunneled project (C8): spawn in its
//! own process group, stream its output into a bounded log ring, and tear
//! it down on `stop`/`restart`.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rtun_core::models::{Id, LogStream, ProjectLog};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Bounded ring of recent log lines for local inspection (§3B); not part of
/// any wire protocol.
#[derive(Default)]
pub struct LogRing {
    lines: VecDeque<ProjectLog>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, entry: ProjectLog) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<ProjectLog> {
        self.lines.iter().cloned().collect()
    }
}

pub type SharedLogRing = Arc<Mutex<LogRing>>;

const LOG_RING_CAPACITY: usize = 500;
/// How long a freshly spawned process must stay alive before `start` treats
/// it as successfully launched.
const STARTUP_GRACE: Duration = Duration::from_secs(2);
/// How long `stop` waits for SIGTERM before escalating to SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct ManagedProcess {
    pub project_id: Id,
    pub pid: u32,
    child: Child,
    log_task: JoinHandle<()>,
    pub logs: SharedLogRing,
}

fn build_command(path: &str, command: &str, port: Option<u16>) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    if let Some(port) = port {
        cmd.env("PORT", port.to_string());
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // New process group so `stop` can signal the whole tree at once.
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    cmd
}

fn spawn_log_pump(
    project_id: Id,
    stream: LogStream,
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    logs: SharedLogRing,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    println!("[{project_id}] {line}");
                    if let Ok(mut ring) = logs.lock() {
                        ring.push(ProjectLog {
                            project_id,
                            stream,
                            content: line,
                            timestamp: chrono::Utc::now(),
                        });
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(project_id, "log stream read error: {e}");
                    break;
                }
            }
        }
    })
}

/// Spawn `command` in `path`, failing fast if the process exits within
/// [`STARTUP_GRACE`] (capturing stderr for the failure message).
pub async fn start(project_id: Id, path: &str, command: &str, port: Option<u16>) -> Result<ManagedProcess, String> {
    if !std::path::Path::new(path).exists() {
        return Err(format!("project path does not exist: {path}"));
    }

    let mut cmd = build_command(path, command, port);
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn process: {e}"))?;
    let pid = child
        .id()
        .ok_or_else(|| "spawned process has no pid".to_string())?;

    let stdout = child.stdout.take().expect("stdout is piped");
    let mut stderr = child.stderr.take().expect("stderr is piped");

    tokio::time::sleep(STARTUP_GRACE).await;

    if let Ok(Some(status)) = child.try_wait() {
        let mut captured = String::new();
        let _ = tokio::io::AsyncReadExt::read_to_string(&mut stderr, &mut captured).await;
        return Err(format!(
            "process exited immediately with {status}{}",
            if captured.is_empty() {
                String::new()
            } else {
                format!(": {}", captured.trim())
            }
        ));
    }

    let logs: SharedLogRing = Arc::new(Mutex::new(LogRing::new(LOG_RING_CAPACITY)));
    let stdout_task = spawn_log_pump(project_id, LogStream::Stdout, stdout, logs.clone());
    let stderr_task = spawn_log_pump(project_id, LogStream::Stderr, stderr, logs.clone());
    let log_task = tokio::spawn(async move {
        let _ = tokio::join!(stdout_task, stderr_task);
    });

    info!(project_id, pid, "project process started");
    Ok(ManagedProcess {
        project_id,
        pid,
        child,
        log_task,
        logs,
    })
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // Negative pid addresses the whole process group (§4.8's `os.killpg`
    // equivalent); `process_group(0)` at spawn time made pid == pgid.
    unsafe {
        libc::kill(-(pid as libc::pid_t), signal);
    }
}

/// Stop the managed process: SIGTERM the process group, escalate to
/// SIGKILL after [`STOP_GRACE`] (Windows: `taskkill /F /T`).
pub async fn stop(mut managed: ManagedProcess) -> Result<(), String> {
    #[cfg(unix)]
    {
        signal_group(managed.pid, libc::SIGTERM);
    }
    #[cfg(windows)]
    {
        let _ = tokio::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &managed.pid.to_string()])
            .output()
            .await;
    }

    let wait = tokio::time::timeout(STOP_GRACE, managed.child.wait()).await;
    if wait.is_err() {
        #[cfg(unix)]
        {
            signal_group(managed.pid, libc::SIGKILL);
        }
        let _ = managed.child.kill().await;
        let _ = managed.child.wait().await;
    }
    managed.log_task.abort();
    info!(pid = managed.pid, "project process stopped");
    Ok(())
}
