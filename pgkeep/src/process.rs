//! External tool invocation shared by dump and restore.

use crate::config::DatabaseConfig;
use crate::utils::errors::ProcessError;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Time a child gets to exit after SIGTERM before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// A program with its arguments and extra environment.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell snippet run through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// `pg_dump` in custom format, written to stdout
    pub fn pg_dump(db: &DatabaseConfig) -> Self {
        Self::new("pg_dump")
            .args(connection_args(db))
            .args([
                "-F",
                "c",
                "--no-privileges",
                "--no-owner",
                "--no-acl",
                "--verbose",
                "--compress=6",
                "--no-unlogged-table-data",
                "--lock-wait-timeout=300",
            ])
            .env("PGPASSWORD", db.password.clone())
    }

    /// `pg_restore` reading a custom-format archive from stdin
    pub fn pg_restore(db: &DatabaseConfig) -> Self {
        Self::new("pg_restore")
            .args(connection_args(db))
            .args([
                "--clean",
                "--if-exists",
                "--no-owner",
                "--no-acl",
                "--verbose",
                "--single-transaction",
            ])
            .env("PGPASSWORD", db.password.clone())
    }

    /// Short name for logs and errors
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }

    /// Spawn with stderr captured; the child is killed if the handle is dropped.
    pub(crate) fn spawn(&self, stdin: Stdio, stdout: Stdio) -> Result<Child, ProcessError> {
        debug!("Spawning {} {:?}", self.program, self.args);
        Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                tool: self.tool_name(),
                source,
            })
    }
}

fn connection_args(db: &DatabaseConfig) -> Vec<String> {
    vec![
        "-h".to_string(),
        db.host.clone(),
        "-p".to_string(),
        db.port.to_string(),
        "-U".to_string(),
        db.username.clone(),
        "-d".to_string(),
        db.name.clone(),
    ]
}

/// Forward the child's stderr to the log, line by line, until EOF.
///
/// Invalid UTF-8 is replaced rather than ending the drain, so the child never blocks
/// on a full stderr pipe.
pub(crate) fn forward_stderr(stderr: ChildStderr, tool: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end();
                    if !text.is_empty() {
                        info!(target: "pgkeep::process", tool = %tool, "{}", text);
                    }
                }
                Err(e) => {
                    warn!("Failed to read {} stderr: {}", tool, e);
                    break;
                }
            }
        }
    })
}

/// Wait for the child, terminating it once `deadline` passes.
pub(crate) async fn wait_until(
    child: &mut Child,
    tool: &str,
    deadline: Instant,
) -> Result<(), ProcessError> {
    match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(ProcessError::Failed {
            tool: tool.to_string(),
            status,
        }),
        Ok(Err(source)) => Err(ProcessError::Wait {
            tool: tool.to_string(),
            source,
        }),
        Err(_) => {
            warn!("{} exceeded its deadline, terminating", tool);
            terminate(child).await;
            Err(ProcessError::DeadlineExceeded {
                tool: tool.to_string(),
            })
        }
    }
}

/// SIGTERM, then SIGKILL if the child is still around after the grace period.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
                    return;
                }
            }
            Err(e) => debug!("SIGTERM to {} failed: {}", pid, e),
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill child process: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_dump_arguments() {
        let db = DatabaseConfig {
            host: "db".to_string(),
            port: 5433,
            username: "backup".to_string(),
            password: "pw".to_string(),
            name: "shop".to_string(),
        };
        let cmd = ToolCommand::pg_dump(&db);
        assert_eq!(cmd.tool_name(), "pg_dump");
        assert_eq!(&cmd.args[..8], &["-h", "db", "-p", "5433", "-U", "backup", "-d", "shop"]);
        assert!(cmd.args.iter().any(|a| a == "--no-owner"));
        assert_eq!(cmd.env, vec![("PGPASSWORD".to_string(), "pw".to_string())]);

        let restore = ToolCommand::pg_restore(&db);
        assert!(restore.args.iter().any(|a| a == "--single-transaction"));
        assert!(restore.args.iter().any(|a| a == "--clean"));
    }

    #[test]
    fn test_tool_name_strips_directory() {
        let tool = ToolCommand::new("/usr/lib/postgresql/16/bin/pg_dump");
        assert_eq!(tool.tool_name(), "pg_dump");
    }

    #[tokio::test]
    async fn test_wait_reports_exit_status() {
        let mut child = ToolCommand::shell("exit 3")
            .spawn(Stdio::null(), Stdio::null())
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let err = wait_until(&mut child, "sh", deadline).await.unwrap_err();
        assert!(matches!(err, ProcessError::Failed { status, .. } if status.code() == Some(3)));
    }

    #[tokio::test]
    async fn test_deadline_terminates_child() {
        let mut child = ToolCommand::shell("exec sleep 30")
            .spawn(Stdio::null(), Stdio::null())
            .unwrap();
        let started = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_millis(200);

        let err = wait_until(&mut child, "sleep", deadline).await.unwrap_err();
        assert!(matches!(err, ProcessError::DeadlineExceeded { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = ToolCommand::new("pgkeep-no-such-binary")
            .spawn(Stdio::null(), Stdio::null())
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
