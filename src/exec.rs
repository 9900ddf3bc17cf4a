use async_trait::async_trait;
use drover_monitor::{Completion, FileCommand, FileItem};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs an external program with the file path as its last argument. Exit
/// status zero is success.
#[derive(Debug, Clone)]
pub struct ExecCommand {
    program: String,
    args: Arc<[String]>,
}

impl ExecCommand {
    /// `None` if `command` is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self { program: program.clone(), args: args.into() })
    }
}

#[async_trait]
impl FileCommand for ExecCommand {
    async fn run(&self, item: &FileItem) -> Completion {
        let mut command = Command::new(&self.program);
        command.args(self.args.iter()).arg(&item.path).kill_on_drop(true);
        if let Some(id) = item.external_id {
            command.env("DROVER_EXTERNAL_ID", id.to_string());
        }
        match command.status().await {
            Ok(status) if status.success() => {
                debug!(program = %self.program, path = %item.path.display(), "Command succeeded");
                Completion::success()
            },
            Ok(status) => {
                warn!(program = %self.program, path = %item.path.display(), code = ?status.code(), "Command exited with failure");
                Completion::failure()
            },
            Err(err) => {
                warn!(program = %self.program, error = %err, "Could not start command");
                Completion::failure()
            },
        }
    }
}

/// Logs each stable file and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCommand;

#[async_trait]
impl FileCommand for LogCommand {
    async fn run(&self, item: &FileItem) -> Completion {
        info!(path = %item.path.display(), hash = ?item.hash, status = ?item.status, "File is stable");
        Completion::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_monitor::Outcome;
    use rstest::rstest;
    use time::OffsetDateTime;

    #[test]
    fn test_empty_command() {
        assert!(ExecCommand::new(&[]).is_none());
    }

    #[cfg(unix)]
    #[rstest]
    #[case(&["true"], Outcome::Success)]
    #[case(&["false"], Outcome::Failure)]
    #[case(&["test", "-f"], Outcome::Success)]
    #[case(&["test", "-d"], Outcome::Failure)]
    #[case(&["/nonexistent/drover-handler"], Outcome::Failure)]
    #[tokio::test]
    async fn test_exit_status(#[case] command: &[&str], #[case] expected: Outcome) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let command: Vec<String> = command.iter().map(|arg| arg.to_string()).collect();
        let exec = ExecCommand::new(&command).unwrap();
        let item = FileItem::new(&path, OffsetDateTime::now_utc());
        assert_eq!(exec.run(&item).await.outcome, expected);
    }
}
