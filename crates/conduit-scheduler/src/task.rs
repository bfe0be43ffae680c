//! What a job task does, and how it is carried out.

use std::time::Duration;

use async_trait::async_trait;
use conduit_core::types::{DatasetId, ImportId, ImportScheduleId};
use conduit_import::{ImportExecutor, NewImport};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{Result, SchedulerError},
    types::Job,
};

fn default_timeout_secs() -> u64 {
    3600
}

/// The closed set of things a task can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskAction {
    /// Copy a source dataset into the job's workspace sandbox.
    ImportSourceData {
        source_dataset_id: DatasetId,
        to_table: String,
        #[serde(default)]
        sample_count: Option<u64>,
        #[serde(default)]
        truncate: bool,
        #[serde(default)]
        import_schedule_id: Option<ImportScheduleId>,
    },
    /// Run a local program; a non-zero exit fails the task.
    RunCommand {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl TaskAction {
    pub fn name(&self) -> &'static str {
        match self {
            TaskAction::ImportSourceData { .. } => "import_source_data",
            TaskAction::RunCommand { .. } => "run_command",
        }
    }

    /// Carry out the action on behalf of `job`.
    pub async fn execute(&self, job: &Job, imports: &dyn ImportRunner) -> Result<()> {
        match self {
            TaskAction::ImportSourceData {
                source_dataset_id,
                to_table,
                sample_count,
                truncate,
                import_schedule_id,
            } => {
                let request = NewImport {
                    workspace_id: job.workspace_id.clone(),
                    user_id: job.owner_id.clone(),
                    source_dataset_id: source_dataset_id.clone(),
                    to_table: to_table.clone(),
                    sample_count: *sample_count,
                    truncate: *truncate,
                    import_schedule_id: import_schedule_id.clone(),
                };
                let id = imports.launch(request).await?;
                info!(job_id = %job.id, import_id = %id, "import task finished");
                Ok(())
            }
            TaskAction::RunCommand {
                command,
                args,
                timeout_secs,
            } => run_command(command, args, *timeout_secs).await,
        }
    }
}

async fn run_command(command: &str, args: &[String], timeout_secs: u64) -> Result<()> {
    debug!(command, ?args, "running command task");
    let run = tokio::process::Command::new(command)
        .args(args)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(Duration::from_secs(timeout_secs), run).await {
        Err(_) => Err(SchedulerError::CommandFailed(format!(
            "'{command}' timed out after {timeout_secs}s"
        ))),
        Ok(Err(e)) => Err(SchedulerError::CommandFailed(format!(
            "failed to launch '{command}': {e}"
        ))),
        Ok(Ok(out)) if out.status.success() => Ok(()),
        Ok(Ok(out)) => {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            let mut msg = format!("'{command}' exited with {}", out.status.code().unwrap_or(-1));
            if !stderr.is_empty() {
                msg.push_str(&format!(": {stderr}"));
            }
            Err(SchedulerError::CommandFailed(msg))
        }
    }
}

/// Creates and runs imports for import tasks and queued import work.
#[async_trait]
pub trait ImportRunner: Send + Sync {
    /// Create an import and run it to completion.
    async fn launch(&self, request: NewImport) -> conduit_import::Result<ImportId>;

    /// Run an existing import unless it is already finalized.
    async fn run_import(&self, id: &ImportId) -> conduit_import::Result<()>;

    /// Fail imports left unfinished by a previous process.
    async fn recover_unfinished(&self) -> conduit_import::Result<usize>;
}

#[async_trait]
impl ImportRunner for ImportExecutor {
    async fn launch(&self, request: NewImport) -> conduit_import::Result<ImportId> {
        let import = self.create(request)?;
        self.run(&import).await?;
        Ok(import.id)
    }

    async fn run_import(&self, id: &ImportId) -> conduit_import::Result<()> {
        self.run_by_id(id).await
    }

    async fn recover_unfinished(&self) -> conduit_import::Result<usize> {
        ImportExecutor::recover_unfinished(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_are_tagged_json() {
        let action: TaskAction = serde_json::from_str(
            r#"{"action":"import_source_data","source_dataset_id":"ds-1","to_table":"orders"}"#,
        )
        .unwrap();
        assert_eq!(
            action,
            TaskAction::ImportSourceData {
                source_dataset_id: "ds-1".into(),
                to_table: "orders".into(),
                sample_count: None,
                truncate: false,
                import_schedule_id: None,
            }
        );

        let action: TaskAction =
            serde_json::from_str(r#"{"action":"run_command","command":"true"}"#).unwrap();
        assert_eq!(action.name(), "run_command");
        match action {
            TaskAction::RunCommand { timeout_secs, .. } => assert_eq!(timeout_secs, 3600),
            _ => unreachable!(),
        }
        assert!(serde_json::from_str::<TaskAction>(r#"{"action":"send_email"}"#).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_exit_status_decides_outcome() {
        assert!(run_command("true", &[], 5).await.is_ok());

        let err = run_command("sh", &["-c".into(), "echo boom >&2; exit 3".into()], 5)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Command failed: 'sh' exited with 3: boom");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_timeout_fails_task() {
        let err = run_command("sleep", &["5".into()], 1).await.unwrap_err();
        assert!(err.to_string().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn missing_program_fails_task() {
        let err = run_command("conduit-no-such-program", &[], 5)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }
}
