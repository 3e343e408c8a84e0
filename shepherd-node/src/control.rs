//! Process controller for the external agent control contract.
//!
//! Every installed agent version ships a `control` executable in its version
//! directory exposing `start`, `stop` and `status` subcommands. `status`
//! output containing the literal token `started` is the only signal that the
//! agent process is confirmed running.

use std::path::Path;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Token the control contract's `status` output must contain for a running
/// agent. Fragile by nature, so the check lives in exactly one predicate.
const STARTED_TOKEN: &str = "started";

/// The one place the control contract's wording is interpreted.
pub fn confirms_started(status_output: &str) -> bool {
    status_output.contains(STARTED_TOKEN)
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control {action} in {workdir} failed to run: {source}")]
    Exec {
        action: &'static str,
        workdir: String,
        #[source]
        source: std::io::Error,
    },
    #[error("control {action} in {workdir} exited with code {code:?}")]
    Exited {
        action: &'static str,
        workdir: String,
        code: Option<i32>,
    },
}

/// Start/stop/status of an external agent process via its control script.
pub trait AgentControl {
    async fn start(&self, workdir: &Path) -> Result<(), ControlError>;
    async fn stop(&self, workdir: &Path) -> Result<(), ControlError>;
    /// Raw `status` output; the caller decides what it means via
    /// [`confirms_started`].
    async fn status(&self, workdir: &Path) -> Result<String, ControlError>;
}

/// Production controller: runs `./control <action>` with the agent version
/// directory as the working directory, waiting for the process to exit.
pub struct ShellControl;

impl ShellControl {
    async fn run(
        &self,
        action: &'static str,
        workdir: &Path,
    ) -> Result<std::process::Output, ControlError> {
        debug!(action, workdir = %workdir.display(), "invoking control script");
        Command::new("./control")
            .arg(action)
            .current_dir(workdir)
            .output()
            .await
            .map_err(|source| ControlError::Exec {
                action,
                workdir: workdir.display().to_string(),
                source,
            })
    }

    async fn run_checked(&self, action: &'static str, workdir: &Path) -> Result<(), ControlError> {
        let out = self.run(action, workdir).await?;
        if !out.status.success() {
            return Err(ControlError::Exited {
                action,
                workdir: workdir.display().to_string(),
                code: out.status.code(),
            });
        }
        Ok(())
    }
}

impl AgentControl for ShellControl {
    async fn start(&self, workdir: &Path) -> Result<(), ControlError> {
        self.run_checked("start", workdir).await
    }

    async fn stop(&self, workdir: &Path) -> Result<(), ControlError> {
        self.run_checked("stop", workdir).await
    }

    async fn status(&self, workdir: &Path) -> Result<String, ControlError> {
        // Control scripts commonly exit nonzero when the agent is down, so
        // only a failure to run at all is an error here.
        let out = self.run("status", workdir).await?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_token_is_a_substring_match() {
        assert!(confirms_started("started"));
        assert!(confirms_started("falcon (pid 4242) is started...\n"));
        assert!(!confirms_started("stopped"));
        assert!(!confirms_started(""));
        // The contract is case-sensitive.
        assert!(!confirms_started("STARTED"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_control_runs_the_local_control_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("control");
        std::fs::write(
            &script,
            "#!/bin/sh\ncase \"$1\" in\nstatus) echo \"agent is started\";;\n*) exit 0;;\nesac\n",
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let control = ShellControl;
        let out = control.status(dir.path()).await.unwrap();
        assert!(confirms_started(&out));
        control.start(dir.path()).await.unwrap();
        control.stop(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_control_script_is_an_exec_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let control = ShellControl;
        assert!(matches!(
            control.status(dir.path()).await,
            Err(ControlError::Exec { .. })
        ));
    }
}
