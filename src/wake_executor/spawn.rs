//! Spawn `WakeExecutor` variant (spec §6): forks `handler.command` with a
//! wall-clock deadline and maps a non-zero exit (or a timeout) to an error.

use std::time::Duration;

use crate::error::WakeError;

pub async fn wake_spawn(command: &[String], deadline: Duration) -> Result<(), WakeError> {
    let mut cmd = tokio::process::Command::new(&command[0]);
    cmd.args(&command[1..]);
    cmd.kill_on_drop(true);

    let child = cmd.spawn()?;
    let output = tokio::time::timeout(deadline, child.wait_with_output())
        .await
        .map_err(|_| WakeError::Timeout)??;

    if output.status.success() {
        Ok(())
    } else {
        Err(WakeError::SpawnNonZero(output.status.code().unwrap_or(-1)))
    }
}
