//! Remote execution over the system `ssh` client

use super::RemoteSession;
use crate::error::ProbeError;
use crate::models::NodeProfile;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Exit status `ssh` reports for its own connection failures
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Runs probe scripts with non-interactive key-based `ssh`
#[derive(Debug, Clone)]
pub struct SshSession {
    binary: String,
    connect_timeout: Duration,
}

impl Default for SshSession {
    fn default() -> Self {
        Self::new("ssh", Duration::from_secs(5))
    }
}

impl SshSession {
    pub fn new(binary: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            connect_timeout,
        }
    }

    fn build_command(&self, node: &NodeProfile, script: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs().max(1)
            ))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-p")
            .arg(node.ssh_port.to_string())
            .arg("--")
            .arg(format!("{}@{}", node.ssh_user, node.ip_address))
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&self, node: &NodeProfile, script: &str) -> Result<String, ProbeError> {
        debug!(node_id = %node.id, address = %node.ip_address, "Running remote probe");

        let output = self
            .build_command(node, script)
            .output()
            .await
            .map_err(|e| ProbeError::Unreachable(format!("failed to start {}: {}", self.binary, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            Some(SSH_CONNECTION_FAILURE) => Err(ProbeError::Unreachable(if stderr.is_empty() {
                format!("ssh connection to {} failed", node.ip_address)
            } else {
                stderr
            })),
            Some(code) => Err(ProbeError::CommandFailed(format!(
                "remote command exited with status {}: {}",
                code, stderr
            ))),
            None => Err(ProbeError::Unreachable(
                "ssh terminated by signal".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeProfile {
        NodeProfile {
            id: "gpu-01".to_string(),
            name: "gpu-01.hpc".to_string(),
            ip_address: "10.1.0.7".to_string(),
            ssh_user: "probe".to_string(),
            ssh_port: 2222,
        }
    }

    #[test]
    fn test_command_arguments() {
        let session = SshSession::new("ssh", Duration::from_secs(3));
        let command = session.build_command(&node(), "uptime");
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=3",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-p",
                "2222",
                "--",
                "probe@10.1.0.7",
                "uptime",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_unreachable() {
        let session = SshSession::new("/nonexistent/bin/ssh-portal", Duration::from_secs(1));
        let err = session.run(&node(), "true").await.unwrap_err();
        assert!(matches!(err, ProbeError::Unreachable(_)));
    }
}
