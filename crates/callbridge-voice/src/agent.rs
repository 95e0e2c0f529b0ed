use crate::config::AgentConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Maximum prompt size handed to the agent (64 KiB).
const MAX_PROMPT_BYTES: usize = 64 * 1024;

/// The conversational backend: prompt in, reply text out.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn reply(&self, prompt: &str) -> Result<String, VoiceError>;
}

/// Runs an external command per reply.
///
/// The prompt is written to the child's stdin and the reply read from its
/// stdout. The child is killed if it outlives the timeout.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAgent {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            &config.command,
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl AgentBackend for CommandAgent {
    async fn reply(&self, prompt: &str) -> Result<String, VoiceError> {
        if prompt.len() > MAX_PROMPT_BYTES {
            return Err(VoiceError::Agent(format!(
                "prompt exceeds maximum size: {} bytes (limit: {} bytes)",
                prompt.len(),
                MAX_PROMPT_BYTES
            )));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Agent(format!("Failed to spawn {:?}: {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Agent("Failed to open stdin".to_string()))?;
        let prompt_owned = prompt.to_string();

        // Write on a separate task so a chatty child cannot block on a full
        // stdout pipe while we are still writing.
        let write_task = tokio::spawn(async move {
            stdin.write_all(prompt_owned.as_bytes()).await?;
            stdin.shutdown().await
        });

        // On timeout the wait future is dropped together with the child,
        // and kill_on_drop terminates the process.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| VoiceError::Agent(format!("Failed to wait for agent: {}", e)))?,
            Err(_) => {
                warn!(
                    program = ?self.program,
                    timeout_secs = self.timeout.as_secs(),
                    "agent backend exceeded its timeout; killed"
                );
                write_task.abort();
                return Err(VoiceError::Timeout("agent backend", self.timeout.as_secs()));
            }
        };

        match write_task.await {
            Ok(Ok(())) => {}
            // The child may legitimately exit without reading all input.
            Ok(Err(e)) => debug!("agent stdin closed early: {}", e),
            Err(e) => debug!("agent stdin task failed: {}", e),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Agent(format!(
                "agent exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
