//! Responder backed by a local CLI.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::{AiResponder, SYSTEM_INSTRUCTION};

/// Runs `program args.. <prompt>` and returns stdout.
pub struct CommandResponder {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandResponder {
    /// `command` is the program followed by its leading arguments.
    pub fn new(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("AI command is empty")?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }
}

#[async_trait]
impl AiResponder for CommandResponder {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let full_prompt = format!("{SYSTEM_INSTRUCTION}\n\n# Request\n\n{prompt}");

        tracing::info!(program = %self.program, "Executing AI command");
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&full_prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.program))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("{} timed out after {:?}", self.program, self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} failed: {}", self.program, stderr.trim());
        }
        Ok(stdout.trim().to_string())
    }
}
