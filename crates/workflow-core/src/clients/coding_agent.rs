//! Coding agent adapter that shells out to a configured CLI

use async_trait::async_trait;
use tokio::process::Command;
use crate::config::CodingAgentConfig;
use crate::error::{WorkflowError, Result};
use crate::workflow::traits::{CodingAgent, CodingAgentOutput, CodingAgentRequest};

const MAX_OUTPUT_CHARS: usize = 16_000;

/// Runs `command args... <prompt>` in the request's working directory
pub struct CommandCodingAgent {
    command: String,
    args: Vec<String>,
}

impl CommandCodingAgent {
    pub fn new(config: CodingAgentConfig) -> Self {
        Self {
            command: config.command,
            args: config.args,
        }
    }

    fn truncate(mut text: String) -> String {
        if text.len() > MAX_OUTPUT_CHARS {
            let mut cut = MAX_OUTPUT_CHARS;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n... (truncated)");
        }
        text
    }
}

#[async_trait]
impl CodingAgent for CommandCodingAgent {
    async fn execute(&self, request: CodingAgentRequest) -> Result<CodingAgentOutput> {
        log::debug!(
            "Running coding agent '{}' in {:?} (timeout {:?})",
            self.command,
            request.working_directory,
            request.timeout
        );

        let output = tokio::time::timeout(
            request.timeout,
            Command::new(&self.command)
                .args(&self.args)
                .arg(&request.prompt)
                .current_dir(&request.working_directory)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| WorkflowError::Agent(format!("'{}' timed out after {:?}", self.command, request.timeout)))?
        .map_err(|e| WorkflowError::Agent(format!("failed to launch '{}': {}", self.command, e)))?;

        let result = CodingAgentOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            output: Self::truncate(String::from_utf8_lossy(&output.stdout).into_owned()),
            stderr: Self::truncate(String::from_utf8_lossy(&output.stderr).into_owned()),
        };

        if !result.success {
            log::warn!("Coding agent exited with {:?}", result.exit_code);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn agent(command: &str, args: &[&str]) -> CommandCodingAgent {
        CommandCodingAgent::new(CodingAgentConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs: 5,
        })
    }

    #[test]
    fn test_truncate_long_output() {
        let text = "x".repeat(MAX_OUTPUT_CHARS + 10);
        let truncated = CommandCodingAgent::truncate(text);
        assert!(truncated.ends_with("(truncated)"));
        assert!(truncated.len() < MAX_OUTPUT_CHARS + 20);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_is_passed_as_last_argument() {
        let temp_dir = TempDir::new().unwrap();
        let agent = agent("sh", &["-c", "echo \"$0\""]);
        let output = agent
            .execute(CodingAgentRequest {
                working_directory: temp_dir.path().to_path_buf(),
                prompt: "APPROVE".to_string(),
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.output.trim(), "APPROVE");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_unsuccessful_output() {
        let temp_dir = TempDir::new().unwrap();
        let agent = agent("sh", &["-c", "exit 3"]);
        let output = agent
            .execute(CodingAgentRequest {
                working_directory: temp_dir.path().to_path_buf(),
                prompt: "ignored".to_string(),
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_agent_error() {
        let temp_dir = TempDir::new().unwrap();
        let agent = agent("sleep", &[]);
        let result = agent
            .execute(CodingAgentRequest {
                working_directory: temp_dir.path().to_path_buf(),
                prompt: "5".to_string(),
                timeout: Duration::from_millis(100),
            })
            .await;
        assert!(matches!(result, Err(WorkflowError::Agent(_))));
    }
}
