use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of a payload execution.
#[derive(Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Invokes the payload execution binary for each job.
///
/// Arguments are passed as `--job-id`, `--type`, `--payload`; exit code 0 is
/// success. A `timeout_sec > 0` on the job overrides the default timeout.
#[derive(Debug, Clone)]
pub struct PayloadRunner {
    binary_path: String,
    default_timeout: Duration,
}

impl PayloadRunner {
    pub fn new(binary_path: String) -> Self {
        Self {
            binary_path,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub async fn run(
        &self,
        job_id: &str,
        job_type: &str,
        payload: &str,
        timeout_sec: Option<u64>,
    ) -> ExecutionResult {
        let timeout = match timeout_sec {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => self.default_timeout,
        };

        let output = Command::new(&self.binary_path)
            .arg("--job-id")
            .arg(job_id)
            .arg("--type")
            .arg(job_type)
            .arg("--payload")
            .arg(payload)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, output).await {
            Err(_) => ExecutionResult {
                success: false,
                output: None,
                error: Some("execution timeout".to_string()),
            },
            Ok(Err(e)) => ExecutionResult {
                success: false,
                output: None,
                error: Some(e.to_string()),
            },
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if output.status.success() {
                    ExecutionResult {
                        success: true,
                        output: non_empty(stdout),
                        error: None,
                    }
                } else {
                    let error = if stderr.is_empty() {
                        format!("exit code {}", output.status.code().unwrap_or(-1))
                    } else {
                        stderr
                    };
                    ExecutionResult {
                        success: false,
                        output: non_empty(stdout),
                        error: Some(error),
                    }
                }
            }
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_reports_failure() {
        let runner = PayloadRunner::new("/nonexistent/payload-binary".to_string());
        let result = runner.run("job-1", "", "data", None).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn exit_zero_is_success() {
        // `true` ignores the payload args and exits 0.
        let runner = PayloadRunner::new("true".to_string());
        let result = runner.run("job-1", "", "data", None).await;
        assert!(result.success);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_reports_exit_code() {
        let runner = PayloadRunner::new("false".to_string());
        let result = runner.run("job-1", "", "data", None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("exit code 1"));
    }
}
