use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{bail, format_err, Error};
use tokio_util::sync::CancellationToken;

use preflight_buildcfg::DEFAULT_COMMAND_TIMEOUT_SECS;

/// Deadline applied to a single command when the context does not set a tighter one.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS);

/// Execution context of one probe run.
///
/// Carries an optional overall deadline, the per command timeout and a cancellation token. Every
/// child process started through [`run_command`] is bound to it.
#[derive(Clone, Debug)]
pub struct ProbeContext {
    deadline: Option<Instant>,
    command_timeout: Duration,
    cancel: CancellationToken,
}

impl Default for ProbeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeContext {
    pub fn new() -> Self {
        Self {
            deadline: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Set an overall deadline, `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Timeout for the next command: the per command timeout, capped by the overall deadline.
    pub fn command_timeout(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .command_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.command_timeout,
        }
    }
}

/// Helper to check result from std::process::Command output
///
/// The exit_code_check() function should return true if the exit code
/// is considered successful.
pub fn command_output(
    output: std::process::Output,
    exit_code_check: Option<fn(i32) -> bool>,
) -> Result<Vec<u8>, Error> {
    if !output.status.success() {
        match output.status.code() {
            Some(code) => {
                let is_ok = match exit_code_check {
                    Some(check_fn) => check_fn(code),
                    None => code == 0,
                };
                if !is_ok {
                    let msg = String::from_utf8(output.stderr)
                        .map(|m| {
                            if m.is_empty() {
                                String::from("no error message")
                            } else {
                                m.trim_end().to_string()
                            }
                        })
                        .unwrap_or_else(|_| String::from("non utf8 error message (suppressed)"));

                    bail!("status code: {} - {}", code, msg);
                }
            }
            None => bail!("terminated by signal"),
        }
    }

    Ok(output.stdout)
}

/// Helper to check result from std::process::Command output, returns String.
///
/// The exit_code_check() function should return true if the exit code
/// is considered successful.
pub fn command_output_as_string(
    output: std::process::Output,
    exit_code_check: Option<fn(i32) -> bool>,
) -> Result<String, Error> {
    let output = command_output(output, exit_code_check)?;
    let output = String::from_utf8(output)?;
    Ok(output)
}

/// Run `program` with `args` and return its standard output.
///
/// The child is killed when the context deadline expires or the context gets cancelled; the
/// returned error then says `timed out` respectively `cancelled`. Output is only returned for a
/// successful exit, never partially.
pub async fn run_command(
    ctx: &ProbeContext,
    program: &str,
    args: &[&str],
) -> Result<String, Error> {
    if ctx.is_cancelled() {
        bail!("command {:?} cancelled before start", program);
    }

    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let timeout = ctx.command_timeout();
    let cancel = ctx.cancel_token();
    log::debug!("running {:?} {:?} (timeout {:?})", program, args, timeout);

    let result = tokio::select! {
        _ = cancel.cancelled() => None,
        res = tokio::time::timeout(timeout, command.output()) => Some(res),
    };

    let output = match result {
        None => bail!("command {:?} cancelled", program),
        Some(Err(_)) => bail!("command {:?} timed out after {:?}", program, timeout),
        Some(Ok(Err(err))) => bail!("failed to execute {:?} - {}", program, err),
        Some(Ok(Ok(output))) => output,
    };

    command_output_as_string(output, None)
        .map_err(|err| format_err!("command {:?} {:?} failed - {}", program, args, err))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_run_command_output() -> Result<(), Error> {
        let ctx = ProbeContext::new();
        let output = run_command(&ctx, "sh", &["-c", "echo hello"]).await?;
        assert_eq!(output, "hello\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_command_failure_has_no_output() {
        let ctx = ProbeContext::new();
        let err = run_command(&ctx, "sh", &["-c", "echo partial; exit 3"])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("status code: 3"));
    }

    #[tokio::test]
    async fn test_run_command_timeout() {
        let ctx = ProbeContext::new().with_command_timeout(Duration::from_millis(100));
        let err = run_command(&ctx, "sleep", &["5"]).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_command_cancelled() {
        let ctx = ProbeContext::new();
        ctx.cancel();
        let err = run_command(&ctx, "sh", &["-c", "true"]).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_deadline_caps_command_timeout() {
        let ctx = ProbeContext::new().with_timeout(Duration::from_millis(10));
        assert!(ctx.command_timeout() <= Duration::from_millis(10));

        let ctx = ProbeContext::new();
        assert_eq!(ctx.command_timeout(), DEFAULT_COMMAND_TIMEOUT);
    }
}
