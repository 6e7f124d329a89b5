//! External tool invocation.
//!
//! Every engine and helper call goes through [`ToolRunner`], so the
//! coordinator can be driven by a real subprocess or by a test double.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, info, trace};

use metakmer_shared::{MetakmerError, Result};

use crate::pipeline::Stage;

/// Bytes of stderr kept in a subprocess error message.
const STDERR_TAIL_BYTES: usize = 2000;

/// One fully-resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Stage this call belongs to.
    pub stage: Stage,
    /// Comparison unit label, for per-unit calls.
    pub unit: Option<String>,
    /// Executable name or path.
    pub program: String,
    pub args: Vec<String>,
    /// Artifacts the call is expected to produce.
    pub outputs: Vec<PathBuf>,
}

impl Invocation {
    /// Shell-like rendering for logs and `plan` output.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_arg)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=,:+@".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// What an external call returned.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Convert a non-zero exit into a `Subprocess` error.
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let trimmed = self.stderr.trim();
        let start = trimmed.len().saturating_sub(STDERR_TAIL_BYTES);
        let start = (start..trimmed.len())
            .find(|i| trimmed.is_char_boundary(*i))
            .unwrap_or(trimmed.len());
        Err(MetakmerError::Subprocess {
            program: program.to_string(),
            code: self.exit_code,
            stderr: trimmed[start..].to_string(),
        })
    }
}

/// Capability to run one external command to completion.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run the command and report its exit status and captured output.
    ///
    /// A non-zero exit is *not* an error here; only failure to launch is.
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Runs invocations as real child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        debug!(command = %invocation.command_line(), "spawning");

        let output = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MetakmerError::Subprocess {
                program: invocation.program.clone(),
                code: None,
                stderr: format!("failed to spawn: {e}. Is `{}` installed?", invocation.program),
            })?;

        let result = ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        for line in result.stdout.lines().filter(|l| !l.trim().is_empty()) {
            trace!(program = %invocation.program, "{line}");
        }
        for line in result.stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!(program = %invocation.program, "{line}");
        }
        info!(
            program = %invocation.program,
            stage = invocation.stage.number(),
            unit = invocation.unit.as_deref().unwrap_or("-"),
            exit_code = ?result.exit_code,
            "external call finished"
        );

        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(program: &str, args: &[&str]) -> Invocation {
        Invocation {
            stage: Stage::Count,
            unit: None,
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            outputs: vec![],
        }
    }

    #[test]
    fn command_line_quotes_only_when_needed() {
        let inv = invocation("engine", &["count", "-k", "21", "my reads.fq", "it's"]);
        assert_eq!(
            inv.command_line(),
            r"engine count -k 21 'my reads.fq' 'it'\''s'"
        );
    }

    #[test]
    fn check_turns_non_zero_exit_into_error() {
        let ok = ToolOutput {
            exit_code: Some(0),
            ..ToolOutput::default()
        };
        assert!(ok.check("engine").is_ok());

        let failed = ToolOutput {
            exit_code: Some(3),
            stdout: String::new(),
            stderr: "\nout of memory\n".into(),
        };
        match failed.check("engine").unwrap_err() {
            MetakmerError::Subprocess { program, code, stderr } => {
                assert_eq!(program, "engine");
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "out of memory");
            }
            other => panic!("unexpected error: {other}"),
        }

        let killed = ToolOutput::default();
        assert!(killed.check("engine").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_reports_exit_status() {
        let runner = ProcessRunner;

        let ok = runner.run(&invocation("true", &[])).await.unwrap();
        assert!(ok.success());

        let failed = runner.run(&invocation("false", &[])).await.unwrap();
        assert_eq!(failed.exit_code, Some(1));

        let echoed = runner.run(&invocation("echo", &["42 components"])).await.unwrap();
        assert_eq!(echoed.stdout.trim(), "42 components");
    }

    #[tokio::test]
    async fn process_runner_reports_missing_program() {
        let err = ProcessRunner
            .run(&invocation("metakmer-no-such-binary-xyz", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, MetakmerError::Subprocess { code: None, .. }));
    }
}
