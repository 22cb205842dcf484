//! Boot duration parameter
//!
//! Runs `systemd-analyze time` and extracts the total from a line such as
//! `Startup finished in 1.2s (kernel) + 3.4s (userspace) = 4.6s`.

use async_trait::async_trait;
use regex::Regex;
use std::num::ParseFloatError;
use std::process::{ExitStatus, Stdio};
use std::sync::OnceLock;
use tokio::process::Command;

use super::{ParamSource, ParamValue, ResolveError};
use crate::logger;

const DEFAULT_PROGRAM: &str = "systemd-analyze";
const DEFAULT_ARGS: &[&str] = &["time"];
const TOTAL_PATTERN: &str = r"=\s*([\d.]+)s";

/// Why a measurement failed. Logged only, never sent to clients.
#[derive(Debug, thiserror::Error)]
pub enum MeasureError {
    #[error("could not execute {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },
    #[error("could not parse boot duration: no total found in output")]
    MissingPattern,
    #[error("could not parse boot duration from '{text}': {source}")]
    InvalidNumber {
        text: String,
        source: ParseFloatError,
    },
}

/// Boot duration source backed by an external command
#[derive(Debug, Clone)]
pub struct BootDuration {
    program: String,
    args: Vec<String>,
}

impl Default for BootDuration {
    fn default() -> Self {
        Self::with_command(DEFAULT_PROGRAM, DEFAULT_ARGS.iter().copied())
    }
}

impl BootDuration {
    /// Use a different command whose stdout has the `systemd-analyze time` shape
    pub fn with_command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run the command once and parse its output
    pub async fn measure(&self) -> Result<f64, MeasureError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MeasureError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MeasureError::Exit {
                program: self.program.clone(),
                status: output.status,
            });
        }

        parse_boot_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ParamSource for BootDuration {
    async fn value(&self) -> Result<ParamValue, ResolveError> {
        match self.measure().await {
            Ok(seconds) => Ok(ParamValue::Number(seconds)),
            Err(e) => {
                logger::log_error(&e.to_string());
                Err(ResolveError::Measurement("boot duration"))
            }
        }
    }
}

fn total_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Constant pattern, so compiling it cannot fail
    PATTERN.get_or_init(|| Regex::new(TOTAL_PATTERN).expect("valid regex"))
}

/// Extract the total seconds (`= <n>s`) from `systemd-analyze time` output
pub fn parse_boot_duration(output: &str) -> Result<f64, MeasureError> {
    let text = total_pattern()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .ok_or(MeasureError::MissingPattern)?
        .as_str();

    text.parse::<f64>().map_err(|source| MeasureError::InvalidNumber {
        text: text.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Startup finished in 2.120s (kernel) + 10.225s (userspace) = 12.345s\n\
                          graphical.target reached after 10.100s in userspace\n";

    fn echo(output: &str) -> BootDuration {
        BootDuration::with_command("sh", ["-c".to_string(), format!("printf '{output}'")])
    }

    #[test]
    fn test_total_pattern_compiles() {
        assert!(Regex::new(TOTAL_PATTERN).is_ok());
    }

    #[test]
    fn test_parse_total() {
        assert!((parse_boot_duration(SAMPLE).unwrap() - 12.345).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_with_firmware_and_loader() {
        let out = "Startup finished in 5.1s (firmware) + 2.0s (loader) + 1.5s (kernel) + 3.2s (userspace) = 11.800s";
        assert!((parse_boot_duration(out).unwrap() - 11.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_missing_total() {
        let err = parse_boot_duration("Bootup is not yet finished.\n").unwrap_err();
        assert!(matches!(err, MeasureError::MissingPattern));
    }

    #[test]
    fn test_parse_malformed_number() {
        let err = parse_boot_duration("... = 1.2.3s").unwrap_err();
        match err {
            MeasureError::InvalidNumber { text, .. } => assert_eq!(text, "1.2.3"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_measure_from_command() {
        let source = echo("Startup finished in 1.0s (kernel) + 2.0s (userspace) = 12.345s\\n");
        let value = source.value().await.unwrap();
        assert_eq!(value, ParamValue::Number(12.345));
    }

    #[tokio::test]
    async fn test_measure_missing_binary() {
        let source = BootDuration::with_command("sysinfo-server-no-such-binary", ["time"]);
        assert!(matches!(source.measure().await, Err(MeasureError::Spawn { .. })));
        assert_eq!(
            source.value().await,
            Err(ResolveError::Measurement("boot duration"))
        );
    }

    #[tokio::test]
    async fn test_measure_failed_exit() {
        let source = BootDuration::with_command("sh", ["-c", "echo '= 3.0s'; exit 3"]);
        assert!(matches!(source.measure().await, Err(MeasureError::Exit { .. })));
        assert_eq!(
            source.value().await,
            Err(ResolveError::Measurement("boot duration"))
        );
    }

    #[tokio::test]
    async fn test_measure_unexpected_output() {
        let source = echo("hello\\n");
        assert!(matches!(source.measure().await, Err(MeasureError::MissingPattern)));
        assert_eq!(
            source.value().await,
            Err(ResolveError::Measurement("boot duration"))
        );
    }
}
