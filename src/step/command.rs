//! External tool invocation
//!
//! Installers and builders are plain command lines. The command runs inside
//! a checked-out copy of the input chain; whatever it changes there becomes
//! the step's delta.

use crate::cache::StepFailure;
use crate::error::{PlinthError, PlinthResult, StepErrorKind};
use crate::layer::Delta;
use crate::step::StepContext;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Bytes of stderr kept in failure messages
const STDERR_TAIL: usize = 2000;

/// An argv template with `{name}` placeholders.
///
/// Supported placeholders: `{root}` (checked-out environment), plus whatever
/// the caller passes, e.g. `{manifest}` and `{workdir}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    argv: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandTemplate {
    pub fn new(argv: Vec<String>) -> PlinthResult<Self> {
        if argv.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(PlinthError::User("Command must not be empty".to_string()));
        }
        Ok(Self {
            argv,
            env: BTreeMap::new(),
        })
    }

    /// Add an environment variable for the child process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Stable identity of the command line, used as declared input
    pub fn describe(&self) -> String {
        let mut out = self.argv.join("\u{1f}");
        for (k, v) in &self.env {
            out.push('\n');
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    /// Substitute `{key}` placeholders
    pub fn render(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{}}}", key), value)
                })
            })
            .collect()
    }

    /// Run inside a fresh checkout of the context's input chain and return
    /// what the command changed.
    ///
    /// `cwd` is relative to the checkout root. A non-zero exit is reported
    /// as `kind` with the tail of stderr.
    pub async fn run(
        &self,
        kind: StepErrorKind,
        ctx: &StepContext<'_>,
        cwd: Option<&str>,
        vars: &[(&str, &str)],
    ) -> Result<Delta, StepFailure> {
        let workspace = ctx.checkout().await?;
        let root = workspace.root().to_string_lossy().into_owned();

        let mut all_vars: Vec<(&str, &str)> = vec![("root", root.as_str())];
        all_vars.extend_from_slice(vars);
        let argv = self.render(&all_vars);

        let dir = match cwd {
            Some(rel) => workspace.root().join(rel),
            None => workspace.root().to_path_buf(),
        };

        debug!("Executing {:?} in {}", argv, dir.display());

        let mut cmd = Command::new(&argv[0]);
        // Own process group: terminal signals reach plinth, not the tool
        #[cfg(unix)]
        cmd.process_group(0);

        let output = cmd
            .args(&argv[1..])
            .current_dir(&dir)
            .envs(&self.env)
            .env("PLINTH_ROOT", &root)
            .env("PLINTH_FINGERPRINT", ctx.fingerprint().to_hex())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                StepFailure::new(
                    StepErrorKind::Action,
                    format!("failed to start `{}`: {}", argv[0], e),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let failure = match output.status.code() {
                Some(code) => StepFailure::new(
                    kind,
                    format!("`{}` exited with {}: {}", argv[0], code, tail(stderr.trim())),
                ),
                None => StepFailure::new(
                    StepErrorKind::Interrupted,
                    format!("`{}` terminated by {}: {}", argv[0], signal_name(&output.status), tail(stderr.trim())),
                ),
            };
            return Err(failure);
        }

        workspace.capture().await.map_err(|e| {
            StepFailure::new(StepErrorKind::Action, format!("capturing changes failed: {}", e))
        })
    }
}

#[cfg(unix)]
fn signal_name(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    status
        .signal()
        .map_or_else(|| "signal".to_string(), |sig| format!("signal {}", sig))
}

#[cfg(not(unix))]
fn signal_name(_status: &std::process::ExitStatus) -> String {
    "signal".to_string()
}

fn tail(text: &str) -> &str {
    if text.len() <= STDERR_TAIL {
        return text;
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
