//! Launching the external agent collaborator.
//!
//! The agent is a black box: a user-supplied argv prefix that consumes a
//! prompt file and writes one report file. We only compose the invocation,
//! pick the working directory, and get out of the way.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

/// User-supplied agent invocation prefix, e.g. `codex exec --fast`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCmd {
    argv: Vec<String>,
}

impl AgentCmd {
    /// Build from trailing CLI arguments; empty means "no agent, print how".
    pub fn parse(args: &[String]) -> Result<Option<Self>> {
        if args.is_empty() {
            return Ok(None);
        }
        if args[0].trim().is_empty() {
            bail!("agent command must start with a program name");
        }
        Ok(Some(Self {
            argv: args.to_vec(),
        }))
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// The equivalent shell line, for operators running the agent by hand.
    pub fn manual_invocation(&self, cwd: &Path, prompt: &Path) -> String {
        let mut parts: Vec<String> = self.argv.iter().map(|a| sh_quote(a)).collect();
        parts.push(sh_quote(&prompt.display().to_string()));
        format!("cd {} && {}", sh_quote(&cwd.display().to_string()), parts.join(" "))
    }

    /// Replace this process with the agent (prompt path appended to argv).
    ///
    /// Does not return on success: Unix swaps the process image, other
    /// platforms wait for the child and exit with its status. An error means
    /// the launch itself failed.
    pub fn hand_off(&self, cwd: &Path, prompt: &Path) -> Result<()> {
        info!(agent = %self.program(), cwd = %cwd.display(), "handing off to agent");
        let mut cmd = self.command(cwd, prompt);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let err = cmd.exec();
            Err(err).with_context(|| format!("launch agent '{}'", self.program()))
        }
        #[cfg(not(unix))]
        {
            let status = cmd
                .status()
                .with_context(|| format!("launch agent '{}'", self.program()))?;
            std::process::exit(status.code().unwrap_or(1));
        }
    }

    /// Run the agent to completion on the caller's terminal.
    pub fn run_wait(&self, cwd: &Path, prompt: &Path) -> Result<()> {
        debug!(agent = %self.program(), "running agent to completion");
        let status = self
            .command(cwd, prompt)
            .status()
            .with_context(|| format!("launch agent '{}'", self.program()))?;
        if !status.success() {
            bail!("agent '{}' exited with {status}", self.program());
        }
        Ok(())
    }

    fn command(&self, cwd: &Path, prompt: &Path) -> Command {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]).arg(prompt).current_dir(cwd);
        cmd
    }
}

/// Quote an argument for display in a copy-pasteable shell line.
fn sh_quote(arg: &str) -> String {
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c));
    if plain && !arg.is_empty() {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
