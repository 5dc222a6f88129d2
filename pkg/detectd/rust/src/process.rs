// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::role::CommandSpec;
use anyhow::{Context, Result, bail};
use log::{info, warn};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// The three standard streams of a freshly spawned child.
pub struct ProcessStreams {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

pub struct ManagedProcess {
    pub name: String,
    command: CommandSpec,
    child: Option<Child>,
}

impl ManagedProcess {
    pub fn new(name: String, command: CommandSpec) -> Self {
        Self {
            name,
            command,
            child: None,
        }
    }

    /// Launch the child with all three standard streams piped.
    pub fn spawn(&mut self) -> Result<ProcessStreams> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("[{}] failed to spawn: {}", self.name, self.command))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            bail!("[{}] unable to open the standard streams", self.name);
        };

        info!(
            "[{}] spawned (pid={}, cmd={})",
            self.name,
            child.id().unwrap_or(0),
            self.command
        );
        self.child = Some(child);
        Ok(ProcessStreams {
            stdin,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Forcibly terminate the child. The exit still has to be collected with [`wait`](Self::wait).
    pub fn kill(&mut self) {
        if let Some(ref mut child) = self.child
            && let Err(e) = child.start_kill()
        {
            warn!("[{}] failed to kill: {e}", self.name);
        }
    }

    /// Wait for the child to exit. Returns the exit status.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let child = self.child.as_mut().context("no child process to wait on")?;
        let status = child.wait().await?;
        info!("[{}] exited with {status}", self.name);
        self.child = None;
        Ok(status)
    }
}
