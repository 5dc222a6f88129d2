// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    /// Supervisor built, nothing launched yet.
    Uninitialized,
    /// Retiring the previous process and launching a new one.
    Starting,
    /// Child process is alive and wired to the queues.
    Running,
    /// Child exited, or could not be launched.
    Exited,
    /// Waiting out the restart delay.
    Restarting,
    /// Shut down; final.
    Terminated,
}

impl RoleState {
    pub fn is_running(self) -> bool {
        self == RoleState::Running
    }

    pub(crate) fn can_transition_to(self, next: RoleState) -> bool {
        use RoleState::*;
        matches!(
            (self, next),
            (Uninitialized, Starting)
                | (Starting, Running)
                | (Starting, Exited)
                | (Running, Exited)
                | (Exited, Restarting)
                | (Restarting, Starting)
        ) || (next == Terminated && self != Terminated)
    }
}

impl fmt::Display for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleState::Uninitialized => write!(f, "uninitialized"),
            RoleState::Starting => write!(f, "starting"),
            RoleState::Running => write!(f, "running"),
            RoleState::Exited => write!(f, "exited"),
            RoleState::Restarting => write!(f, "restarting"),
            RoleState::Terminated => write!(f, "terminated"),
        }
    }
}
