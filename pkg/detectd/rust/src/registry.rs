// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::Config;
use crate::errors::SubmitError;
use crate::protocol::Detection;
use crate::role::{CommandSpec, Role};
use crate::supervisor::{RoleSupervisor, SupervisorOptions};
use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One supervisor per role, sharing a single shutdown flag.
pub struct Registry {
    supervisors: HashMap<Role, Arc<RoleSupervisor>>,
    tasks: Mutex<Vec<(Role, JoinHandle<()>)>>,
    shutdown: CancellationToken,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            supervisors: HashMap::new(),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Supervise every role enabled in `config`. Must be called within a tokio runtime.
    pub fn launch(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        let options = config.supervisor_options();
        for role in config.roles() {
            registry.register(role, config.command(role)?, options.clone());
        }
        Ok(registry)
    }

    /// Start supervising `role`, replacing nothing: a role can be registered once.
    pub fn register(
        &mut self,
        role: Role,
        command: CommandSpec,
        options: SupervisorOptions,
    ) -> Arc<RoleSupervisor> {
        if let Some(existing) = self.supervisors.get(&role) {
            return Arc::clone(existing);
        }
        info!("[{role}] supervising {command}");
        let supervisor = Arc::new(RoleSupervisor::new(
            role,
            command,
            options,
            self.shutdown.child_token(),
        ));
        let task = tokio::spawn(Arc::clone(&supervisor).supervise());
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((role, task));
        self.supervisors.insert(role, Arc::clone(&supervisor));
        supervisor
    }

    pub fn get(&self, role: Role) -> Option<&Arc<RoleSupervisor>> {
        self.supervisors.get(&role)
    }

    pub fn supervisors(&self) -> impl Iterator<Item = &Arc<RoleSupervisor>> {
        self.supervisors.values()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn submit(&self, role: Role, image: &Path) -> Result<Vec<Detection>, SubmitError> {
        self.get(role)
            .ok_or(SubmitError::UnknownRole(role))?
            .submit(image)
            .await
    }

    /// Force a re-setup of `role`'s process.
    pub fn restart(&self, role: Role) -> Result<(), SubmitError> {
        let supervisor = self.get(role).ok_or(SubmitError::UnknownRole(role))?;
        info!("[{role}] restart requested");
        supervisor.request_resetup();
        Ok(())
    }

    /// Stop every role for good. See [`crate::shutdown::shutdown_all`].
    pub async fn shutdown(&self) {
        crate::shutdown::shutdown_all(self).await;
    }

    /// Set the shutdown flag for every role.
    pub(crate) fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn take_tasks(&self) -> Vec<(Role, JoinHandle<()>)> {
        std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
