// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::protocol::ProtocolError;
use crate::role::Role;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("no {0} is configured")]
    UnknownRole(Role),
    #[error("process is not running")]
    NotRunning,
    #[error("process exited before completing the request")]
    ProcessExited,
    #[error("no completion marker after {0:?}")]
    Timeout(Duration),
    #[error("shutting down")]
    ShuttingDown,
    #[error("output queue closed")]
    QueueClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
