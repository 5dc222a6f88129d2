// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod errors;
pub mod message;
pub mod names;
pub mod process;
pub mod protocol;
pub mod reassembler;
pub mod registry;
pub mod role;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod supervisor;
