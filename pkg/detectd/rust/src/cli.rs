// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "dd-detectd")]
#[command(about = "Supervises darknet detector processes and serves detections over HTTP")]
#[command(version)]
pub struct Args {
    /// YAML config file; YOLOR_* environment variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, overrides the config
    #[arg(short, long)]
    pub listen: Option<String>,
}
