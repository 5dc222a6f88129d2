// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use std::path::Path;

const NAMES_KEY: &str = "names";

/// Parse a darknet data config (`classes = 80`, `names = data/coco.names`, ...)
/// into key-value pairs. Comments (#), blank and malformed lines are skipped.
pub fn parse_data_config(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Class names listed in the `names` file of `data_cfg`, resolved against `darknet_root`.
///
/// A data config without a `names` entry has no class names.
pub fn class_names(data_cfg: &Path, darknet_root: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(data_cfg)
        .with_context(|| format!("reading data config: {}", data_cfg.display()))?;
    let Some((_, names_file)) = parse_data_config(&contents)
        .into_iter()
        .find(|(key, _)| key == NAMES_KEY)
    else {
        return Ok(Vec::new());
    };

    let path = darknet_root.join(names_file);
    let names = std::fs::read_to_string(&path)
        .with_context(|| format!("reading names file: {}", path.display()))?;
    Ok(names.lines().map(String::from).collect())
}
