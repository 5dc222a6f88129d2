// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Decoding of the detector's result line.
//!
//! The detector reports every box of an image on a single line:
//!
//! ```text
//! yolor:boxes:person,93.28,249,205,261,241,person,90.11,272,205,287,241,
//! ```
//!
//! that is, a fixed token followed by groups of `label,probability,left,top,right,bottom`.
//! There is no escaping, so labels containing commas cannot be represented.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SEPARATOR: char = ',';
pub const GROUP_SIZE: usize = 6;

const FIELD_NAMES: [&str; GROUP_SIZE] = ["label", "probability", "left", "top", "right", "bottom"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub probability: f64,
    pub label: String,
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// What to do with a numeric field that does not parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum FieldPolicy {
    /// Use zero for the offending field and keep the record.
    #[default]
    #[serde(rename = "zero")]
    ZeroOnError,
    /// Fail the whole line.
    #[serde(rename = "strict")]
    Strict,
}

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Results are not match: {fields} fields is not a multiple of {}", GROUP_SIZE)]
    FieldCountMismatch { fields: usize },
    #[error("invalid {field} {value:?} in detection #{index}")]
    InvalidField {
        index: usize,
        field: &'static str,
        value: String,
    },
}

/// Parse a result line into detections.
///
/// A line that does not start with `token`, or carries no separator at all,
/// has no detections. A field count that does not split evenly into groups
/// is an error rather than a partial result.
pub fn parse_detections(
    line: &str,
    token: &str,
    policy: FieldPolicy,
) -> Result<Vec<Detection>, ProtocolError> {
    let line = line.trim_end();
    let Some(body) = line.strip_prefix(token) else {
        return Ok(Vec::new());
    };
    if !body.contains(SEPARATOR) {
        return Ok(Vec::new());
    }
    let body = body.strip_suffix(SEPARATOR).unwrap_or(body);

    let fields: Vec<&str> = body.split(SEPARATOR).collect();
    if fields.len() % GROUP_SIZE != 0 {
        return Err(ProtocolError::FieldCountMismatch {
            fields: fields.len(),
        });
    }

    fields
        .chunks_exact(GROUP_SIZE)
        .enumerate()
        .map(|(index, group)| parse_group(index, group, policy))
        .collect()
}

fn parse_group(
    index: usize,
    group: &[&str],
    policy: FieldPolicy,
) -> Result<Detection, ProtocolError> {
    let coord = |i: usize| numeric_field::<u32>(index, i, group[i], policy);
    Ok(Detection {
        label: group[0].to_string(),
        probability: numeric_field::<f64>(index, 1, group[1], policy)?,
        left: coord(2)?,
        top: coord(3)?,
        right: coord(4)?,
        bottom: coord(5)?,
    })
}

/// Fields are parsed verbatim, so a padded number such as `" 249"` does not parse.
fn numeric_field<T>(
    index: usize,
    position: usize,
    value: &str,
    policy: FieldPolicy,
) -> Result<T, ProtocolError>
where
    T: std::str::FromStr + Default,
{
    match (value.parse::<T>(), policy) {
        (Ok(v), _) => Ok(v),
        (Err(_), FieldPolicy::ZeroOnError) => Ok(T::default()),
        (Err(_), FieldPolicy::Strict) => Err(ProtocolError::InvalidField {
            index,
            field: FIELD_NAMES[position],
            value: value.to_string(),
        }),
    }
}
