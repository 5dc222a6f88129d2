// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::protocol::FieldPolicy;
use crate::role::{CommandSpec, Role};
use crate::supervisor::SupervisorOptions;
use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_DARKNET_ROOT: &str = "YOLOR_DARKNET_ROOT";
const ENV_DATA_CFG: &str = "YOLOR_DATA_CFG";
const ENV_NETWORK_CFG: &str = "YOLOR_NETWORK_CFG";
const ENV_WEIGHT_FILE: &str = "YOLOR_WEIGHT_FILE";
const ENV_LISTEN_ADDR: &str = "YOLOR_LISTEN_ADDR";
const ENV_IMAGE_DIR: &str = "YOLOR_IMAGE_DIR";
const ENV_LOG_LEVEL: &str = "YOLOR_LOG_LEVEL";

const DARKNET_BINARY: &str = "darknet";

fn default_restart_delay_secs() -> f64 {
    3.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Prefix of the line carrying the detections.
    pub result_token: String,
    /// Prefix of the line that ends the output for one image.
    pub completion_marker: String,
    pub numeric_fields: FieldPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            result_token: "yolor:boxes:".to_string(),
            completion_marker: "yolor: Done predicating".to_string(),
            numeric_fields: FieldPolicy::ZeroOnError,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the `darknet` executable; names files are resolved against it.
    pub darknet_root: Option<PathBuf>,
    pub data_cfg: PathBuf,
    pub network_cfg: PathBuf,
    pub weight_file: PathBuf,
    pub listen_addr: String,
    /// Where uploaded images are staged. Defaults to `<cwd>/images`.
    pub image_dir: Option<PathBuf>,
    pub log_level: String,
    pub restart_delay_secs: f64,
    pub session_timeout_secs: Option<f64>,
    pub protocol: ProtocolConfig,
    pub trainer: TrainerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            darknet_root: None,
            data_cfg: PathBuf::from("cfg/coco.data"),
            network_cfg: PathBuf::from("cfg/yolov3.cfg"),
            weight_file: PathBuf::from("weights/yolov3.weights"),
            listen_addr: "0.0.0.0:8080".to_string(),
            image_dir: None,
            log_level: "info".to_string(),
            restart_delay_secs: default_restart_delay_secs(),
            session_timeout_secs: None,
            protocol: ProtocolConfig::default(),
            trainer: TrainerConfig::default(),
        }
    }
}

impl Config {
    /// Read `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => parse_config(path)?,
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_var(ENV_DARKNET_ROOT) {
            self.darknet_root = Some(PathBuf::from(v));
        }
        if let Some(v) = env_var(ENV_DATA_CFG) {
            self.data_cfg = PathBuf::from(v);
        }
        if let Some(v) = env_var(ENV_NETWORK_CFG) {
            self.network_cfg = PathBuf::from(v);
        }
        if let Some(v) = env_var(ENV_WEIGHT_FILE) {
            self.weight_file = PathBuf::from(v);
        }
        if let Some(v) = env_var(ENV_LISTEN_ADDR) {
            self.listen_addr = v;
        }
        if let Some(v) = env_var(ENV_IMAGE_DIR) {
            self.image_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_var(ENV_LOG_LEVEL) {
            self.log_level = v;
        }
    }

    pub fn log_level(&self) -> Result<log::Level> {
        self.log_level
            .parse()
            .with_context(|| format!("unknown log level {:?}", self.log_level))
    }

    pub fn darknet_root(&self) -> Result<PathBuf> {
        match self.darknet_root {
            Some(ref root) => Ok(root.clone()),
            None => std::env::current_dir().context("resolving current directory"),
        }
    }

    pub fn image_dir(&self) -> Result<PathBuf> {
        match self.image_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()
                .context("resolving current directory")?
                .join("images")),
        }
    }

    /// Check the darknet inputs and make sure the image directory exists.
    pub fn validate(&self) -> Result<()> {
        let root = self.darknet_root()?;
        if !root.is_dir() {
            bail!("DarknetRoot {} is not valid", root.display());
        }
        for (name, path) in [
            ("DataCfg", &self.data_cfg),
            ("NetworkCfg", &self.network_cfg),
            ("WeightFile", &self.weight_file),
        ] {
            if !path.is_file() {
                bail!("{name} {} is not valid", path.display());
            }
        }
        if !(self.restart_delay_secs.is_finite() && self.restart_delay_secs >= 0.0) {
            bail!("restart_delay_secs must be a non-negative number");
        }
        if let Some(t) = self.session_timeout_secs
            && !(t.is_finite() && t > 0.0)
        {
            bail!("session_timeout_secs must be a positive number");
        }

        let images = self.image_dir()?;
        if images.exists() {
            if !images.is_dir() {
                bail!("image directory {} should be a dir", images.display());
            }
        } else {
            std::fs::create_dir_all(&images).with_context(|| {
                format!("unable to create image directory {}", images.display())
            })?;
            info!("created image directory {}", images.display());
        }
        Ok(())
    }

    /// Roles to supervise, detector first.
    pub fn roles(&self) -> Vec<Role> {
        let mut roles = vec![Role::Detector];
        if self.trainer.enabled {
            roles.push(Role::Trainer);
        }
        roles
    }

    pub fn command(&self, role: Role) -> Result<CommandSpec> {
        let program = self.darknet_root()?.join(DARKNET_BINARY);
        let mut args: Vec<String> = match role {
            Role::Detector => vec!["detect".into()],
            Role::Trainer => vec!["detector".into(), "train".into()],
        };
        args.extend(
            [&self.data_cfg, &self.network_cfg, &self.weight_file]
                .iter()
                .map(|p| p.display().to_string()),
        );
        Ok(CommandSpec { program, args })
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            restart_delay: Duration::from_secs_f64(self.restart_delay_secs.max(0.0)),
            session_timeout: self
                .session_timeout_secs
                .filter(|t| t.is_finite() && *t > 0.0)
                .map(Duration::from_secs_f64),
            protocol: self.protocol.clone(),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => {
            debug!("{key} set from environment");
            Some(v)
        }
        _ => None,
    }
}

fn parse_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}
