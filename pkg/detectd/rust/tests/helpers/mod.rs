// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers every image path with two detections.
pub const FAKE_DARKNET: &str = r#"#!/bin/sh
echo "yolor: loading $2 $3 $4" >&2
while IFS= read -r line; do
  echo "yolor: Enter Image Path: $line"
  echo "yolor:boxes:person,93.28,249,205,261,241,dog,90.11,272,205,287,241,"
  echo "yolor: Done predicating"
done
"#;

/// A darknet installation laid out in a temporary directory.
pub struct DarknetRoot {
    dir: tempfile::TempDir,
}

impl DarknetRoot {
    pub fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("cfg")).unwrap();
        std::fs::create_dir_all(root.join("data")).unwrap();
        std::fs::write(root.join("data/coco.names"), "person\ndog\ncat\n").unwrap();
        std::fs::write(
            root.join("cfg/coco.data"),
            "classes = 3\nnames = data/coco.names\n",
        )
        .unwrap();
        std::fs::write(root.join("cfg/yolor.cfg"), "[net]\n").unwrap();
        std::fs::write(root.join("yolor.weights"), b"weights").unwrap();

        let darknet = root.join("darknet");
        std::fs::write(&darknet, script).unwrap();
        std::fs::set_permissions(&darknet, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn image_dir(&self) -> PathBuf {
        self.path().join("images")
    }

    /// Environment pointing the daemon at this installation.
    fn env(&self) -> Vec<(&'static str, String)> {
        let root = self.path();
        vec![
            ("YOLOR_DARKNET_ROOT", root.display().to_string()),
            ("YOLOR_DATA_CFG", root.join("cfg/coco.data").display().to_string()),
            ("YOLOR_NETWORK_CFG", root.join("cfg/yolor.cfg").display().to_string()),
            ("YOLOR_WEIGHT_FILE", root.join("yolor.weights").display().to_string()),
            ("YOLOR_IMAGE_DIR", self.image_dir().display().to_string()),
            ("YOLOR_LISTEN_ADDR", "127.0.0.1:0".to_string()),
        ]
    }

    /// Write a YAML config next to the installation and return its path.
    pub fn write_config(&self, yaml: &str) -> PathBuf {
        let path = self.path().join("detectd.yaml");
        std::fs::write(&path, yaml)
            .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
        path
    }
}

/// Handle to a running dd-detectd daemon process.
pub struct DaemonHandle {
    child: Child,
    log_lines: Arc<Mutex<Vec<String>>>,
    _reader_thread: std::thread::JoinHandle<()>,
    _stderr_thread: std::thread::JoinHandle<()>,
}

impl DaemonHandle {
    /// Start the daemon against `root`, optionally with a config file.
    pub fn start(root: &DarknetRoot, config: Option<&Path>) -> Self {
        Self::start_with_env(root, config, &[])
    }

    pub fn start_with_env(
        root: &DarknetRoot,
        config: Option<&Path>,
        extra_env: &[(&str, &str)],
    ) -> Self {
        let bin = env!("CARGO_BIN_EXE_dd-detectd");
        let mut command = Command::new(bin);
        command
            .current_dir(root.path())
            .envs(root.env())
            .envs(extra_env.iter().copied())
            .env_remove("YOLOR_LOG_LEVEL")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(config) = config {
            command.arg("--config").arg(config);
        }
        let mut child = command.spawn().expect("failed to start dd-detectd");

        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));

        // simple_logger writes INFO to stdout, WARN/ERROR to stderr.
        let reader_thread = capture(stdout, "daemon", Arc::clone(&log_lines));
        let _stderr_thread = capture(stderr, "daemon:err", Arc::clone(&log_lines));

        Self {
            child,
            log_lines,
            _reader_thread: reader_thread,
            _stderr_thread,
        }
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        self.wait_for_log_count(pattern, 1, timeout)
    }

    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, DEFAULT_TIMEOUT)
    }

    fn count_log_matches(&self, pattern: &str) -> usize {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().filter(|l| l.contains(pattern)).count()
    }

    /// Wait until the count of log lines matching `pattern` reaches at least `n`.
    pub fn wait_for_log_count(&self, pattern: &str, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count_log_matches(pattern) >= n {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// URL of `path` on the address from the "listening on" log line.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.listen_addr())
    }

    fn listen_addr(&self) -> String {
        assert!(
            self.wait_for_log_default("listening on "),
            "daemon never started listening"
        );
        let lines = self.log_lines.lock().unwrap();
        lines
            .iter()
            .find_map(|l| {
                let marker = "listening on ";
                let start = l.find(marker)? + marker.len();
                Some(l[start..].trim().to_string())
            })
            .expect("listening line disappeared")
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to daemon");
    }

    /// Send SIGTERM and wait for the daemon to exit. Returns the exit status.
    pub fn stop(&mut self) -> std::process::ExitStatus {
        self.send_signal(Signal::SIGTERM);
        self.wait_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Wait for the daemon to exit within the given timeout.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> std::process::ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .child
                .try_wait()
                .expect("failed to check daemon status")
            {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed daemon");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// Extract PIDs from "spawned (pid=NNN" log lines.
    pub fn spawned_pids(&self) -> Vec<u32> {
        let lines = self.log_lines.lock().unwrap();
        lines
            .iter()
            .filter_map(|l| {
                let marker = "spawned (pid=";
                let start = l.find(marker)? + marker.len();
                let end = l[start..].find(|c: char| !c.is_ascii_digit())? + start;
                l[start..end].parse().ok()
            })
            .collect()
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn capture<R: Read + Send + 'static>(
    stream: R,
    tag: &'static str,
    lines: Arc<Mutex<Vec<String>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(l) => {
                    eprintln!("[{tag}] {l}");
                    lines.lock().unwrap().push(l);
                }
                Err(_) => break,
            }
        }
    })
}

/// Blocking HTTP client that gives up after [`DEFAULT_TIMEOUT`].
pub fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .expect("failed to build HTTP client")
}

pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Wait until a PID is no longer alive, or timeout.
pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pid_is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
