// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-role supervision of the darknet process.
//!
//! A [`RoleSupervisor`] keeps exactly one child alive for its role. The
//! supervision loop launches it, waits for it to exit and launches it again
//! after a delay until shutdown. Callers talk to the child through sessions:
//! the role lock (the mutex around the output queue) is held for the whole
//! request/response exchange, so requests from concurrent callers never
//! interleave on the child's stdin or stdout.

use crate::bridge::{self, Transcript};
use crate::config::ProtocolConfig;
use crate::errors::SubmitError;
use crate::message::{Message, OutputSink};
use crate::process::ManagedProcess;
use crate::protocol::{self, Detection};
use crate::role::{CommandSpec, Role};
use crate::state::RoleState;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(3);

const INPUT_QUEUE_CAPACITY: usize = 16;
const OUTPUT_QUEUE_CAPACITY: usize = 256;
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub restart_delay: Duration,
    /// `None` waits for the completion marker forever.
    pub session_timeout: Option<Duration>,
    pub protocol: ProtocolConfig,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            restart_delay: DEFAULT_RESTART_DELAY,
            session_timeout: None,
            protocol: ProtocolConfig::default(),
        }
    }
}

/// The process currently registered for a role.
struct Instance {
    pid: Option<u32>,
    input: mpsc::Sender<Message>,
}

struct Launched {
    process: ManagedProcess,
    readers: [JoinHandle<()>; 2],
}

pub struct RoleSupervisor {
    role: Role,
    command: CommandSpec,
    options: SupervisorOptions,
    output: Mutex<mpsc::Receiver<Message>>,
    sink: OutputSink,
    busy: Arc<AtomicBool>,
    current: std::sync::Mutex<Option<Instance>>,
    state: std::sync::Mutex<RoleState>,
    starts: AtomicU64,
    shutdown: CancellationToken,
    resetup: Notify,
}

impl RoleSupervisor {
    pub fn new(
        role: Role,
        command: CommandSpec,
        options: SupervisorOptions,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        let busy = Arc::new(AtomicBool::new(false));
        Self {
            role,
            command,
            options,
            output: Mutex::new(rx),
            sink: OutputSink::new(tx, Arc::clone(&busy)),
            busy,
            current: std::sync::Mutex::new(None),
            state: std::sync::Mutex::new(RoleState::Uninitialized),
            starts: AtomicU64::new(0),
            shutdown,
            resetup: Notify::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> RoleState {
        *lock(&self.state)
    }

    /// Number of launch attempts so far.
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.current).as_ref().and_then(|i| i.pid)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Keep the role's process alive until shutdown.
    pub async fn supervise(self: Arc<Self>) {
        let mut previous: Option<ManagedProcess> = None;
        while !self.shutdown.is_cancelled() {
            let launched = {
                let mut output = tokio::select! {
                    guard = self.output.lock() => guard,
                    _ = self.shutdown.cancelled() => break,
                };
                if self.shutdown.is_cancelled() {
                    break;
                }
                self.start(&mut previous, &mut output).await
            };

            match launched {
                Ok(launched) => previous = Some(self.run_until_exit(launched).await),
                Err(e) => {
                    error!("[{}] {e:#}", self.role);
                    self.transition(RoleState::Exited);
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }
            self.transition(RoleState::Restarting);
            info!(
                "[{}] restarting in {:.1}s",
                self.role,
                self.options.restart_delay.as_secs_f64()
            );
            tokio::select! {
                _ = sleep(self.options.restart_delay) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        // Dropping the input sender ends the writer.
        lock(&self.current).take();
        self.transition(RoleState::Terminated);
        info!("[{}] supervision stopped", self.role);
    }

    /// Retire the registered process, if any, then launch and register a new one.
    ///
    /// Takes the role lock as a witness: nobody may swap the process while a
    /// session is attached to it.
    async fn start(
        &self,
        previous: &mut Option<ManagedProcess>,
        _role_lock: &mut mpsc::Receiver<Message>,
    ) -> Result<Launched> {
        let retired = lock(&self.current).take();
        if let Some(instance) = retired {
            info!("[{}] re-setup", self.role);
            let _ = instance.input.try_send(Message::stop());
        }
        if let Some(mut old) = previous.take()
            && old.is_running()
        {
            old.kill();
            let _ = old.wait().await;
        }

        self.transition(RoleState::Starting);
        self.starts.fetch_add(1, Ordering::SeqCst);

        let name = self.role.name();
        let mut process = ManagedProcess::new(name.to_string(), self.command.clone());
        let streams = match process.spawn() {
            Ok(streams) => streams,
            Err(e) => {
                self.sink
                    .send(format!("Unable to start {name} because (of) {e:#}"))
                    .await;
                return Err(e);
            }
        };

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        bridge::spawn_writer(
            streams.stdin,
            input_rx,
            format!("{name}:stdin"),
            self.sink.clone(),
        );
        let readers = [
            bridge::spawn_reader(streams.stdout, format!("{name}:stdout"), self.sink.clone()),
            bridge::spawn_reader(streams.stderr, format!("{name}:stderr"), self.sink.clone()),
        ];

        *lock(&self.current) = Some(Instance {
            pid: process.pid(),
            input: input_tx,
        });
        self.transition(RoleState::Running);
        Ok(Launched { process, readers })
    }

    async fn run_until_exit(&self, launched: Launched) -> ManagedProcess {
        let Launched {
            mut process,
            readers,
        } = launched;

        let forced = tokio::select! {
            status = process.wait() => {
                if let Err(e) = status {
                    warn!("[{}] failed to wait: {e:#}", self.role);
                }
                false
            }
            _ = self.shutdown.cancelled() => true,
            _ = self.resetup.notified() => {
                info!("[{}] re-setup requested", self.role);
                true
            }
        };
        if forced {
            process.kill();
            if let Err(e) = process.wait().await {
                warn!("[{}] failed to wait: {e:#}", self.role);
            }
        }

        if let Some(instance) = lock(&self.current).as_mut() {
            instance.pid = None;
        }
        self.transition(RoleState::Exited);

        let drain = async {
            for reader in readers {
                let _ = reader.await;
            }
        };
        if timeout(READER_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("[{}] output still open after exit", self.role);
        }
        // Fails a session still waiting on this process.
        self.sink.deliver(Message::stop()).await;
        process
    }

    /// Kill the current process and launch a fresh one after the restart delay.
    pub fn request_resetup(&self) {
        if self.state().is_running() {
            self.resetup.notify_one();
        }
    }

    /// Stop restarting and kill the current process.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.transition(RoleState::Terminated);
    }

    /// Send `image` to the process and decode the result line.
    pub async fn submit(&self, image: &Path) -> Result<Vec<Detection>, SubmitError> {
        let transcript = self.exchange(format!("{}\n", image.display())).await?;
        let Some(payload) = transcript.payload() else {
            return Ok(Vec::new());
        };
        let protocol = &self.options.protocol;
        Ok(protocol::parse_detections(
            payload,
            &protocol.result_token,
            protocol.numeric_fields,
        )?)
    }

    /// Run one session: write `request`, then collect output up to the completion marker.
    pub async fn exchange(&self, request: String) -> Result<Transcript, SubmitError> {
        let mut output = tokio::select! {
            guard = self.output.lock() => guard,
            _ = self.shutdown.cancelled() => return Err(SubmitError::ShuttingDown),
        };
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }
        let _busy = BusyGuard::engage(&self.busy);

        // Only lines already queued are discarded. A line the previous request
        // prints after its marker and that arrives once this session is busy
        // lands in this transcript, and becomes the payload if the next result
        // is marker-only.
        let mut stale = 0;
        while output.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("[{}] discarded {stale} stale line(s)", self.role);
        }

        let input = self.current_input().ok_or(SubmitError::NotRunning)?;
        input
            .send(Message::text(request))
            .await
            .map_err(|_| SubmitError::NotRunning)?;

        let marker = &self.options.protocol.completion_marker;
        let result = tokio::select! {
            result = bounded(self.options.session_timeout, bridge::collect_until_marker(&mut output, marker)) => result,
            _ = self.shutdown.cancelled() => Err(SubmitError::ShuttingDown),
        };
        if let Err(SubmitError::Timeout(limit)) = &result {
            warn!(
                "[{}] no completion marker within {:.1}s, forcing re-setup",
                self.role,
                limit.as_secs_f64()
            );
            self.request_resetup();
        }
        result
    }

    fn current_input(&self) -> Option<mpsc::Sender<Message>> {
        if !self.state().is_running() {
            return None;
        }
        lock(&self.current).as_ref().map(|i| i.input.clone())
    }

    fn transition(&self, next: RoleState) {
        let mut state = lock(&self.state);
        if *state == RoleState::Terminated {
            return;
        }
        if !state.can_transition_to(next) {
            warn!("[{}] unexpected transition {} -> {next}", self.role, *state);
        }
        debug!("[{}] {} -> {next}", self.role, *state);
        *state = next;
    }
}

/// Marks the output queue as listened to for as long as it lives.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn engage(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> Result<T, SubmitError>
where
    F: Future<Output = Result<T, SubmitError>>,
{
    match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| SubmitError::Timeout(limit))?,
        None => fut.await,
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
