// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Wiring between a child's standard streams and the role queues.

use crate::errors::SubmitError;
use crate::message::{Message, OutputSink};
use crate::reassembler::forward_lines;
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Write every message from `input` into the child's stdin until a stop
/// message arrives or the queue closes.
///
/// Failed and short writes are reported to `sink` and do not stop the loop.
pub async fn write_messages<W>(
    mut stdin: W,
    mut input: mpsc::Receiver<Message>,
    name: &str,
    sink: OutputSink,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = input.recv().await {
        if message.is_stop() {
            break;
        }
        debug!("{name} < {}", message.text.trim_end());

        let expected = message.text.len();
        let mut bytes = message.text.as_bytes();
        let written = match tokio::io::copy(&mut bytes, &mut stdin).await {
            Ok(n) => n,
            Err(e) => {
                sink.send(format!("Unable to write into {name} because (of) {e}"))
                    .await;
                continue;
            }
        };
        if written != expected as u64 {
            sink.send(format!(
                "Expected length of written bytes is {expected} but got {written} in {name}"
            ))
            .await;
            continue;
        }
        if let Err(e) = stdin.flush().await {
            sink.send(format!("Unable to flush {name} because (of) {e}"))
                .await;
        }
    }
    info!("{name} writer stopped");
}

pub fn spawn_writer<W>(
    stdin: W,
    input: mpsc::Receiver<Message>,
    name: String,
    sink: OutputSink,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move { write_messages(stdin, input, &name, sink).await })
}

pub fn spawn_reader<R>(reader: R, name: String, sink: OutputSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move { forward_lines(reader, &name, sink).await })
}

/// Output collected during one session, ending with the completion marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub lines: Vec<String>,
}

impl Transcript {
    /// The line right before the completion marker, which carries the result.
    pub fn payload(&self) -> Option<&str> {
        let (_marker, before) = self.lines.split_last()?;
        before.last().map(String::as_str)
    }
}

/// Receive lines until one whose trimmed text starts with `marker`.
pub async fn collect_until_marker(
    output: &mut mpsc::Receiver<Message>,
    marker: &str,
) -> Result<Transcript, SubmitError> {
    let mut transcript = Transcript::default();
    loop {
        let message = output.recv().await.ok_or(SubmitError::QueueClosed)?;
        if message.is_stop() {
            return Err(SubmitError::ProcessExited);
        }
        let done = message.text.trim().starts_with(marker);
        transcript.lines.push(message.text);
        if done {
            return Ok(transcript);
        }
    }
}
