// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Turns the unframed byte stream of a child's stdout/stderr into lines.

use crate::message::OutputSink;
use log::{debug, info, warn};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{Duration, sleep};

const READ_BUFFER_SIZE: usize = 4096;
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

/// Splits chunks on `\n`, carrying an unterminated tail over to the next chunk.
///
/// Bytes are only decoded once a line is complete, so a multi-byte character
/// cut by a chunk boundary is decoded intact.
#[derive(Debug, Default)]
pub struct LineReassembler {
    partial: Vec<u8>,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the lines it completed, without their `\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            self.partial.extend_from_slice(head);
            lines.push(String::from_utf8_lossy(&self.partial).into_owned());
            self.partial.clear();
            rest = &tail[1..];
        }
        self.partial.extend_from_slice(rest);
        lines
    }

    /// Flush the buffered tail at end of stream, with a `\n` appended.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let mut line = String::from_utf8_lossy(&self.partial).into_owned();
        line.push('\n');
        self.partial.clear();
        Some(line)
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

/// Read `reader` until EOF, forwarding every line to `sink` in order.
///
/// Read errors other than EOF are reported to the sink and retried after a
/// short delay; the reader gives up after too many failures in a row.
pub async fn forward_lines<R>(mut reader: R, name: &str, sink: OutputSink)
where
    R: AsyncRead + Unpin,
{
    let mut reassembler = LineReassembler::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut failures = 0;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                failures += 1;
                sink.send(format!("Unable to read from {name} because (of) {e}"))
                    .await;
                if failures >= MAX_CONSECUTIVE_READ_ERRORS {
                    warn!("{name}: giving up after {failures} consecutive read errors");
                    break;
                }
                sleep(READ_RETRY_DELAY).await;
                continue;
            }
        };
        failures = 0;

        let chunk = &buf[..n];
        debug!("{name} > {}", String::from_utf8_lossy(chunk));
        for line in reassembler.push(chunk) {
            sink.send(line).await;
        }
    }

    info!("EOF on {name}");
    if let Some(line) = reassembler.finish() {
        sink.send(line).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use proptest::prelude::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;
    use tokio::sync::mpsc;

    const SAMPLE: &str = "loading weights\nyolor: Enter Image Path: /tmp/a.jpg\n\nyolor:boxes:person,93.28,249,205,261,241,\nyolor: Done predicating\ntrailing";

    fn reassemble(input: &[u8], chunk_size: usize) -> Vec<String> {
        let mut r = LineReassembler::new();
        let mut lines: Vec<String> = input.chunks(chunk_size).flat_map(|c| r.push(c)).collect();
        lines.extend(r.finish());
        lines
    }

    fn expected_lines(input: &str) -> Vec<String> {
        let mut parts: Vec<String> = input.split('\n').map(String::from).collect();
        let last = parts.pop().unwrap_or_default();
        if !last.is_empty() {
            parts.push(format!("{last}\n"));
        }
        parts
    }

    #[test]
    fn test_any_chunking_yields_same_lines() {
        let expected = expected_lines(SAMPLE);
        for size in 1..=SAMPLE.len() {
            assert_eq!(
                reassemble(SAMPLE.as_bytes(), size),
                expected,
                "chunk size {size}"
            );
        }
    }

    /// Push `input` cut at `cuts` (any order, any value) and flush the tail.
    fn reassemble_at(input: &[u8], cuts: &[usize]) -> Vec<String> {
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (input.len() + 1)).collect();
        points.push(input.len());
        points.sort_unstable();
        points.dedup();

        let mut r = LineReassembler::new();
        let mut lines = Vec::new();
        let mut start = 0;
        for end in points {
            lines.extend(r.push(&input[start..end]));
            start = end;
        }
        lines.extend(r.finish());
        lines
    }

    fn expected_byte_lines(input: &[u8]) -> Vec<String> {
        let mut parts: Vec<String> = input
            .split(|&b| b == b'\n')
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect();
        let last = parts.pop().unwrap_or_default();
        if !last.is_empty() {
            parts.push(format!("{last}\n"));
        }
        parts
    }

    fn stream_bytes() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(
            prop_oneof![
                3 => any::<u8>(),
                2 => Just(b'\n'),
                1 => Just(b'\r'),
                1 => Just(0xe2u8),
            ],
            0..512,
        )
    }

    proptest! {
        #[test]
        fn test_arbitrary_cuts_yield_same_lines(
            input in stream_bytes(),
            cuts in proptest::collection::vec(any::<usize>(), 0..32)
        ) {
            prop_assert_eq!(reassemble_at(&input, &cuts), expected_byte_lines(&input));
        }

        #[test]
        fn test_newline_only_input(
            count in 0usize..64,
            cuts in proptest::collection::vec(any::<usize>(), 0..8)
        ) {
            let input = vec![b'\n'; count];
            prop_assert_eq!(reassemble_at(&input, &cuts), vec![String::new(); count]);
        }
    }

    #[test]
    fn test_cut_right_after_newline_and_crlf() {
        let input = b"a\r\nb\n\nc";
        assert_eq!(
            reassemble_at(input, &[2, 3, 5, 6]),
            vec!["a\r".to_string(), "b".to_string(), String::new(), "c\n".to_string()]
        );
    }

    #[test]
    fn test_terminated_input_has_no_flush() {
        let mut r = LineReassembler::new();
        assert_eq!(r.push(b"a\nb\n"), vec!["a", "b"]);
        assert!(!r.has_partial());
        assert_eq!(r.finish(), None);
    }

    #[test]
    fn test_partial_is_prefixed_onto_next_chunk() {
        let mut r = LineReassembler::new();
        assert!(r.push(b"yolor:bo").is_empty());
        assert!(r.push(b"xes:").is_empty());
        assert_eq!(r.push(b"dog,1\nnext"), vec!["yolor:boxes:dog,1"]);
        assert_eq!(r.finish().as_deref(), Some("next\n"));
    }

    #[test]
    fn test_empty_lines_are_kept() {
        let mut r = LineReassembler::new();
        assert_eq!(r.push(b"\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn test_split_multibyte_character() {
        let input = "étiquette\n".as_bytes();
        let mut r = LineReassembler::new();
        assert!(r.push(&input[..1]).is_empty());
        assert_eq!(r.push(&input[1..]), vec!["étiquette"]);
    }

    async fn collect(rx: &mut mpsc::Receiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(m) = rx.recv().await {
            out.push(m.text);
        }
        out
    }

    #[tokio::test]
    async fn test_forward_lines_flushes_tail() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = OutputSink::new(tx, Arc::new(AtomicBool::new(true)));
        forward_lines(&b"one\ntwo\nthr"[..], "test:stdout", sink).await;
        assert_eq!(collect(&mut rx).await, vec!["one", "two", "thr\n"]);
    }

    #[tokio::test]
    async fn test_forward_lines_offline_drops_everything() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = OutputSink::new(tx, Arc::new(AtomicBool::new(false)));
        forward_lines(&b"one\ntwo\n"[..], "test:stdout", sink).await;
        assert!(collect(&mut rx).await.is_empty());
    }

    /// Fails `errors` times, then yields `data`, then EOF.
    struct Flaky {
        errors: u32,
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for Flaky {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.errors > 0 {
                self.errors -= 1;
                return Poll::Ready(Err(io::Error::other("boom")));
            }
            if let Some(data) = self.data.take() {
                buf.put_slice(data);
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_error_is_reported_and_retried() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = OutputSink::new(tx, Arc::new(AtomicBool::new(true)));
        let reader = Flaky {
            errors: 2,
            data: Some(b"ok\n"),
        };
        forward_lines(reader, "test:stderr", sink).await;
        let lines = collect(&mut rx).await;
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Unable to read from test:stderr"));
        assert_eq!(lines[2], "ok");
    }

    #[tokio::test]
    async fn test_read_errors_are_bounded() {
        let (tx, mut rx) = mpsc::channel(64);
        let sink = OutputSink::new(tx, Arc::new(AtomicBool::new(true)));
        let reader = Flaky {
            errors: u32::MAX,
            data: None,
        };
        forward_lines(reader, "test:stderr", sink).await;
        let lines = collect(&mut rx).await;
        assert_eq!(lines.len(), MAX_CONSECUTIVE_READ_ERRORS as usize);
    }
}
