// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Control code carried by the sentinel message.
pub const STOP_CODE: i32 = -1;

/// Unit exchanged on the input and output queues of a role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub code: i32,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: 0,
        }
    }

    /// Sentinel: on an input queue it stops the writer, on an output queue it
    /// tells the session that the process behind it is gone.
    pub fn stop() -> Self {
        Self {
            text: String::new(),
            code: STOP_CODE,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.code == STOP_CODE
    }
}

/// Sending half of a role's output queue.
///
/// Messages are only delivered while a session is listening; anything produced
/// in between is logged and dropped so that an idle queue never fills up.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::Sender<Message>,
    online: Arc<AtomicBool>,
}

impl OutputSink {
    pub fn new(tx: mpsc::Sender<Message>, online: Arc<AtomicBool>) -> Self {
        Self { tx, online }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Forward one line of text.
    pub async fn send(&self, text: impl Into<String>) {
        self.deliver(Message::text(text)).await;
    }

    pub async fn deliver(&self, message: Message) {
        if !self.is_online() {
            debug!("output queue is not online, dropping {:?}", message.text);
            return;
        }
        if self.tx.send(message).await.is_err() {
            debug!("output queue is closed");
        }
    }
}
