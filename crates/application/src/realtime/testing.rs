//! 测试用的连接句柄，记录收到的帧和关闭码。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::handle::{
    CloseCode, ConnectionHandle, ConnectionId, DeliveryError, OutboundFrame, SharedHandle,
};

pub(crate) struct RecordingHandle {
    id: ConnectionId,
    frames: Mutex<Vec<String>>,
    received: watch::Sender<usize>,
    close_frame: Mutex<Option<(CloseCode, String)>>,
    closed: CancellationToken,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl RecordingHandle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            frames: Mutex::new(Vec::new()),
            received: watch::Sender::new(0),
            close_frame: Mutex::new(None),
            closed: CancellationToken::new(),
            failing: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        })
    }

    pub(crate) fn shared() -> SharedHandle {
        Self::new()
    }

    /// 之后的发送都返回 `DeliveryError::Closed`。
    pub(crate) fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// 之后的发送永远不会完成。
    pub(crate) fn stall_sends(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<serde_json::Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    pub(crate) fn close_frame(&self) -> Option<(CloseCode, String)> {
        self.close_frame.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// 等待直到至少收到 `count` 帧。
    pub(crate) async fn wait_for_events(&self, count: usize) -> Vec<serde_json::Value> {
        let mut receiver = self.received.subscribe();
        tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(|n| *n >= count))
            .await
            .expect("timed out waiting for frames")
            .expect("handle dropped");
        self.events()
    }
}

#[async_trait]
impl ConnectionHandle for RecordingHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) || self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.frames.lock().unwrap().push(frame.as_str().to_owned());
        self.received.send_modify(|n| *n += 1);
        Ok(())
    }

    async fn close(&self, code: CloseCode, reason: &str) {
        let mut close_frame = self.close_frame.lock().unwrap();
        if close_frame.is_none() {
            *close_frame = Some((code, reason.to_owned()));
        }
        self.closed.cancel();
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }
}
