//! WebSocket 连接句柄
//!
//! 每个连接有一个独立的写任务独占 sink，所有写操作通过有界 mpsc 通道交给它。
//! 通道满时 `send` 会一直等待，由广播层的超时把慢连接剔除。

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use application::realtime::{
    CloseCode, ConnectionHandle, ConnectionId, DeliveryError, OutboundFrame,
};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage};
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 写任务命令
#[derive(Debug)]
enum WsCommand {
    Frame(OutboundFrame),
    Close(CloseCode, String),
}

pub struct WebSocketHandle {
    id: ConnectionId,
    commands: mpsc::Sender<WsCommand>,
    closing: AtomicBool,
    closed: CancellationToken,
}

impl WebSocketHandle {
    /// 启动写任务并返回句柄，`buffer` 是允许积压的出站帧数。
    pub fn spawn<S>(sink: S, buffer: usize) -> Arc<Self>
    where
        S: Sink<WsMessage> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (commands, receiver) = mpsc::channel(buffer.max(1));
        let handle = Arc::new(Self {
            id: ConnectionId::new(),
            commands,
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });

        tokio::spawn(write_loop(handle.id, sink, receiver, handle.closed.clone()));
        handle
    }
}

async fn write_loop<S>(
    id: ConnectionId,
    mut sink: S,
    mut commands: mpsc::Receiver<WsCommand>,
    closed: CancellationToken,
) where
    S: Sink<WsMessage> + Unpin + Send,
    S::Error: Display,
{
    loop {
        let command = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            command = commands.recv() => command,
        };

        match command {
            Some(WsCommand::Frame(frame)) => {
                let message = WsMessage::Text(frame.as_str().to_owned().into());
                if let Err(err) = sink.send(message).await {
                    tracing::debug!(connection_id = %id, error = %err, "websocket write failed");
                    break;
                }
            }
            Some(WsCommand::Close(code, reason)) => {
                let frame = CloseFrame {
                    code: code.as_u16(),
                    reason: reason.into(),
                };
                if let Err(err) = sink.send(WsMessage::Close(Some(frame))).await {
                    tracing::debug!(connection_id = %id, error = %err, "websocket close frame not delivered");
                }
                break;
            }
            None => break,
        }
    }

    closed.cancel();
    let _ = sink.close().await;
    tracing::debug!(connection_id = %id, "websocket writer stopped");
}

#[async_trait]
impl ConnectionHandle for WebSocketHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(DeliveryError::Closed);
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(DeliveryError::Closed),
            sent = self.commands.send(WsCommand::Frame(frame)) => {
                sent.map_err(|_| DeliveryError::Closed)
            }
        }
    }

    async fn close(&self, code: CloseCode, reason: &str) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        // 队列已满或写任务已退出时直接断开，不再等待关闭帧
        if self
            .commands
            .try_send(WsCommand::Close(code, reason.to_owned()))
            .is_err()
        {
            self.closed.cancel();
        }
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}
