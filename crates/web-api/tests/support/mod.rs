#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use config::AppConfig;
use futures_util::{SinkExt, StreamExt};
use infrastructure::{BcryptPasswordHasher, Infrastructure};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const PASSWORD: &str = "correct-horse-battery";
const WAIT: Duration = Duration::from_secs(5);

/// 绑定随机端口、使用内存存储的完整服务。
pub struct TestServer {
    pub http: String,
    pub ws: String,
    pub client: Client,
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_server() -> TestServer {
    let mut config = AppConfig::default();
    config.password.bcrypt_cost = 4;
    config.realtime.send_timeout_ms = 1_000;

    let infra = Infrastructure::in_memory(Arc::new(BcryptPasswordHasher::new(Some(4))));
    let state = AppState::build(&infra, &config, None);
    let app = router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        http: format!("http://{addr}"),
        ws: format!("ws://{addr}"),
        client: Client::new(),
        state,
        shutdown: Some(shutdown_tx),
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http, path)
    }

    pub async fn register(&self, username: &str) -> Value {
        let response = self
            .client
            .post(self.url("/auth/register"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": PASSWORD,
            }))
            .send()
            .await
            .expect("register");
        assert_eq!(response.status(), 201, "register {username}");
        response.json().await.expect("register json")
    }

    pub async fn token(&self, username: &str) -> String {
        let response = self
            .client
            .post(self.url("/auth/token"))
            .form(&[("username", username), ("password", PASSWORD)])
            .send()
            .await
            .expect("token");
        assert_eq!(response.status(), 200, "token for {username}");
        let body: Value = response.json().await.expect("token json");
        assert_eq!(body["token_type"], "bearer");
        body["access_token"].as_str().expect("access_token").to_owned()
    }

    /// 注册并登录，返回 `(user_id, token)`。
    pub async fn signup(&self, username: &str) -> (i64, String) {
        let user = self.register(username).await;
        let id = user["id"].as_i64().expect("user id");
        (id, self.token(username).await)
    }

    pub async fn create_chat(&self, token: &str, name: &str, is_private: bool) -> i64 {
        let response = self
            .client
            .post(self.url("/chats"))
            .bearer_auth(token)
            .json(&json!({ "name": name, "is_private": is_private }))
            .send()
            .await
            .expect("create chat");
        assert_eq!(response.status(), 201);
        let chat: Value = response.json().await.expect("chat json");
        chat["id"].as_i64().expect("chat id")
    }

    pub async fn stats(&self) -> Value {
        self.client
            .get(self.url("/ws/stats"))
            .send()
            .await
            .expect("stats")
            .json()
            .await
            .expect("stats json")
    }

    pub async fn connect(&self, chat_id: i64, token: &str) -> WsClient {
        let url = format!("{}/ws/chats/{chat_id}?token={token}", self.ws);
        let (socket, _) = connect_async(url.as_str()).await.expect("websocket connect");
        socket
    }

    /// 连接并读掉欢迎消息。
    pub async fn join(&self, chat_id: i64, token: &str) -> WsClient {
        let mut socket = self.connect(chat_id, token).await;
        let welcome = next_json(&mut socket).await;
        assert_eq!(welcome["type"], "system");
        socket
    }

    /// 等待注册表收敛到预期的连接数。
    pub async fn wait_for_connections(&self, expected: u64) {
        let settled = timeout(WAIT, async {
            loop {
                if self.stats().await["total_connections"].as_u64() == Some(expected) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(settled.is_ok(), "total_connections never reached {expected}");
    }
}

pub async fn send_json(socket: &mut WsClient, value: Value) {
    socket
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("send");
}

pub async fn send_text(socket: &mut WsClient, text: &str) {
    socket
        .send(WsMessage::Text(text.to_owned().into()))
        .await
        .expect("send");
}

/// 读取下一条 JSON 文本帧，跳过控制帧。
pub async fn next_json(socket: &mut WsClient) -> Value {
    timeout(WAIT, async {
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str(text.as_str()).expect("json frame")
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// 断言一段时间内没有收到任何文本帧。
pub async fn expect_silence(socket: &mut WsClient, wait: Duration) {
    if let Ok(Some(Ok(WsMessage::Text(text)))) = timeout(wait, socket.next()).await {
        panic!("unexpected frame: {text}");
    }
}

/// 读到关闭帧为止，返回关闭码和原因。
pub async fn expect_close(socket: &mut WsClient) -> (u16, String) {
    timeout(WAIT, async {
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Close(Some(CloseFrame { code, reason })))) => {
                    return (u16::from(code), reason.as_str().to_owned())
                }
                Some(Ok(WsMessage::Close(None))) | None => panic!("closed without a close frame"),
                Some(Ok(_)) => continue,
                Some(Err(err)) => panic!("websocket error: {err}"),
            }
        }
    })
    .await
    .expect("timed out waiting for close")
}
