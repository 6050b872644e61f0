//! Scripted WebSocket server for session tests
//!
//! Accepts connections one at a time, records every text frame the client
//! sends and forwards frames pushed by the test. The `Authorization` header seen
//! during the handshake is captured for inspection.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Instruction for the server side of the socket.
pub enum ServerCommand {
    Frame(Message),
    /// Drop the TCP connection without a close frame
    Drop,
}

pub struct MockSonicServer {
    pub url: String,
    received: Arc<Mutex<Vec<Value>>>,
    authorization: Arc<Mutex<Option<String>>>,
    client_closed: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<ServerCommand>,
}

impl MockSonicServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let authorization = Arc::new(Mutex::new(None));
        let client_closed = Arc::new(AtomicBool::new(false));
        let (commands, mut command_rx) = mpsc::unbounded_channel::<ServerCommand>();

        let frames = received.clone();
        let auth = authorization.clone();
        let closed = client_closed.clone();

        tokio::spawn(async move {
            // Connections are served one after another
            while let Ok((stream, _)) = listener.accept().await {
                let auth = auth.clone();
                let callback =
                    move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                        *auth.lock() = request
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        Ok(response)
                    };
                let Ok(ws_stream) = accept_hdr_async(stream, callback).await else {
                    continue;
                };
                let (mut write, mut read) = ws_stream.split();
                closed.store(false, Ordering::SeqCst);

                loop {
                    tokio::select! {
                        command = command_rx.recv() => match command {
                            Some(ServerCommand::Frame(message)) => {
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Some(ServerCommand::Drop) => break,
                            None => return,
                        },
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                                    frames.lock().push(value);
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                                closed.store(true, Ordering::SeqCst);
                                break;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                }
            }
        });

        Self {
            url: format!("ws://{addr}/s2s"),
            received,
            authorization,
            client_closed,
            commands,
        }
    }

    /// All frames received so far.
    pub fn events(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Event names in wire order.
    pub fn event_names(&self) -> Vec<String> {
        self.received.lock().iter().map(event_name).collect()
    }

    /// Frames of one event type, unwrapped to their body.
    pub fn bodies(&self, name: &str) -> Vec<Value> {
        self.received
            .lock()
            .iter()
            .filter(|frame| event_name(frame) == name)
            .map(|frame| frame["event"][name].clone())
            .collect()
    }

    pub fn authorization(&self) -> Option<String> {
        self.authorization.lock().clone()
    }

    pub fn client_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }

    /// Wait until `count` frames named `name` have arrived.
    pub async fn wait_for_event(&self, name: &str, count: usize) -> bool {
        self.wait_until(|| self.bodies(name).len() >= count).await
    }

    pub async fn wait_until(&self, condition: impl Fn() -> bool) -> bool {
        wait_until(condition).await
    }

    /// Push one `{"event": {name: body}}` frame to the client.
    pub fn send_event(&self, name: &str, body: Value) {
        self.send_raw(&server_frame(name, body).to_string());
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self
            .commands
            .send(ServerCommand::Frame(Message::Text(text.to_string().into())));
    }

    pub fn drop_connection(&self) {
        let _ = self.commands.send(ServerCommand::Drop);
    }

    /// Send a close frame without waiting for the client to finish.
    pub fn close_connection(&self) {
        let _ = self.commands.send(ServerCommand::Frame(Message::Close(None)));
    }
}

pub fn server_frame(name: &str, body: Value) -> Value {
    json!({ "event": { name: body } })
}

pub fn event_name(frame: &Value) -> String {
    frame["event"]
        .as_object()
        .and_then(|event| event.keys().next().cloned())
        .unwrap_or_default()
}

/// Poll `condition` for up to two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
