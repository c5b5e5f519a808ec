//! A scripted session server for the integration tests.
//!
//! The server accepts one socket at a time on an ephemeral port.  Every
//! request frame is recorded and handed to the test's responder, whose
//! replies are written back in order.  Tests can also push messages at any
//! time, or hang up without a close handshake.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aof_core::protocol::{decode_request, split_response, RequestFrame, ServerFrame, MAX_CHUNK_LEN};
use aof_core::protocol::payload::encode_value;
use futures_util::{SinkExt, StreamExt};
use rmpv::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::accept_hdr_async;

/// What the server does next.
#[derive(Debug, Clone)]
pub enum Reply {
    Send(WsMessage),
    /// Drop the TCP stream without a close frame.
    HangUp,
}

/// Decides the replies to one request.
pub type Responder = Arc<dyn Fn(&RequestFrame<'_>) -> Vec<Reply> + Send + Sync>;

/// One recorded request.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub id: u32,
    pub name: String,
    pub payload: Vec<u8>,
}

pub struct FakeServer {
    pub url: String,
    push: mpsc::UnboundedSender<Reply>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    cookies: Arc<Mutex<Vec<Option<String>>>>,
}

impl FakeServer {
    /// Binds an ephemeral port and starts serving.
    pub async fn start(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/api/session", listener.local_addr().unwrap());
        let (push, mut push_rx) = mpsc::unbounded_channel();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let cookies = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        let seen_cookies = Arc::clone(&cookies);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                serve(stream, &responder, &mut push_rx, &recorded, &seen_cookies).await;
            }
        });

        Self {
            url,
            push,
            requests,
            cookies,
        }
    }

    /// Sends `reply` outside of any request.
    pub fn push(&self, reply: Reply) {
        self.push.send(reply).unwrap();
    }

    pub fn push_event(&self, name: &str, payload: &Value) {
        let payload = encode_value(payload).unwrap();
        let frame = ServerFrame::Event {
            name,
            payload: &payload,
        }
        .encode()
        .unwrap();
        self.push(Reply::Send(WsMessage::Binary(frame)));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_names(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.name).collect()
    }

    /// Cookie header of every accepted socket, in order.
    pub fn cookies(&self) -> Vec<Option<String>> {
        self.cookies.lock().unwrap().clone()
    }

    /// Waits until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize) {
        for _ in 0..200 {
            if self.requests.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {count} requests, got {:?}",
            self.request_names()
        );
    }
}

async fn serve(
    stream: TcpStream,
    responder: &Responder,
    push_rx: &mut mpsc::UnboundedReceiver<Reply>,
    recorded: &Mutex<Vec<Recorded>>,
    cookies: &Arc<Mutex<Vec<Option<String>>>>,
) {
    let seen = Arc::clone(cookies);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let cookie = request
            .headers()
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        seen.lock().unwrap().push(cookie);
        Ok(response)
    };
    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };

    loop {
        let replies = tokio::select! {
            message = ws.next() => match message {
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let Ok(frame) = decode_request(&bytes) else {
                        continue;
                    };
                    recorded.lock().unwrap().push(Recorded {
                        id: frame.id,
                        name: frame.name.to_string(),
                        payload: frame.payload.to_vec(),
                    });
                    responder(&frame)
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return,
            },
            reply = push_rx.recv() => match reply {
                Some(reply) => vec![reply],
                None => return,
            },
        };

        for reply in replies {
            match reply {
                Reply::Send(message) => {
                    if ws.send(message).await.is_err() {
                        return;
                    }
                }
                Reply::HangUp => return,
            }
        }
    }
}

// ── Reply builders ────────────────────────────────────────────────────────────

/// The frames of a complete response carrying `payload`.
pub fn respond_bytes(id: u32, payload: &[u8]) -> Vec<Reply> {
    split_response(id, payload, MAX_CHUNK_LEN)
        .unwrap()
        .into_iter()
        .map(|frame| Reply::Send(WsMessage::Binary(frame)))
        .collect()
}

/// The frames of a complete response carrying `value` as MessagePack.
pub fn respond_value(id: u32, value: &Value) -> Vec<Reply> {
    respond_bytes(id, &encode_value(value).unwrap())
}

pub fn respond_failure(id: u32) -> Vec<Reply> {
    vec![Reply::Send(WsMessage::Binary(
        ServerFrame::Failure { id }.encode().unwrap(),
    ))]
}

/// Builds a string-keyed map value.
pub fn map<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

/// Looks up `name` in a map value.
pub fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(name))
        .map(|(_, v)| v)
}
