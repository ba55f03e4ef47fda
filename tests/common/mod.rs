//! Minimal JSON-RPC node for exercising the HTTP transport.

use serde_json::{Value, json};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the mock node answers to one request
#[allow(dead_code)]
pub enum Reply {
    /// `{"result": ...}`
    Result(Value),
    /// `{"error": {...}}`
    Error(i64, &'static str),
    /// Plain HTTP status with a non JSON-RPC body
    Status(u16, &'static str),
    /// Never answers within any sane timeout
    Hang,
}

/// Starts a node on an ephemeral port, `handler` gets (method, params).
pub async fn start_node<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, handler).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// An address nothing listens on
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn url(addr: SocketAddr) -> url::Url {
    url::Url::parse(&format!("http://{}", addr)).unwrap()
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Value> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let len = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                return Ok(serde_json::from_slice(&buf[end + 4..end + 4 + len])
                    .unwrap_or(Value::Null));
            }
        }
    }
    Ok(Value::Null)
}

async fn serve<F, Fut>(mut socket: TcpStream, handler: Arc<F>) -> std::io::Result<()>
where
    F: Fn(String, Value) -> Fut,
    Fut: Future<Output = Reply>,
{
    let request = read_request(&mut socket).await?;
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let id = request["id"].clone();
    let (status, body) = match handler(method, request["params"].clone()).await {
        Reply::Result(result) => (
            "200 OK",
            json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string(),
        ),
        Reply::Error(code, message) => (
            "200 OK",
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
                .to_string(),
        ),
        Reply::Status(503, body) => ("503 Service Unavailable", body.to_string()),
        Reply::Status(_, body) => ("500 Internal Server Error", body.to_string()),
        Reply::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            return Ok(());
        }
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}
