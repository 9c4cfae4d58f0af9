use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::core::message::Message;

/// One scripted HTTP response, written with chunked transfer encoding so the
/// client sees the body arrive in pieces.
pub struct CannedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub chunks: Vec<Vec<u8>>,
    /// Close the connection before the terminating chunk, which the client
    /// reports as a body read error.
    pub truncate: bool,
}

impl CannedResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            chunks: vec![body.as_bytes().to_vec()],
            truncate: false,
        }
    }

    pub fn text_chunks(status: u16, chunks: &[&str]) -> Self {
        Self::byte_chunks(status, chunks.iter().map(|c| c.as_bytes().to_vec()).collect())
    }

    pub fn byte_chunks(status: u16, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            chunks,
            truncate: false,
        }
    }

    pub fn truncated(mut self) -> Self {
        self.truncate = true;
        self
    }
}

pub struct TestServer {
    pub base_url: String,
    handle: JoinHandle<String>,
}

impl TestServer {
    /// The raw request the server received (head and body).
    pub async fn request(self) -> String {
        self.handle.await.expect("test server task")
    }
}

/// Accept a single connection on a loopback port and answer it with
/// `response`.
pub async fn serve_once(response: CannedResponse) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut socket).await;

        let head = format!(
            "HTTP/1.1 {} Canned\r\ncontent-type: {}\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n",
            response.status, response.content_type
        );
        socket.write_all(head.as_bytes()).await.expect("write head");
        for chunk in &response.chunks {
            let mut frame = format!("{:x}\r\n", chunk.len()).into_bytes();
            frame.extend_from_slice(chunk);
            frame.extend_from_slice(b"\r\n");
            socket.write_all(&frame).await.expect("write chunk");
            socket.flush().await.expect("flush");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if !response.truncate {
            socket.write_all(b"0\r\n\r\n").await.expect("write trailer");
        }
        let _ = socket.shutdown().await;
        request
    });

    TestServer {
        base_url: format!("http://{addr}"),
        handle,
    }
}

/// A loopback URL nothing is listening on.
pub async fn unused_local_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(head_end) = find_head_end(&buffer) {
            let head = String::from_utf8_lossy(&buffer[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buffer.len() >= head_end + 4 + body_len {
                break;
            }
        }
        let read = socket.read(&mut chunk).await.expect("read request");
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

pub fn sample_history() -> Vec<Message> {
    vec![
        Message::user("Hello"),
        Message::assistant("Hi there!"),
        Message::user("How are you?"),
        Message::assistant("I'm doing well, thank you for asking!"),
    ]
}
