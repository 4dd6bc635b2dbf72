//! Test helpers shared across modules

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal HTTP/1.1 responder recording every raw request it receives
pub struct FakeHttp {
    pub url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeHttp {
    /// Answer every request with `status` and a JSON `body`
    pub async fn start(status: u16, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let raw = read_request(&mut socket).await;
                seen.lock().unwrap().push(raw);

                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Read one request: headers plus `Content-Length` bytes of body
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let length = text[..head_end]
                .lines()
                .find_map(|line| {
                    line.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// JSON body of a raw request
pub fn request_body(raw: &str) -> serde_json::Value {
    let start = raw.find("\r\n\r\n").map(|i| i + 4).unwrap_or(raw.len());
    serde_json::from_str(&raw[start..]).unwrap()
}

/// Whether a raw request carries `name: value` (case-insensitive name)
pub fn has_header(raw: &str, name: &str, value: &str) -> bool {
    let wanted = format!("{}: {}", name.to_ascii_lowercase(), value);
    raw.lines()
        .take_while(|line| !line.is_empty())
        .any(|line| {
            let (header, rest) = line.split_once(':').unwrap_or((line, ""));
            format!("{}: {}", header.to_ascii_lowercase(), rest.trim()) == wanted
        })
}
