//! Helpers shared by the integration tests.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve one connection that sends `head` and the start of its body, then stalls.
///
/// `head` is the status line plus headers, without the blank line; the
/// advertised `Content-Length` should exceed `partial`. Returns the base URI.
pub async fn stalling_server(head: String, partial: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 64 * 1024];
        let _ = socket.read(&mut buf).await;

        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(b"\r\n\r\n").await.unwrap();
        socket.write_all(partial).await.unwrap();
        socket.flush().await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    format!("http://{addr}")
}
