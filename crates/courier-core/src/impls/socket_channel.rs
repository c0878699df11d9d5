//! SocketChannel - 永続 TCP 接続による stateful 配送
//!
//! # 実装詳細
//! - フレームは改行区切りの UTF-8 行（tokio-util の LinesCodec）
//! - `connect()` で接続し、書き込みに失敗するまで持ち続ける
//! - 書き込み失敗で接続を捨てる。以降は再接続されるまで `NotConnected`
//! - 改行（`\n` / `\r`）を含むメッセージは 1 フレームにできないので送らずにエラー

use async_trait::async_trait;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::ports::StatefulChannel;

pub struct SocketChannel {
    addr: String,
    conn: Mutex<Option<Framed<TcpStream, LinesCodec>>>,
}

impl SocketChannel {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }
}

#[async_trait]
impl StatefulChannel for SocketChannel {
    async fn connect(&self) -> Result<(), DispatchError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| DispatchError::Transport(format!("connect {}: {e}", self.addr)))?;
        *self.conn.lock().await = Some(Framed::new(stream, LinesCodec::new()));
        info!(addr = %self.addr, "socket channel connected");
        Ok(())
    }

    async fn send(&self, message: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.lock().await;
        let framed = conn.as_mut().ok_or(DispatchError::NotConnected)?;
        if message.contains(['\n', '\r']) {
            return Err(DispatchError::Transport(format!(
                "frame for {} contains a line break",
                self.addr
            )));
        }
        if let Err(e) = framed.send(message).await {
            warn!(addr = %self.addr, error = %e, "socket write failed, dropping connection");
            *conn = None;
            return Err(DispatchError::Transport(format!("write {}: {e}", self.addr)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let channel = SocketChannel::new("127.0.0.1:1");
        let err = channel.send("room/1").await.unwrap_err();
        assert!(matches!(err, DispatchError::NotConnected));
    }

    #[tokio::test]
    async fn sends_newline_delimited_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = FramedRead::new(stream, LinesCodec::new());
            let mut got = Vec::new();
            while got.len() < 2 {
                got.push(lines.next().await.unwrap().unwrap());
            }
            got
        });

        let channel = SocketChannel::new(addr);
        channel.connect().await.unwrap();
        assert!(channel.is_connected().await);
        channel.send("room").await.unwrap();
        channel.send("room/42").await.unwrap();

        assert_eq!(reader.await.unwrap(), vec!["room", "room/42"]);
    }

    #[tokio::test]
    async fn message_with_line_break_is_rejected_not_split() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = FramedRead::new(stream, LinesCodec::new());
            lines.next().await.unwrap().unwrap()
        });

        let channel = SocketChannel::new(addr);
        channel.connect().await.unwrap();

        let err = channel.send("room/line1\nline2").await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
        let err = channel.send("room/a\rb").await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));

        // 接続は残る。次のフレームが最初に届く
        assert!(channel.is_connected().await);
        channel.send("room/ok").await.unwrap();
        assert_eq!(reader.await.unwrap(), "room/ok");
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let channel = SocketChannel::new(addr);
        let err = channel.connect().await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
        assert!(!channel.is_connected().await);
    }
}
