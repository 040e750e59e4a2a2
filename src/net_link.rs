use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

#[derive(Debug)]
pub enum NetEvent {
    Binary(Bytes),
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub enum NetCommand {
    SendBinary(Bytes),
    Close,
}

/// One WebSocket session with the relay server.
///
/// Connects once. When the connection ends for any reason a single
/// `Disconnected` is emitted and `run` returns; reconnecting is up to the
/// owner.
pub struct NetLink {
    url: Url,
    tx: mpsc::Sender<NetEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    pub fn new(url: Url, tx: mpsc::Sender<NetEvent>, rx_cmd: mpsc::Receiver<NetCommand>) -> Self {
        Self { url, tx, rx_cmd }
    }

    pub async fn run(mut self) {
        match self.connect_and_loop().await {
            Ok(()) => log::info!("Connection closed"),
            Err(e) => log::warn!("Connection error: {}", e),
        }
        let _ = self.tx.send(NetEvent::Disconnected).await;
    }

    // 进入连接和主循环，处理WebSocket消息和发送命令
    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        log::info!("Connecting to {}...", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();

        self.tx.send(NetEvent::Connected).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            self.tx.send(NetEvent::Binary(data)).await?;
                        }
                        Some(Ok(Message::Text(text))) => {
                            // binary-mode protocol, text frames carry nothing for us
                            log::debug!("Ignoring text frame ({} bytes)", text.len());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendBinary(data)) => {
                            write.send(Message::Binary(data)).await?;
                        }
                        Some(NetCommand::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn local_server() -> (Url, tokio::task::JoinHandle<Vec<Bytes>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text("ignored".into())).await.unwrap();
            ws.send(Message::Binary(Bytes::from_static(b"\x01\x02"))).await.unwrap();

            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Binary(data) => received.push(data),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            received
        });
        let url = Url::parse(&format!("ws://{}/ws/room/user", addr)).unwrap();
        (url, server)
    }

    #[tokio::test]
    async fn relays_binary_both_ways() {
        let (url, server) = local_server().await;
        let (tx_event, mut rx_event) = mpsc::channel(8);
        let (tx_cmd, rx_cmd) = mpsc::channel(8);
        let link = tokio::spawn(NetLink::new(url, tx_event, rx_cmd).run());

        assert!(matches!(rx_event.recv().await, Some(NetEvent::Connected)));
        match rx_event.recv().await {
            Some(NetEvent::Binary(data)) => assert_eq!(&data[..], b"\x01\x02"),
            other => panic!("unexpected event {:?}", other),
        }

        tx_cmd
            .send(NetCommand::SendBinary(Bytes::from_static(b"pcm")))
            .await
            .unwrap();
        tx_cmd.send(NetCommand::Close).await.unwrap();

        assert!(matches!(rx_event.recv().await, Some(NetEvent::Disconnected)));
        link.await.unwrap();
        assert_eq!(server.await.unwrap(), vec![Bytes::from_static(b"pcm")]);
    }

    #[tokio::test]
    async fn refused_connection_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx_event, mut rx_event) = mpsc::channel(8);
        let (_tx_cmd, rx_cmd) = mpsc::channel(8);
        let url = Url::parse(&format!("ws://{}/ws/room/user", addr)).unwrap();
        NetLink::new(url, tx_event, rx_cmd).run().await;

        assert!(matches!(rx_event.recv().await, Some(NetEvent::Disconnected)));
    }
}
