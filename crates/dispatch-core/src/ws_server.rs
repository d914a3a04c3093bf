// WebSocket server for notification clients.

use std::io;
use std::net::SocketAddr;

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Events emitted by the WebSocket server to the application layer.
#[derive(Debug)]
pub enum WsEvent {
    /// A client completed the handshake. Frames pushed into `outbound` are
    /// written to that client in order until the sender is dropped. The queue
    /// is unbounded so the app loop never has to drop a frame.
    Connected {
        conn_id: u64,
        addr: String,
        outbound: mpsc::UnboundedSender<String>,
    },
    /// The client went away.
    Disconnected { conn_id: u64 },
    /// A text frame from the client (raw JSON string).
    Message { conn_id: u64, text: String },
}

/// A bound TCP listener that upgrades accepted sockets to WebSockets.
pub struct TungsteniteListener {
    inner: TcpListener,
}

impl TungsteniteListener {
    pub async fn bind(host: &str, port: u16) -> io::Result<Self> {
        let inner = TcpListener::bind((host, port)).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Accept connections forever, forwarding events through `tx`.
///
/// Each connection runs on its own task, so a slow or broken client never
/// blocks the others. Returns when the receiving side of `tx` is dropped.
pub async fn run(listener: TungsteniteListener, tx: mpsc::Sender<WsEvent>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    let mut next_id: u64 = 1;
    loop {
        let (stream, addr) = listener.inner.accept().await?;
        if tx.is_closed() {
            break;
        }
        let conn_id = next_id;
        next_id += 1;
        info!("Accepted TCP connection {conn_id} from {addr}");
        tokio::spawn(handle_connection(stream, addr.to_string(), conn_id, tx.clone()));
    }

    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: String,
    conn_id: u64,
    tx: mpsc::Sender<WsEvent>,
) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let (mut write, read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    if tx
        .send(WsEvent::Connected {
            conn_id,
            addr: addr.clone(),
            outbound: out_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let writer_addr = addr.clone();
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = write.send(Message::Text(text.into())).await {
                warn!("Failed to write to {writer_addr}: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    let _ = process_message_stream(read, &tx, conn_id, &addr).await;

    writer.abort();
    let _ = tx.send(WsEvent::Disconnected { conn_id }).await;
    debug!("Connection {conn_id} from {addr} closed");
}

/// Process raw WebSocket [`Message`] items from any [`Stream`], forwarding
/// text payloads through `tx`. Returns `Err(())` if the channel is closed.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<WsEvent>,
    conn_id: u64,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = WsEvent::Message {
                    conn_id,
                    text: text.to_string(),
                };
                if tx.send(event).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Binary, Ping, Pong and raw frames carry nothing for us.
            }
        }
    }
    Ok(())
}
