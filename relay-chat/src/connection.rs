use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    select,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::frame::Frame;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live relay connection split into in-memory channels.
///
/// `sender` doubles as the [`EventChannel`](crate::session::EventChannel) of a
/// [`Session`](crate::session::Session). `receiver` yields `None` once the relay
/// goes away.
pub struct Connection {
    pub sender: UnboundedSender<Frame>,
    pub receiver: UnboundedReceiver<Frame>,
}

pub async fn connect(url: &str) -> Result<Connection> {
    let (socket, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    info!(url, "connected to relay");

    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(err) = pump(socket, outgoing_rx, incoming_tx).await {
            debug!(error = ?err, "relay connection closed with error");
        }
    });

    Ok(Connection {
        sender: outgoing_tx,
        receiver: incoming_rx,
    })
}

async fn pump(
    socket: Socket,
    mut outgoing: UnboundedReceiver<Frame>,
    incoming: UnboundedSender<Frame>,
) -> Result<()> {
    let (mut sink, mut source) = socket.split();

    loop {
        select! {
            frame = outgoing.recv() => match frame {
                Some(frame) => sink.send(Message::Text(frame.encode()?)).await?,
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !forward(&text, &incoming) {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            },
        }
    }

    Ok(())
}

fn forward(text: &str, incoming: &UnboundedSender<Frame>) -> bool {
    match Frame::decode(text) {
        Ok(frame) => incoming.send(frame).is_ok(),
        Err(err) => {
            warn!(error = %err, "dropping malformed frame from relay");
            true
        }
    }
}
