//! WebSocket test client speaking the signaling protocol.

use crate::fixtures::{dtls_parameters, rtp_capabilities, rtp_parameters};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// How long `recv` waits for a message.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected signaling client.
///
/// `connect` consumes the initial `peerId` message, so the first `recv`
/// returns the reply to the first request.
pub struct TestPeer {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    peer_id: String,
}

impl TestPeer {
    /// Connect and wait for the server-assigned identity.
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", url, e))?;

        let mut peer = Self {
            socket,
            peer_id: String::new(),
        };

        let data = peer.expect_action("peerId").await?;
        peer.peer_id = data
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("peerId data is not a string: {}", data))?
            .to_string();

        Ok(peer)
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Send `{action, data}`.
    pub async fn send(&mut self, action: &str, data: Value) -> Result<(), anyhow::Error> {
        let text = json!({ "action": action, "data": data }).to_string();
        self.send_raw(text).await
    }

    /// Send an arbitrary text frame.
    pub async fn send_raw(&mut self, text: impl Into<String>) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Receive the next JSON message (`{action, data}`).
    pub async fn recv(&mut self) -> Result<Value, anyhow::Error> {
        self.recv_within(RECV_TIMEOUT)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no message within {:?}", RECV_TIMEOUT))
    }

    /// Receive the next JSON message, or `None` if nothing arrives in time.
    pub async fn recv_within(&mut self, timeout: Duration) -> Result<Option<Value>, anyhow::Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.socket.next()).await {
                Ok(frame) => frame,
                Err(_) => return Ok(None),
            };
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
                Some(Ok(Message::Close(_))) | None => anyhow::bail!("connection closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Receive the next message and check its action; returns its data.
    pub async fn expect_action(&mut self, action: &str) -> Result<Value, anyhow::Error> {
        let message = self.recv().await?;
        if message["action"] != action {
            anyhow::bail!("expected action {}, got {}", action, message);
        }
        Ok(message["data"].clone())
    }

    /// Receive the next message and check it is an error with `code`.
    pub async fn expect_error(&mut self, code: &str) -> Result<Value, anyhow::Error> {
        let data = self.expect_action("error").await?;
        if data["code"] != code {
            anyhow::bail!("expected error code {}, got {}", code, data);
        }
        Ok(data)
    }

    /// Send a request and return the reply data for `reply_action`.
    pub async fn request(
        &mut self,
        action: &str,
        data: Value,
        reply_action: &str,
    ) -> Result<Value, anyhow::Error> {
        self.send(action, data).await?;
        self.expect_action(reply_action).await
    }

    /// `getRouterRtpCapabilities`.
    pub async fn router_rtp_capabilities(&mut self) -> Result<Value, anyhow::Error> {
        self.request("getRouterRtpCapabilities", json!({}), "routerRtpCapabilities")
            .await
    }

    /// `createTransport`; returns the transport id.
    pub async fn create_transport(&mut self) -> Result<String, anyhow::Error> {
        let data = self
            .request("createTransport", Value::Null, "transportCreated")
            .await?;
        string_field(&data, "id")
    }

    /// `connectTransport`. No reply is sent on success.
    pub async fn connect_transport(&mut self, transport_id: &str) -> Result<(), anyhow::Error> {
        self.send(
            "connectTransport",
            json!({ "transportId": transport_id, "dtlsParameters": dtls_parameters() }),
        )
        .await
    }

    /// `produce`; returns the producer id.
    pub async fn produce(
        &mut self,
        transport_id: &str,
        kind: &str,
    ) -> Result<String, anyhow::Error> {
        let data = self
            .request(
                "produce",
                json!({
                    "transportId": transport_id,
                    "kind": kind,
                    "rtpParameters": rtp_parameters(kind),
                }),
                "produced",
            )
            .await?;
        string_field(&data, "id")
    }

    /// Send a `consume` request without waiting for the reply.
    pub async fn send_consume(
        &mut self,
        transport_id: &str,
        producer_peer_id: &str,
        producer_id: &str,
    ) -> Result<(), anyhow::Error> {
        self.send(
            "consume",
            json!({
                "transportId": transport_id,
                "producerPeerId": producer_peer_id,
                "producerId": producer_id,
                "rtpCapabilities": rtp_capabilities(),
            }),
        )
        .await
    }

    /// `consume`; returns the `consumed` data.
    pub async fn consume(
        &mut self,
        transport_id: &str,
        producer_peer_id: &str,
        producer_id: &str,
    ) -> Result<Value, anyhow::Error> {
        self.send_consume(transport_id, producer_peer_id, producer_id)
            .await?;
        self.expect_action("consumed").await
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.socket.close(None).await?;
        Ok(())
    }
}

fn string_field(data: &Value, field: &str) -> Result<String, anyhow::Error> {
    data[field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing string field {} in {}", field, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_harness::TestSfuServer;
    use sfu_signaling::engine::mock::MockMediaEngine;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_connect_receives_peer_id() -> Result<(), anyhow::Error> {
        let server = TestSfuServer::spawn(Arc::new(MockMediaEngine::new())).await?;
        let alice = TestPeer::connect(&server.ws_url()).await?;
        let bob = TestPeer::connect(&server.ws_url()).await?;

        assert!(!alice.peer_id().is_empty());
        assert_ne!(alice.peer_id(), bob.peer_id());
        server
            .wait_for_sessions(2, Duration::from_secs(1))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_recv_within_times_out_quietly() -> Result<(), anyhow::Error> {
        let server = TestSfuServer::spawn(Arc::new(MockMediaEngine::new())).await?;
        let mut peer = TestPeer::connect(&server.ws_url()).await?;

        assert!(peer
            .recv_within(Duration::from_millis(50))
            .await?
            .is_none());
        Ok(())
    }
}
