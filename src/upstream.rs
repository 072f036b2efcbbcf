use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use hickory_proto::xfer::Protocol;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

const MAX_UDP_PAYLOAD: usize = 4096;

/// Un intercambio por consulta, sin reintentos: la carrera del engine
/// es el único mecanismo de recuperación.
#[derive(Clone)]
pub struct UpstreamClient {
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Copia la consulta y le asigna un id fresco por salto, para que los
    /// dos upstreams paralelos nunca compartan ids.
    pub async fn query(
        &self,
        request: &Message,
        endpoint: &str,
        transport: Protocol,
    ) -> anyhow::Result<Message> {
        let mut outbound = request.clone();
        outbound.set_id(rand::random::<u16>());
        let wire = outbound.to_bytes()?;

        let reply = match transport {
            Protocol::Udp => timeout(self.timeout, exchange_udp(&wire, endpoint)).await??,
            Protocol::Tcp => timeout(self.timeout, exchange_tcp(&wire, endpoint)).await??,
            other => anyhow::bail!("transporte no soportado: {other:?}"),
        };

        if reply.id() != outbound.id() {
            anyhow::bail!(
                "id de respuesta no coincide (esperaba {}, llegó {})",
                outbound.id(),
                reply.id()
            );
        }
        Ok(reply)
    }
}

async fn exchange_udp(wire: &[u8], endpoint: &str) -> anyhow::Result<Message> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.send_to(wire, endpoint).await?;

    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
    let (n, _) = socket.recv_from(&mut buf).await?;
    Ok(Message::from_bytes(&buf[..n])?)
}

async fn exchange_tcp(wire: &[u8], endpoint: &str) -> anyhow::Result<Message> {
    let mut stream = TcpStream::connect(endpoint).await?;

    let len = u16::try_from(wire.len())?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(wire).await?;
    stream.flush().await?;

    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let reply_len = u16::from_be_bytes(len_buf) as usize;

    let mut buf = vec![0u8; reply_len];
    stream.read_exact(&mut buf).await?;
    Ok(Message::from_bytes(&buf)?)
}
