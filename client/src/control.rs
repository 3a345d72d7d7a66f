//! Client side of the control channel

use log::{debug, info, warn};
use shared::framing;
use shared::TcpPacket;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Sending half of the control connection.
pub struct ControlLink {
    writer: Box<dyn AsyncWrite + Unpin + Send>,
}

impl ControlLink {
    pub fn new<W: AsyncWrite + Unpin + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    pub async fn send(&mut self, packet: &TcpPacket) -> io::Result<()> {
        debug!("Sending {:?}", packet.packet_type());
        framing::write_packet(&mut self.writer, packet).await
    }
}

/// Connects to the server and starts reading control packets.
///
/// The receiver closes when the server hangs up.
pub async fn connect(addr: &str) -> io::Result<(ControlLink, mpsc::UnboundedReceiver<TcpPacket>)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    info!("Connected to {}", addr);

    let (reader, writer) = stream.into_split();
    Ok((ControlLink::new(writer), spawn_reader(reader)))
}

/// Reads frames on a separate task so the session's select loop never
/// cancels a read halfway through a frame.
pub fn spawn_reader<R: AsyncRead + Unpin + Send + 'static>(reader: R) -> mpsc::UnboundedReceiver<TcpPacket> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            match framing::read_frame(&mut reader).await {
                Ok((header, payload)) => match TcpPacket::decode(&header, &payload) {
                    Ok(packet) => {
                        if tx.send(packet).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Dropping malformed packet from server: {}", e),
                },
                Err(e) => {
                    if e.kind() != io::ErrorKind::UnexpectedEof {
                        warn!("Control channel read error: {}", e);
                    }
                    return;
                }
            }
        }
    });
    rx
}
