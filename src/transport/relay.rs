use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use tokio::{io::copy_bidirectional, net::TcpListener, task::JoinHandle};
use tracing::{debug, warn};

use super::Dialer;

/// Loopback listener for drivers that can only connect to a socket address.
/// It answers exactly one connection: the listener is closed as soon as the
/// driver is accepted, so nothing else on the host can ride the dialer.
pub(crate) struct Relay {
    local_addr: SocketAddr,
    pump: JoinHandle<()>,
}

impl Relay {
    pub async fn start(dialer: Arc<dyn Dialer>) -> std::io::Result<Relay> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let local_addr = listener.local_addr()?;
        debug!("relaying {} to {}", local_addr, dialer.target());
        let pump = tokio::spawn(async move {
            let accepted = listener.accept().await;
            drop(listener);
            let (mut inbound, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("relay could not accept the driver connection: {}", e);
                    return;
                }
            };
            let mut outbound = match dialer.dial().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("relay could not reach {}: {}", dialer.target(), e);
                    return;
                }
            };
            match copy_bidirectional(&mut inbound, &mut outbound).await {
                Ok((sent, received)) => debug!(
                    "relay for {} done: {} bytes out, {} bytes in",
                    peer, sent, received
                ),
                Err(e) => debug!("relay for {} ended: {}", peer, e),
            }
        });
        Ok(Relay { local_addr, pump })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    use super::*;
    use crate::transport::{DialStream, MockDialer, Target, TcpDialer, TransportError};

    async fn echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn bytes_flow_both_ways() {
        let port = echo_server().await;
        let relay = Relay::start(Arc::new(TcpDialer::new("127.0.0.1", port)))
            .await
            .unwrap();
        assert!(relay.local_addr().ip().is_loopback());

        let mut client = TcpStream::connect(relay.local_addr()).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");
    }

    #[tokio::test]
    async fn only_the_first_connection_is_relayed() {
        let port = echo_server().await;
        let mut dialer = MockDialer::new();
        dialer
            .expect_target()
            .return_const(Target::new("127.0.0.1", port));
        dialer.expect_dial().times(1).returning(move || {
            let stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream.set_nonblocking(true).unwrap();
            let stream: DialStream = Box::new(TcpStream::from_std(stream).unwrap());
            Ok(stream)
        });
        let relay = Relay::start(Arc::new(dialer)).await.unwrap();

        let mut driver = TcpStream::connect(relay.local_addr()).await.unwrap();
        driver.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        driver.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");

        if let Ok(mut intruder) = TcpStream::connect(relay.local_addr()).await {
            let _ = intruder.write_all(b"evil").await;
            let mut buf = [0u8; 4];
            let read = tokio::time::timeout(Duration::from_secs(5), intruder.read(&mut buf))
                .await
                .unwrap();
            assert!(matches!(read, Ok(0)) || read.is_err());
        }

        driver.write_all(b"pong").await.unwrap();
        driver.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
    }

    #[tokio::test]
    async fn failed_dial_hangs_up_the_client() {
        let mut dialer = MockDialer::new();
        dialer
            .expect_target()
            .return_const(Target::new("db", 3306));
        dialer.expect_dial().returning(|| {
            Err(TransportError::Dial {
                address: String::from("db:3306"),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            })
        });
        let relay = Relay::start(Arc::new(dialer)).await.unwrap();

        let mut client = TcpStream::connect(relay.local_addr()).await.unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0)) || read.is_err());
    }

    #[tokio::test]
    async fn dropping_the_relay_stops_accepting() {
        let port = echo_server().await;
        let relay = Relay::start(Arc::new(TcpDialer::new("127.0.0.1", port)))
            .await
            .unwrap();
        let addr = relay.local_addr();
        drop(relay);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
