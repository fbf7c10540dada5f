//! Secure-socket transport: `rustls` over a blocking `TcpStream`.
//!
//! The socket carries a short read timeout so [`Connection::try_read`] can
//! report [`ReadOutcome::Idle`] instead of blocking the single control
//! thread.  Server certificates are checked against the bundled
//! `webpki-roots` store.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use super::connection::{Connection, Connector, ReadOutcome};
use super::NetError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_millis(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// TlsConnector
// ---------------------------------------------------------------------------

/// Opens TLS connections with a shared client configuration.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TlsConnector {
    pub fn new() -> Result<Self, NetError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| NetError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        })
    }
}

impl Connector for TlsConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, NetError> {
        let connect_err = |reason: String| NetError::Connect {
            host: host.to_string(),
            port,
            reason,
        };

        let server_name = ServerName::try_from(host)
            .map_err(|e| NetError::Tls(format!("invalid server name {host:?}: {e}")))?
            .to_owned();

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?
            .next()
            .ok_or_else(|| connect_err("no address resolved".into()))?;

        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_nodelay(true)?;
        tcp.set_write_timeout(Some(WRITE_TIMEOUT))?;
        tcp.set_read_timeout(Some(self.read_timeout))?;

        let conn = ClientConnection::new(Arc::clone(&self.config), server_name)
            .map_err(|e| NetError::Tls(e.to_string()))?;
        let mut stream = StreamOwned::new(conn, tcp);

        let deadline = Instant::now() + self.connect_timeout;
        while stream.conn.is_handshaking() {
            match stream.conn.complete_io(&mut stream.sock) {
                Ok(_) => {}
                Err(e) if is_idle(&e) && Instant::now() < deadline => {}
                Err(e) => return Err(NetError::Tls(format!("handshake with {host}: {e}"))),
            }
        }

        log::debug!("TLS session established with {host}:{port}");
        Ok(Box::new(TlsConnection { stream, open: true }))
    }
}

fn is_idle(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

// ---------------------------------------------------------------------------
// TlsConnection
// ---------------------------------------------------------------------------

pub struct TlsConnection {
    stream: StreamOwned<ClientConnection, TcpStream>,
    open: bool,
}

impl Connection for TlsConnection {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        if !self.open {
            return Err(NetError::Disconnected);
        }
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn try_read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, NetError> {
        if !self.open {
            return Ok(ReadOutcome::Closed);
        }
        match self.stream.read(buf) {
            Ok(0) => {
                self.open = false;
                Ok(ReadOutcome::Closed)
            }
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if is_idle(&e) => Ok(ReadOutcome::Idle),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.open = false;
                Ok(ReadOutcome::Closed)
            }
            Err(e) => {
                self.open = false;
                Err(e.into())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.stream.conn.send_close_notify();
        let _ = self.stream.conn.complete_io(&mut self.stream.sock);
        let _ = self.stream.sock.shutdown(Shutdown::Both);
    }
}

impl Drop for TlsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client_config() {
        assert!(TlsConnector::new().is_ok());
    }

    #[test]
    fn rejects_invalid_server_name_before_dialing() {
        let connector = TlsConnector::new().unwrap();
        match connector.connect("not a host name!", 443) {
            Err(NetError::Tls(msg)) => assert!(msg.contains("invalid server name")),
            Err(other) => panic!("expected Tls error, got {other}"),
            Ok(_) => panic!("expected Tls error, got a connection"),
        }
    }
}
