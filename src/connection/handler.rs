//! Per-connection read/parse/dispatch/write loop.
//!
//! Each accepted socket gets its own task running [`Connection::run`]. The
//! task accumulates bytes in a buffer (TCP is a stream; requests arrive
//! split or glued together), parses complete request frames, dispatches
//! them, and writes the serialized reply back.
//!
//! `SELECT` and `QUIT` are resolved here rather than in the registry: both
//! act on connection state (the current database index, the connection
//! lifetime), which no registered handler can see.
//!
//! A framing violation ends the connection without a reply. Dropping the
//! task (client gone) also cancels any blocking pop in flight.

use crate::commands::{parse_int, CommandRegistry};
use crate::db::Database;
use crate::protocol::{parse_request, FrameError, Reply};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Hard cap on buffered, unparsed request bytes per connection.
const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Initial read buffer capacity.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Shared connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    fn add_bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn add_bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// The client closed the connection between requests.
    #[error("client disconnected")]
    ClientDisconnected,

    /// The stream ended in the middle of a request frame.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("request buffer limit exceeded")]
    BufferFull,
}

/// State for one client connection.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    databases: Arc<Vec<Database>>,
    registry: Arc<CommandRegistry>,
    stats: Arc<ConnectionStats>,
    /// Index into `databases`, switched by SELECT.
    db_index: usize,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        databases: Arc<Vec<Database>>,
        registry: Arc<CommandRegistry>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            databases,
            registry,
            stats,
            db_index: 0,
        }
    }

    /// Runs the connection to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "client connected");

        let result = self.main_loop().await;
        match &result {
            Ok(()) => debug!(client = %self.addr, "client quit"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::Io(err))
                if err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(err) => warn!(client = %self.addr, error = %err, "connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(argv) = self.try_parse()? {
                self.stats.command_processed();

                let quit = argv
                    .first()
                    .map(|name| name.eq_ignore_ascii_case(b"quit"))
                    .unwrap_or(false);

                let reply = match self.connection_command(&argv) {
                    Some(reply) => reply,
                    None => {
                        self.registry
                            .dispatch(&self.databases[self.db_index], &argv)
                            .await
                    }
                };
                self.write_reply(&reply).await?;

                if quit {
                    return Ok(());
                }
            }
            self.read_more().await?;
        }
    }

    /// Handles commands that act on connection state instead of a database.
    fn connection_command(&mut self, argv: &[Bytes]) -> Option<Reply> {
        let name = argv.first()?;
        if name.eq_ignore_ascii_case(b"select") {
            return Some(self.select(argv));
        }
        if name.eq_ignore_ascii_case(b"quit") {
            return Some(Reply::ok());
        }
        None
    }

    /// SELECT index
    fn select(&mut self, argv: &[Bytes]) -> Reply {
        if argv.len() != 2 {
            return Reply::wrong_arity("select");
        }
        match parse_int(&argv[1]) {
            Some(index) if index >= 0 && (index as usize) < self.databases.len() => {
                self.db_index = index as usize;
                Reply::ok()
            }
            Some(_) => Reply::error("ERR DB index is out of range"),
            None => Reply::error("ERR value is not an integer or out of range"),
        }
    }

    /// Pulls one complete request out of the buffer, if there is one.
    fn try_parse(&mut self) -> Result<Option<Vec<Bytes>>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        match parse_request(&self.buffer) {
            Ok(Some((argv, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "parsed request"
                );
                Ok(Some(argv))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                warn!(client = %self.addr, error = %err, "malformed request, closing");
                Err(ConnectionError::Frame(err))
            }
        }
    }

    async fn read_more(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            warn!(
                client = %self.addr,
                buffered = self.buffer.len(),
                "request buffer limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.add_bytes_read(n);
        trace!(client = %self.addr, bytes = n, "read");
        Ok(())
    }

    async fn write_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.add_bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "replied");
        Ok(())
    }
}

/// Runs one client connection to completion, downgrading routine
/// disconnects to debug logging.
pub async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    databases: Arc<Vec<Database>>,
    registry: Arc<CommandRegistry>,
    stats: Arc<ConnectionStats>,
) {
    let connection = Connection::new(stream, addr, databases, registry, stats);
    let _ = connection.run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn spawn_server(database_count: usize) -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let databases: Arc<Vec<Database>> =
            Arc::new((0..database_count).map(|_| Database::new(8)).collect());
        let registry = Arc::new(CommandRegistry::standard());
        let stats = Arc::new(ConnectionStats::new());

        let accept_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                tokio::spawn(serve_connection(
                    stream,
                    client_addr,
                    Arc::clone(&databases),
                    Arc::clone(&registry),
                    Arc::clone(&accept_stats),
                ));
            }
        });

        (addr, stats)
    }

    async fn read_reply(client: &mut TcpStream) -> Vec<u8> {
        let mut buf = [0u8; 512];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("reply timed out")
            .unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _) = spawn_server(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (addr, _) = spawn_server(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nnova\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"$4\r\nnova\r\n");
    }

    #[tokio::test]
    async fn test_get_missing_is_nil() {
        let (addr, _) = spawn_server(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let (addr, _) = spawn_server(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(
                b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n\
                  *3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk1\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk2\r\n",
            )
            .await
            .unwrap();

        // +OK\r\n +OK\r\n $2\r\nv1\r\n $2\r\nv2\r\n = 26 bytes
        let mut collected = Vec::new();
        while collected.len() < 26 {
            let chunk = read_reply(&mut client).await;
            assert!(!chunk.is_empty());
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n");
    }

    #[tokio::test]
    async fn test_wrongtype_over_wire() {
        let (addr, _) = spawn_server(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$5\r\nLPUSH\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b":1\r\n");

        client.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
        let reply = read_reply(&mut client).await;
        assert!(reply.starts_with(b"-WRONGTYPE"));
    }

    #[tokio::test]
    async fn test_framing_error_closes_without_reply() {
        let (addr, _) = spawn_server(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"PING\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("close timed out")
            .unwrap();
        assert_eq!(n, 0, "expected the connection to close silently");
    }

    #[tokio::test]
    async fn test_quit_closes_after_ok() {
        let (addr, _) = spawn_server(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("close timed out")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_select_switches_database() {
        let (addr, _) = spawn_server(2).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*2\r\n$6\r\nSELECT\r\n$1\r\n1\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        // database 0 does not see the key
        client.write_all(b"*2\r\n$6\r\nSELECT\r\n$1\r\n0\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");
        client.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"$-1\r\n");

        // out of range
        client.write_all(b"*2\r\n$6\r\nSELECT\r\n$1\r\n9\r\n").await.unwrap();
        let reply = read_reply(&mut client).await;
        assert!(reply.starts_with(b"-ERR DB index is out of range"));
    }

    #[tokio::test]
    async fn test_blpop_wakeup_across_connections() {
        let (addr, _) = spawn_server(1).await;
        let mut waiter = TcpStream::connect(addr).await.unwrap();
        let mut pusher = TcpStream::connect(addr).await.unwrap();

        waiter
            .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nk\r\n$1\r\n5\r\n")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        pusher
            .write_all(b"*3\r\n$5\r\nLPUSH\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut pusher).await, b":1\r\n");

        let reply = timeout(Duration::from_secs(1), read_reply(&mut waiter))
            .await
            .expect("waiter was not woken");
        assert_eq!(reply, b"*2\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn test_stats_track_traffic() {
        let (addr, stats) = spawn_server(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let _ = read_reply(&mut client).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
