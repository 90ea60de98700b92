use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    bytes::Bytes,
    futures::{SinkExt, StreamExt},
    tokio::{
        net::{TcpListener, TcpStream},
        sync::mpsc,
    },
    tokio_util::{
        codec::{Framed, LengthDelimitedCodec},
        sync::CancellationToken,
        task::TaskTracker,
    },
    tracing::{debug, info, trace, warn},
};

use {tether_config::ServerConfig, tether_protocol::DispatchError};

use crate::{
    registry::SessionRegistry,
    session::{ConnId, Session, SessionHandle, SessionId},
};

/// How long queued outbound frames may keep draining after a disconnect.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Connections ──────────────────────────────────────────────────────────────

/// A freshly registered connection, handed to [`ConnectionHandler::on_connect`].
#[derive(Clone)]
pub struct Connection {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub session: SessionHandle,
    pub registry: Arc<SessionRegistry>,
}

impl Connection {
    pub fn conn_id(&self) -> ConnId {
        self.session.conn_id()
    }

    pub fn send(&self, frame: Bytes) {
        self.session.send(frame);
    }

    /// Send a reply to the request being handled and count it.
    pub fn reply(&self, frame: Bytes) {
        self.registry.inc_replies();
        self.session.send(frame);
    }
}

/// Application side of the transport.
///
/// `on_frame` runs inline on the connection's read task; a slow handler
/// stalls that connection only.
pub trait ConnectionHandler: Send + Sync + 'static {
    type Context: Send + 'static;

    fn on_connect(&self, conn: Connection) -> Self::Context;

    fn on_frame(&self, ctx: &Self::Context, frame: &[u8]) -> Result<(), DispatchError>;

    fn on_disconnect(&self, ctx: Self::Context) {
        drop(ctx);
    }
}

// ── TCP session ──────────────────────────────────────────────────────────────

/// Outbound half of a TCP connection. Frames go through a bounded queue;
/// overflowing it closes the connection through `closing`.
struct TcpSession {
    conn_id: ConnId,
    tx: mpsc::Sender<Bytes>,
    closing: CancellationToken,
}

impl Session for TcpSession {
    fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    fn send(&self, frame: Bytes) {
        match self.tx.try_send(frame) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(_)) => {
                if !self.closing.is_cancelled() {
                    warn!(conn_id = %self.conn_id, "send queue full, closing connection");
                    self.closing.cancel();
                }
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(conn_id = %self.conn_id, "dropping frame for closed connection");
            },
        }
    }
}

/// Length-prefixed framing shared by both ends of a connection.
pub fn frame_codec(max_frame_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_len)
        .new_codec()
}

// ── Server ───────────────────────────────────────────────────────────────────

pub struct Server<H> {
    registry: Arc<SessionRegistry>,
    handler: Arc<H>,
    max_frame_len: usize,
    send_queue_len: usize,
    write_timeout: Duration,
}

impl<H> Clone for Server<H> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            handler: Arc::clone(&self.handler),
            max_frame_len: self.max_frame_len,
            send_queue_len: self.send_queue_len,
            write_timeout: self.write_timeout,
        }
    }
}

/// Bind the listener described by `config`.
pub async fn bind(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    Ok(TcpListener::bind(addr).await?)
}

impl<H: ConnectionHandler> Server<H> {
    pub fn new(registry: Arc<SessionRegistry>, handler: Arc<H>, config: &ServerConfig) -> Self {
        Self {
            registry,
            handler,
            max_frame_len: config.max_frame_len,
            // A zero-capacity mpsc channel panics.
            send_queue_len: config.send_queue_len.max(1),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept connections until `shutdown` fires. Open connections are
    /// cancelled through child tokens and have deregistered by the time
    /// this returns.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "accepting connections");
        let connections = TaskTracker::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(sessions = self.registry.size(), "listener shutting down");
                    connections.close();
                    connections.wait().await;
                    debug!(sessions = self.registry.size(), "all connections closed");
                    return Ok(());
                },
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        },
                    };
                    let server = self.clone();
                    let token = shutdown.child_token();
                    connections.spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer, token).await {
                            warn!(peer = %peer, error = %e, "connection failed");
                        }
                    });
                },
            }
        }
    }

    async fn handle_connection(
        self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }
        let (mut sink, mut frames) = Framed::new(stream, frame_codec(self.max_frame_len)).split();

        let (tx, mut rx) = mpsc::channel::<Bytes>(self.send_queue_len);
        let conn_id = ConnId::new();
        let session: SessionHandle = Arc::new(TcpSession {
            conn_id,
            tx,
            closing: shutdown.clone(),
        });
        let id = self.registry.add_session(Arc::clone(&session))?;
        info!(conn_id = %conn_id, id, peer = %peer, "client connected");

        let registry = Arc::clone(&self.registry);
        let write_timeout = self.write_timeout;
        let closing = shutdown.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let len = frame.len() as u64;
                match tokio::time::timeout(write_timeout, sink.send(frame)).await {
                    Ok(Ok(())) => registry.inc_sent_bytes(len),
                    Ok(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "write failed");
                        break;
                    },
                    Err(_) => {
                        warn!(conn_id = %conn_id, ?write_timeout, "write timed out, closing connection");
                        break;
                    },
                }
            }
            closing.cancel();
        });

        let ctx = self.handler.on_connect(Connection {
            id,
            peer,
            session,
            registry: Arc::clone(&self.registry),
        });

        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = frames.next() => match next {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!(conn_id = %conn_id, error = %e, "read failed");
                        break;
                    },
                    None => break,
                },
            };
            self.registry.inc_recv_bytes(frame.len() as u64);
            self.registry.inc_requests();

            match self.handler.on_frame(&ctx, &frame) {
                Ok(()) => {},
                Err(DispatchError::Protocol(err)) => {
                    warn!(conn_id = %conn_id, error = %err, "protocol error, closing connection");
                    break;
                },
                Err(DispatchError::Handler { method, source }) => {
                    warn!(conn_id = %conn_id, method, error = %source, "handler failed");
                },
            }
        }

        if let Err(e) = self.registry.del_session(&conn_id) {
            warn!(conn_id = %conn_id, error = %e, "session already deregistered");
        }
        self.handler.on_disconnect(ctx);

        // The session may still be referenced elsewhere (e.g. by a broadcast
        // snapshot), so the queue is not guaranteed to close by itself.
        let abort = writer.abort_handle();
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
            abort.abort();
        }
        info!(conn_id = %conn_id, id, "client disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        tether_protocol::{
            Dispatcher, HandlerTable, Invoker, Method, MethodCatalog, ProtocolError, Role,
        },
        tokio::task::JoinHandle,
    };

    use super::*;

    struct Ping;
    impl Method for Ping {
        const NAME: &'static str = "ping";
        type Args = (u64,);
    }

    struct Pong;
    impl Method for Pong {
        const NAME: &'static str = "pong";
        type Args = (u64,);
    }

    struct Echo {
        dispatcher: Dispatcher<Connection>,
    }

    impl Echo {
        fn new(replies: Invoker) -> Self {
            let server_catalog = Arc::new(
                MethodCatalog::builder(Role::ServerInvoker)
                    .method::<Ping>()
                    .build()
                    .unwrap(),
            );
            let mut table = HandlerTable::new(server_catalog);
            table
                .on::<Ping, _>(move |conn: &Connection, (n,)| {
                    conn.reply(replies.encode::<Pong>((n + 1,))?);
                    Ok(())
                })
                .unwrap();
            Self {
                dispatcher: table.into_dispatcher(),
            }
        }
    }

    impl ConnectionHandler for Echo {
        type Context = Connection;

        fn on_connect(&self, conn: Connection) -> Connection {
            conn
        }

        fn on_frame(&self, ctx: &Connection, frame: &[u8]) -> Result<(), DispatchError> {
            self.dispatcher.dispatch(ctx, frame).map(|_| ())
        }
    }

    fn client_invoker() -> Invoker {
        Invoker::new(Arc::new(
            MethodCatalog::builder(Role::ClientInvoker)
                .method::<Pong>()
                .build()
                .unwrap(),
        ))
    }

    fn server_invoker() -> Invoker {
        Invoker::new(Arc::new(
            MethodCatalog::builder(Role::ServerInvoker)
                .method::<Ping>()
                .build()
                .unwrap(),
        ))
    }

    type Running = (
        SocketAddr,
        Arc<SessionRegistry>,
        CancellationToken,
        JoinHandle<anyhow::Result<()>>,
    );

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    async fn start() -> (SocketAddr, Arc<SessionRegistry>, CancellationToken) {
        let (addr, registry, shutdown, _) = start_with(test_config()).await;
        (addr, registry, shutdown)
    }

    async fn start_with(config: ServerConfig) -> Running {
        let listener = bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = SessionRegistry::new();
        let server = Server::new(
            Arc::clone(&registry),
            Arc::new(Echo::new(client_invoker())),
            &config,
        );
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(server.run(listener, shutdown.clone()));
        (addr, registry, shutdown, running)
    }

    async fn connect(addr: SocketAddr) -> Framed<TcpStream, LengthDelimitedCodec> {
        let stream = TcpStream::connect(addr).await.unwrap();
        Framed::new(stream, frame_codec(ServerConfig::default().max_frame_len))
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn request_gets_reply_and_is_counted() {
        let (addr, registry, shutdown) = start().await;
        let mut client = connect(addr).await;

        let ping = server_invoker().encode::<Ping>((41,)).unwrap();
        client.send(ping.clone()).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();

        let replies = client_invoker();
        let call = replies.catalog().decode(&reply).unwrap();
        assert_eq!(call.into_args::<Pong>(), Some((42,)));

        wait_for(|| registry.sent_bytes() == reply.len() as u64).await;
        let stats = registry.stats();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.replies, 1);
        assert_eq!(stats.recv_bytes, ping.len() as u64);

        drop(client);
        wait_for(|| registry.is_empty()).await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn broadcast_reaches_all_clients() {
        let (addr, registry, shutdown) = start().await;
        let mut a = connect(addr).await;
        let mut b = connect(addr).await;
        wait_for(|| registry.size() == 2).await;

        let frame = client_invoker().encode::<Pong>((7,)).unwrap();
        assert_eq!(registry.send_to_all(frame.clone()), 2);
        assert_eq!(a.next().await.unwrap().unwrap().freeze(), frame);
        assert_eq!(b.next().await.unwrap().unwrap().freeze(), frame);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn protocol_error_closes_connection() {
        let (addr, registry, shutdown) = start().await;
        let mut client = connect(addr).await;

        client.send(Bytes::from_static(&[9, 9])).await.unwrap();
        assert!(client.next().await.is_none());
        wait_for(|| registry.is_empty()).await;
        shutdown.cancel();
    }

    /// Push 32 MiB at a client that never reads.
    fn flood(registry: &SessionRegistry) -> u64 {
        let frame = Bytes::from(vec![0u8; 512 * 1024]);
        for _ in 0..64 {
            assert_eq!(registry.send_to_all(frame.clone()), 1);
        }
        64 * frame.len() as u64
    }

    #[tokio::test]
    async fn full_send_queue_closes_connection() {
        let (addr, registry, shutdown, _) = start_with(ServerConfig {
            send_queue_len: 4,
            write_timeout_ms: 60_000,
            ..test_config()
        })
        .await;
        let stalled = TcpStream::connect(addr).await.unwrap();
        wait_for(|| registry.size() == 1).await;

        let offered = flood(&registry);
        wait_for(|| registry.is_empty()).await;
        assert!(registry.sent_bytes() < offered);
        drop(stalled);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn stalled_write_times_out() {
        let (addr, registry, shutdown, _) = start_with(ServerConfig {
            write_timeout_ms: 100,
            ..test_config()
        })
        .await;
        let stalled = TcpStream::connect(addr).await.unwrap();
        wait_for(|| registry.size() == 1).await;

        let offered = flood(&registry);
        wait_for(|| registry.is_empty()).await;
        assert!(registry.sent_bytes() < offered);
        drop(stalled);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn run_returns_after_connections_deregister() {
        let (addr, registry, shutdown, running) = start_with(test_config()).await;
        let _a = connect(addr).await;
        let _b = connect(addr).await;
        wait_for(|| registry.size() == 2).await;

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn protocol_errors_are_classified() {
        let err = DispatchError::from(ProtocolError::Truncated);
        assert!(err.is_protocol());
    }
}
