use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use {
    futures::{SinkExt, StreamExt},
    tether_gateway::server::frame_codec,
    tether_protocol::{Dispatcher, HandlerTable, Invoker, Method, SchemaError},
    tokio::net::{TcpStream, ToSocketAddrs},
    tokio_util::codec::{Framed, LengthDelimitedCodec},
    tracing::debug,
};

use crate::protocol::{ChatProtocol, client, server};

/// A call received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Registered { message: String, key: String },
    Activated(String),
    LoggedIn(String),
    LoggedOut(String),
    UsersOnline(Vec<String>),
}

/// Events decoded but not yet consumed.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<VecDeque<ChatEvent>>,
}

impl EventLog {
    pub fn push(&self, event: ChatEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    pub fn pop(&self) -> Option<ChatEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handlers for every `client_invoker` method, each recording one event.
pub fn event_dispatcher(protocol: &ChatProtocol) -> Result<Dispatcher<EventLog>, SchemaError> {
    let mut table = HandlerTable::new(Arc::clone(&protocol.client));
    table
        .on::<client::Registration, _>(|log: &EventLog, (message, key)| {
            log.push(ChatEvent::Registered { message, key });
            Ok(())
        })?
        .on::<client::Activation, _>(|log: &EventLog, (message,)| {
            log.push(ChatEvent::Activated(message));
            Ok(())
        })?
        .on::<client::Login, _>(|log: &EventLog, (message,)| {
            log.push(ChatEvent::LoggedIn(message));
            Ok(())
        })?
        .on::<client::Logout, _>(|log: &EventLog, (message,)| {
            log.push(ChatEvent::LoggedOut(message));
            Ok(())
        })?
        .on::<client::UsersOnline, _>(|log: &EventLog, (users,)| {
            log.push(ChatEvent::UsersOnline(users));
            Ok(())
        })?;
    Ok(table.into_dispatcher())
}

/// TCP chat client.
pub struct ChatClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    requests: Invoker,
    dispatcher: Dispatcher<EventLog>,
    events: EventLog,
}

impl ChatClient {
    pub async fn connect(
        addr: impl ToSocketAddrs,
        protocol: &ChatProtocol,
        max_frame_len: usize,
    ) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            framed: Framed::new(stream, frame_codec(max_frame_len)),
            requests: Invoker::new(Arc::clone(&protocol.server)),
            dispatcher: event_dispatcher(protocol)?,
            events: EventLog::default(),
        })
    }

    async fn call<M: Method>(&mut self, args: M::Args) -> anyhow::Result<()> {
        let frame = self.requests.encode::<M>(args)?;
        debug!(method = M::NAME, len = frame.len(), "sending request");
        self.framed.send(frame).await?;
        Ok(())
    }

    pub async fn register(&mut self, username: &str) -> anyhow::Result<()> {
        self.call::<server::Registration>((username.to_string(),))
            .await
    }

    pub async fn activate(&mut self, key: &str, username: &str, password: &str) -> anyhow::Result<()> {
        self.call::<server::Activation>((key.to_string(), username.to_string(), password.to_string()))
            .await
    }

    pub async fn login(&mut self, username: &str, password: &str) -> anyhow::Result<()> {
        self.call::<server::Login>((username.to_string(), password.to_string()))
            .await
    }

    pub async fn logout(&mut self) -> anyhow::Result<()> {
        self.call::<server::Logout>(()).await
    }

    pub async fn users_online(&mut self) -> anyhow::Result<()> {
        self.call::<server::UsersOnline>(()).await
    }

    /// Next event from the server. `None` once the server closed the
    /// connection and every buffered event was consumed.
    pub async fn next_event(&mut self) -> anyhow::Result<Option<ChatEvent>> {
        loop {
            if let Some(event) = self.events.pop() {
                return Ok(Some(event));
            }
            let Some(frame) = self.framed.next().await.transpose()? else {
                return Ok(None);
            };
            self.dispatcher.dispatch(&self.events, &frame)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        tether_config::ServerConfig,
        tether_gateway::{Server, SessionRegistry, server::bind},
        tokio_util::sync::CancellationToken,
    };

    use {super::*, crate::server::ChatServer};

    #[test]
    fn dispatcher_records_events_in_order() {
        let protocol = ChatProtocol::new().unwrap();
        let dispatcher = event_dispatcher(&protocol).unwrap();
        let replies = Invoker::new(Arc::clone(&protocol.client));
        let log = EventLog::default();

        let frame = replies
            .encode::<client::Registration>(("registered".into(), "k1".into()))
            .unwrap();
        assert_eq!(dispatcher.dispatch(&log, &frame).unwrap(), "registration");
        let frame = replies
            .encode::<client::UsersOnline>((vec!["al".into()],))
            .unwrap();
        dispatcher.dispatch(&log, &frame).unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(
            log.pop(),
            Some(ChatEvent::Registered {
                message: "registered".into(),
                key: "k1".into(),
            })
        );
        assert_eq!(log.pop(), Some(ChatEvent::UsersOnline(vec!["al".into()])));
        assert!(log.is_empty());
    }

    struct Running {
        addr: std::net::SocketAddr,
        protocol: ChatProtocol,
        registry: Arc<SessionRegistry>,
        shutdown: CancellationToken,
    }

    async fn start() -> Running {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let protocol = ChatProtocol::new().unwrap();
        let listener = bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = SessionRegistry::new();
        let server = Server::new(
            Arc::clone(&registry),
            Arc::new(ChatServer::new(&protocol).unwrap()),
            &config,
        );
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(listener, shutdown.clone()));
        Running {
            addr,
            protocol,
            registry,
            shutdown,
        }
    }

    async fn wait_for_sessions(registry: &SessionRegistry, n: usize) {
        for _ in 0..200 {
            if registry.size() == n {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected {n} sessions, have {}", registry.size());
    }

    async fn expect(client: &mut ChatClient) -> ChatEvent {
        client.next_event().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn register_activate_login_over_tcp() {
        let Running {
            addr,
            protocol,
            registry,
            shutdown,
        } = start().await;
        let max = ServerConfig::default().max_frame_len;
        let mut alice = ChatClient::connect(addr, &protocol, max).await.unwrap();
        let mut bob = ChatClient::connect(addr, &protocol, max).await.unwrap();
        wait_for_sessions(&registry, 2).await;

        alice.register("alice").await.unwrap();
        let ChatEvent::Registered { message, key } = expect(&mut alice).await else {
            panic!("expected registration reply");
        };
        assert_eq!(message, "registered");

        alice.activate(&key, "alice", "secret").await.unwrap();
        assert_eq!(expect(&mut alice).await, ChatEvent::Activated("activated".into()));

        alice.login("alice", "secret").await.unwrap();
        assert_eq!(expect(&mut alice).await, ChatEvent::LoggedIn("welcome alice".into()));
        let online = ChatEvent::UsersOnline(vec!["alice".into()]);
        assert_eq!(expect(&mut alice).await, online);
        assert_eq!(expect(&mut bob).await, online);

        drop(alice);
        assert_eq!(expect(&mut bob).await, ChatEvent::UsersOnline(Vec::new()));

        bob.logout().await.unwrap();
        assert_eq!(expect(&mut bob).await, ChatEvent::LoggedOut("not logged in".into()));
        assert_eq!(registry.size(), 1);
        assert_eq!(registry.replies(), 4);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn garbage_from_client_closes_connection() {
        let Running {
            addr,
            protocol,
            registry,
            shutdown,
        } = start().await;
        let mut client = ChatClient::connect(addr, &protocol, 1024).await.unwrap();
        client
            .framed
            .send(bytes::Bytes::from_static(&[77]))
            .await
            .unwrap();
        assert_eq!(client.next_event().await.unwrap(), None);
        wait_for_sessions(&registry, 0).await;
        shutdown.cancel();
    }
}
