use std::sync::Arc;

use {
    tether_gateway::{Connection, ConnectionHandler, SessionRegistry},
    tether_protocol::{DispatchError, Dispatcher, HandlerTable, Invoker, SchemaError},
    tracing::{debug, info, warn},
};

use crate::{
    directory::Directory,
    protocol::{ChatProtocol, client, server},
};

/// Replies and broadcasts go out through the `client_invoker` catalog.
#[derive(Clone)]
struct Outbound {
    invoker: Invoker,
    directory: Arc<Directory>,
}

impl Outbound {
    /// Send the current presence list to every session.
    fn broadcast_presence(&self, registry: &SessionRegistry) -> anyhow::Result<()> {
        let users = self.directory.users_online();
        let frame = self.invoker.encode::<client::UsersOnline>((users,))?;
        let delivered = registry.send_to_all(frame);
        debug!(delivered, "presence broadcast");
        Ok(())
    }
}

/// Chat service: accounts, login state and presence broadcasts.
pub struct ChatServer {
    dispatcher: Dispatcher<Connection>,
    outbound: Outbound,
}

impl ChatServer {
    pub fn new(protocol: &ChatProtocol) -> Result<Self, SchemaError> {
        Self::with_directory(protocol, Arc::new(Directory::new()))
    }

    pub fn with_directory(
        protocol: &ChatProtocol,
        directory: Arc<Directory>,
    ) -> Result<Self, SchemaError> {
        let outbound = Outbound {
            invoker: Invoker::new(Arc::clone(&protocol.client)),
            directory,
        };
        let mut table = HandlerTable::new(Arc::clone(&protocol.server));

        let out = outbound.clone();
        table.on::<server::Registration, _>(move |conn: &Connection, (username,)| {
            let reply = match out.directory.register(&username) {
                Ok(key) => {
                    info!(user = %username, "account registered");
                    ("registered".to_string(), key)
                },
                Err(e) => (e.to_string(), String::new()),
            };
            conn.reply(out.invoker.encode::<client::Registration>(reply)?);
            Ok(())
        })?;

        let out = outbound.clone();
        table.on::<server::Activation, _>(move |conn: &Connection, (key, username, password)| {
            let message = match out.directory.activate(&key, &username, &password) {
                Ok(()) => {
                    info!(user = %username, "account activated");
                    "activated".to_string()
                },
                Err(e) => e.to_string(),
            };
            conn.reply(out.invoker.encode::<client::Activation>((message,))?);
            Ok(())
        })?;

        let out = outbound.clone();
        table.on::<server::Login, _>(move |conn: &Connection, (username, password)| {
            match out.directory.login(conn.conn_id(), &username, &password) {
                Ok(()) => {
                    info!(user = %username, id = conn.id, "user logged in");
                    let welcome = format!("welcome {username}");
                    conn.reply(out.invoker.encode::<client::Login>((welcome,))?);
                    out.broadcast_presence(&conn.registry)
                },
                Err(e) => {
                    debug!(user = %username, error = %e, "login rejected");
                    conn.reply(out.invoker.encode::<client::Login>((e.to_string(),))?);
                    Ok(())
                },
            }
        })?;

        let out = outbound.clone();
        table.on::<server::Logout, _>(move |conn: &Connection, ()| {
            match out.directory.logout(&conn.conn_id()) {
                Some(user) => {
                    info!(user = %user, id = conn.id, "user logged out");
                    conn.reply(out.invoker.encode::<client::Logout>((format!("bye {user}"),))?);
                    out.broadcast_presence(&conn.registry)
                },
                None => {
                    let message = "not logged in".to_string();
                    conn.reply(out.invoker.encode::<client::Logout>((message,))?);
                    Ok(())
                },
            }
        })?;

        let out = outbound.clone();
        table.on::<server::UsersOnline, _>(move |conn: &Connection, ()| {
            let users = out.directory.users_online();
            conn.reply(out.invoker.encode::<client::UsersOnline>((users,))?);
            Ok(())
        })?;

        Ok(Self {
            dispatcher: table.into_dispatcher(),
            outbound,
        })
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.outbound.directory
    }

    pub fn dispatcher(&self) -> &Dispatcher<Connection> {
        &self.dispatcher
    }
}

impl ConnectionHandler for ChatServer {
    type Context = Connection;

    fn on_connect(&self, conn: Connection) -> Connection {
        conn
    }

    fn on_frame(&self, conn: &Connection, frame: &[u8]) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(conn, frame).map(|_| ())
    }

    fn on_disconnect(&self, conn: Connection) {
        let Some(user) = self.outbound.directory.logout(&conn.conn_id()) else {
            return;
        };
        info!(user = %user, id = conn.id, "user dropped with connection");
        if let Err(e) = self.outbound.broadcast_presence(&conn.registry) {
            warn!(error = %e, "presence broadcast failed");
        }
    }
}
