//! The chat method catalogs.
//!
//! Declaration order fixes the method ids, so both ends must build the
//! catalogs from this module.

use std::sync::Arc;

use tether_protocol::{MethodCatalog, Role, SchemaError};

/// Calls a server sends to its clients (`client_invoker` role).
pub mod client {
    use tether_protocol::Method;

    /// Outcome of a registration: message and activation key.
    pub struct Registration;
    impl Method for Registration {
        type Args = (String, String);

        const NAME: &'static str = "registration";
    }

    pub struct Activation;
    impl Method for Activation {
        type Args = (String,);

        const NAME: &'static str = "activation";
    }

    pub struct Login;
    impl Method for Login {
        type Args = (String,);

        const NAME: &'static str = "login";
    }

    pub struct Logout;
    impl Method for Logout {
        type Args = (String,);

        const NAME: &'static str = "logout";
    }

    /// Sorted names of the users currently logged in.
    pub struct UsersOnline;
    impl Method for UsersOnline {
        type Args = (Vec<String>,);

        const NAME: &'static str = "users_online";
    }
}

/// Calls a client sends to the server (`server_invoker` role).
pub mod server {
    use tether_protocol::Method;

    /// Request a pending account for a username.
    pub struct Registration;
    impl Method for Registration {
        type Args = (String,);

        const NAME: &'static str = "registration";
    }

    /// Activate a pending account: key, username, password.
    pub struct Activation;
    impl Method for Activation {
        type Args = (String, String, String);

        const NAME: &'static str = "activation";
    }

    /// Username and password.
    pub struct Login;
    impl Method for Login {
        type Args = (String, String);

        const NAME: &'static str = "login";
    }

    pub struct Logout;
    impl Method for Logout {
        type Args = ();

        const NAME: &'static str = "logout";
    }

    pub struct UsersOnline;
    impl Method for UsersOnline {
        type Args = ();

        const NAME: &'static str = "users_online";
    }
}

pub fn client_catalog() -> Result<MethodCatalog, SchemaError> {
    MethodCatalog::builder(Role::ClientInvoker)
        .method::<client::Registration>()
        .method::<client::Activation>()
        .method::<client::Login>()
        .method::<client::Logout>()
        .method::<client::UsersOnline>()
        .build()
}

pub fn server_catalog() -> Result<MethodCatalog, SchemaError> {
    MethodCatalog::builder(Role::ServerInvoker)
        .method::<server::Registration>()
        .method::<server::Activation>()
        .method::<server::Login>()
        .method::<server::Logout>()
        .method::<server::UsersOnline>()
        .build()
}

/// Both catalogs, built once and shared.
#[derive(Debug, Clone)]
pub struct ChatProtocol {
    pub client: Arc<MethodCatalog>,
    pub server: Arc<MethodCatalog>,
}

impl ChatProtocol {
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            client: Arc::new(client_catalog()?),
            server: Arc::new(server_catalog()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use tether_protocol::{ArgKind, Invoker, MethodId};

    use super::*;

    #[test]
    fn ids_follow_declaration_order() {
        let protocol = ChatProtocol::new().unwrap();
        let names: Vec<_> = protocol.server.entries().map(|e| e.name()).collect();
        assert_eq!(names, ["registration", "activation", "login", "logout", "users_online"]);
        assert_eq!(protocol.server.lookup("login").unwrap().id(), MethodId(2));
        assert_eq!(protocol.client.lookup("users_online").unwrap().id(), MethodId(4));
    }

    #[test]
    fn same_name_has_different_signatures_per_role() {
        let protocol = ChatProtocol::new().unwrap();
        let client_login = protocol.client.lookup("login").unwrap().signature();
        let server_login = protocol.server.lookup("login").unwrap().signature();
        assert_eq!(client_login.kinds(), &[ArgKind::String]);
        assert_eq!(server_login.kinds(), &[ArgKind::String, ArgKind::String]);
    }

    #[test]
    fn login_request_wire_layout() {
        let invoker = Invoker::new(Arc::new(server_catalog().unwrap()));
        let frame = invoker
            .encode::<server::Login>(("alice".into(), "secret".into()))
            .unwrap();
        let mut expected = vec![2, 5];
        expected.extend_from_slice(b"alice");
        expected.push(6);
        expected.extend_from_slice(b"secret");
        assert_eq!(&frame[..], &expected[..]);
    }
}
