use crate::{catalog::Role, types::Signature};

/// Malformed or unsupported inbound traffic.
///
/// The transport decides what to do with the offending connection; closing
/// it is the recommended reaction to every variant.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown method id {id} in {role} catalog")]
    UnknownMethod { role: Role, id: u32 },

    #[error("message truncated")]
    Truncated,

    #[error("{extra} trailing bytes after arguments of `{method}`")]
    TrailingBytes { method: &'static str, extra: usize },

    #[error("no handler registered for `{method}`")]
    NoHandler { method: &'static str },

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// A method type does not fit a catalog. Raised while building catalogs,
/// resolving call builders or registering handlers, never by traffic.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("method `{name}` declared twice in {role} catalog")]
    DuplicateMethod { role: Role, name: &'static str },

    #[error("method `{name}` is not part of the {role} catalog")]
    UnknownMethod { role: Role, name: &'static str },

    #[error("method `{name}` in {role} catalog takes {declared}, got {supplied}")]
    ArgumentType {
        role: Role,
        name: &'static str,
        declared: Signature,
        supplied: Signature,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("failed to encode arguments: {0}")]
    Encode(#[from] postcard::Error),
}

/// Failure of a single [`Dispatcher::dispatch`](crate::Dispatcher::dispatch) call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The bound handler ran and failed. Its error is passed through as is.
    #[error("handler for `{method}` failed")]
    Handler {
        method: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}
