use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use tracing::{debug, warn};

use crate::{
    catalog::{DecodedCall, MethodCatalog, MethodId, Role},
    error::{DispatchError, ProtocolError, SchemaError},
    types::Method,
};

// ── Types ────────────────────────────────────────────────────────────────────

/// A bound handler taking type-erased arguments. Only ever called with the
/// arguments of the method it was registered for.
type HandlerFn<C> = Box<dyn Fn(&C, Box<dyn Any + Send>) -> anyhow::Result<()> + Send + Sync>;

// ── Handler table ────────────────────────────────────────────────────────────

/// Per-process map from catalog method to handler.
///
/// `C` is whatever context the caller passes to [`Dispatcher::dispatch`],
/// usually the state of the connection the message arrived on.
pub struct HandlerTable<C> {
    catalog: Arc<MethodCatalog>,
    handlers: HashMap<MethodId, HandlerFn<C>>,
}

impl<C: 'static> HandlerTable<C> {
    pub fn new(catalog: Arc<MethodCatalog>) -> Self {
        Self {
            catalog,
            handlers: HashMap::new(),
        }
    }

    /// Bind `handler` to `M`. A second registration for the same method
    /// replaces the first.
    pub fn on<M, F>(&mut self, handler: F) -> Result<&mut Self, SchemaError>
    where
        M: Method,
        F: Fn(&C, M::Args) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.catalog.entry_for::<M>()?.id();
        self.handlers.insert(
            id,
            Box::new(move |ctx: &C, args: Box<dyn Any + Send>| {
                match args.downcast::<M::Args>() {
                    Ok(args) => handler(ctx, *args),
                    Err(_) => anyhow::bail!("argument type mismatch for `{}`", M::NAME),
                }
            }),
        );
        Ok(self)
    }

    pub fn handles(&self, name: &str) -> bool {
        self.catalog
            .lookup(name)
            .is_some_and(|entry| self.handlers.contains_key(&entry.id()))
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .catalog
            .entries()
            .filter(|e| self.handlers.contains_key(&e.id()))
            .map(|e| e.name())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn into_dispatcher(self) -> Dispatcher<C> {
        Dispatcher { table: self }
    }
}

impl<C> fmt::Debug for HandlerTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("role", &self.catalog.role())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// Routes inbound wire messages to the handlers of one role.
///
/// Stateless per call: any number of threads may dispatch concurrently.
/// Handlers run synchronously on the caller's thread.
#[derive(Debug)]
pub struct Dispatcher<C> {
    table: HandlerTable<C>,
}

impl<C: 'static> Dispatcher<C> {
    pub fn new(table: HandlerTable<C>) -> Self {
        table.into_dispatcher()
    }

    pub fn role(&self) -> Role {
        self.table.catalog.role()
    }

    pub fn catalog(&self) -> &Arc<MethodCatalog> {
        &self.table.catalog
    }

    pub fn handlers(&self) -> &HandlerTable<C> {
        &self.table
    }

    /// Identify, decode and run one message. Returns the handled method name.
    ///
    /// The message is fully validated before the handler lookup, so a
    /// malformed message for an unhandled method reports the decode error.
    pub fn dispatch(&self, ctx: &C, frame: &[u8]) -> Result<&'static str, DispatchError> {
        let role = self.role();
        let call = self.table.catalog.decode(frame).inspect_err(|err| {
            warn!(%role, len = frame.len(), error = %err, "rejected message");
        })?;
        self.invoke(ctx, call)
    }

    /// Run an already decoded call.
    pub fn invoke(&self, ctx: &C, call: DecodedCall<'_>) -> Result<&'static str, DispatchError> {
        let (entry, args) = call.into_parts();
        let method = entry.name();

        let Some(handler) = self.table.handlers.get(&entry.id()) else {
            warn!(role = %self.role(), method, "no handler");
            return Err(ProtocolError::NoHandler { method }.into());
        };

        debug!(role = %self.role(), method, "dispatching method");
        handler(ctx, args).map_err(|source| {
            warn!(method, error = %source, "method error");
            DispatchError::Handler { method, source }
        })?;
        Ok(method)
    }
}
