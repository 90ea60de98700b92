use std::{marker::PhantomData, sync::Arc};

use {bytes::Bytes, tracing::trace};

use crate::{
    catalog::{MethodCatalog, MethodId, Role},
    codec,
    error::{InvokeError, SchemaError},
    types::{Args, Method},
};

/// Turns typed calls into wire messages for one role's catalog.
///
/// The invoker never sends anything; hand the returned bytes to a session
/// or to a registry broadcast.
#[derive(Debug, Clone)]
pub struct Invoker {
    catalog: Arc<MethodCatalog>,
}

impl Invoker {
    pub fn new(catalog: Arc<MethodCatalog>) -> Self {
        Self { catalog }
    }

    pub fn role(&self) -> Role {
        self.catalog.role()
    }

    pub fn catalog(&self) -> &Arc<MethodCatalog> {
        &self.catalog
    }

    /// Resolve a call builder for `M`. Fails only when `M` does not belong to
    /// this catalog; argument shape is fixed by `M::Args` at compile time.
    pub fn call<M: Method>(&self) -> Result<CallBuilder<M>, SchemaError> {
        let entry = self.catalog.entry_for::<M>()?;
        Ok(CallBuilder {
            id: entry.id(),
            _method: PhantomData,
        })
    }

    pub fn encode<M: Method>(&self, args: M::Args) -> Result<Bytes, InvokeError> {
        self.call::<M>()?.encode(&args)
    }
}

/// Pre-resolved encoder for a single method.
pub struct CallBuilder<M: Method> {
    id: MethodId,
    _method: PhantomData<fn() -> M>,
}

impl<M: Method> CallBuilder<M> {
    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn encode(&self, args: &M::Args) -> Result<Bytes, InvokeError> {
        let mut buf = Vec::new();
        codec::put_method_id(self.id.0, &mut buf)?;
        args.encode(&mut buf)?;
        trace!(method = M::NAME, id = %self.id, len = buf.len(), "encoded call");
        Ok(Bytes::from(buf))
    }
}

impl<M: Method> Clone for CallBuilder<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Method> Copy for CallBuilder<M> {}
