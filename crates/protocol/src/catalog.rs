use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

use crate::{
    codec,
    error::{ProtocolError, SchemaError},
    types::{Args, Method, Signature},
};

// ── Roles ────────────────────────────────────────────────────────────────────

/// Direction of the calls a catalog describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Calls a server sends to its clients.
    ClientInvoker,
    /// Calls a client sends to its server.
    ServerInvoker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientInvoker => "client_invoker",
            Self::ServerInvoker => "server_invoker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Entries ──────────────────────────────────────────────────────────────────

/// Wire identifier of a method: its declaration index in the role's catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type DecodeFn = fn(&mut &[u8]) -> Result<Box<dyn Any + Send>, ProtocolError>;

fn decode_erased<M: Method>(cursor: &mut &[u8]) -> Result<Box<dyn Any + Send>, ProtocolError> {
    let args = M::Args::decode(cursor)?;
    Ok(Box::new(args))
}

pub struct CatalogEntry {
    id: MethodId,
    name: &'static str,
    signature: Signature,
    method_type: TypeId,
    decode: DecodeFn,
}

impl CatalogEntry {
    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Whether this entry was declared by the method type `M`.
    pub fn is<M: Method>(&self) -> bool {
        self.method_type == TypeId::of::<M>()
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Declares one role's catalog. Entry ids follow declaration order, so both
/// peers must declare the same methods in the same order.
pub struct CatalogBuilder {
    role: Role,
    entries: Vec<CatalogEntry>,
    duplicate: Option<&'static str>,
}

impl CatalogBuilder {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            entries: Vec::new(),
            duplicate: None,
        }
    }

    pub fn method<M: Method>(mut self) -> Self {
        if self.entries.iter().any(|e| e.name == M::NAME) {
            if self.duplicate.is_none() {
                self.duplicate = Some(M::NAME);
            }
            return self;
        }
        let id = MethodId(self.entries.len() as u32);
        self.entries.push(CatalogEntry {
            id,
            name: M::NAME,
            signature: M::signature(),
            method_type: TypeId::of::<M>(),
            decode: decode_erased::<M>,
        });
        self
    }

    pub fn build(self) -> Result<MethodCatalog, SchemaError> {
        if let Some(name) = self.duplicate {
            return Err(SchemaError::DuplicateMethod {
                role: self.role,
                name,
            });
        }
        let by_name = self.entries.iter().map(|e| (e.name, e.id)).collect();
        Ok(MethodCatalog {
            role: self.role,
            entries: self.entries,
            by_name,
        })
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────────

/// Immutable table of one role's methods.
#[derive(Debug)]
pub struct MethodCatalog {
    role: Role,
    entries: Vec<CatalogEntry>,
    by_name: HashMap<&'static str, MethodId>,
}

impl MethodCatalog {
    pub fn builder(role: Role) -> CatalogBuilder {
        CatalogBuilder::new(role)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn get(&self, id: MethodId) -> Option<&CatalogEntry> {
        self.entries.get(id.0 as usize)
    }

    pub fn lookup(&self, name: &str) -> Option<&CatalogEntry> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    /// Resolve the entry declared by `M`.
    ///
    /// Fails if `M::NAME` is absent, or present but declared by another
    /// method type (which means a different argument list).
    pub fn entry_for<M: Method>(&self) -> Result<&CatalogEntry, SchemaError> {
        let entry = self
            .lookup(M::NAME)
            .ok_or(SchemaError::UnknownMethod {
                role: self.role,
                name: M::NAME,
            })?;
        if !entry.is::<M>() {
            return Err(SchemaError::ArgumentType {
                role: self.role,
                name: M::NAME,
                declared: entry.signature.clone(),
                supplied: M::signature(),
            });
        }
        Ok(entry)
    }

    /// Identify and decode one wire message without running any handler.
    pub fn decode<'a>(&'a self, frame: &[u8]) -> Result<DecodedCall<'a>, ProtocolError> {
        let mut cursor = frame;
        let id = codec::take_method_id(&mut cursor)?;
        let entry = self.get(MethodId(id)).ok_or(ProtocolError::UnknownMethod {
            role: self.role,
            id,
        })?;
        let args = (entry.decode)(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(ProtocolError::TrailingBytes {
                method: entry.name,
                extra: cursor.len(),
            });
        }
        Ok(DecodedCall { entry, args })
    }
}

// ── Decoded calls ────────────────────────────────────────────────────────────

/// A fully validated inbound call with its arguments still type-erased.
pub struct DecodedCall<'a> {
    entry: &'a CatalogEntry,
    args: Box<dyn Any + Send>,
}

impl<'a> DecodedCall<'a> {
    pub fn entry(&self) -> &'a CatalogEntry {
        self.entry
    }

    pub fn name(&self) -> &'static str {
        self.entry.name
    }

    /// Recover the typed arguments if this call was for `M`.
    pub fn into_args<M: Method>(self) -> Option<M::Args> {
        if !self.entry.is::<M>() {
            return None;
        }
        self.args.downcast::<M::Args>().ok().map(|args| *args)
    }

    pub(crate) fn into_parts(self) -> (&'a CatalogEntry, Box<dyn Any + Send>) {
        (self.entry, self.args)
    }
}

impl fmt::Debug for DecodedCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedCall")
            .field("entry", self.entry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Login;
    impl Method for Login {
        const NAME: &'static str = "login";
        type Args = (String, String);
    }

    struct Logout;
    impl Method for Logout {
        const NAME: &'static str = "logout";
        type Args = ();
    }

    struct LoginById;
    impl Method for LoginById {
        const NAME: &'static str = "login";
        type Args = (u64,);
    }

    fn catalog() -> MethodCatalog {
        MethodCatalog::builder(Role::ServerInvoker)
            .method::<Login>()
            .method::<Logout>()
            .build()
            .unwrap()
    }

    fn frame(id: u32, args: &impl Args) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::put_method_id(id, &mut buf).unwrap();
        args.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn ids_follow_declaration_order() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("login").unwrap().id(), MethodId(0));
        assert_eq!(catalog.lookup("logout").unwrap().id(), MethodId(1));
        assert_eq!(
            catalog.get(MethodId(0)).unwrap().signature().to_string(),
            "(string, string)"
        );
        assert!(catalog.get(MethodId(2)).is_none());
    }

    #[test]
    fn duplicate_name_fails_build() {
        let err = MethodCatalog::builder(Role::ServerInvoker)
            .method::<Login>()
            .method::<Logout>()
            .method::<LoginById>()
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateMethod {
            role: Role::ServerInvoker,
            name: "login"
        }));
    }

    #[test]
    fn entry_for_checks_signature() {
        let catalog = catalog();
        assert!(catalog.entry_for::<Login>().is_ok());
        let err = catalog.entry_for::<LoginById>().unwrap_err();
        assert!(matches!(err, SchemaError::ArgumentType { name: "login", .. }));
        assert_eq!(
            err.to_string(),
            "method `login` in server_invoker catalog takes (string, string), got (u64)"
        );
    }

    #[test]
    fn decode_recovers_typed_args() {
        let catalog = catalog();
        let bytes = frame(0, &("alice".to_string(), "secret".to_string()));
        let call = catalog.decode(&bytes).unwrap();
        assert_eq!(call.name(), "login");
        let (user, pass) = call.into_args::<Login>().unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "secret");
    }

    #[test]
    fn decode_rejects_wrong_method_type() {
        let catalog = catalog();
        let bytes = frame(1, &());
        let call = catalog.decode(&bytes).unwrap();
        assert!(call.into_args::<Login>().is_none());
    }

    #[test]
    fn decode_unknown_method() {
        let catalog = catalog();
        let bytes = frame(9, &());
        assert!(matches!(
            catalog.decode(&bytes),
            Err(ProtocolError::UnknownMethod { id: 9, .. })
        ));
    }

    #[test]
    fn decode_truncated_and_trailing() {
        let catalog = catalog();
        let mut bytes = frame(0, &("alice".to_string(), "secret".to_string()));
        bytes.pop();
        assert!(matches!(
            catalog.decode(&bytes),
            Err(ProtocolError::Truncated)
        ));

        let mut bytes = frame(1, &());
        bytes.push(0);
        assert!(matches!(
            catalog.decode(&bytes),
            Err(ProtocolError::TrailingBytes {
                method: "logout",
                extra: 1
            })
        ));
    }

    #[test]
    fn empty_frame_is_truncated() {
        assert!(matches!(
            catalog().decode(&[]),
            Err(ProtocolError::Truncated)
        ));
    }
}
