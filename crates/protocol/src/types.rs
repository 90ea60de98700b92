//! Argument type descriptors and the traits that tie Rust types to them.

use std::fmt;

use serde::{Serialize, de::DeserializeOwned};

use crate::{codec, error::ProtocolError};

// ── Argument kinds ───────────────────────────────────────────────────────────

/// Semantic type of one method argument, as recorded in a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I32,
    I64,
    String,
    Seq(Box<ArgKind>),
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::U8 => f.write_str("u8"),
            Self::U16 => f.write_str("u16"),
            Self::U32 => f.write_str("u32"),
            Self::U64 => f.write_str("u64"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::String => f.write_str("string"),
            Self::Seq(inner) => write!(f, "seq<{inner}>"),
        }
    }
}

/// Ordered argument list of a method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature(pub Vec<ArgKind>);

impl Signature {
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn kinds(&self) -> &[ArgKind] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, kind) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{kind}")?;
        }
        f.write_str(")")
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

/// A Rust type usable as a method argument.
pub trait WireType: Serialize + DeserializeOwned + Send + 'static {
    fn kind() -> ArgKind;
}

macro_rules! wire_type {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl WireType for $ty {
                fn kind() -> ArgKind {
                    ArgKind::$kind
                }
            }
        )*
    };
}

wire_type! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i32 => I32,
    i64 => I64,
    String => String,
}

impl<T: WireType> WireType for Vec<T> {
    fn kind() -> ArgKind {
        ArgKind::Seq(Box::new(T::kind()))
    }
}

// ── Argument lists ───────────────────────────────────────────────────────────

/// The full, ordered argument list of a method: a tuple of [`WireType`]s.
pub trait Args: Sized + Send + 'static {
    fn signature() -> Signature;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), postcard::Error>;

    fn decode(cursor: &mut &[u8]) -> Result<Self, ProtocolError>;
}

macro_rules! tuple_args {
    ($($name:ident),*) => {
        impl<$($name: WireType),*> Args for ($($name,)*) {
            fn signature() -> Signature {
                Signature(vec![$($name::kind()),*])
            }

            #[allow(non_snake_case, unused_variables)]
            fn encode(&self, buf: &mut Vec<u8>) -> Result<(), postcard::Error> {
                let ($($name,)*) = self;
                $(codec::put($name, buf)?;)*
                Ok(())
            }

            #[allow(unused_variables)]
            fn decode(cursor: &mut &[u8]) -> Result<Self, ProtocolError> {
                Ok(($(codec::take::<$name>(cursor)?,)*))
            }
        }
    };
}

tuple_args!();
tuple_args!(A);
tuple_args!(A, B);
tuple_args!(A, B, C);
tuple_args!(A, B, C, D);
tuple_args!(A, B, C, D, E);
tuple_args!(A, B, C, D, E, F);

// ── Methods ──────────────────────────────────────────────────────────────────

/// A named remote method. Implemented by a marker type per catalog entry.
///
/// ```
/// use tether_protocol::Method;
///
/// pub struct Login;
///
/// impl Method for Login {
///     const NAME: &'static str = "login";
///     type Args = (String, String);
/// }
/// ```
pub trait Method: 'static {
    const NAME: &'static str;
    type Args: Args;

    fn signature() -> Signature {
        Self::Args::signature()
    }
}
