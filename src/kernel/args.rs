//! Typed kernel arguments.

use std::fmt;

/// One positional argument passed to every invocation of a bound kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArg {
    U8(u8),
    U32(u32),
    U64(u64),
    I64(i64),
    F32(f32),
    Bytes(Vec<u8>),
}

impl KernelArg {
    /// Scalar value widened to `u64`, if this is an unsigned integer.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            KernelArg::U8(v) => Some(v as u64),
            KernelArg::U32(v) => Some(v as u64),
            KernelArg::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            KernelArg::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Little-endian encoding, as uploaded into a device parameter block.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            KernelArg::U8(v) => vec![*v],
            KernelArg::U32(v) => v.to_le_bytes().to_vec(),
            KernelArg::U64(v) => v.to_le_bytes().to_vec(),
            KernelArg::I64(v) => v.to_le_bytes().to_vec(),
            KernelArg::F32(v) => v.to_le_bytes().to_vec(),
            KernelArg::Bytes(b) => b.clone(),
        }
    }

    /// Size in bytes of the encoded value.
    pub fn encoded_len(&self) -> usize {
        match self {
            KernelArg::U8(_) => 1,
            KernelArg::U32(_) | KernelArg::F32(_) => 4,
            KernelArg::U64(_) | KernelArg::I64(_) => 8,
            KernelArg::Bytes(b) => b.len(),
        }
    }
}

impl fmt::Display for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelArg::U8(v) => write!(f, "{}u8", v),
            KernelArg::U32(v) => write!(f, "{}u32", v),
            KernelArg::U64(v) => write!(f, "{}u64", v),
            KernelArg::I64(v) => write!(f, "{}i64", v),
            KernelArg::F32(v) => write!(f, "{}f32", v),
            KernelArg::Bytes(b) => write!(f, "[{} bytes]", b.len()),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for KernelArg {
                fn from(v: $ty) -> Self {
                    KernelArg::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar!(u8 => U8, u32 => U32, u64 => U64, i64 => I64, f32 => F32);

impl From<Vec<u8>> for KernelArg {
    fn from(v: Vec<u8>) -> Self {
        KernelArg::Bytes(v)
    }
}

impl From<&[u8]> for KernelArg {
    fn from(v: &[u8]) -> Self {
        KernelArg::Bytes(v.to_vec())
    }
}

/// Concatenate arguments into a parameter block, padding each to 4 bytes.
pub fn pack_args(args: &[KernelArg]) -> Vec<u8> {
    let mut block = Vec::with_capacity(args.iter().map(|a| a.encoded_len() + 3).sum());
    for arg in args {
        block.extend_from_slice(&arg.to_le_bytes());
        while block.len() % 4 != 0 {
            block.push(0);
        }
    }
    block
}
