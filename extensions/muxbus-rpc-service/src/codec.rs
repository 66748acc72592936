use std::fmt;
use std::str::Utf8Error;

/// Errors produced while turning payloads into bytes and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCodecError {
    /// The value could not be encoded.
    Encode(String),
    /// The bytes could not be decoded into the requested type.
    Decode(String),
    /// A text response was not valid UTF-8.
    InvalidUtf8(Utf8Error),
}

impl fmt::Display for RpcCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcCodecError::Encode(msg) => write!(f, "failed to encode payload: {}", msg),
            RpcCodecError::Decode(msg) => write!(f, "failed to decode payload: {}", msg),
            RpcCodecError::InvalidUtf8(e) => write!(f, "payload is not valid UTF-8: {}", e),
        }
    }
}

impl std::error::Error for RpcCodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcCodecError::InvalidUtf8(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Utf8Error> for RpcCodecError {
    fn from(e: Utf8Error) -> Self {
        RpcCodecError::InvalidUtf8(e)
    }
}

/// A payload encoding.
///
/// Codecs are marker types with associated functions so the choice is made
/// at the call site (`Encoded<_, MyCodec>`) without making clients generic.
pub trait RpcCodec: Send + Sync + 'static {
    fn marshal<T>(value: &T) -> Result<Vec<u8>, RpcCodecError>
    where
        T: bitcode::Encode + ?Sized;

    fn unmarshal<T>(bytes: &[u8]) -> Result<T, RpcCodecError>
    where
        T: for<'de> bitcode::Decode<'de>;
}

/// The default codec, backed by `bitcode`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitcodeCodec;

impl RpcCodec for BitcodeCodec {
    fn marshal<T>(value: &T) -> Result<Vec<u8>, RpcCodecError>
    where
        T: bitcode::Encode + ?Sized,
    {
        Ok(bitcode::encode(value))
    }

    fn unmarshal<T>(bytes: &[u8]) -> Result<T, RpcCodecError>
    where
        T: for<'de> bitcode::Decode<'de>,
    {
        bitcode::decode(bytes).map_err(|e| RpcCodecError::Decode(e.to_string()))
    }
}
