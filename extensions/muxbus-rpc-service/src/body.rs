use crate::codec::{BitcodeCodec, RpcCodec, RpcCodecError};
use bytes::Bytes;
use std::borrow::Cow;
use std::marker::PhantomData;

/// Values that can be sent as a request or response payload.
///
/// Strings and byte containers are written as-is; structured values go
/// through a codec by wrapping them in [`Encoded`].
pub trait ToRpcBody {
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError>;
}

impl ToRpcBody for () {
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError> {
        Ok(Cow::Borrowed(&[]))
    }
}

impl ToRpcBody for str {
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError> {
        Ok(Cow::Borrowed(self.as_bytes()))
    }
}

impl ToRpcBody for String {
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError> {
        Ok(Cow::Borrowed(self.as_bytes()))
    }
}

impl ToRpcBody for [u8] {
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError> {
        Ok(Cow::Borrowed(self))
    }
}

impl ToRpcBody for Vec<u8> {
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError> {
        Ok(Cow::Borrowed(self.as_slice()))
    }
}

impl ToRpcBody for Bytes {
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError> {
        Ok(Cow::Borrowed(self.as_ref()))
    }
}

impl<T: ToRpcBody + ?Sized> ToRpcBody for &T {
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError> {
        (**self).to_rpc_body()
    }
}

/// Sends a structured value encoded with codec `C`.
pub struct Encoded<'a, T: ?Sized, C = BitcodeCodec> {
    value: &'a T,
    _codec: PhantomData<fn() -> C>,
}

impl<'a, T: ?Sized, C> Encoded<'a, T, C> {
    pub fn new(value: &'a T) -> Self {
        Self {
            value,
            _codec: PhantomData,
        }
    }
}

impl<T, C> ToRpcBody for Encoded<'_, T, C>
where
    T: bitcode::Encode + ?Sized,
    C: RpcCodec,
{
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError> {
        C::marshal(self.value).map(Cow::Owned)
    }
}

/// How a response payload is bound to the caller's output type.
///
/// Raw bytes and text are copied directly; anything else is decoded through
/// a codec by asking for a [`Decoded`].
pub trait FromRpcBody: Sized {
    fn from_rpc_body(bytes: &[u8]) -> Result<Self, RpcCodecError>;
}

impl FromRpcBody for () {
    fn from_rpc_body(_bytes: &[u8]) -> Result<Self, RpcCodecError> {
        Ok(())
    }
}

impl FromRpcBody for Vec<u8> {
    fn from_rpc_body(bytes: &[u8]) -> Result<Self, RpcCodecError> {
        Ok(bytes.to_vec())
    }
}

impl FromRpcBody for Bytes {
    fn from_rpc_body(bytes: &[u8]) -> Result<Self, RpcCodecError> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

impl FromRpcBody for String {
    fn from_rpc_body(bytes: &[u8]) -> Result<Self, RpcCodecError> {
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }
}

/// A structured response decoded with codec `C`.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T, C = BitcodeCodec>(pub T, PhantomData<fn() -> C>);

impl<T, C> Decoded<T, C> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T, C> FromRpcBody for Decoded<T, C>
where
    T: for<'de> bitcode::Decode<'de>,
    C: RpcCodec,
{
    fn from_rpc_body(bytes: &[u8]) -> Result<Self, RpcCodecError> {
        C::unmarshal(bytes).map(|value| Decoded(value, PhantomData))
    }
}
