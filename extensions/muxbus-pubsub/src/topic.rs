use crate::{constants::MAX_TOPIC_NAME_LEN, error::PubSubError};
use bytes::Bytes;
use muxbus_rpc_service::{RpcCodecError, ToRpcBody};
use std::borrow::Cow;

const NAME_LEN_SIZE: usize = 2;

/// A topic name with an opaque payload.
///
/// On the wire a topic is a little-endian `u16` name length, the UTF-8 name
/// bytes, then the payload bytes running to the end of the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    name: String,
    payload: Bytes,
}

impl Topic {
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Result<Self, PubSubError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PubSubError::InvalidTopicEmpty);
        }
        if name.len() > MAX_TOPIC_NAME_LEN {
            return Err(PubSubError::TopicNameTooLong(name.len()));
        }
        Ok(Self {
            name,
            payload: payload.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NAME_LEN_SIZE + self.name.len() + self.payload.len());
        // Bounded by `new`.
        bytes.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parses an envelope. An empty name is accepted here; routes that need
    /// a name check for it themselves.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PubSubError> {
        let (len, rest) = bytes
            .split_first_chunk::<NAME_LEN_SIZE>()
            .ok_or(PubSubError::InvalidTopicBytes)?;
        let name_len = u16::from_le_bytes(*len) as usize;
        if rest.len() < name_len {
            return Err(PubSubError::InvalidTopicBytes);
        }

        let (name, payload) = rest.split_at(name_len);
        let name = std::str::from_utf8(name).map_err(|_| PubSubError::InvalidTopicBytes)?;

        Ok(Self {
            name: name.to_owned(),
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

impl ToRpcBody for Topic {
    fn to_rpc_body(&self) -> Result<Cow<'_, [u8]>, RpcCodecError> {
        Ok(Cow::Owned(self.to_bytes()))
    }
}
