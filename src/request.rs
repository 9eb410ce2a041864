use bytes::Bytes;
use serde_derive::{Deserialize, Serialize};

use crate::errors::CodecError;

/// One call on the wire: the routing key plus the encoded input message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    id: u64,
    method: String,
    payload: Bytes,
}

impl RequestFrame {
    pub fn new(id: u64, method: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            method: method.into(),
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_parts(self) -> (u64, String, Bytes) {
        (self.id, self.method, self.payload)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        rmp_serde::from_slice(data).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_survives_the_wire() {
        let frame = RequestFrame::new(7, "Greeter.SayHello", vec![1u8, 2, 3]);
        let decoded = RequestFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.id(), 7);
        assert_eq!(decoded.method(), "Greeter.SayHello");
        assert_eq!(decoded.payload(), &[1, 2, 3]);
    }

    #[test]
    fn junk_is_malformed() {
        let err = RequestFrame::decode(b"definitely not msgpack").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }
}
