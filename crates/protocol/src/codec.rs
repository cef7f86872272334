//! Message encoding and decoding for the pipe transport.
//!
//! # Wire Format
//!
//! Every message travels as `[code: u64][LZ4-compressed SBOR payload]`;
//! the pipe layer frames code and payload, this module owns the payload
//! body. The code, not a field in the payload, determines the type — so
//! decoding dispatches on it and an unknown code is a hard error that
//! drops the peer.

use crate::messages::{
    codes, ChunkDeliveryMsg, OfferedHashesMsg, ProtocolMsg, RetrieveRequestMsg, SubscribeMsg,
    UnsubscribeMsg, WantedHashesMsg,
};
use chunkmesh_network::WireMsg;
use thiserror::Error;

/// Errors from message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("SBOR decode error: {0}")]
    SborDecode(String),

    #[error("SBOR encode error: {0}")]
    SborEncode(String),

    #[error("Decompression error: {0}")]
    Decompress(String),

    #[error("Unknown message code: {0}")]
    UnknownCode(u64),
}

fn sbor_encode<T: sbor::BasicEncode>(value: &T) -> Result<Vec<u8>, CodecError> {
    sbor::basic_encode(value).map_err(|e| CodecError::SborEncode(format!("{:?}", e)))
}

fn sbor_decode<T: sbor::BasicDecode>(payload: &[u8]) -> Result<T, CodecError> {
    sbor::basic_decode(payload).map_err(|e| CodecError::SborDecode(format!("{:?}", e)))
}

/// Encode a protocol message to its wire form.
///
/// SBOR-encodes the payload then LZ4-compresses it (with prepended size,
/// so decompression can pre-allocate).
pub fn encode_message(msg: &ProtocolMsg) -> Result<WireMsg, CodecError> {
    let sbor_bytes = match msg {
        ProtocolMsg::OfferedHashes(m) => sbor_encode(m)?,
        ProtocolMsg::WantedHashes(m) => sbor_encode(m)?,
        ProtocolMsg::Subscribe(m) => sbor_encode(m)?,
        ProtocolMsg::Unsubscribe(m) => sbor_encode(m)?,
        ProtocolMsg::RetrieveRequest(m) => sbor_encode(m)?,
        ProtocolMsg::ChunkDelivery(m) => sbor_encode(m)?,
    };
    Ok(WireMsg::new(
        msg.code(),
        lz4_flex::compress_prepend_size(&sbor_bytes),
    ))
}

/// Decode a wire message based on its code.
pub fn decode_message(wire: &WireMsg) -> Result<ProtocolMsg, CodecError> {
    let payload = lz4_flex::decompress_size_prepended(&wire.payload)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;

    match wire.code {
        codes::OFFERED_HASHES => Ok(ProtocolMsg::OfferedHashes(sbor_decode::<OfferedHashesMsg>(
            &payload,
        )?)),
        codes::WANTED_HASHES => Ok(ProtocolMsg::WantedHashes(sbor_decode::<WantedHashesMsg>(
            &payload,
        )?)),
        codes::SUBSCRIBE => Ok(ProtocolMsg::Subscribe(sbor_decode::<SubscribeMsg>(&payload)?)),
        codes::UNSUBSCRIBE => Ok(ProtocolMsg::Unsubscribe(sbor_decode::<UnsubscribeMsg>(
            &payload,
        )?)),
        codes::RETRIEVE_REQUEST => Ok(ProtocolMsg::RetrieveRequest(
            sbor_decode::<RetrieveRequestMsg>(&payload)?,
        )),
        codes::CHUNK_DELIVERY => Ok(ProtocolMsg::ChunkDelivery(sbor_decode::<ChunkDeliveryMsg>(
            &payload,
        )?)),
        other => Err(CodecError::UnknownCode(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{retrieve_request_stream, Priority, HASH_SIZE};
    use chunkmesh_types::Key;

    #[test]
    fn test_retrieve_request_roundtrip() {
        let msg = ProtocolMsg::RetrieveRequest(RetrieveRequestMsg {
            key: Key::from_hash_bytes(&[3u8; 32]),
            skip_check: true,
        });
        let wire = encode_message(&msg).unwrap();
        assert_eq!(wire.code, codes::RETRIEVE_REQUEST);
        assert_eq!(decode_message(&wire).unwrap(), msg);
    }

    #[test]
    fn test_offered_hashes_roundtrip() {
        let key = Key::from_hash_bytes(&[7u8; 32]);
        let msg = ProtocolMsg::OfferedHashes(OfferedHashesMsg {
            stream: retrieve_request_stream(),
            key: vec![],
            from: 0,
            to: HASH_SIZE,
            hashes: key.as_bytes().to_vec(),
            handover_proof: None,
        });
        let wire = encode_message(&msg).unwrap();
        assert_eq!(decode_message(&wire).unwrap(), msg);
    }

    #[test]
    fn test_subscribe_roundtrip() {
        let msg = ProtocolMsg::Subscribe(SubscribeMsg {
            stream: retrieve_request_stream(),
            key: vec![],
            from: 0,
            to: 0,
            priority: Priority::Top,
        });
        let wire = encode_message(&msg).unwrap();
        assert_eq!(decode_message(&wire).unwrap(), msg);
    }

    #[test]
    fn test_chunk_delivery_roundtrip() {
        let msg = ProtocolMsg::ChunkDelivery(ChunkDeliveryMsg {
            key: Key::from_hash_bytes(&[1u8; 32]),
            sdata: vec![0xCD; 4096],
        });
        let wire = encode_message(&msg).unwrap();
        // 4096 identical bytes compress well.
        assert!(wire.payload.len() < 4096);
        assert_eq!(decode_message(&wire).unwrap(), msg);
    }

    #[test]
    fn test_unknown_code_rejected() {
        let wire = WireMsg::new(99, lz4_flex::compress_prepend_size(b""));
        assert!(matches!(
            decode_message(&wire),
            Err(CodecError::UnknownCode(99))
        ));
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let wire = WireMsg::new(codes::RETRIEVE_REQUEST, vec![0xFF, 0x00, 0x12]);
        assert!(matches!(
            decode_message(&wire),
            Err(CodecError::Decompress(_))
        ));
    }
}
