// Copyright 2023 litep2p developers
// Copyright 2024 litedial developers
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Signed peer records.
//!
//! A peer record lists the addresses a peer is reachable at. It's wrapped into a signed envelope
//! using the same encoding as libp2p's routing records so the records can be exchanged with
//! other implementations.

use crate::{
    crypto::{ed25519::Keypair, PublicKey},
    error::{AddressError, Error},
    PeerId,
};

use multiaddr::Multiaddr;
use prost::Message;

/// Domain separation string of the envelope signature.
const SIGNING_DOMAIN: &str = "libp2p-routing-state";

/// Multicodec of peer records.
const PAYLOAD_TYPE: [u8; 2] = [0x03, 0x01];

mod schema {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Envelope {
        #[prost(bytes = "vec", tag = "1")]
        pub public_key: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub payload_type: Vec<u8>,
        #[prost(bytes = "vec", tag = "3")]
        pub payload: Vec<u8>,
        #[prost(bytes = "vec", tag = "5")]
        pub signature: Vec<u8>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct AddressInfo {
        #[prost(bytes = "vec", tag = "1")]
        pub multiaddr: Vec<u8>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct PeerRecord {
        #[prost(bytes = "vec", tag = "1")]
        pub peer_id: Vec<u8>,
        #[prost(uint64, tag = "2")]
        pub seq: u64,
        #[prost(message, repeated, tag = "3")]
        pub addresses: Vec<AddressInfo>,
    }
}

/// Addresses of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Peer the record belongs to.
    pub peer: PeerId,

    /// Sequence number, a newer record of the same peer has a higher number.
    pub seq: u64,

    /// Addresses of the peer.
    pub addresses: Vec<Multiaddr>,
}

/// [`PeerRecord`] signed by the key of the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPeerRecord {
    record: PeerRecord,
    public_key: PublicKey,
    signature: Vec<u8>,
    payload: Vec<u8>,
}

/// Create the buffer that's signed: the length-prefixed domain, payload type and payload.
fn signature_payload(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();

    for field in [SIGNING_DOMAIN.as_bytes(), &PAYLOAD_TYPE[..], payload] {
        let mut buffer = unsigned_varint::encode::usize_buffer();
        out.extend_from_slice(unsigned_varint::encode::usize(field.len(), &mut buffer));
        out.extend_from_slice(field);
    }

    out
}

impl SignedPeerRecord {
    /// Create new [`SignedPeerRecord`] for the peer of `keypair`.
    pub fn new(keypair: &Keypair, seq: u64, addresses: Vec<Multiaddr>) -> Self {
        let peer = keypair.peer_id();
        let payload = schema::PeerRecord {
            peer_id: peer.to_bytes(),
            seq,
            addresses: addresses
                .iter()
                .map(|address| schema::AddressInfo {
                    multiaddr: address.to_vec(),
                })
                .collect(),
        }
        .encode_to_vec();
        let signature = keypair.sign(&signature_payload(&payload));

        Self {
            record: PeerRecord {
                peer,
                seq,
                addresses,
            },
            public_key: PublicKey::Ed25519(keypair.public()),
            signature,
            payload,
        }
    }

    /// Get the record.
    pub fn record(&self) -> &PeerRecord {
        &self.record
    }

    /// Get the key that signed the record.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Encode the envelope.
    pub fn to_protobuf_encoding(&self) -> Vec<u8> {
        schema::Envelope {
            public_key: self.public_key.to_protobuf_encoding(),
            payload_type: PAYLOAD_TYPE.to_vec(),
            payload: self.payload.clone(),
            signature: self.signature.clone(),
        }
        .encode_to_vec()
    }

    /// Decode an envelope and verify its signature.
    pub fn from_protobuf_encoding(bytes: &[u8]) -> crate::Result<Self> {
        let envelope = schema::Envelope::decode(bytes)?;
        let public_key = PublicKey::from_protobuf_encoding(&envelope.public_key)?;

        if envelope.payload_type != PAYLOAD_TYPE {
            return Err(Error::InvalidData);
        }

        if !public_key.verify(&signature_payload(&envelope.payload), &envelope.signature) {
            return Err(Error::InvalidData);
        }

        let record = schema::PeerRecord::decode(envelope.payload.as_slice())?;
        let peer = PeerId::from_bytes(&record.peer_id)?;

        if !peer.is_public_key(&public_key) {
            return Err(Error::AddressError(AddressError::PeerIdMismatch));
        }

        let addresses = record
            .addresses
            .into_iter()
            .map(|info| Multiaddr::try_from(info.multiaddr))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            record: PeerRecord {
                peer,
                seq: record.seq,
                addresses,
            },
            public_key,
            signature: envelope.signature,
            payload: envelope.payload,
        })
    }
}

/// Persistent storage of peer records.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PeerStore: Send + Sync {
    /// Store a record, replacing any older record of the same peer.
    async fn consume_peer_record(&self, record: SignedPeerRecord) -> crate::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses() -> Vec<Multiaddr> {
        vec![
            "/ip4/127.0.0.1/tcp/8888".parse().unwrap(),
            "/ip6/::1/tcp/8888".parse().unwrap(),
        ]
    }

    #[test]
    fn decode_signed_record() {
        let keypair = Keypair::generate();
        let record = SignedPeerRecord::new(&keypair, 7, addresses());

        let decoded = SignedPeerRecord::from_protobuf_encoding(&record.to_protobuf_encoding())
            .unwrap();

        assert_eq!(decoded, record);
        assert_eq!(decoded.record().peer, keypair.peer_id());
        assert_eq!(decoded.record().seq, 7);
        assert_eq!(decoded.record().addresses, addresses());
    }

    #[test]
    fn tampered_record_is_rejected() {
        let keypair = Keypair::generate();
        let record = SignedPeerRecord::new(&keypair, 1, addresses());

        let mut envelope = schema::Envelope::decode(record.to_protobuf_encoding().as_slice())
            .unwrap();
        envelope.payload = schema::PeerRecord {
            peer_id: keypair.peer_id().to_bytes(),
            seq: 2,
            addresses: Vec::new(),
        }
        .encode_to_vec();

        assert_eq!(
            SignedPeerRecord::from_protobuf_encoding(&envelope.encode_to_vec()),
            Err(Error::InvalidData)
        );
    }

    #[test]
    fn record_of_another_peer_is_rejected() {
        let keypair = Keypair::generate();
        let payload = schema::PeerRecord {
            peer_id: PeerId::random().to_bytes(),
            seq: 1,
            addresses: Vec::new(),
        }
        .encode_to_vec();
        let envelope = schema::Envelope {
            public_key: PublicKey::Ed25519(keypair.public()).to_protobuf_encoding(),
            payload_type: PAYLOAD_TYPE.to_vec(),
            signature: keypair.sign(&signature_payload(&payload)),
            payload,
        };

        assert_eq!(
            SignedPeerRecord::from_protobuf_encoding(&envelope.encode_to_vec()),
            Err(Error::AddressError(AddressError::PeerIdMismatch))
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(SignedPeerRecord::from_protobuf_encoding(&[0xff, 0xff, 0xff]).is_err());
    }
}
