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

//! In-memory address book.

use crate::{
    dialer::DialTarget,
    peer_record::{PeerStore, SignedPeerRecord},
    resolver::{strip_peer_id, AddressResolver},
    PeerId,
};

use indexmap::IndexMap;
use multiaddr::{Multiaddr, Protocol};
use multihash::Multihash;
use parking_lot::RwLock;

use std::collections::{HashMap, HashSet};

/// Logging target for the file.
const LOG_TARGET: &str = "litedial::address-book";

/// Maximum number of addresses tracked for a peer.
const MAX_ADDRESSES: usize = 32;

/// Score adjustment after a successful dial.
const SCORE_DIAL_SUCCESS: i32 = 100i32;

/// Score adjustment after a failed dial.
const SCORE_DIAL_FAILURE: i32 = -100i32;

#[derive(Debug, Clone)]
struct AddressRecord {
    /// Address score.
    score: i32,

    /// Address, always ends in `/p2p/<peer>`.
    address: Multiaddr,
}

impl AddressRecord {
    /// Create new `AddressRecord` and if `address` doesn't contain `P2p`,
    /// append the provided `PeerId` to the address.
    ///
    /// Returns `None` if `address` belongs to another peer.
    fn new(peer: &PeerId, address: Multiaddr) -> Option<Self> {
        let address = match address.iter().last() {
            Some(Protocol::P2p(multihash)) => {
                if multihash != Multihash::from(*peer) {
                    return None;
                }
                address
            }
            _ => address.with(Protocol::P2p(Multihash::from(*peer))),
        };

        Some(Self {
            score: 0i32,
            address,
        })
    }
}

/// Addresses of a single peer, in insertion order.
#[derive(Debug, Default)]
struct AddressStore {
    addresses: IndexMap<Multiaddr, AddressRecord>,
}

impl AddressStore {
    /// Insert `record` into the store.
    ///
    /// If the store is full, the record with the lowest score is replaced if its score is lower
    /// than the score of `record`. Returns `true` if the record was inserted.
    fn insert(&mut self, record: AddressRecord) -> bool {
        if self.addresses.contains_key(&record.address) {
            return false;
        }

        if self.addresses.len() >= MAX_ADDRESSES {
            let Some((lowest, score)) = self
                .addresses
                .values()
                .min_by_key(|record| record.score)
                .map(|record| (record.address.clone(), record.score))
            else {
                return false;
            };

            if score >= record.score {
                return false;
            }

            self.addresses.shift_remove(&lowest);
        }

        self.addresses.insert(record.address.clone(), record);
        true
    }

    /// Update the score of an existing address.
    fn update(&mut self, address: &Multiaddr, score: i32) {
        if let Some(record) = self.addresses.get_mut(address) {
            record.score = record.score.saturating_add(score);
        }
    }

    /// Return the addresses sorted by score, ties in insertion order.
    fn addresses(&self) -> Vec<Multiaddr> {
        let mut records = self.addresses.values().collect::<Vec<_>>();
        records.sort_by(|lhs, rhs| rhs.score.cmp(&lhs.score));
        records.into_iter().map(|record| record.address.clone()).collect()
    }
}

/// In-memory address book.
///
/// Keeps a scored list of addresses for each known peer. Addresses that were dialed
/// successfully are tried first. Addresses can be denied, after which they're filtered out of
/// every dial.
#[derive(Debug, Default)]
pub struct AddressBook {
    /// Known addresses of peers.
    peers: RwLock<HashMap<PeerId, AddressStore>>,

    /// Addresses which may not be dialed, without the `/p2p` suffix.
    denied: RwLock<HashSet<Multiaddr>>,
}

impl AddressBook {
    /// Create new [`AddressBook`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Add known addresses of `peer`.
    ///
    /// Addresses of other peers are ignored. Returns the number of new addresses.
    pub fn add_known_addresses(
        &self,
        peer: PeerId,
        addresses: impl IntoIterator<Item = Multiaddr>,
    ) -> usize {
        let mut peers = self.peers.write();
        let store = peers.entry(peer).or_default();

        let added = addresses
            .into_iter()
            .filter_map(|address| {
                let record = AddressRecord::new(&peer, address.clone());
                if record.is_none() {
                    tracing::debug!(target: LOG_TARGET, ?peer, ?address, "address of another peer");
                }
                record
            })
            .filter(|record| store.insert(record.clone()))
            .count();

        tracing::trace!(target: LOG_TARGET, ?peer, ?added, "add known addresses");

        added
    }

    /// Get the known addresses of `peer`, best address first.
    pub fn addresses(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.peers.read().get(peer).map(AddressStore::addresses).unwrap_or_default()
    }

    /// Forget `peer` and its addresses.
    pub fn remove_peer(&self, peer: &PeerId) {
        self.peers.write().remove(peer);
    }

    /// Prevent `address` from being dialed, for any peer.
    pub fn deny_address(&self, address: Multiaddr) {
        self.denied.write().insert(strip_peer_id(&address));
    }

    /// Allow dialing a previously denied `address`.
    pub fn allow_address(&self, address: &Multiaddr) {
        self.denied.write().remove(&strip_peer_id(address));
    }
}

#[async_trait::async_trait]
impl AddressResolver for AddressBook {
    async fn resolve(&self, target: &DialTarget) -> crate::Result<Vec<Multiaddr>> {
        match target {
            DialTarget::Peer(peer) => Ok(self.addresses(peer)),
            DialTarget::Address(address) => {
                if let Some(peer) = PeerId::try_from_multiaddr(address) {
                    self.add_known_addresses(peer, std::iter::once(address.clone()));
                }

                Ok(vec![address.clone()])
            }
        }
    }

    fn filter(&self, address: &Multiaddr) -> bool {
        !self.denied.read().contains(&strip_peer_id(address))
    }

    fn report_dial_result(&self, address: &Multiaddr, success: bool) {
        let Some(peer) = PeerId::try_from_multiaddr(address) else {
            return;
        };
        let score = match success {
            true => SCORE_DIAL_SUCCESS,
            false => SCORE_DIAL_FAILURE,
        };

        if let Some(store) = self.peers.write().get_mut(&peer) {
            store.update(address, score);
        }
    }
}

#[async_trait::async_trait]
impl PeerStore for AddressBook {
    async fn consume_peer_record(&self, record: SignedPeerRecord) -> crate::Result<()> {
        let record = record.record();
        self.add_known_addresses(record.peer, record.addresses.iter().cloned());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ed25519::Keypair;

    fn tcp(port: u16) -> Multiaddr {
        Multiaddr::empty()
            .with(Protocol::Ip4(std::net::Ipv4Addr::LOCALHOST))
            .with(Protocol::Tcp(port))
    }

    fn with_peer(address: Multiaddr, peer: PeerId) -> Multiaddr {
        address.with(Protocol::P2p(Multihash::from(peer)))
    }

    #[tokio::test]
    async fn resolve_peer_in_score_order() {
        let book = AddressBook::new();
        let peer = PeerId::random();

        assert_eq!(book.add_known_addresses(peer, vec![tcp(1), tcp(2), tcp(3)]), 3);
        // duplicates aren't added twice
        assert_eq!(book.add_known_addresses(peer, vec![with_peer(tcp(1), peer)]), 0);

        assert_eq!(
            book.resolve(&DialTarget::Peer(peer)).await.unwrap(),
            vec![with_peer(tcp(1), peer), with_peer(tcp(2), peer), with_peer(tcp(3), peer)]
        );

        book.report_dial_result(&with_peer(tcp(1), peer), false);
        book.report_dial_result(&with_peer(tcp(3), peer), true);

        assert_eq!(
            book.resolve(&DialTarget::Peer(peer)).await.unwrap(),
            vec![with_peer(tcp(3), peer), with_peer(tcp(2), peer), with_peer(tcp(1), peer)]
        );
    }

    #[tokio::test]
    async fn unknown_peer_resolves_to_nothing() {
        let book = AddressBook::new();

        assert!(book.resolve(&DialTarget::Peer(PeerId::random())).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn address_resolves_to_itself() {
        let book = AddressBook::new();
        let peer = PeerId::random();

        assert_eq!(
            book.resolve(&DialTarget::Address(tcp(1))).await.unwrap(),
            vec![tcp(1)]
        );
        assert_eq!(
            book.resolve(&DialTarget::Address(with_peer(tcp(1), peer))).await.unwrap(),
            vec![with_peer(tcp(1), peer)]
        );

        // address with peer ID is remembered
        assert_eq!(book.addresses(&peer), vec![with_peer(tcp(1), peer)]);
    }

    #[test]
    fn addresses_of_other_peers_are_ignored() {
        let book = AddressBook::new();
        let peer = PeerId::random();

        assert_eq!(
            book.add_known_addresses(peer, vec![with_peer(tcp(1), PeerId::random())]),
            0
        );
        assert!(book.addresses(&peer).is_empty());
    }

    #[test]
    fn denied_addresses_are_filtered() {
        let book = AddressBook::new();
        let peer = PeerId::random();

        book.deny_address(tcp(1));

        assert!(!book.filter(&tcp(1)));
        assert!(!book.filter(&with_peer(tcp(1), peer)));
        assert!(book.filter(&tcp(2)));

        book.allow_address(&with_peer(tcp(1), peer));
        assert!(book.filter(&tcp(1)));
    }

    #[test]
    fn lowest_score_evicted_when_full() {
        let book = AddressBook::new();
        let peer = PeerId::random();

        let addresses = (0..MAX_ADDRESSES as u16).map(tcp).collect::<Vec<_>>();
        assert_eq!(book.add_known_addresses(peer, addresses), MAX_ADDRESSES);

        // new address doesn't beat anything
        assert_eq!(book.add_known_addresses(peer, vec![tcp(1000)]), 0);

        book.report_dial_result(&with_peer(tcp(5), peer), false);
        assert_eq!(book.add_known_addresses(peer, vec![tcp(1000)]), 1);

        let addresses = book.addresses(&peer);
        assert_eq!(addresses.len(), MAX_ADDRESSES);
        assert!(!addresses.contains(&with_peer(tcp(5), peer)));
        assert!(addresses.contains(&with_peer(tcp(1000), peer)));
    }

    #[tokio::test]
    async fn peer_records_are_consumed() {
        let book = AddressBook::new();
        let keypair = Keypair::generate();

        book.consume_peer_record(SignedPeerRecord::new(&keypair, 1, vec![tcp(1), tcp(2)]))
            .await
            .unwrap();

        assert_eq!(
            book.addresses(&keypair.peer_id()),
            vec![with_peer(tcp(1), keypair.peer_id()), with_peer(tcp(2), keypair.peer_id())]
        );
    }
}
