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

//! Transport manager.
//!
//! Registry of the transports of the node. The manager selects the transport an address is
//! dialed or listened on with, keeps track of the listeners and publishes the node's signed peer
//! record whenever the set of listen addresses changes.

use crate::{
    config::{Config, FaultTolerance},
    crypto::ed25519::Keypair,
    error::Error,
    executor::Executor,
    peer_record::{PeerStore, SignedPeerRecord},
    transport::{Listener, RawStream, Transport, TransportEvent, TransportOptions, TransportTag},
    types::ListenerId,
    PeerId,
};

use indexmap::IndexMap;
use multiaddr::Multiaddr;
use parking_lot::RwLock;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio_util::sync::CancellationToken;

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub use types::TransportState;

mod types;

/// Logging target for the file.
const LOG_TARGET: &str = "litedial::transport-manager";

/// Registered transport.
struct TransportContext {
    /// Transport.
    transport: Arc<dyn Transport>,

    /// Options the transport was registered with.
    options: TransportOptions,

    /// Active listeners.
    listeners: Vec<(ListenerId, Box<dyn Listener>)>,
}

impl TransportContext {
    fn state(&self) -> TransportState {
        match self.listeners.is_empty() {
            true => TransportState::Registered,
            false => TransportState::Listening,
        }
    }
}

type Transports = Arc<RwLock<IndexMap<TransportTag, TransportContext>>>;

/// Select the transport which understands the most components of `address`.
///
/// On a tie the transport registered first wins.
fn select_transport<'a>(
    transports: &'a IndexMap<TransportTag, TransportContext>,
    address: &Multiaddr,
) -> Option<(&'a TransportTag, &'a TransportContext)> {
    let mut selected: Option<(usize, (&TransportTag, &TransportContext))> = None;

    for (tag, context) in transports {
        let Some(matched) = context.transport.match_address(address) else {
            continue;
        };

        if selected.as_ref().map_or(true, |(best, _)| matched > *best) {
            selected = Some((matched, (tag, context)));
        }
    }

    selected.map(|(_, entry)| entry)
}

/// Get the addresses of all active listeners.
fn listen_addresses(transports: &Transports) -> Vec<Multiaddr> {
    transports
        .read()
        .values()
        .flat_map(|context| context.listeners.iter())
        .flat_map(|(_, listener)| listener.addresses())
        .collect()
}

/// Publishes the signed peer record of the node to the peer store.
struct RecordPublisher {
    /// Keypair the records are signed with.
    keypair: Keypair,

    /// Peer store.
    store: Arc<dyn PeerStore>,

    /// How long to wait for the listen addresses to settle.
    delay: Duration,

    /// Incremented every time a publication is scheduled, older publications are skipped.
    generation: AtomicU64,

    /// Sequence number of the next record.
    seq: AtomicU64,
}

impl RecordPublisher {
    fn new(keypair: Keypair, store: Arc<dyn PeerStore>, delay: Duration) -> Self {
        // start from the current time so records stay ordered across restarts
        let seq = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64);

        Self {
            keypair,
            store,
            delay,
            generation: AtomicU64::new(0),
            seq: AtomicU64::new(seq),
        }
    }

    /// Publish the current listen addresses once they haven't changed for `delay`.
    async fn publish(self: Arc<Self>, generation: u64, transports: Transports) {
        tokio::time::sleep(self.delay).await;

        if self.generation.load(Ordering::Acquire) != generation {
            tracing::trace!(target: LOG_TARGET, ?generation, "publication superseded");
            return;
        }

        let addresses = listen_addresses(&transports);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(target: LOG_TARGET, ?seq, ?addresses, "publish peer record");

        let record = SignedPeerRecord::new(&self.keypair, seq, addresses);
        if let Err(error) = self.store.consume_peer_record(record).await {
            tracing::warn!(target: LOG_TARGET, ?error, "failed to publish peer record");
        }
    }
}

/// Transport manager.
pub struct TransportManager {
    /// Local peer ID.
    local_peer_id: PeerId,

    /// Registered transports.
    transports: Transports,

    /// Next listener ID.
    next_listener_id: AtomicUsize,

    /// TX channel given to listeners.
    event_tx: Sender<TransportEvent>,

    /// Listen fault tolerance.
    fault_tolerance: FaultTolerance,

    /// Peer record publisher, if a peer store was given.
    publisher: Option<Arc<RecordPublisher>>,

    /// Executor.
    executor: Arc<dyn Executor>,
}

impl TransportManager {
    /// Create new [`TransportManager`].
    ///
    /// Returns the manager and the receiver of inbound streams accepted by the listeners.
    pub fn new(
        config: &Config,
        peer_store: Option<Arc<dyn PeerStore>>,
    ) -> (Self, Receiver<TransportEvent>) {
        let (event_tx, event_rx) = channel(config.event_channel_size);
        let publisher = peer_store.map(|store| {
            Arc::new(RecordPublisher::new(
                config.keypair.clone(),
                store,
                config.publish_delay,
            ))
        });

        (
            Self {
                local_peer_id: config.keypair.peer_id(),
                transports: Arc::new(RwLock::new(IndexMap::new())),
                next_listener_id: AtomicUsize::new(0usize),
                event_tx,
                fault_tolerance: config.fault_tolerance,
                publisher,
                executor: Arc::clone(&config.executor),
            },
            event_rx,
        )
    }

    /// Get the local peer ID.
    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// Register `transport` under `tag`.
    pub fn add(
        &self,
        tag: impl Into<TransportTag>,
        transport: Arc<dyn Transport>,
        options: TransportOptions,
    ) -> crate::Result<()> {
        let tag = tag.into();
        let mut transports = self.transports.write();

        if transports.contains_key(&tag) {
            tracing::debug!(target: LOG_TARGET, ?tag, "transport already registered");
            return Err(Error::TransportAlreadyExists(tag));
        }

        tracing::debug!(target: LOG_TARGET, ?tag, "register transport");

        transports.insert(
            tag,
            TransportContext {
                transport,
                options,
                listeners: Vec::new(),
            },
        );

        Ok(())
    }

    /// Close the listeners of the transport registered under `tag` and unregister it.
    pub async fn remove(&self, tag: &TransportTag) -> crate::Result<()> {
        let context = self
            .transports
            .write()
            .shift_remove(tag)
            .ok_or_else(|| Error::TransportDoesntExist(tag.clone()))?;

        tracing::debug!(
            target: LOG_TARGET,
            ?tag,
            listeners = context.listeners.len(),
            "remove transport",
        );

        if self.close_listeners(context.listeners).await {
            self.schedule_publication();
        }

        Ok(())
    }

    /// Get the state of the transport registered under `tag`.
    pub fn state(&self, tag: &TransportTag) -> Option<TransportState> {
        self.transports.read().get(tag).map(TransportContext::state)
    }

    /// Get the tags of the registered transports, in registration order.
    pub fn transports(&self) -> Vec<TransportTag> {
        self.transports.read().keys().cloned().collect()
    }

    /// Check if any registered transport can handle `address`.
    pub fn supports(&self, address: &Multiaddr) -> bool {
        self.transport_for_address(address).is_some()
    }

    /// Get the tag of the transport `address` would be dialed with.
    pub fn transport_for_address(&self, address: &Multiaddr) -> Option<TransportTag> {
        select_transport(&self.transports.read(), address).map(|(tag, _)| tag.clone())
    }

    /// Open a raw stream to `address`.
    ///
    /// The dial is abandoned when `signal` is cancelled.
    pub async fn dial(
        &self,
        address: Multiaddr,
        signal: CancellationToken,
    ) -> crate::Result<Box<dyn RawStream>> {
        if signal.is_cancelled() {
            return Err(Error::AlreadyAborted);
        }

        let (tag, transport) = {
            let transports = self.transports.read();

            match select_transport(&transports, &address) {
                Some((tag, context)) => (tag.clone(), Arc::clone(&context.transport)),
                None => {
                    tracing::debug!(target: LOG_TARGET, ?address, "no transport for address");
                    return Err(Error::TransportUnavailable(address));
                }
            }
        };

        tracing::trace!(target: LOG_TARGET, ?tag, ?address, "dial address");

        transport.dial(address, signal).await
    }

    /// Start listening on `addresses`.
    ///
    /// Every registered transport that can handle an address binds a listener to it. Returns
    /// the bound addresses, which differ from the requested ones if, e.g., port `0` was
    /// requested.
    pub async fn listen(&self, addresses: Vec<Multiaddr>) -> crate::Result<Vec<Multiaddr>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let mut listeners = Vec::new();
        let mut bound = Vec::new();

        for address in addresses {
            let capable = self
                .transports
                .read()
                .iter()
                .filter(|(_, context)| context.transport.match_address(&address).is_some())
                .map(|(tag, context)| {
                    (tag.clone(), Arc::clone(&context.transport), context.options.clone())
                })
                .collect::<Vec<_>>();

            if capable.is_empty() {
                tracing::warn!(target: LOG_TARGET, ?address, "no transport for listen address");
                continue;
            }

            for (tag, transport, options) in capable {
                let id = ListenerId::next(&self.next_listener_id);
                let mut listener = transport.create_listener(id, &options, self.event_tx.clone());

                match listener.listen(address.clone()).await {
                    Ok(address) => {
                        tracing::debug!(target: LOG_TARGET, ?tag, ?id, ?address, "listening");

                        bound.push(address);
                        listeners.push((tag, id, listener));
                    }
                    Err(error) => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            ?tag,
                            ?address,
                            ?error,
                            "failed to listen",
                        );
                    }
                }
            }
        }

        if bound.is_empty() {
            match self.fault_tolerance {
                FaultTolerance::FatalAll => return Err(Error::ListenFailed),
                FaultTolerance::NoFatal => {
                    tracing::warn!(target: LOG_TARGET, "failed to listen on any address");
                    return Ok(bound);
                }
            }
        }

        let orphans = {
            let mut transports = self.transports.write();
            let mut orphans = Vec::new();

            for (tag, id, listener) in listeners {
                match transports.get_mut(&tag) {
                    Some(context) => context.listeners.push((id, listener)),
                    None => orphans.push((id, listener)),
                }
            }

            orphans
        };

        // transport was removed while its listeners were being bound
        if !orphans.is_empty() {
            self.close_listeners(orphans).await;
        }

        self.schedule_publication();

        Ok(bound)
    }

    /// Get the addresses of all active listeners.
    pub fn addresses(&self) -> Vec<Multiaddr> {
        listen_addresses(&self.transports)
    }

    /// Close all listeners.
    ///
    /// The transports stay registered and can still be dialed over.
    pub async fn close(&self) {
        let listeners = {
            let mut transports = self.transports.write();

            transports
                .values_mut()
                .flat_map(|context| std::mem::take(&mut context.listeners))
                .collect::<Vec<_>>()
        };

        tracing::debug!(target: LOG_TARGET, listeners = listeners.len(), "close listeners");

        if self.close_listeners(listeners).await {
            self.schedule_publication();
        }
    }

    /// Close `listeners`, returning `true` if there were any.
    async fn close_listeners(&self, listeners: Vec<(ListenerId, Box<dyn Listener>)>) -> bool {
        let closed = !listeners.is_empty();

        for (id, mut listener) in listeners {
            tracing::trace!(target: LOG_TARGET, ?id, "close listener");
            listener.close().await;
        }

        closed
    }

    /// Schedule the publication of the signed peer record.
    ///
    /// Publications scheduled in quick succession are merged into one.
    fn schedule_publication(&self) {
        let Some(publisher) = &self.publisher else {
            return;
        };

        let generation = publisher.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.executor.run(Box::pin(
            Arc::clone(publisher).publish(generation, Arc::clone(&self.transports)),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ConfigBuilder,
        error::ErrorCode,
        peer_record::MockPeerStore,
        transport::dummy::{DialBehavior, DummyTransport},
    };

    fn address(address: &str) -> Multiaddr {
        address.parse().unwrap()
    }

    fn manager() -> TransportManager {
        TransportManager::new(&ConfigBuilder::new().build(), None).0
    }

    #[test]
    fn add_and_remove_transport() {
        let manager = manager();

        manager
            .add(TransportTag::TCP, Arc::new(DummyTransport::tcp()), Default::default())
            .unwrap();
        assert_eq!(
            manager.add(TransportTag::TCP, Arc::new(DummyTransport::tcp()), Default::default()),
            Err(Error::TransportAlreadyExists(TransportTag::TCP))
        );
        assert_eq!(manager.transports(), vec![TransportTag::TCP]);
        assert_eq!(manager.state(&TransportTag::TCP), Some(TransportState::Registered));

        futures::executor::block_on(async {
            manager.remove(&TransportTag::TCP).await.unwrap();
            assert_eq!(
                manager.remove(&TransportTag::TCP).await,
                Err(Error::TransportDoesntExist(TransportTag::TCP))
            );
        });
        assert_eq!(manager.state(&TransportTag::TCP), None);
    }

    #[test]
    fn most_specific_transport_is_selected() {
        let manager = manager();

        manager
            .add(TransportTag::TCP, Arc::new(DummyTransport::tcp()), Default::default())
            .unwrap();
        manager
            .add(
                "websocket",
                Arc::new(DummyTransport::new(&["ip", "tcp", "ws"])),
                Default::default(),
            )
            .unwrap();
        manager
            .add("memory", Arc::new(DummyTransport::new(&["memory"])), Default::default())
            .unwrap();

        assert_eq!(
            manager.transport_for_address(&address("/ip4/127.0.0.1/tcp/1/ws")),
            Some(TransportTag::new("websocket"))
        );
        assert_eq!(
            manager.transport_for_address(&address("/ip4/127.0.0.1/tcp/1")),
            Some(TransportTag::TCP)
        );
        assert_eq!(
            manager.transport_for_address(&address("/memory/1")),
            Some(TransportTag::new("memory"))
        );
        assert_eq!(manager.transport_for_address(&address("/ip4/127.0.0.1/udp/1")), None);
        assert!(!manager.supports(&address("/ip4/127.0.0.1/udp/1/quic-v1")));
        assert!(manager.supports(&address("/dns/example.com/tcp/1")));
    }

    #[test]
    fn tie_goes_to_first_registered() {
        let manager = manager();

        manager.add("first", Arc::new(DummyTransport::tcp()), Default::default()).unwrap();
        manager.add("second", Arc::new(DummyTransport::tcp()), Default::default()).unwrap();

        assert_eq!(
            manager.transport_for_address(&address("/ip4/127.0.0.1/tcp/1")),
            Some(TransportTag::new("first"))
        );
    }

    #[tokio::test]
    async fn dial_without_transport() {
        let manager = manager();
        manager
            .add(TransportTag::TCP, Arc::new(DummyTransport::tcp()), Default::default())
            .unwrap();

        let error = manager
            .dial(address("/ip4/127.0.0.1/udp/1/quic-v1"), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.code(), Some(ErrorCode::TransportUnavailable));
    }

    #[tokio::test]
    async fn dial_with_aborted_signal() {
        let manager = manager();
        let transport = DummyTransport::tcp();
        manager.add(TransportTag::TCP, Arc::new(transport.clone()), Default::default()).unwrap();

        let signal = CancellationToken::new();
        signal.cancel();

        let error = manager.dial(address("/ip4/127.0.0.1/tcp/1"), signal).await.unwrap_err();

        assert_eq!(error.code(), Some(ErrorCode::AlreadyAborted));
        assert!(transport.dials().is_empty());
    }

    #[tokio::test]
    async fn dial_forwards_signal() {
        let manager = Arc::new(manager());
        let transport = DummyTransport::tcp();
        transport.set_default_behavior(DialBehavior::Hang);
        manager.add(TransportTag::TCP, Arc::new(transport.clone()), Default::default()).unwrap();

        let signal = CancellationToken::new();
        let handle = tokio::spawn({
            let manager = Arc::clone(&manager);
            let signal = signal.clone();

            async move { manager.dial(address("/ip4/127.0.0.1/tcp/1"), signal).await }
        });

        while transport.dials().is_empty() {
            tokio::task::yield_now().await;
        }
        signal.cancel();

        assert_eq!(handle.await.unwrap().unwrap_err(), Error::Aborted);
        assert!(transport.signals()[0].is_cancelled());
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn listen_and_close() {
        let manager = manager();
        let transport = DummyTransport::tcp();
        manager.add(TransportTag::TCP, Arc::new(transport.clone()), Default::default()).unwrap();

        let addresses = vec![address("/ip4/127.0.0.1/tcp/1"), address("/ip6/::1/tcp/1")];
        let bound = manager
            .listen(vec![
                addresses[0].clone(),
                addresses[1].clone(),
                address("/ip4/127.0.0.1/udp/1"),
            ])
            .await
            .unwrap();

        assert_eq!(bound, addresses);
        assert_eq!(manager.addresses(), addresses);
        assert_eq!(manager.state(&TransportTag::TCP), Some(TransportState::Listening));

        manager.close().await;

        assert!(manager.addresses().is_empty());
        assert_eq!(transport.closed_listeners(), 2);
        assert_eq!(manager.state(&TransportTag::TCP), Some(TransportState::Registered));

        // transport can still be dialed after its listeners were closed
        assert!(manager.dial(addresses[0].clone(), CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn removing_transport_closes_listeners() {
        let manager = manager();
        let transport = DummyTransport::tcp();
        manager.add(TransportTag::TCP, Arc::new(transport.clone()), Default::default()).unwrap();
        manager.listen(vec![address("/ip4/127.0.0.1/tcp/1")]).await.unwrap();

        manager.remove(&TransportTag::TCP).await.unwrap();

        assert_eq!(transport.closed_listeners(), 1);
        assert!(manager.addresses().is_empty());
        assert!(!manager.supports(&address("/ip4/127.0.0.1/tcp/1")));
    }

    #[tokio::test]
    async fn every_capable_transport_listens() {
        let manager = manager();
        let tcp = DummyTransport::tcp();
        let websocket = DummyTransport::new(&["ip", "tcp", "ws"]);
        let memory = DummyTransport::new(&["memory"]);

        manager.add(TransportTag::TCP, Arc::new(tcp.clone()), Default::default()).unwrap();
        manager.add("websocket", Arc::new(websocket.clone()), Default::default()).unwrap();
        manager.add("memory", Arc::new(memory.clone()), Default::default()).unwrap();

        let bound = manager.listen(vec![address("/ip4/127.0.0.1/tcp/1/ws")]).await.unwrap();

        assert_eq!(bound.len(), 2);
        assert_eq!(manager.state(&TransportTag::TCP), Some(TransportState::Listening));
        assert_eq!(
            manager.state(&TransportTag::new("websocket")),
            Some(TransportState::Listening)
        );
        assert_eq!(manager.state(&TransportTag::new("memory")), Some(TransportState::Registered));

        manager.close().await;

        assert_eq!(tcp.closed_listeners(), 1);
        assert_eq!(websocket.closed_listeners(), 1);
        assert_eq!(memory.closed_listeners(), 0);
    }

    #[tokio::test]
    async fn listen_fault_tolerance() {
        let failing = address("/ip4/127.0.0.1/tcp/1");
        let working = address("/ip4/127.0.0.1/tcp/2");

        let manager = manager();
        let transport = DummyTransport::tcp();
        transport.fail_listen(&failing);
        manager.add(TransportTag::TCP, Arc::new(transport.clone()), Default::default()).unwrap();

        assert_eq!(manager.listen(vec![failing.clone()]).await, Err(Error::ListenFailed));
        assert_eq!(manager.state(&TransportTag::TCP), Some(TransportState::Registered));
        assert_eq!(
            manager.listen(vec![failing.clone(), working.clone()]).await,
            Ok(vec![working])
        );

        let config = ConfigBuilder::new().with_fault_tolerance(FaultTolerance::NoFatal).build();
        let (manager, _rx) = TransportManager::new(&config, None);
        manager.add(TransportTag::TCP, Arc::new(transport), Default::default()).unwrap();

        assert_eq!(manager.listen(vec![failing]).await, Ok(Vec::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn peer_record_published_once_addresses_settle() {
        let config = ConfigBuilder::new().with_publish_delay(Duration::from_secs(1)).build();
        let local_peer = config.keypair().peer_id();

        let mut store = MockPeerStore::new();
        store
            .expect_consume_peer_record()
            .withf(move |record| {
                record.record().peer == local_peer && record.record().addresses.len() == 2
            })
            .times(1)
            .returning(|_| Ok(()));

        let (manager, _rx) = TransportManager::new(&config, Some(Arc::new(store)));
        manager
            .add(TransportTag::TCP, Arc::new(DummyTransport::tcp()), Default::default())
            .unwrap();

        manager.listen(vec![address("/ip4/127.0.0.1/tcp/1")]).await.unwrap();
        manager.listen(vec![address("/ip4/127.0.0.1/tcp/2")]).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn publication_failure_does_not_fail_listen() {
        let config = ConfigBuilder::new().build();

        let mut store = MockPeerStore::new();
        store
            .expect_consume_peer_record()
            .times(1)
            .returning(|record| Err(Error::PeerStoreRejected(record.record().peer)));

        let (manager, _rx) = TransportManager::new(&config, Some(Arc::new(store)));
        manager
            .add(TransportTag::TCP, Arc::new(DummyTransport::tcp()), Default::default())
            .unwrap();

        assert!(manager.listen(vec![address("/ip4/127.0.0.1/tcp/1")]).await.is_ok());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.addresses().len(), 1);
    }
}
