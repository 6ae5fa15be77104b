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

//! Dummy transport.
//!
//! Scripted transport used by the unit tests. Dial results are configured per address and the
//! transport records every dial it receives together with the cancellation signal of the dial.

use crate::{
    error::Error,
    resolver::strip_peer_id,
    transport::{Listener, RawStream, Transport, TransportEvent, TransportOptions},
    types::ListenerId,
};

use multiaddr::{Multiaddr, Protocol};
use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use std::{
    collections::{HashMap, HashSet},
    io::ErrorKind,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// How the transport responds to a dial.
#[derive(Debug, Clone)]
pub(crate) enum DialBehavior {
    /// Return a stream after `delay`.
    Succeed { delay: Duration },

    /// Fail with `error` after `delay`.
    Fail { delay: Duration, error: Error },

    /// Never resolve, unless the dial is cancelled.
    Hang,
}

impl DialBehavior {
    pub(crate) fn succeed() -> Self {
        Self::Succeed {
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn refuse() -> Self {
        Self::Fail {
            delay: Duration::ZERO,
            error: Error::IoError(ErrorKind::ConnectionRefused),
        }
    }
}

#[derive(Debug)]
struct Inner {
    behaviors: Mutex<HashMap<Multiaddr, DialBehavior>>,
    default_behavior: Mutex<DialBehavior>,
    dials: Mutex<Vec<Multiaddr>>,
    signals: Mutex<Vec<CancellationToken>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    failing_listen_addresses: Mutex<HashSet<Multiaddr>>,
    closed_listeners: AtomicUsize,
}

/// Decrements the in-flight counter when the dial future is dropped.
struct InFlightGuard<'a>(&'a Inner);

impl<'a> InFlightGuard<'a> {
    fn new(inner: &'a Inner) -> Self {
        let in_flight = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Name of the protocol stack layer `protocol` belongs to.
fn layer(protocol: &Protocol<'_>) -> &'static str {
    match protocol {
        Protocol::Ip4(_)
        | Protocol::Ip6(_)
        | Protocol::Dns(_)
        | Protocol::Dns4(_)
        | Protocol::Dns6(_) => "ip",
        Protocol::Tcp(_) => "tcp",
        Protocol::Udp(_) => "udp",
        Protocol::Ws(_) => "ws",
        Protocol::Wss(_) => "wss",
        Protocol::QuicV1 => "quic-v1",
        Protocol::Memory(_) => "memory",
        Protocol::P2p(_) => "p2p",
        _ => "unknown",
    }
}

/// Scripted transport.
#[derive(Debug, Clone)]
pub(crate) struct DummyTransport {
    /// Protocol stack the transport understands, e.g., `["ip", "tcp"]`.
    stack: Vec<&'static str>,

    inner: Arc<Inner>,
}

impl DummyTransport {
    /// Create new [`DummyTransport`] handling addresses which start with `stack`.
    pub(crate) fn new(stack: &[&'static str]) -> Self {
        Self {
            stack: stack.to_vec(),
            inner: Arc::new(Inner {
                behaviors: Mutex::new(HashMap::new()),
                default_behavior: Mutex::new(DialBehavior::succeed()),
                dials: Mutex::new(Vec::new()),
                signals: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                failing_listen_addresses: Mutex::new(HashSet::new()),
                closed_listeners: AtomicUsize::new(0),
            }),
        }
    }

    /// Create new TCP-like [`DummyTransport`].
    pub(crate) fn tcp() -> Self {
        Self::new(&["ip", "tcp"])
    }

    /// Set how dials to `address` behave.
    pub(crate) fn set_behavior(&self, address: &Multiaddr, behavior: DialBehavior) {
        self.inner.behaviors.lock().insert(strip_peer_id(address), behavior);
    }

    /// Set how dials to addresses without an explicit behavior behave.
    pub(crate) fn set_default_behavior(&self, behavior: DialBehavior) {
        *self.inner.default_behavior.lock() = behavior;
    }

    /// Make binding to `address` fail.
    pub(crate) fn fail_listen(&self, address: &Multiaddr) {
        self.inner.failing_listen_addresses.lock().insert(address.clone());
    }

    /// Addresses dialed so far, in call order.
    pub(crate) fn dials(&self) -> Vec<Multiaddr> {
        self.inner.dials.lock().clone()
    }

    /// Cancellation signals of the dials, in call order.
    pub(crate) fn signals(&self) -> Vec<CancellationToken> {
        self.inner.signals.lock().clone()
    }

    /// Number of dials currently in progress.
    pub(crate) fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of dials that were in progress at the same time.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of listeners closed.
    pub(crate) fn closed_listeners(&self) -> usize {
        self.inner.closed_listeners.load(Ordering::SeqCst)
    }

    fn behavior(&self, address: &Multiaddr) -> DialBehavior {
        self.inner
            .behaviors
            .lock()
            .get(&strip_peer_id(address))
            .cloned()
            .unwrap_or_else(|| self.inner.default_behavior.lock().clone())
    }
}

#[async_trait::async_trait]
impl Transport for DummyTransport {
    fn match_address(&self, address: &Multiaddr) -> Option<usize> {
        let layers = address.iter().map(|protocol| layer(&protocol)).collect::<Vec<_>>();

        layers.starts_with(&self.stack).then_some(self.stack.len())
    }

    async fn dial(
        &self,
        address: Multiaddr,
        signal: CancellationToken,
    ) -> crate::Result<Box<dyn RawStream>> {
        self.inner.dials.lock().push(address.clone());
        self.inner.signals.lock().push(signal.clone());

        let _guard = InFlightGuard::new(&self.inner);
        let behavior = self.behavior(&address);

        let dial = async move {
            match behavior {
                DialBehavior::Succeed { delay } => {
                    tokio::time::sleep(delay).await;
                    let (stream, _) = tokio::io::duplex(64);
                    Ok(Box::new(stream) as Box<dyn RawStream>)
                }
                DialBehavior::Fail { delay, error } => {
                    tokio::time::sleep(delay).await;
                    Err(error)
                }
                DialBehavior::Hang => futures::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = signal.cancelled() => Err(Error::Aborted),
            result = dial => result,
        }
    }

    fn create_listener(
        &self,
        listener: ListenerId,
        _options: &TransportOptions,
        _events: Sender<TransportEvent>,
    ) -> Box<dyn Listener> {
        Box::new(DummyListener {
            _id: listener,
            inner: Arc::clone(&self.inner),
            addresses: Vec::new(),
        })
    }
}

/// Listener of [`DummyTransport`], binds to the address it's given.
struct DummyListener {
    _id: ListenerId,
    inner: Arc<Inner>,
    addresses: Vec<Multiaddr>,
}

#[async_trait::async_trait]
impl Listener for DummyListener {
    async fn listen(&mut self, address: Multiaddr) -> crate::Result<Multiaddr> {
        if self.inner.failing_listen_addresses.lock().contains(&address) {
            return Err(Error::IoError(ErrorKind::AddrInUse));
        }

        self.addresses.push(address.clone());
        Ok(address)
    }

    fn addresses(&self) -> Vec<Multiaddr> {
        self.addresses.clone()
    }

    async fn close(&mut self) {
        if !self.addresses.is_empty() {
            self.inner.closed_listeners.fetch_add(1, Ordering::SeqCst);
        }
        self.addresses.clear();
    }
}
