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

//! Dialer.
//!
//! The dialer turns a dial request for a peer or an address into a connection. It resolves
//! the candidate addresses of the target, tries them over the transports registered to the
//! [`TransportManager`] and upgrades the first raw stream that opens into a connection.
//!
//! Requests for the same target are coalesced into one pending dial whose outcome is shared
//! by every caller. The number of transport dials in progress at any time is bounded by a
//! pool of dial tokens shared by all pending dials.

use crate::{
    config::Config,
    dialer::{
        pending::{wait_outcome, DialOutcome, DialTask, PendingDial},
        tokens::TokenPool,
    },
    error::{Error, ParseError},
    executor::Executor,
    resolver::{strip_peer_id, AddressResolver},
    transport::manager::TransportManager,
    types::DialId,
    upgrader::Upgrader,
    PeerId,
};

use multiaddr::{Multiaddr, Protocol};
use parking_lot::Mutex;
use tokio::{sync::watch, time::Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
    sync::{atomic::AtomicUsize, Arc},
    time::Duration,
};

mod pending;
mod tokens;

/// Logging target for the file.
const LOG_TARGET: &str = "litedial::dialer";

/// What to dial.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DialTarget {
    /// Dial a peer over its known addresses.
    Peer(PeerId),

    /// Dial an address.
    Address(Multiaddr),
}

impl DialTarget {
    /// Get the peer of the target, if known.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Self::Peer(peer) => Some(*peer),
            Self::Address(address) => PeerId::try_from_multiaddr(address),
        }
    }

    /// Get the key requests for the target are coalesced by.
    pub fn key(&self) -> DialKey {
        match (self, self.peer()) {
            (_, Some(peer)) => DialKey::Peer(peer),
            (Self::Address(address), None) => DialKey::Address(address.clone()),
            (Self::Peer(peer), None) => DialKey::Peer(*peer),
        }
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(peer) => peer.fmt(f),
            Self::Address(address) => address.fmt(f),
        }
    }
}

/// Key of a pending dial.
///
/// A target with a known peer ID is keyed by the peer so that requests for the peer and for
/// an address of the peer share one dial.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DialKey {
    /// Peer.
    Peer(PeerId),

    /// Address without a peer ID.
    Address(Multiaddr),
}

impl fmt::Display for DialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(peer) => peer.fmt(f),
            Self::Address(address) => address.fmt(f),
        }
    }
}

/// Conversion into a [`DialTarget`].
pub trait IntoDialTarget {
    /// Convert `self` into a [`DialTarget`].
    fn into_dial_target(self) -> crate::Result<DialTarget>;
}

impl IntoDialTarget for DialTarget {
    fn into_dial_target(self) -> crate::Result<DialTarget> {
        Ok(self)
    }
}

impl IntoDialTarget for PeerId {
    fn into_dial_target(self) -> crate::Result<DialTarget> {
        Ok(DialTarget::Peer(self))
    }
}

impl IntoDialTarget for Multiaddr {
    fn into_dial_target(self) -> crate::Result<DialTarget> {
        Ok(DialTarget::Address(self))
    }
}

impl IntoDialTarget for &str {
    /// Strings starting with `/` are parsed as addresses, anything else as a base58 peer ID.
    fn into_dial_target(self) -> crate::Result<DialTarget> {
        match self.starts_with('/') {
            true => Ok(DialTarget::Address(Multiaddr::from_str(self)?)),
            false => PeerId::from_str(self)
                .map(DialTarget::Peer)
                .map_err(|_| Error::ParseError(ParseError::InvalidBase58)),
        }
    }
}

impl IntoDialTarget for String {
    fn into_dial_target(self) -> crate::Result<DialTarget> {
        self.as_str().into_dial_target()
    }
}

/// Options of a dial request.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Time the request has to complete, overrides the configured timeout.
    pub dial_timeout: Option<Duration>,

    /// Signal the caller uses to abandon the request.
    pub signal: Option<CancellationToken>,
}

impl DialOptions {
    /// Set the dial timeout.
    pub fn with_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = Some(dial_timeout);
        self
    }

    /// Set the abort signal.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// State shared by the dialer and its dial tasks.
pub(crate) struct DialerInner<U: Upgrader> {
    /// Local peer ID.
    local_peer_id: PeerId,

    /// Address resolver.
    pub(crate) resolver: Arc<dyn AddressResolver>,

    /// Transport manager.
    pub(crate) transports: Arc<TransportManager>,

    /// Connection upgrader.
    pub(crate) upgrader: Arc<U>,

    /// Dial tokens.
    pub(crate) tokens: TokenPool,

    /// Default time a dial request has to complete.
    dial_timeout: Duration,

    /// Pending dials.
    pub(crate) pending: Mutex<HashMap<DialKey, PendingDial<U::Connection>>>,

    /// Next dial ID.
    next_dial_id: AtomicUsize,

    /// Cancelled when the dialer is stopped, parent of the pending dial signals.
    pub(crate) shutdown: CancellationToken,

    /// Running dial tasks.
    tasks: TaskTracker,

    /// Executor.
    executor: Arc<dyn Executor>,
}

/// How a request joined a pending dial.
enum Attach<C> {
    /// Request created the dial.
    Created(DialId, watch::Receiver<Option<DialOutcome<C>>>),

    /// Request joined a dial created by an earlier request.
    Joined(DialId, watch::Receiver<Option<DialOutcome<C>>>),

    /// The pending dial is being cancelled, wait for it to conclude and try again.
    Draining(watch::Receiver<Option<DialOutcome<C>>>),
}

/// Deadline of a dial created at `created_at`.
///
/// Timeouts too large to be represented end roughly 30 years from now.
fn deadline(created_at: Instant, dial_timeout: Duration) -> Instant {
    created_at
        .checked_add(dial_timeout)
        .unwrap_or_else(|| created_at + Duration::from_secs(86400 * 365 * 30))
}

/// Caller attached to a pending dial.
///
/// Detaches from the dial when dropped, e.g., when the request future is dropped before the
/// dial concludes.
struct Caller<'a, U: Upgrader> {
    dialer: &'a Dialer<U>,
    key: &'a DialKey,
    id: DialId,
    attached: bool,
}

impl<U: Upgrader> Caller<'_, U> {
    /// Detach from the dial, returning `true` if this was the last caller.
    fn detach(&mut self) -> bool {
        if !std::mem::take(&mut self.attached) {
            return false;
        }

        self.dialer.detach(self.key, self.id)
    }
}

impl<U: Upgrader> Drop for Caller<'_, U> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Dialer.
pub struct Dialer<U: Upgrader> {
    inner: Arc<DialerInner<U>>,
}

impl<U: Upgrader> Clone for Dialer<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U: Upgrader> Dialer<U> {
    /// Create new [`Dialer`].
    pub fn new(
        config: &Config,
        resolver: Arc<dyn AddressResolver>,
        transports: Arc<TransportManager>,
        upgrader: Arc<U>,
    ) -> Self {
        Self {
            inner: Arc::new(DialerInner {
                local_peer_id: config.keypair.peer_id(),
                resolver,
                transports,
                upgrader,
                tokens: TokenPool::new(config.max_parallel_dials),
                dial_timeout: config.dial_timeout,
                pending: Mutex::new(HashMap::new()),
                next_dial_id: AtomicUsize::new(0usize),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                executor: Arc::clone(&config.executor),
            }),
        }
    }

    /// Connect to `target`.
    ///
    /// If a dial to the same target is already in progress, the request waits for its outcome
    /// instead of starting new transport dials.
    pub async fn connect_to_peer(
        &self,
        target: impl IntoDialTarget,
        options: DialOptions,
    ) -> crate::Result<Arc<U::Connection>> {
        let signal = options.signal.unwrap_or_default();

        if signal.is_cancelled() {
            return Err(Error::AlreadyAborted);
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let target = target.into_dial_target()?;
        let key = target.key();

        if key == DialKey::Peer(self.inner.local_peer_id) {
            return Err(Error::TriedToDialSelf);
        }

        tracing::trace!(target: LOG_TARGET, %target, "connect");

        let addresses = self.candidates(&target).await?;
        if addresses.is_empty() {
            tracing::debug!(target: LOG_TARGET, %target, "no valid addresses");
            return Err(Error::NoValidAddresses(key));
        }

        let dial_timeout = options.dial_timeout.unwrap_or(self.inner.dial_timeout);

        loop {
            let (id, mut rx) = match self.attach(&key, &addresses, dial_timeout)? {
                Attach::Created(id, rx) | Attach::Joined(id, rx) => (id, rx),
                Attach::Draining(mut rx) => {
                    tokio::select! {
                        biased;

                        _ = signal.cancelled() => return Err(Error::Aborted),
                        _ = wait_outcome(&mut rx) => continue,
                    }
                }
            };
            let mut caller = Caller {
                dialer: self,
                key: &key,
                id,
                attached: true,
            };

            return tokio::select! {
                biased;

                outcome = wait_outcome(&mut rx) => {
                    caller.attached = false;
                    outcome
                }
                _ = signal.cancelled() => {
                    if caller.detach() {
                        // last caller left, wait for the dial to release its tokens
                        let _ = wait_outcome(&mut rx).await;
                    }

                    Err(Error::Aborted)
                }
            };
        }
    }

    /// Join the pending dial of `key` or create it.
    fn attach(
        &self,
        key: &DialKey,
        addresses: &[Multiaddr],
        dial_timeout: Duration,
    ) -> crate::Result<Attach<U::Connection>> {
        let mut pending = self.inner.pending.lock();

        if let Some(dial) = pending.get_mut(key) {
            if dial.cancel.is_cancelled() {
                return Ok(Attach::Draining(dial.outcome.clone()));
            }

            dial.callers += 1;

            tracing::trace!(
                target: LOG_TARGET,
                id = ?dial.id,
                %key,
                callers = dial.callers,
                addresses = ?dial.addresses,
                elapsed = ?dial.created_at.elapsed(),
                "join pending dial",
            );

            return Ok(Attach::Joined(dial.id, dial.outcome.clone()));
        }

        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let id = DialId::next(&self.inner.next_dial_id);
        let created_at = Instant::now();
        let cancel = self.inner.shutdown.child_token();
        let (tx, rx) = watch::channel(None);

        tracing::debug!(target: LOG_TARGET, ?id, %key, ?addresses, "start dial");

        pending.insert(
            key.clone(),
            PendingDial {
                id,
                addresses: addresses.to_vec(),
                created_at,
                cancel: cancel.clone(),
                outcome: rx.clone(),
                callers: 1usize,
            },
        );

        let task = DialTask {
            id,
            key: key.clone(),
            addresses: addresses.to_vec(),
            deadline: deadline(created_at, dial_timeout),
            cancel,
            tx,
            inner: Arc::clone(&self.inner),
        };
        drop(pending);

        self.inner.executor.run(Box::pin(self.inner.tasks.track_future(task.run())));

        Ok(Attach::Created(id, rx))
    }

    /// Detach a caller from the pending dial `id`.
    ///
    /// Cancels the dial and returns `true` if it was the last caller.
    fn detach(&self, key: &DialKey, id: DialId) -> bool {
        let mut pending = self.inner.pending.lock();

        let Some(dial) = pending.get_mut(key).filter(|dial| dial.id == id) else {
            return false;
        };

        dial.callers = dial.callers.saturating_sub(1);

        tracing::trace!(target: LOG_TARGET, ?id, %key, callers = dial.callers, "caller left");

        if dial.callers == 0 {
            tracing::debug!(target: LOG_TARGET, ?id, %key, "all callers left, cancel dial");

            dial.cancel.cancel();
            return true;
        }

        false
    }

    /// Resolve the addresses of `target` and filter out those that can't be dialed.
    async fn candidates(&self, target: &DialTarget) -> crate::Result<Vec<Multiaddr>> {
        let resolved = self.inner.resolver.resolve(target).await?;
        let peer = target.peer();
        let listen_addresses = self
            .inner
            .transports
            .addresses()
            .iter()
            .map(strip_peer_id)
            .collect::<HashSet<_>>();
        let mut seen = HashSet::new();

        Ok(resolved
            .into_iter()
            .filter_map(|address| {
                let address = match (peer, PeerId::try_from_multiaddr(&address)) {
                    (Some(peer), Some(other)) if peer != other => {
                        tracing::trace!(
                            target: LOG_TARGET,
                            ?peer,
                            ?address,
                            "address of another peer",
                        );
                        return None;
                    }
                    (Some(peer), None) => address.with(Protocol::P2p(peer.into())),
                    _ => address,
                };

                if !self.inner.transports.supports(&address) {
                    tracing::trace!(target: LOG_TARGET, ?address, "no transport for address");
                    return None;
                }

                if !self.inner.resolver.filter(&address) {
                    tracing::trace!(target: LOG_TARGET, ?address, "address filtered out");
                    return None;
                }

                if listen_addresses.contains(&strip_peer_id(&address)) {
                    tracing::trace!(target: LOG_TARGET, ?address, "own listen address");
                    return None;
                }

                seen.insert(address.clone()).then_some(address)
            })
            .collect())
    }

    /// Stop the dialer.
    ///
    /// Cancels every pending dial and waits until their tasks have exited. Further requests
    /// fail with [`Error::Shutdown`].
    pub async fn stop(&self) {
        tracing::debug!(target: LOG_TARGET, pending = self.pending_dials(), "stop dialer");

        self.inner.shutdown.cancel();
        self.inner.tokens.close();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    /// Number of dial tokens not in use.
    pub fn tokens_available(&self) -> usize {
        self.inner.tokens.available()
    }

    /// Maximum number of parallel transport dials.
    pub fn max_parallel_dials(&self) -> usize {
        self.inner.tokens.capacity()
    }

    /// Number of pending dials.
    pub fn pending_dials(&self) -> usize {
        self.inner.pending.lock().len()
    }
}
