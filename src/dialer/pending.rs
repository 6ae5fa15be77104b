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

//! Pending dials.

use crate::{
    dialer::{tokens::DialToken, DialKey, DialerInner},
    error::{AggregateDialError, DialFailure, Error},
    transport::RawStream,
    types::DialId,
    upgrader::Upgrader,
};

use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use multiaddr::Multiaddr;
use tokio::{
    sync::watch,
    time::{Instant, Sleep},
};
use tokio_util::sync::CancellationToken;

use std::{collections::HashMap, pin::Pin, sync::Arc};

/// Logging target for the file.
const LOG_TARGET: &str = "litedial::dialer::pending";

/// Outcome of a dial, shared by every caller waiting for it.
pub(crate) type DialOutcome<C> = Result<Arc<C>, Error>;

/// Outcome of a single transport dial.
type AttemptResult = (usize, Multiaddr, crate::Result<Box<dyn RawStream>>);

/// In-flight dial.
pub(crate) struct PendingDial<C> {
    /// Dial ID.
    pub(crate) id: DialId,

    /// Candidate addresses, in the order they're tried.
    pub(crate) addresses: Vec<Multiaddr>,

    /// When the dial was created.
    pub(crate) created_at: Instant,

    /// Cancels the dial.
    pub(crate) cancel: CancellationToken,

    /// Outcome of the dial, `None` until the dial has concluded.
    pub(crate) outcome: watch::Receiver<Option<DialOutcome<C>>>,

    /// Number of callers waiting for the outcome.
    pub(crate) callers: usize,
}

/// Wait until the dial of `outcome` has concluded.
pub(crate) async fn wait_outcome<C>(
    outcome: &mut watch::Receiver<Option<DialOutcome<C>>>,
) -> DialOutcome<C> {
    match outcome.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or(Err(Error::EssentialTaskClosed)),
        Err(_) => Err(Error::EssentialTaskClosed),
    }
}

/// Wait for the next token, or forever if no token was requested.
async fn next_token(
    acquire: &mut Option<BoxFuture<'static, crate::Result<DialToken>>>,
) -> crate::Result<DialToken> {
    match acquire {
        Some(future) => future.await,
        None => futures::future::pending().await,
    }
}

/// Why the dial was stopped before every candidate was tried.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Interrupt {
    /// All callers left or the dialer was stopped.
    Cancelled,

    /// Deadline expired.
    Timeout,
}

/// Task driving a [`PendingDial`] to its conclusion.
pub(crate) struct DialTask<U: Upgrader> {
    /// Dial ID.
    pub(crate) id: DialId,

    /// Key of the dial.
    pub(crate) key: DialKey,

    /// Candidate addresses.
    pub(crate) addresses: Vec<Multiaddr>,

    /// When the dial times out.
    pub(crate) deadline: Instant,

    /// Cancels the dial.
    pub(crate) cancel: CancellationToken,

    /// TX channel for the outcome.
    pub(crate) tx: watch::Sender<Option<DialOutcome<U::Connection>>>,

    /// Dialer.
    pub(crate) inner: Arc<DialerInner<U>>,
}

impl<U: Upgrader> DialTask<U> {
    /// Run the dial, remove it from the pending dials and publish its outcome.
    pub(crate) async fn run(self) {
        let outcome = self.drive().await;

        match &outcome {
            Ok(_) => {
                tracing::debug!(target: LOG_TARGET, id = ?self.id, key = %self.key, "dial succeeded")
            }
            Err(error) => tracing::debug!(
                target: LOG_TARGET,
                id = ?self.id,
                key = %self.key,
                %error,
                "dial failed",
            ),
        }

        let mut pending = self.inner.pending.lock();

        if pending.get(&self.key).is_some_and(|dial| dial.id == self.id) {
            pending.remove(&self.key);
        }
        self.tx.send_replace(Some(outcome));
    }

    /// Start the transport dial to `address` while holding `token`.
    fn attempt(
        &self,
        index: usize,
        address: Multiaddr,
        token: DialToken,
        signal: CancellationToken,
    ) -> BoxFuture<'static, AttemptResult> {
        let transports = Arc::clone(&self.inner.transports);

        async move {
            // the transport may not honor the signal, stop polling it once the signal fires
            let result = tokio::select! {
                biased;

                _ = signal.cancelled() => Err(Error::Aborted),
                result = transports.dial(address.clone(), signal.clone()) => result,
            };
            drop(token);

            (index, address, result)
        }
        .boxed()
    }

    /// Upgrade `stream`, unless the dial is cancelled or times out first.
    async fn upgrade(
        &self,
        stream: Box<dyn RawStream>,
        address: &Multiaddr,
        deadline: Pin<&mut Sleep>,
    ) -> Result<U::Connection, (Error, Option<Interrupt>)> {
        let signal = self.cancel.child_token();
        let _guard = signal.clone().drop_guard();

        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Err((Error::Aborted, Some(Interrupt::Cancelled))),
            _ = deadline => Err((Error::Timeout, Some(Interrupt::Timeout))),
            result = self.inner.upgrader.upgrade(stream, address, signal.clone()) => {
                result.map_err(|error| (error, None))
            }
        }
    }

    /// Try the candidates until a connection is established or every candidate has failed.
    async fn drive(&self) -> DialOutcome<U::Connection> {
        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);

        let mut candidates = self.addresses.iter().cloned().enumerate().peekable();
        let mut attempts = FuturesUnordered::new();
        let mut signals = HashMap::<usize, CancellationToken>::new();
        let mut failures = Vec::<(usize, DialFailure)>::new();
        let mut acquire: Option<BoxFuture<'static, crate::Result<DialToken>>> = None;

        let interrupt = loop {
            if acquire.is_none() && candidates.peek().is_some() {
                acquire = Some(self.inner.tokens.clone().acquire().boxed());
            }

            if acquire.is_none() && attempts.is_empty() {
                break None;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break Some(Interrupt::Cancelled),
                _ = &mut deadline => break Some(Interrupt::Timeout),
                Some((index, address, result)) = attempts.next(), if !attempts.is_empty() => {
                    signals.remove(&index);

                    let stream = match result {
                        Ok(stream) => stream,
                        Err(error) => {
                            tracing::trace!(target: LOG_TARGET, id = ?self.id, ?address, ?error, "dial attempt failed");

                            self.inner.resolver.report_dial_result(&address, false);
                            failures.push((index, DialFailure { address, error }));
                            continue;
                        }
                    };

                    tracing::trace!(target: LOG_TARGET, id = ?self.id, ?address, "stream opened");
                    self.inner.resolver.report_dial_result(&address, true);

                    // stop the other attempts and let them release their tokens
                    acquire = None;
                    for signal in signals.values() {
                        signal.cancel();
                    }
                    while let Some((index, address, result)) = attempts.next().await {
                        signals.remove(&index);

                        let error = result.err().unwrap_or(Error::Aborted);
                        failures.push((index, DialFailure { address, error }));
                    }

                    match self.upgrade(stream, &address, deadline.as_mut()).await {
                        Ok(connection) => return Ok(Arc::new(connection)),
                        Err((error, interrupt)) => {
                            tracing::debug!(target: LOG_TARGET, id = ?self.id, ?address, ?error, "upgrade failed");

                            failures.push((index, DialFailure { address, error }));
                            if interrupt.is_some() {
                                break interrupt;
                            }
                        }
                    }
                }
                token = next_token(&mut acquire) => {
                    acquire = None;

                    let token = match token {
                        Ok(token) => token,
                        Err(_) => break Some(Interrupt::Cancelled),
                    };
                    let Some((index, address)) = candidates.next() else {
                        continue;
                    };

                    tracing::trace!(target: LOG_TARGET, id = ?self.id, ?index, ?address, "start dial attempt");

                    let signal = self.cancel.child_token();
                    signals.insert(index, signal.clone());
                    attempts.push(self.attempt(index, address, token, signal));
                }
            }
        };

        // abort the attempts still in progress and wait until their tokens are released
        for signal in signals.values() {
            signal.cancel();
        }
        while let Some((index, address, result)) = attempts.next().await {
            let error = match interrupt {
                Some(Interrupt::Timeout) => Error::Timeout,
                _ => result.err().unwrap_or(Error::Aborted),
            };
            failures.push((index, DialFailure { address, error }));
        }

        match interrupt {
            Some(Interrupt::Cancelled) if self.inner.shutdown.is_cancelled() => {
                return Err(Error::Shutdown)
            }
            Some(Interrupt::Cancelled) => return Err(Error::Aborted),
            Some(Interrupt::Timeout) => {
                let only_timeouts = failures
                    .iter()
                    .all(|(_, failure)| matches!(failure.error, Error::Timeout | Error::Aborted));

                if only_timeouts {
                    return Err(Error::Timeout);
                }
            }
            None => {}
        }

        failures.sort_by_key(|(index, _)| *index);

        Err(Error::Aggregate(Arc::new(AggregateDialError::new(
            failures.into_iter().map(|(_, failure)| failure).collect(),
        ))))
    }
}
