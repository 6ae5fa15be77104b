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

//! Transport capability interface and the transports provided by the crate.
//!
//! A transport is registered to the [`TransportManager`](manager::TransportManager) under a
//! [`TransportTag`]. The manager selects a transport for an address by asking every registered
//! transport how many components of the address it understands and picks the most specific one.

use crate::{error::Error, types::ListenerId};

use multiaddr::Multiaddr;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc::Sender,
};
use tokio_util::sync::CancellationToken;

use std::{borrow::Cow, fmt};

pub mod manager;
pub mod tcp;

#[cfg(test)]
pub(crate) mod dummy;

/// Default backlog of a listener.
pub const DEFAULT_LISTEN_BACKLOG: u32 = 1024;

/// Raw, unsecured bidirectional byte stream produced by a transport.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug + 'static {}

/// Blanket implementation for [`RawStream`].
impl<T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug + 'static> RawStream for T {}

/// Capability tag under which a transport is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportTag(Cow<'static, str>);

impl TransportTag {
    /// TCP.
    pub const TCP: TransportTag = TransportTag(Cow::Borrowed("tcp"));

    /// Create new [`TransportTag`].
    pub const fn new(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    /// Get the tag as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for TransportTag {
    fn from(tag: &'static str) -> Self {
        TransportTag(Cow::Borrowed(tag))
    }
}

impl From<String> for TransportTag {
    fn from(tag: String) -> Self {
        TransportTag(Cow::Owned(tag))
    }
}

impl fmt::Display for TransportTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options given to the transport when it's registered.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Maximum number of pending inbound connections of a listener.
    pub listen_backlog: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
        }
    }
}

/// Events emitted by listeners.
#[derive(Debug)]
pub enum TransportEvent {
    /// Remote peer opened a raw stream to one of the listeners.
    InboundStream {
        /// Listener which accepted the stream.
        listener: ListenerId,

        /// Local address of the listener.
        address: Multiaddr,

        /// Address of the remote end.
        remote: Multiaddr,

        /// Accepted stream, not yet upgraded.
        stream: Box<dyn RawStream>,
    },

    /// Listener stopped accepting connections.
    ListenerClosed {
        /// Listener ID.
        listener: ListenerId,

        /// Error which caused the listener to close, if any.
        error: Option<Error>,
    },
}

/// Transport capability.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Check whether the transport can handle `address`.
    ///
    /// Returns the number of leading address components the transport understands, or `None`
    /// if it cannot handle the address at all. The transport matching the most components is
    /// the one used for dialing and listening.
    fn match_address(&self, address: &Multiaddr) -> Option<usize>;

    /// Open a raw stream to `address`.
    ///
    /// The attempt must be abandoned as soon as `signal` is cancelled.
    async fn dial(
        &self,
        address: Multiaddr,
        signal: CancellationToken,
    ) -> crate::Result<Box<dyn RawStream>>;

    /// Create a listener which reports accepted streams over `events`.
    fn create_listener(
        &self,
        listener: ListenerId,
        options: &TransportOptions,
        events: Sender<TransportEvent>,
    ) -> Box<dyn Listener>;
}

/// Listener created by a [`Transport`].
#[async_trait::async_trait]
pub trait Listener: Send + Sync {
    /// Bind to `address` and start accepting connections.
    ///
    /// Returns the bound address which may differ from `address`, e.g., if port `0` was given.
    async fn listen(&mut self, address: Multiaddr) -> crate::Result<Multiaddr>;

    /// Get the addresses the listener is bound to.
    fn addresses(&self) -> Vec<Multiaddr>;

    /// Stop accepting connections and release the bound sockets.
    async fn close(&mut self);
}
