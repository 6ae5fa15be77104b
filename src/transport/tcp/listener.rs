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

//! TCP listener.

use crate::{
    error::{AddressError, Error},
    transport::{tcp::config::Config, Listener, TransportEvent},
    types::ListenerId,
    PeerId,
};

use multiaddr::{Multiaddr, Protocol};
use socket2::{Domain, Socket, Type};
use tokio::{net::TcpListener as TokioTcpListener, sync::mpsc::Sender};
use tokio_util::sync::CancellationToken;

use std::net::{IpAddr, SocketAddr};

/// Logging target for the file.
const LOG_TARGET: &str = "litedial::tcp::listener";

/// Address type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum AddressType {
    /// Socket address.
    Socket(SocketAddr),

    /// DNS address.
    Dns(String, u16),
}

/// Extract socket address and `PeerId`, if found, from `address`.
pub(super) fn get_socket_address(
    address: &Multiaddr,
) -> crate::Result<(AddressType, Option<PeerId>)> {
    let mut iter = address.iter();
    let socket_address = match iter.next() {
        Some(Protocol::Ip6(address)) => match iter.next() {
            Some(Protocol::Tcp(port)) =>
                AddressType::Socket(SocketAddr::new(IpAddr::V6(address), port)),
            _ => return Err(Error::AddressError(AddressError::InvalidProtocol)),
        },
        Some(Protocol::Ip4(address)) => match iter.next() {
            Some(Protocol::Tcp(port)) =>
                AddressType::Socket(SocketAddr::new(IpAddr::V4(address), port)),
            _ => return Err(Error::AddressError(AddressError::InvalidProtocol)),
        },
        Some(Protocol::Dns(address))
        | Some(Protocol::Dns4(address))
        | Some(Protocol::Dns6(address)) => match iter.next() {
            Some(Protocol::Tcp(port)) => AddressType::Dns(address.to_string(), port),
            _ => return Err(Error::AddressError(AddressError::InvalidProtocol)),
        },
        _ => return Err(Error::AddressError(AddressError::InvalidProtocol)),
    };

    let maybe_peer = match iter.next() {
        Some(Protocol::P2p(multihash)) => Some(
            PeerId::from_multihash(multihash)
                .map_err(|_| Error::AddressError(AddressError::InvalidProtocol))?,
        ),
        None => None,
        _ => return Err(Error::AddressError(AddressError::InvalidProtocol)),
    };

    if iter.next().is_some() {
        return Err(Error::AddressError(AddressError::InvalidProtocol));
    }

    Ok((socket_address, maybe_peer))
}

/// Convert `SocketAddr` to `Multiaddr`.
pub(super) fn socket_address_to_multiaddr(address: &SocketAddr) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::from(address.ip()))
        .with(Protocol::Tcp(address.port()))
}

/// TCP listener.
pub(super) struct TcpListener {
    /// Listener ID.
    id: ListenerId,

    /// Socket backlog.
    backlog: u32,

    /// Transport configuration.
    config: Config,

    /// TX channel for accepted streams.
    events: Sender<TransportEvent>,

    /// Bound addresses.
    addresses: Vec<Multiaddr>,

    /// Stops the accept loops when cancelled.
    shutdown: CancellationToken,
}

impl TcpListener {
    /// Create new [`TcpListener`].
    pub(super) fn new(
        id: ListenerId,
        backlog: u32,
        config: Config,
        events: Sender<TransportEvent>,
    ) -> Self {
        Self {
            id,
            backlog,
            config,
            events,
            addresses: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a non-blocking listening socket bound to `address`.
    fn bind(&self, address: SocketAddr) -> crate::Result<TokioTcpListener> {
        let socket = Socket::new(
            Domain::for_address(address),
            Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        if address.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_reuse_address(self.config.reuse_address)?;
        #[cfg(unix)]
        if self.config.reuse_port {
            socket.set_reuse_port(true)?;
        }
        socket.bind(&address.into())?;
        socket.listen(self.backlog.min(i32::MAX as u32) as i32)?;
        socket.set_nonblocking(true)?;

        let socket: std::net::TcpListener = socket.into();
        TokioTcpListener::from_std(socket).map_err(From::from)
    }

    /// Accept inbound connections until `shutdown` is cancelled.
    async fn accept_loop(
        id: ListenerId,
        listener: TokioTcpListener,
        address: Multiaddr,
        nodelay: bool,
        events: Sender<TransportEvent>,
        shutdown: CancellationToken,
    ) {
        let error = loop {
            let (stream, remote) = tokio::select! {
                _ = shutdown.cancelled() => break None,
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        tracing::warn!(target: LOG_TARGET, ?id, ?address, ?error, "accept failed");
                        break Some(Error::from(error));
                    }
                },
            };

            tracing::trace!(target: LOG_TARGET, ?id, ?remote, "inbound connection");

            if let Err(error) = stream.set_nodelay(nodelay) {
                tracing::debug!(target: LOG_TARGET, ?remote, ?error, "failed to set `TCP_NODELAY`");
            }

            let event = TransportEvent::InboundStream {
                listener: id,
                address: address.clone(),
                remote: socket_address_to_multiaddr(&remote),
                stream: Box::new(stream),
            };

            if events.send(event).await.is_err() {
                tracing::debug!(target: LOG_TARGET, ?id, "event receiver dropped, stop accepting");
                return;
            }
        };

        tracing::debug!(target: LOG_TARGET, ?id, ?address, ?error, "listener closed");

        let _ = events.send(TransportEvent::ListenerClosed { listener: id, error }).await;
    }
}

#[async_trait::async_trait]
impl Listener for TcpListener {
    async fn listen(&mut self, address: Multiaddr) -> crate::Result<Multiaddr> {
        let socket_address = match get_socket_address(&address)? {
            (AddressType::Socket(socket_address), _) => socket_address,
            (AddressType::Dns(_, _), _) => {
                tracing::debug!(target: LOG_TARGET, ?address, "cannot listen on a dns address");
                return Err(Error::AddressError(AddressError::InvalidProtocol));
            }
        };

        let listener = self.bind(socket_address)?;
        let bound = socket_address_to_multiaddr(&listener.local_addr()?);

        tracing::debug!(target: LOG_TARGET, id = ?self.id, ?address, ?bound, "start listening");

        tokio::spawn(Self::accept_loop(
            self.id,
            listener,
            bound.clone(),
            self.config.nodelay,
            self.events.clone(),
            self.shutdown.child_token(),
        ));
        self.addresses.push(bound.clone());

        Ok(bound)
    }

    fn addresses(&self) -> Vec<Multiaddr> {
        self.addresses.clone()
    }

    async fn close(&mut self) {
        tracing::debug!(
            target: LOG_TARGET,
            id = ?self.id,
            addresses = ?self.addresses,
            "close listener",
        );

        self.shutdown.cancel();
        self.addresses.clear();
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
