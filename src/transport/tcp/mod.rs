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

//! TCP transport.

use crate::{
    error::Error,
    transport::{
        tcp::{
            config::Config,
            listener::{get_socket_address, AddressType, TcpListener},
        },
        Listener, RawStream, Transport, TransportEvent, TransportOptions,
    },
    types::ListenerId,
};

use multiaddr::Multiaddr;
use tokio::{net::TcpStream, sync::mpsc::Sender};
use tokio_util::sync::CancellationToken;

pub mod config;

mod listener;

/// Logging target for the file.
const LOG_TARGET: &str = "litedial::tcp";

/// TCP transport.
#[derive(Debug, Default)]
pub struct TcpTransport {
    /// Transport configuration.
    config: Config,
}

impl TcpTransport {
    /// Create new [`TcpTransport`].
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Connect to `address`, resolving it first if it's a DNS address.
    async fn connect(address: AddressType) -> std::io::Result<TcpStream> {
        match address {
            AddressType::Socket(address) => TcpStream::connect(address).await,
            AddressType::Dns(host, port) => TcpStream::connect((host.as_str(), port)).await,
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn match_address(&self, address: &Multiaddr) -> Option<usize> {
        // `/<ip|dns>/<host>/tcp/<port>`, the optional `/p2p` suffix isn't consumed by the transport
        get_socket_address(address).ok().map(|_| 2usize)
    }

    async fn dial(
        &self,
        address: Multiaddr,
        signal: CancellationToken,
    ) -> crate::Result<Box<dyn RawStream>> {
        tracing::debug!(target: LOG_TARGET, ?address, "open connection");

        let (socket_address, _) = get_socket_address(&address)?;

        let stream = tokio::select! {
            biased;

            _ = signal.cancelled() => {
                tracing::trace!(target: LOG_TARGET, ?address, "dial aborted");
                return Err(Error::Aborted);
            }
            result = Self::connect(socket_address) => result.map_err(|error| {
                tracing::debug!(target: LOG_TARGET, ?address, ?error, "failed to connect");
                Error::from(error)
            })?,
        };

        if let Err(error) = stream.set_nodelay(self.config.nodelay) {
            tracing::debug!(target: LOG_TARGET, ?address, ?error, "failed to set `TCP_NODELAY`");
        }

        tracing::trace!(target: LOG_TARGET, ?address, "connection opened");

        Ok(Box::new(stream))
    }

    fn create_listener(
        &self,
        listener: ListenerId,
        options: &TransportOptions,
        events: Sender<TransportEvent>,
    ) -> Box<dyn Listener> {
        Box::new(TcpListener::new(
            listener,
            options.listen_backlog,
            self.config.clone(),
            events,
        ))
    }
}
