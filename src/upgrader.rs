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

//! Connection upgrade interface.
//!
//! Turning a raw stream into a usable connection (security handshake, stream multiplexing,
//! private network wrapping) is done by an [`Upgrader`] supplied by the user of the crate.

use crate::transport::RawStream;

use multiaddr::Multiaddr;
use tokio_util::sync::CancellationToken;

/// Upgrades raw streams into connections.
#[async_trait::async_trait]
pub trait Upgrader: Send + Sync + 'static {
    /// Upgraded connection.
    type Connection: Send + Sync + 'static;

    /// Upgrade the outbound `stream` opened to `address`.
    ///
    /// The upgrade must be abandoned as soon as `signal` is cancelled.
    async fn upgrade(
        &self,
        stream: Box<dyn RawStream>,
        address: &Multiaddr,
        signal: CancellationToken,
    ) -> crate::Result<Self::Connection>;
}
