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

//! Address resolution.

use crate::dialer::DialTarget;

use multiaddr::{Multiaddr, Protocol};

pub use address_book::AddressBook;

mod address_book;

/// Strip the trailing `/p2p/<peer>` of `address`, if present.
pub(crate) fn strip_peer_id(address: &Multiaddr) -> Multiaddr {
    let mut address = address.clone();
    if let Some(Protocol::P2p(_)) = address.iter().last() {
        address.pop();
    }
    address
}

/// Resolves dial targets into the addresses that are dialed.
#[async_trait::async_trait]
pub trait AddressResolver: Send + Sync {
    /// Get the candidate addresses of `target`, best candidate first.
    async fn resolve(&self, target: &DialTarget) -> crate::Result<Vec<Multiaddr>>;

    /// Check if `address` may be dialed.
    fn filter(&self, _address: &Multiaddr) -> bool {
        true
    }

    /// Called when the transport dial to `address` has concluded.
    fn report_dial_result(&self, _address: &Multiaddr, _success: bool) {}
}
