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

#![allow(clippy::single_match)]
#![allow(clippy::result_large_err)]
#![allow(clippy::type_complexity)]

//! Dial coordination for peer-to-peer networking.
//!
//! [`Dialer`](dialer::Dialer) coalesces concurrent dial requests for the same target, bounds
//! the number of transport dials in progress and aggregates the failures of every attempted
//! address. [`TransportManager`](transport::manager::TransportManager) selects the transport
//! an address is dialed or listened on with.

pub use crate::{
    config::{Config, ConfigBuilder, FaultTolerance},
    dialer::{DialKey, DialOptions, DialTarget, Dialer, IntoDialTarget},
    error::{AggregateDialError, DialFailure, Error, ErrorCode},
    peer_id::PeerId,
};

pub use multiaddr::Multiaddr;

pub mod config;
pub mod crypto;
pub mod dialer;
pub mod error;
pub mod executor;
pub mod peer_record;
pub mod resolver;
pub mod transport;
pub mod types;
pub mod upgrader;

mod peer_id;

/// Public result type used by the crate.
pub type Result<T> = std::result::Result<T, error::Error>;
