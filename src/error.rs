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

#![allow(clippy::enum_variant_names)]

//! Errors emitted by the dialer and the transport layer.
//!
//! All errors are cloneable: the outcome of a coalesced dial is shared between every caller
//! that attached to it, so the same value (and for [`AggregateDialError`], the same allocation)
//! is handed out to each of them.

use crate::{dialer::DialKey, peer_id::PeerId, transport::TransportTag};

use multiaddr::Multiaddr;

use std::{
    fmt,
    io::{self, ErrorKind},
    sync::Arc,
};

/// Stable error codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// None of the resolved addresses can be dialed.
    NoValidAddresses,

    /// Dial deadline expired.
    Timeout,

    /// No registered transport can handle the address.
    TransportUnavailable,

    /// Cancellation signal had already fired when the operation was started.
    AlreadyAborted,
}

impl ErrorCode {
    /// Get the string representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoValidAddresses => "ERR_NO_VALID_ADDRESSES",
            Self::Timeout => "ERR_TIMEOUT",
            Self::TransportUnavailable => "ERR_TRANSPORT_UNAVAILABLE",
            Self::AlreadyAborted => "ERR_ALREADY_ABORTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("No valid addresses to dial for `{0}`")]
    NoValidAddresses(DialKey),
    #[error("Operation timed out")]
    Timeout,
    #[error("No transport available for `{0}`")]
    TransportUnavailable(Multiaddr),
    #[error("Operation was aborted before it started")]
    AlreadyAborted,
    #[error("Operation aborted")]
    Aborted,
    #[error("All dial attempts failed: {0}")]
    Aggregate(Arc<AggregateDialError>),
    #[error("Tried to dial self")]
    TriedToDialSelf,
    #[error("Transport `{0}` already exists")]
    TransportAlreadyExists(TransportTag),
    #[error("Transport `{0}` does not exist")]
    TransportDoesntExist(TransportTag),
    #[error("Address error: `{0}`")]
    AddressError(AddressError),
    #[error("Parse error: `{0}`")]
    ParseError(ParseError),
    #[error("I/O error: `{0}`")]
    IoError(ErrorKind),
    #[error("Transport error: `{0}`")]
    TransportError(String),
    #[error("Connection upgrade failed: `{0}`")]
    UpgradeFailed(String),
    #[error("Failed to listen on any address")]
    ListenFailed,
    #[error("Peer `{0}` rejected by peer store")]
    PeerStoreRejected(PeerId),
    #[error("Essential task closed")]
    EssentialTaskClosed,
    #[error("Dialer has been shut down")]
    Shutdown,
    #[error("Invalid data")]
    InvalidData,
}

impl Error {
    /// Get the stable [`ErrorCode`] of the error, if it has one.
    ///
    /// An aggregate reports [`ErrorCode::Timeout`] if any of its attempts timed out.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::NoValidAddresses(_) => Some(ErrorCode::NoValidAddresses),
            Self::Timeout => Some(ErrorCode::Timeout),
            Self::Aggregate(aggregate) if aggregate.is_timeout() => Some(ErrorCode::Timeout),
            Self::TransportUnavailable(_) => Some(ErrorCode::TransportUnavailable),
            Self::AlreadyAborted => Some(ErrorCode::AlreadyAborted),
            _ => None,
        }
    }

    /// Get the aggregate error, if this is one.
    pub fn as_aggregate(&self) -> Option<&Arc<AggregateDialError>> {
        match self {
            Self::Aggregate(aggregate) => Some(aggregate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid protocol")]
    InvalidProtocol,
    #[error("`PeerId` doesn't match")]
    PeerIdMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid multihash")]
    InvalidMultihash,
    #[error("Invalid multiaddress: `{0}`")]
    InvalidMultiaddr(String),
    #[error("Invalid base58 encoding")]
    InvalidBase58,
    #[error("Unknown key type: `{0}`")]
    UnknownKeyType(i32),
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Failed to decode protobuf message: `{0}`")]
    ProstDecodeError(String),
}

/// Failure of a single dial attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DialFailure {
    /// Address that was dialed.
    pub address: Multiaddr,

    /// Why the attempt failed.
    pub error: Error,
}

impl fmt::Display for DialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.error)
    }
}

/// All failures of a dial request, in the order the attempts were started.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDialError {
    failures: Vec<DialFailure>,
}

impl AggregateDialError {
    /// Create new [`AggregateDialError`].
    pub fn new(failures: Vec<DialFailure>) -> Self {
        Self { failures }
    }

    /// Get the recorded failures.
    pub fn failures(&self) -> &[DialFailure] {
        &self.failures
    }

    /// Iterate over the underlying errors.
    pub fn errors(&self) -> impl Iterator<Item = &Error> {
        self.failures.iter().map(|failure| &failure.error)
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Check if no failures were recorded.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Check if any of the attempts timed out.
    pub fn is_timeout(&self) -> bool {
        self.errors().any(|error| error.code() == Some(ErrorCode::Timeout))
    }
}

impl fmt::Display for AggregateDialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure(s)", self.failures.len())?;

        for (index, failure) in self.failures.iter().enumerate() {
            write!(f, "\n  [{index}] {failure}")?;
        }

        Ok(())
    }
}

impl std::error::Error for AggregateDialError {}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::IoError(error.kind())
    }
}

impl From<AddressError> for Error {
    fn from(error: AddressError) -> Self {
        Error::AddressError(error)
    }
}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Error::ParseError(error)
    }
}

impl From<multiaddr::Error> for Error {
    fn from(error: multiaddr::Error) -> Self {
        Error::ParseError(ParseError::InvalidMultiaddr(error.to_string()))
    }
}

impl From<prost::DecodeError> for Error {
    fn from(error: prost::DecodeError) -> Self {
        Error::ParseError(ParseError::ProstDecodeError(error.to_string()))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::EssentialTaskClosed
    }
}

impl From<tokio::sync::watch::error::RecvError> for Error {
    fn from(_: tokio::sync::watch::error::RecvError) -> Self {
        Error::EssentialTaskClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        let address: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();

        assert_eq!(Error::Timeout.code(), Some(ErrorCode::Timeout));
        assert_eq!(Error::AlreadyAborted.code(), Some(ErrorCode::AlreadyAborted));
        assert_eq!(
            Error::TransportUnavailable(address.clone()).code(),
            Some(ErrorCode::TransportUnavailable)
        );
        assert_eq!(
            Error::NoValidAddresses(DialKey::Address(address)).code(),
            Some(ErrorCode::NoValidAddresses)
        );
        assert_eq!(Error::Aborted.code(), None);
        assert_eq!(ErrorCode::NoValidAddresses.to_string(), "ERR_NO_VALID_ADDRESSES");
    }

    #[test]
    fn aggregate_keeps_order_and_formats_every_cause() {
        let first: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let second: Multiaddr = "/ip4/127.0.0.1/tcp/2".parse().unwrap();

        let aggregate = AggregateDialError::new(vec![
            DialFailure {
                address: first.clone(),
                error: Error::IoError(ErrorKind::ConnectionRefused),
            },
            DialFailure {
                address: second.clone(),
                error: Error::Timeout,
            },
        ]);

        assert_eq!(aggregate.len(), 2);
        assert!(aggregate.is_timeout());
        assert_eq!(aggregate.failures()[0].address, first);
        assert_eq!(aggregate.failures()[1].address, second);

        let formatted = aggregate.to_string();
        assert!(formatted.starts_with("2 failure(s)"));
        assert!(formatted.contains("[0] /ip4/127.0.0.1/tcp/1"));
        assert!(formatted.contains("[1] /ip4/127.0.0.1/tcp/2: Operation timed out"));

        assert_eq!(Error::Aggregate(Arc::new(aggregate)).code(), Some(ErrorCode::Timeout));
        assert_eq!(
            Error::Aggregate(Arc::new(AggregateDialError::new(vec![DialFailure {
                address: first,
                error: Error::IoError(ErrorKind::ConnectionRefused),
            }])))
            .code(),
            None
        );
    }
}
