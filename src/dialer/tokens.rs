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

//! Dial tokens.

use crate::error::Error;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use std::sync::Arc;

/// Permission to run one transport dial.
///
/// The token is returned to the pool when dropped.
#[derive(Debug)]
pub(crate) struct DialToken {
    _permit: OwnedSemaphorePermit,
}

/// Fixed-size pool of [`DialToken`]s.
///
/// Tokens are handed out in the order they were requested.
#[derive(Debug, Clone)]
pub(crate) struct TokenPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TokenPool {
    /// Create new [`TokenPool`] with `capacity` tokens.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait until a token is available and take it.
    pub(crate) async fn acquire(self) -> crate::Result<DialToken> {
        self.semaphore
            .acquire_owned()
            .await
            .map(|permit| DialToken { _permit: permit })
            .map_err(|_| Error::Shutdown)
    }

    /// Close the pool.
    ///
    /// Pending and future [`TokenPool::acquire()`] calls fail with [`Error::Shutdown`]. Tokens
    /// already handed out stay valid.
    pub(crate) fn close(&self) {
        self.semaphore.close();
    }

    /// Number of tokens not handed out.
    pub(crate) fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total number of tokens.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn tokens_are_handed_out_in_order() {
        let pool = TokenPool::new(1);

        let first = pool.clone().acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        let mut second = Box::pin(pool.clone().acquire());
        let mut third = Box::pin(pool.clone().acquire());
        assert!((&mut second).now_or_never().is_none());
        assert!((&mut third).now_or_never().is_none());

        drop(first);

        // the token goes to the first waiter even though the second is polled first
        assert!((&mut third).now_or_never().is_none());
        let second = second.await.unwrap();
        drop(second);

        let third = third.await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(third);

        assert_eq!(pool.available(), pool.capacity());
    }

    #[tokio::test]
    async fn closed_pool_wakes_waiters() {
        let pool = TokenPool::new(1);

        let token = pool.clone().acquire().await.unwrap();
        let mut waiter = Box::pin(pool.clone().acquire());
        assert!((&mut waiter).now_or_never().is_none());

        pool.close();

        assert_eq!(waiter.await.unwrap_err(), Error::Shutdown);
        assert_eq!(pool.clone().acquire().await.unwrap_err(), Error::Shutdown);

        drop(token);
        assert_eq!(pool.available(), pool.capacity());
    }
}
