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

//! Dialer and transport manager configuration.

use crate::{
    crypto::ed25519::Keypair,
    executor::{DefaultExecutor, Executor},
};

use std::{sync::Arc, time::Duration};

/// Default maximum number of parallel dial attempts.
pub const MAX_PARALLEL_DIALS: usize = 8;

/// Default time a dial request has to complete.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay between a change in listen addresses and the publication of the peer record.
pub const PUBLISH_DELAY: Duration = Duration::from_secs(1);

/// Default size of the listener event channel.
const EVENT_CHANNEL_SIZE: usize = 256;

/// How failures to bind a listen address are handled.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum FaultTolerance {
    /// Listening fails if none of the addresses could be bound.
    #[default]
    FatalAll,

    /// Failures are logged and ignored.
    NoFatal,
}

/// Configuration builder.
pub struct ConfigBuilder {
    /// Keypair.
    keypair: Option<Keypair>,

    /// Maximum number of parallel dial attempts.
    max_parallel_dials: usize,

    /// Time a dial request has to complete.
    dial_timeout: Duration,

    /// Listen fault tolerance.
    fault_tolerance: FaultTolerance,

    /// Peer record publication delay.
    publish_delay: Duration,

    /// Size of the listener event channel.
    event_channel_size: usize,

    /// Executor for running futures.
    executor: Option<Arc<dyn Executor>>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create new [`ConfigBuilder`] with default values.
    pub fn new() -> Self {
        Self {
            keypair: None,
            max_parallel_dials: MAX_PARALLEL_DIALS,
            dial_timeout: DIAL_TIMEOUT,
            fault_tolerance: FaultTolerance::default(),
            publish_delay: PUBLISH_DELAY,
            event_channel_size: EVENT_CHANNEL_SIZE,
            executor: None,
        }
    }

    /// Add keypair.
    pub fn with_keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// How many transport dials may be in progress at the same time, across all dial requests.
    ///
    /// Values below one are raised to one.
    pub fn with_max_parallel_dials(mut self, max_parallel_dials: usize) -> Self {
        self.max_parallel_dials = max_parallel_dials.max(1);
        self
    }

    /// How long a dial request may take, including every attempt and the upgrade.
    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// Set how failures to bind listen addresses are handled.
    pub fn with_fault_tolerance(mut self, fault_tolerance: FaultTolerance) -> Self {
        self.fault_tolerance = fault_tolerance;
        self
    }

    /// Set how long to wait after the listen addresses have changed before publishing them.
    pub fn with_publish_delay(mut self, publish_delay: Duration) -> Self {
        self.publish_delay = publish_delay;
        self
    }

    /// Set the size of the channel listeners report inbound streams on.
    pub fn with_event_channel_size(mut self, event_channel_size: usize) -> Self {
        self.event_channel_size = event_channel_size.max(1);
        self
    }

    /// Add executor for running futures spawned by the crate.
    ///
    /// If no executor is specified, defaults to calling `tokio::spawn()`.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build [`Config`].
    ///
    /// Generates a default keypair if user didn't provide one.
    pub fn build(self) -> Config {
        Config {
            keypair: self.keypair.unwrap_or_else(Keypair::generate),
            max_parallel_dials: self.max_parallel_dials,
            dial_timeout: self.dial_timeout,
            fault_tolerance: self.fault_tolerance,
            publish_delay: self.publish_delay,
            event_channel_size: self.event_channel_size,
            executor: self.executor.unwrap_or_else(|| Arc::new(DefaultExecutor)),
        }
    }
}

/// Configuration of [`Dialer`](crate::dialer::Dialer) and
/// [`TransportManager`](crate::transport::manager::TransportManager).
#[derive(Debug, Clone)]
pub struct Config {
    /// Keypair.
    pub(crate) keypair: Keypair,

    /// Maximum number of parallel dial attempts.
    pub(crate) max_parallel_dials: usize,

    /// Time a dial request has to complete.
    pub(crate) dial_timeout: Duration,

    /// Listen fault tolerance.
    pub(crate) fault_tolerance: FaultTolerance,

    /// Peer record publication delay.
    pub(crate) publish_delay: Duration,

    /// Size of the listener event channel.
    pub(crate) event_channel_size: usize,

    /// Executor.
    pub(crate) executor: Arc<dyn Executor>,
}

impl Config {
    /// Get the keypair.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Get the maximum number of parallel dial attempts.
    pub fn max_parallel_dials(&self) -> usize {
        self.max_parallel_dials
    }

    /// Get the dial timeout.
    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }
}
