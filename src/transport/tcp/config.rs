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

//! TCP transport configuration.

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Set `TCP_NODELAY` on dialed and accepted sockets.
    pub nodelay: bool,

    /// Set `SO_REUSEADDR` on listening sockets.
    pub reuse_address: bool,

    /// Set `SO_REUSEPORT` on listening sockets.
    ///
    /// Only has an effect on Unix platforms.
    pub reuse_port: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodelay: true,
            reuse_address: true,
            reuse_port: true,
        }
    }
}
