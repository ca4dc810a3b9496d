// Copyright 2021 Parity Technologies (UK) Ltd.
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

//! Resource accounting scopes.
//!
//! The swarm asks the resource manager for a scope before it admits a
//! connection or stream. Scopes are acquired on success and must be released
//! (`done`) on every exit path, including failure and cancellation; the
//! swarm's connection and stream wrappers call `done` from their close
//! paths.

use thiserror::Error;

use crate::{Direction, PeerId};

/// A resource-accounting handle with a reserve/release/done lifecycle.
pub trait ResourceScope: Send + Sync {
    fn reserve_memory(&self, bytes: usize, priority: u8) -> Result<(), ResourceError>;
    fn release_memory(&self, bytes: usize);
    fn set_service(&self, name: &str);
    fn done(&self);
}

pub trait ConnectionScope: ResourceScope {}

pub trait StreamScope: ResourceScope {}

/// A span for ad-hoc accounting that is not tied to a connection or stream.
pub trait ResourceSpan: ResourceScope {}

pub trait ResourceManager: Send + Sync {
    fn open_connection(
        &self,
        direction: Direction,
        peer: Option<&PeerId>,
    ) -> Result<Box<dyn ConnectionScope>, ResourceError>;

    fn open_stream(
        &self,
        peer: &PeerId,
        direction: Direction,
    ) -> Result<Box<dyn StreamScope>, ResourceError>;

    fn begin_span(&self) -> Box<dyn ResourceSpan>;
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("memory reservation of {requested} bytes denied")]
    MemoryDenied { requested: usize },
    #[error("resource limit reached: {0}")]
    LimitExceeded(String),
}

/// A resource manager that admits everything. Used when resource limits are
/// not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResourceManager;

#[derive(Debug, Clone, Copy, Default)]
pub struct NullScope;

impl ResourceScope for NullScope {
    fn reserve_memory(&self, _bytes: usize, _priority: u8) -> Result<(), ResourceError> {
        Ok(())
    }
    fn release_memory(&self, _bytes: usize) {}
    fn set_service(&self, _name: &str) {}
    fn done(&self) {}
}

impl ConnectionScope for NullScope {}
impl StreamScope for NullScope {}
impl ResourceSpan for NullScope {}

impl ResourceManager for NullResourceManager {
    fn open_connection(
        &self,
        _direction: Direction,
        _peer: Option<&PeerId>,
    ) -> Result<Box<dyn ConnectionScope>, ResourceError> {
        Ok(Box::new(NullScope))
    }

    fn open_stream(
        &self,
        _peer: &PeerId,
        _direction: Direction,
    ) -> Result<Box<dyn StreamScope>, ResourceError> {
        Ok(Box::new(NullScope))
    }

    fn begin_span(&self) -> Box<dyn ResourceSpan> {
        Box::new(NullScope)
    }
}
