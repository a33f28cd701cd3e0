//! Port allocation for concurrently created harnesses.
//!
//! Each harness receives one contiguous block of `stride` ports. Blocks are
//! carved sequentially from a base port under a mutex, so two spawners
//! racing on the same allocator never receive overlapping blocks.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};

/// Minimum stride: node RPC, node peer and wallet RPC.
pub const MIN_PORT_STRIDE: u16 = 3;

/// A contiguous, inclusive block of ports owned by one harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    pub fn node_rpc(&self) -> u16 {
        self.first
    }

    pub fn node_peer(&self) -> u16 {
        self.first + 1
    }

    pub fn wallet_rpc(&self) -> u16 {
        self.first + 2
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.first..=self.last).contains(&port)
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.first..=self.last
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

/// Hands out disjoint port ranges for the lifetime of the allocator.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    stride: u16,
    probe: bool,
    offset: Mutex<u32>,
}

impl PortAllocator {
    /// Create an allocator starting at `base`; strides below
    /// [`MIN_PORT_STRIDE`] are raised to it.
    pub fn new(base: u16, stride: u16) -> Self {
        Self {
            base,
            stride: stride.max(MIN_PORT_STRIDE),
            probe: false,
            offset: Mutex::new(0),
        }
    }

    /// Skip blocks containing a port another process already holds.
    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn stride(&self) -> u16 {
        self.stride
    }

    /// Number of blocks issued or skipped so far.
    pub fn issued(&self) -> u32 {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next free block.
    pub fn allocate_range(&self) -> HarnessResult<PortRange> {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let range = self.range_at(*offset)?;
            *offset += 1;

            if self.probe && !range_is_free(&range) {
                warn!(range = %range, "Port range busy, skipping");
                continue;
            }

            debug!(range = %range, "Allocated port range");
            return Ok(range);
        }
    }

    fn range_at(&self, offset: u32) -> HarnessResult<PortRange> {
        let exhausted = || HarnessError::PortSpaceExhausted {
            base: self.base,
            stride: self.stride,
            offset,
        };
        let first = u32::from(self.base) + offset * u32::from(self.stride);
        let last = first + u32::from(self.stride) - 1;
        if last > u32::from(u16::MAX) {
            return Err(exhausted());
        }
        Ok(PortRange {
            first: u16::try_from(first).map_err(|_| exhausted())?,
            last: u16::try_from(last).map_err(|_| exhausted())?,
        })
    }
}

fn range_is_free(range: &PortRange) -> bool {
    range
        .ports()
        .all(|port| TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok())
}
