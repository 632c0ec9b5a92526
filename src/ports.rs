//! Free-port discovery within a bounded window.
//!
//! A linear scan is enough here: the manager runs one sandbox per host
//! instance, so the allocator is called once per `create`. There is no
//! reservation step between allocation and the dev server binding the
//! port; lifecycle operations are serialized by the orchestrator, which
//! keeps the manager from racing itself.

use crate::error::{Result, SandboxError};
use tokio::net::TcpListener;

pub struct PortAllocator {
    start: u16,
    window: u16,
}

impl PortAllocator {
    pub fn new(start: u16, window: u16) -> Self {
        Self { start, window }
    }

    /// Return the first port in the window with no existing listener.
    ///
    /// The probe is a wildcard-address bind: it conflicts with listeners on
    /// any local interface, which is exactly the "is someone serving this
    /// port" question.
    pub async fn allocate(&self) -> Result<u16> {
        let end = self.start.saturating_add(self.window);
        for port in self.start..end {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    drop(listener);
                    tracing::debug!("allocated port {port}");
                    return Ok(port);
                }
                Err(_) => continue,
            }
        }
        Err(SandboxError::ResourceExhausted {
            start: self.start,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_occupied_ports() {
        // Grab an ephemeral port, then scan a window starting at it.
        let held = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let occupied = held.local_addr().unwrap().port();

        let allocator = PortAllocator::new(occupied, 10);
        let port = allocator.allocate().await.unwrap();
        assert_ne!(port, occupied);
        assert!(port > occupied && port < occupied + 10);
    }

    #[tokio::test]
    async fn exhausted_window_errors() {
        let held = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let start = held.local_addr().unwrap().port();

        // Window of 1: only the occupied port is scanned.
        let allocator = PortAllocator::new(start, 1);
        match allocator.allocate().await {
            Err(SandboxError::ResourceExhausted { start: s, end }) => {
                assert_eq!(s, start);
                assert_eq!(end, start + 1);
            }
            other => panic!("expected ResourceExhausted, got {other:?}"),
        }
    }
}
