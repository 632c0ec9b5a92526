//! Liveness and readiness probes.
//!
//! Two different questions, two different costs: `probe_process` asks the
//! process table whether the tracked pid still exists (cheap, used by
//! `status`), while `wait_for_ready` polls the TCP port until the dev
//! server inside the sandbox actually accepts connections (used once,
//! during provisioning).

use crate::error::{Result, SandboxError};
use crate::process::ProcessSupervisor;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Explicit retry budget for the readiness wait.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn total_wait(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

pub struct HealthMonitor {
    supervisor: Arc<ProcessSupervisor>,
    policy: RetryPolicy,
}

impl HealthMonitor {
    pub fn new(supervisor: Arc<ProcessSupervisor>, policy: RetryPolicy) -> Self {
        Self { supervisor, policy }
    }

    pub async fn probe_process(&self, pid: u32) -> bool {
        self.supervisor.is_alive(pid).await
    }

    /// Poll until the port accepts a TCP connection or the retry budget is
    /// spent.
    pub async fn wait_for_ready(&self, port: u16) -> Result<()> {
        tracing::info!("waiting for server on port {port}...");

        for attempt in 1..=self.policy.max_attempts {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(_stream) => {
                    tracing::info!("server ready on port {port} (attempt {attempt})");
                    return Ok(());
                }
                Err(_) if attempt < self.policy.max_attempts => {
                    tokio::time::sleep(self.policy.interval).await;
                }
                Err(_) => {}
            }
        }

        Err(SandboxError::HealthCheckTimeout {
            port,
            waited: self.policy.total_wait(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ShellRunner;
    use tokio::net::TcpListener;

    fn monitor(policy: RetryPolicy) -> HealthMonitor {
        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::new(ShellRunner),
            "true --port {port}",
            Duration::from_secs(5),
        ));
        HealthMonitor::new(supervisor, policy)
    }

    #[test]
    fn total_wait_is_attempts_times_interval() {
        let policy = RetryPolicy {
            max_attempts: 30,
            interval: Duration::from_secs(1),
        };
        assert_eq!(policy.total_wait(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn ready_when_port_accepts() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let monitor = monitor(RetryPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(10),
        });
        monitor.wait_for_ready(port).await.unwrap();
    }

    #[tokio::test]
    async fn timeout_when_nothing_listens() {
        // Bind and drop to find a port with no listener.
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let monitor = monitor(RetryPolicy {
            max_attempts: 2,
            interval: Duration::from_millis(10),
        });
        match monitor.wait_for_ready(port).await {
            Err(SandboxError::HealthCheckTimeout { port: p, .. }) => assert_eq!(p, port),
            other => panic!("expected HealthCheckTimeout, got {other:?}"),
        }
    }
}
