//! Accepts transport connections, feeds their envelopes to an
//! [`ActorSystem`], and enforces the `running -> draining -> stopped`
//! lifecycle around every inbound invocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use trebuchet_actor::ActorSystem;
use trebuchet_http::{HealthProvider, HealthSnapshot};
use trebuchet_transport::{Connection, Transport};
use trebuchet_wire::Envelope;

use crate::error::Result;
use crate::lifecycle::Lifecycle;

/// How long [`ServerHost::shutdown`] waits for admitted invocations to
/// finish before force-cancelling them.
pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Drives the accept loop for one bound address and one [`ActorSystem`],
/// admitting invocations against the host's lifecycle.
pub struct ServerHost {
    system: Arc<ActorSystem>,
    lifecycle: Lifecycle,
    drain_deadline: Duration,
    stopped: Notify,
}

impl ServerHost {
    /// Build a host over `system`, draining for up to
    /// [`DEFAULT_DRAIN_DEADLINE`] on shutdown.
    pub fn new(system: Arc<ActorSystem>) -> Arc<Self> {
        Self::with_drain_deadline(system, DEFAULT_DRAIN_DEADLINE)
    }

    /// Build a host with a custom drain deadline.
    pub fn with_drain_deadline(system: Arc<ActorSystem>, drain_deadline: Duration) -> Arc<Self> {
        Arc::new(Self {
            system,
            lifecycle: Lifecycle::new(),
            drain_deadline,
            stopped: Notify::new(),
        })
    }

    /// Bind `bind_addr` on `transport` and accept connections until
    /// [`ServerHost::shutdown`] completes.
    pub async fn serve(self: &Arc<Self>, transport: Arc<dyn Transport>, bind_addr: &str) -> Result<()> {
        let mut listener = transport.listen(bind_addr).await?;
        info!(%bind_addr, "server host listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((connection, peer)) => {
                            let host = Arc::clone(self);
                            tokio::spawn(async move { host.handle_connection(connection, peer).await });
                        }
                        Err(e) => warn!(error = %e, "failed to accept connection"),
                    }
                }
                _ = self.stopped.notified() => {
                    debug!("accept loop exiting, host stopped");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Begin draining: stop admitting new invocations, wait up to the
    /// configured drain deadline for in-flight ones to finish, then
    /// transition to stopped and unblock [`ServerHost::serve`].
    pub async fn shutdown(&self) {
        info!("server host draining");
        self.lifecycle.start_drain();

        let deadline = tokio::time::Instant::now() + self.drain_deadline;
        while self.lifecycle.inflight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        if self.lifecycle.inflight() > 0 {
            warn!(
                inflight = self.lifecycle.inflight(),
                "drain deadline elapsed with invocations still in flight; stopping anyway"
            );
        }

        self.lifecycle.mark_stopped();
        self.stopped.notify_waiters();
        info!("server host stopped");
    }

    /// Spawn a task that drains on Ctrl+C, matching the shutdown trigger
    /// a process running this host directly would use.
    pub fn shutdown_on_ctrl_c(self: &Arc<Self>) {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                host.shutdown().await;
            }
        });
    }

    async fn handle_connection(self: Arc<Self>, connection: Arc<dyn Connection>, peer: String) {
        debug!(%peer, "connection accepted");
        while let Some(envelope) = connection.recv().await {
            let host = Arc::clone(&self);
            let connection = Arc::clone(&connection);
            let peer = peer.clone();
            tokio::spawn(async move { host.dispatch(envelope, connection, peer).await });
        }
        debug!(%peer, "connection closed");
    }

    async fn dispatch(&self, envelope: Envelope, connection: Arc<dyn Connection>, peer: String) {
        let Envelope::Invocation { call_id, .. } = &envelope else {
            if let Err(e) = self.system.receive(envelope, &peer, connection).await {
                warn!(%peer, error = %e, "failed to handle inbound envelope");
            }
            return;
        };
        let call_id = *call_id;

        let guard = match self.lifecycle.begin_invocation() {
            Ok(guard) => guard,
            Err(_) => {
                let rejection = Envelope::Response {
                    call_id,
                    result: None,
                    error_message: Some("server draining".to_string()),
                };
                if let Err(e) = connection.send(rejection).await {
                    warn!(%peer, error = %e, "failed to send draining rejection");
                }
                return;
            }
        };

        if let Err(e) = self.system.receive(envelope, &peer, connection).await {
            warn!(%peer, %call_id, error = %e, "failed to handle invocation");
        }
        drop(guard);
    }
}

#[async_trait]
impl HealthProvider for ServerHost {
    async fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: self.lifecycle.status(),
            inflight_requests: self.lifecycle.inflight(),
            active_streams: self.system.active_stream_count() as u64,
            uptime_secs: self.lifecycle.uptime().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use trebuchet_actor::ActorSystem;
    use trebuchet_http::{HealthProvider, HostStatus};
    use trebuchet_transport::FramedSocketTransport;

    use super::*;

    fn make_system() -> Arc<ActorSystem> {
        ActorSystem::new("127.0.0.1", 0, (1, 1), Arc::new(FramedSocketTransport::new(4 * 1024 * 1024)))
    }

    #[tokio::test]
    async fn a_fresh_host_reports_running_with_zero_inflight() {
        let host = ServerHost::new(make_system());
        let snapshot = host.snapshot().await;
        assert_eq!(snapshot.status, HostStatus::Running);
        assert_eq!(snapshot.inflight_requests, 0);
    }

    #[tokio::test]
    async fn shutdown_with_nothing_in_flight_transitions_straight_to_stopped() {
        let host = ServerHost::with_drain_deadline(make_system(), Duration::from_millis(200));
        host.shutdown().await;
        let snapshot = host.snapshot().await;
        assert_eq!(snapshot.status, HostStatus::Stopped);
    }

    #[tokio::test]
    async fn shutdown_waits_for_admitted_invocations_before_stopping() {
        let host = ServerHost::with_drain_deadline(make_system(), Duration::from_secs(5));
        let guard = host.lifecycle.begin_invocation().unwrap();

        let host_for_task = Arc::clone(&host);
        let shutdown = tokio::spawn(async move { host_for_task.shutdown().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(host.snapshot().await.status, HostStatus::Draining);

        drop(guard);
        shutdown.await.unwrap();
        assert_eq!(host.snapshot().await.status, HostStatus::Stopped);
    }
}
