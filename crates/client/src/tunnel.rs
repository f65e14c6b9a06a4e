//! Tunnel driver
//!
//! Wires the opener, the two pumps, and the local endpoint into one tunnel
//! run, and owns the shared shutdown state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{info, warn};

use httpbridge_core::{ConnId, TargetAddr};

use crate::local::LocalMode;
use crate::opener::open_tunnel;
use crate::{downlink, uplink, ClientConfig, Result};

/// Shared state of one running tunnel.
///
/// The cancellation token carries one fact, "the local side is done",
/// which both pumps and the signal watcher observe at their next suspension
/// point. The connected flag records whether the bridge entry is still
/// believed live, so the uplink skips the close request for a tunnel the
/// bridge already forgot.
pub struct TunnelHandle {
    cancel: CancellationToken,
    connected: AtomicBool,
}

impl TunnelHandle {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            connected: AtomicBool::new(true),
        }
    }

    /// Close the local side of the tunnel.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// One client-side tunnel: a fresh connection id bound to a bridge URL and
/// a destination.
pub struct Tunnel {
    id: ConnId,
    url: String,
    target: TargetAddr,
    config: ClientConfig,
    handle: Arc<TunnelHandle>,
}

impl Tunnel {
    pub fn new(bridge_url: &str, target: TargetAddr, config: ClientConfig) -> Self {
        let id = ConnId::generate();
        let url = format!("{}/{}", bridge_url.trim_end_matches('/'), id);
        Self {
            id,
            url,
            target,
            config,
            handle: Arc::new(TunnelHandle::new()),
        }
    }

    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// Shared handle for wiring signals (or tests) into the shutdown path.
    pub fn handle(&self) -> Arc<TunnelHandle> {
        self.handle.clone()
    }

    /// Open the tunnel on the bridge, then pump until either side closes.
    ///
    /// The open happens before the local endpoint is resolved, so a
    /// destination the bridge cannot dial fails fast without waiting for a
    /// local connection to arrive.
    pub async fn run(self, local: LocalMode) -> Result<()> {
        let control = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .read_timeout(self.config.control_read_timeout)
            .build()?;
        // Dedicated long-poll client; its read timeout outwaits the
        // bridge's idle answer so the bridge always speaks first.
        let poll = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .read_timeout(self.config.poll_read_timeout)
            .build()?;

        open_tunnel(&control, &self.url, &self.target, &self.config).await?;
        info!(
            "tunnel {} connected to {} via bridge",
            self.id.short(),
            self.target
        );

        let endpoint = local.into_endpoint().await?;
        let (reader, writer) = endpoint.into_split();

        let mut downlink_task = tokio::spawn(downlink::run(
            poll,
            self.url.clone(),
            writer,
            self.handle.clone(),
            self.config.retry_backoff,
        ));

        let uplink_result = uplink::run(
            &control,
            &self.url,
            reader,
            &self.handle,
            self.config.retry_backoff,
        )
        .await;

        // The uplink's exit unparks the bridge side, which answers the
        // downlink's in-flight poll promptly; the grace period covers one
        // full poll round trip before we give up on a wedged bridge.
        let grace = self.config.poll_read_timeout + Duration::from_secs(2);
        let downlink_result = match tokio::time::timeout(grace, &mut downlink_task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("downlink task failed: {}", e);
                Ok(())
            }
            Err(_) => {
                warn!("downlink did not drain in time, abandoning poll");
                downlink_task.abort();
                Ok(())
            }
        };

        uplink_result?;
        downlink_result?;
        info!("tunnel {} finished", self.id.short());
        Ok(())
    }
}

/// Resolves when the process is told to stop: INT, HUP, or TERM on unix,
/// ctrl-c elsewhere. Callers translate this into `TunnelHandle::cancel`,
/// which closes the local endpoint and lets the pumps drain.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let streams = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
        signal(SignalKind::terminate()),
    );
    match streams {
        (Ok(mut int_s), Ok(mut hup_s), Ok(mut term_s)) => {
            tokio::select! {
                _ = int_s.recv() => {}
                _ = hup_s.recv() => {}
                _ = term_s.recv() => {}
            }
        }
        _ => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
