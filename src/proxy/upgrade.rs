//! Full-duplex bridge for `101 Switching Protocols`.

use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;

/// Once both sides finish upgrading, copy bytes both ways until either
/// side reaches EOF or fails, then close both.
pub fn spawn_bridge(client: OnUpgrade, upstream: OnUpgrade, trace_id: String) {
    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(client, upstream) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(trace_id = %trace_id, error = %e, "Protocol upgrade failed");
                return;
            }
        };
        tracing::debug!(trace_id = %trace_id, "Upgraded connection bridged");

        let (mut client_read, mut client_write) = tokio::io::split(TokioIo::new(client));
        let (mut upstream_read, mut upstream_write) = tokio::io::split(TokioIo::new(upstream));

        let outbound = tokio::io::copy(&mut client_read, &mut upstream_write);
        let inbound = tokio::io::copy(&mut upstream_read, &mut client_write);

        tokio::select! {
            copied = outbound => {
                tracing::debug!(trace_id = %trace_id, result = ?copied, "Client side of upgraded connection ended");
            }
            copied = inbound => {
                tracing::debug!(trace_id = %trace_id, result = ?copied, "Upstream side of upgraded connection ended");
            }
        }

        let _ = client_write.shutdown().await;
        let _ = upstream_write.shutdown().await;
    });
}
