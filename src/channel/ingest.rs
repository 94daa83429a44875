use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::reliable::ChannelShared;
use super::types::ChannelMetrics;

/// Drain the transport into the shared buffer until the session scope is
/// cancelled or the transport stops being usable.
///
/// Read errors are swallowed: a dead port shows up as `is_open() == false`
/// on the next iteration, which ends the session with `ConnectionLost`.
pub(crate) async fn ingest_loop(shared: Arc<ChannelShared>, scope: CancellationToken) {
    let address = shared.transport.address().to_string();
    let mut chunk = vec![0u8; shared.options.chunk_size.max(1)];
    log::debug!("Ingestion started for {}", address);

    loop {
        if scope.is_cancelled() {
            break;
        }
        if !shared.transport.is_open() {
            shared.connection_lost(&scope, "transport no longer open").await;
            break;
        }

        let read = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            read = shared.transport.read_some(&mut chunk) => read,
        };

        match read {
            Ok(0) => {}
            Ok(n) => {
                shared.buffer.append(&chunk[..n]).await;
                ChannelMetrics::add(&shared.metrics.bytes_ingested, n as u64);
                ChannelMetrics::add(&shared.metrics.chunks_ingested, 1);
            }
            Err(e) => {
                ChannelMetrics::add(&shared.metrics.swallowed_read_errors, 1);
                log::debug!("Read error on {} swallowed: {}", address, e);
                // Keep a failing port from spinning the loop.
                tokio::select! {
                    _ = scope.cancelled() => break,
                    _ = tokio::time::sleep(shared.options.read_error_backoff()) => {}
                }
            }
        }
    }

    log::debug!("Ingestion stopped for {}", address);
}
