//! Best-effort delivery of one payload to many connections

use crate::connection::ConnectionId;
use crate::error::RelayResult;

/// The two operations the relay needs from the underlying transport
pub trait Transport {
    /// Whether a frame sent now could still reach the client
    fn is_open(&self, connection: ConnectionId) -> bool;

    /// Queue a text frame for the connection
    fn send(&self, connection: ConnectionId, payload: &str) -> RelayResult<()>;
}

/// Targets that are still open, in the order given
///
/// Duplicates are kept: a connection listed twice receives the payload twice.
pub fn deliverable<F>(targets: &[ConnectionId], is_open: F) -> Vec<ConnectionId>
where
    F: Fn(ConnectionId) -> bool,
{
    targets.iter().copied().filter(|c| is_open(*c)).collect()
}

/// Send `payload` to every open connection in `targets`
///
/// Closed connections are skipped. A send that fails anyway is logged and
/// does not stop delivery to the rest.
pub fn broadcast<T: Transport + ?Sized>(transport: &T, targets: &[ConnectionId], payload: &str) {
    for connection in deliverable(targets, |c| transport.is_open(c)) {
        if let Err(e) = transport.send(connection, payload) {
            tracing::debug!(connection_id = %connection, error = %e, "Dropped frame for peer");
        }
    }
}
