use std::sync::{Arc, Weak};
use std::time::Duration;

use lapin::{Channel, ConnectionProperties};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::messaging::error::BrokerError;
use crate::metrics::Metrics;

// ============================================================================
// Connection - One Long-Lived AMQP Connection
// ============================================================================
//
// At most one live handle at a time, guarded by a mutex so that dialing and
// channel creation never race. Each successful `connect` starts one
// supervisor task. When the broker drops the connection the supervisor
// clears the handle and redials every `retry_delay` until it succeeds or
// the token is cancelled, then goes back to watching the new connection.
// Channels are opened on demand by callers, who simply get `Disconnected`
// in between.
//
// ============================================================================

const HEARTBEAT_SECS: u16 = 10;

pub struct Connection {
    url: String,
    retry_delay: Duration,
    handle: Mutex<Option<Arc<lapin::Connection>>>,
    forced: Arc<Notify>,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
}

/// The connection a supervisor is responsible for, and its error feed.
struct Watched {
    conn: Weak<lapin::Connection>,
    errors: mpsc::UnboundedReceiver<lapin::Error>,
}

impl Connection {
    pub fn new(
        url: &str,
        retry_delay: Duration,
        cancel: CancellationToken,
        metrics: Option<Arc<Metrics>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            url: with_heartbeat(url),
            retry_delay,
            handle: Mutex::new(None),
            forced: Arc::new(Notify::new()),
            cancel,
            metrics,
        })
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Dials unless a live handle exists. Starts a supervisor on success.
    pub async fn connect(self: &Arc<Self>) -> Result<(), BrokerError> {
        if let Some(watched) = self.dial().await? {
            tokio::spawn(supervise(Arc::downgrade(self), watched));
            tracing::info!("🐇 Connected to RabbitMQ");
        }
        Ok(())
    }

    /// Replaces a missing or dead handle. `None` when a live one exists.
    async fn dial(&self) -> Result<Option<Watched>, BrokerError> {
        let mut handle = self.handle.lock().await;

        if let Some(conn) = handle.as_ref() {
            if conn.status().connected() {
                tracing::debug!("RabbitMQ connection already established");
                return Ok(None);
            }
        }

        let conn = lapin::Connection::connect(&self.url, ConnectionProperties::default()).await?;

        let (errors_tx, errors) = mpsc::unbounded_channel();
        conn.on_error(move |err| {
            let _ = errors_tx.send(err);
        });

        let conn = Arc::new(conn);
        let watched = Watched {
            conn: Arc::downgrade(&conn),
            errors,
        };
        *handle = Some(conn);

        Ok(Some(watched))
    }

    /// Opens a fresh channel on the live connection.
    pub async fn channel(&self) -> Result<Channel, BrokerError> {
        let handle = self.handle.lock().await;

        match handle.as_ref() {
            Some(conn) if conn.status().connected() => Ok(conn.create_channel().await?),
            _ => Err(BrokerError::Disconnected),
        }
    }

    pub async fn is_connected(&self) -> bool {
        let handle = self.handle.lock().await;
        handle.as_ref().is_some_and(|conn| conn.status().connected())
    }

    /// Drops the live connection and has the supervisor redial, as if the
    /// broker had closed it.
    pub async fn force_reconnect(&self) {
        let dropped = self.handle.lock().await.take();
        self.forced.notify_one();

        if let Some(conn) = dropped {
            if let Err(e) = conn.close(320, "Connection forced").await {
                tracing::warn!(error = %e, "Error closing RabbitMQ connection");
            }
        }
    }

    pub async fn close(&self) {
        let Some(conn) = self.handle.lock().await.take() else {
            return;
        };

        if let Err(e) = conn.close(200, "Normal shutdown").await {
            tracing::warn!(error = %e, "Error closing RabbitMQ connection");
        }

        tracing::info!("RabbitMQ connection closed");
    }

    async fn redial(&self) -> Option<Watched> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }

            match self.dial().await {
                Ok(Some(watched)) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_reconnect();
                    }
                    tracing::info!("Reconnected to RabbitMQ");
                    return Some(watched);
                }
                // Someone else reconnected first; their supervisor owns it.
                Ok(None) => return None,
                Err(e) => tracing::warn!(error = %e, "Failed to reconnect to RabbitMQ"),
            }
        }
    }
}

enum Loss {
    Error(lapin::Error),
    Forced,
}

/// Watches one connection at a time and redials after it is lost. Only
/// holds a weak reference while waiting, so dropping the `Connection`
/// ends it.
async fn supervise(connection: Weak<Connection>, mut watched: Watched) {
    loop {
        let Some((cancel, forced)) = connection
            .upgrade()
            .map(|c| (c.cancel.clone(), c.forced.clone()))
        else {
            return;
        };

        // Forced comes before errors: closing the handle may also end the feed.
        let loss = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = forced.notified() => Loss::Forced,
            err = watched.errors.recv() => match err {
                Some(err) => Loss::Error(err),
                // Connection dropped without error
                None => return,
            },
        };

        let Some(current) = connection.upgrade() else {
            return;
        };

        let still_watched = {
            let mut handle = current.handle.lock().await;
            match handle.as_ref().map(|conn| is_watched(conn, &watched)) {
                Some(true) => {
                    if matches!(loss, Loss::Error(_)) {
                        handle.take();
                    }
                    true
                }
                // A newer connection has already replaced the one we watched.
                Some(false) => return,
                None => false,
            }
        };

        match loss {
            // Stale wakeup, the watched connection is still in place.
            Loss::Forced if still_watched => continue,
            Loss::Forced => tracing::warn!("RabbitMQ connection dropped, reconnecting"),
            Loss::Error(err) => tracing::warn!(error = %err, "RabbitMQ connection lost"),
        }

        match current.redial().await {
            Some(next) => watched = next,
            None => return,
        }
    }
}

fn is_watched(conn: &Arc<lapin::Connection>, watched: &Watched) -> bool {
    std::ptr::eq(Arc::as_ptr(conn), watched.conn.as_ptr())
}

/// Asks for a heartbeat unless the URL already picks one.
fn with_heartbeat(url: &str) -> String {
    if url.contains("heartbeat=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&heartbeat={HEARTBEAT_SECS}")
    } else {
        format!("{url}?heartbeat={HEARTBEAT_SECS}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_is_added_once() {
        assert_eq!(
            with_heartbeat("amqp://localhost:5672/%2f"),
            "amqp://localhost:5672/%2f?heartbeat=10"
        );
        assert_eq!(
            with_heartbeat("amqp://localhost/%2f?frame_max=8192"),
            "amqp://localhost/%2f?frame_max=8192&heartbeat=10"
        );
        assert_eq!(
            with_heartbeat("amqp://localhost/%2f?heartbeat=30"),
            "amqp://localhost/%2f?heartbeat=30"
        );
    }

    #[tokio::test]
    async fn test_channel_before_connect_is_disconnected() {
        let connection = Connection::new(
            "amqp://localhost:5672/%2f",
            Duration::from_millis(10),
            CancellationToken::new(),
            None,
        );

        assert!(matches!(
            connection.channel().await,
            Err(BrokerError::Disconnected)
        ));
        assert!(!connection.is_connected().await);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_connect_and_supervisor_futures_are_send() {
        let connection = Connection::new(
            "amqp://localhost:5672/%2f",
            Duration::from_millis(10),
            CancellationToken::new(),
            None,
        );
        let (_errors_tx, errors) = mpsc::unbounded_channel();

        assert_send(&connection.connect());
        assert_send(&supervise(
            Arc::downgrade(&connection),
            Watched {
                conn: Weak::new(),
                errors,
            },
        ));
    }

    #[tokio::test]
    async fn test_supervisor_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let connection = Connection::new(
            "amqp://localhost:5672/%2f",
            Duration::from_millis(10),
            cancel.clone(),
            None,
        );
        let (_errors_tx, errors) = mpsc::unbounded_channel();

        let task = tokio::spawn(supervise(
            Arc::downgrade(&connection),
            Watched {
                conn: Weak::new(),
                errors,
            },
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_stops_when_error_feed_ends() {
        let connection = Connection::new(
            "amqp://localhost:5672/%2f",
            Duration::from_millis(10),
            CancellationToken::new(),
            None,
        );
        let (errors_tx, errors) = mpsc::unbounded_channel();

        let task = tokio::spawn(supervise(
            Arc::downgrade(&connection),
            Watched {
                conn: Weak::new(),
                errors,
            },
        ));

        drop(errors_tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
