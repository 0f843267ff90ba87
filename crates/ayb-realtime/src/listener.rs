//! The background task that holds a dedicated connection with `LISTEN
//! ayb_changes` active and feeds parsed events to the [`crate::Hub`].
//!
//! Unlike the request-serving pool, this connection is never recycled — a
//! session's `LISTEN` registration only lives as long as the connection does.

use crate::event::ChangeEvent;
use crate::hub::Hub;
use ayb_error::{AybError, Result};
use futures::future::poll_fn;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_postgres::{AsyncMessage, NoTls};

const CHANNEL: &str = "ayb_changes";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Runs until `shutdown` signals true, reconnecting with a fixed delay if
/// the listener connection drops.
pub async fn run_listener(connection_string: String, hub: Arc<Hub>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        match listen_once(&connection_string, &hub, &mut shutdown).await {
            Ok(()) => return, // shutdown requested mid-listen
            Err(err) => {
                tracing::warn!(error = %err, "realtime listener connection lost, reconnecting");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn listen_once(connection_string: &str, hub: &Arc<Hub>, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
    let (client, mut connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    client
        .batch_execute(&format!("LISTEN {CHANNEL}"))
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    loop {
        tokio::select! {
            msg = poll_fn(|cx| connection.poll_message(cx)) => {
                match msg {
                    Some(Ok(AsyncMessage::Notification(notification))) => {
                        handle_payload(hub, notification.payload()).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        return Err(AybError::internal(err));
                    }
                    None => {
                        return Err(AybError::Internal(Box::new(std::io::Error::other(
                            "realtime listener connection closed",
                        ))));
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_payload(hub: &Arc<Hub>, payload: &str) {
    match serde_json::from_str::<ChangeEvent>(payload) {
        Ok(event) => {
            if let Err(err) = hub.dispatch(event).await {
                tracing::warn!(error = %err, "failed to dispatch change event");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, payload, "malformed ayb_changes payload, dropping");
        }
    }
}
