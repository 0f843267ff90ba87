//! `GET /realtime` — subscribes to one or more collections over SSE.
//!
//! Each `tables` entry becomes its own [`Subscription`] registered with the
//! shared [`Hub`]; their receivers are merged into a single event stream for
//! the life of the connection and torn down together on disconnect.

use crate::state::AppState;
use ayb_auth::Claims;
use ayb_error::{AybError, Result};
use ayb_realtime::{Hub, Subscription};
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Extension;
use futures::stream::{self, Stream, StreamExt};
use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// Bounded so one slow subscriber can't grow memory unboundedly; past this
/// the subscription is torn down per [`ayb_realtime::subscription::DEFAULT_BACKPRESSURE_CUTOFF`].
const SUBSCRIPTION_QUEUE_CAPACITY: usize = 64;

struct SubscriptionGuard {
    hub: Arc<Hub>,
    table_key: String,
    id: Uuid,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.remove(&self.table_key, self.id);
    }
}

/// `GET /realtime?tables=posts,comments&filter=...`
pub async fn stream(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let snapshot = state.schema_cache.get().ok_or(AybError::SchemaNotReady)?;

    let tables: Vec<String> = query
        .get("tables")
        .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    if tables.is_empty() {
        return Err(AybError::Validation("realtime subscriptions require at least one 'tables' entry".into()));
    }

    let filter_expr = match query.get("filter").map(String::as_str).filter(|s| !s.is_empty()) {
        Some(raw) => Some(ayb_filter::parse(raw)?),
        None => None,
    };

    let mut receivers: Vec<ReceiverStream<ayb_realtime::OutboundEvent>> = Vec::new();
    let mut guards = Vec::new();

    for name in &tables {
        claims.check_table_scope(name)?;
        let table = snapshot
            .table_by_name(name)
            .ok_or_else(|| AybError::NotFound(format!("unknown collection '{name}'")))?;
        let table_key = format!("{}.{}", table.schema, table.name);

        let (subscription, receiver) =
            Subscription::new(table_key.clone(), filter_expr.clone(), claims.clone(), SUBSCRIPTION_QUEUE_CAPACITY);
        let subscription = Arc::new(subscription);
        let id = subscription.id;
        state.hub.add(subscription);

        guards.push(SubscriptionGuard {
            hub: state.hub.clone(),
            table_key,
            id,
        });
        receivers.push(ReceiverStream::new(receiver));
    }

    let merged: Pin<Box<dyn Stream<Item = ayb_realtime::OutboundEvent> + Send>> = Box::pin(stream::select_all(receivers));

    let events = stream::unfold((merged, guards), |(mut merged, guards)| async move {
        let event = merged.next().await?;
        let sse_event = Event::default().event(event.action.as_str()).json_data(&event.data).unwrap_or_else(|_| Event::default());
        Some((Ok(sse_event), (merged, guards)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
