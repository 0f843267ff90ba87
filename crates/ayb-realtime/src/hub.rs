//! The realtime hub: holds every active subscription and fans out change
//! events to the ones watching the affected table.

use crate::event::{Action, ChangeEvent, OutboundEvent};
use crate::subscription::{PushOutcome, Subscription};
use crate::visibility::probe_visibility;
use ayb_error::Result;
use ayb_schema::SchemaCache;
use deadpool_postgres::Pool;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct Hub {
    pool: Pool,
    schema_cache: Arc<SchemaCache>,
    /// `role` RLS policies are written against for authenticated visibility
    /// probes — matches the role the REST handlers run under.
    role: String,
    subscriptions: Mutex<HashMap<String, HashMap<Uuid, Arc<Subscription>>>>,
}

impl Hub {
    #[must_use]
    pub fn new(pool: Pool, schema_cache: Arc<SchemaCache>, role: impl Into<String>) -> Self {
        Self {
            pool,
            schema_cache,
            role: role.into(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, subscription: Arc<Subscription>) {
        self.subscriptions
            .lock()
            .entry(subscription.table_key.clone())
            .or_default()
            .insert(subscription.id, subscription);
    }

    pub fn remove(&self, table_key: &str, id: Uuid) {
        let mut subs = self.subscriptions.lock();
        if let Some(bucket) = subs.get_mut(table_key) {
            bucket.remove(&id);
            if bucket.is_empty() {
                subs.remove(table_key);
            }
        }
    }

    /// Forward `event` to every subscription on its table. `delete` events
    /// bypass the visibility probe (the row is gone); `insert`/`update`
    /// events are probed individually under each subscriber's claims.
    pub async fn dispatch(&self, event: ChangeEvent) -> Result<()> {
        let table_key = event.table_key();
        let targets: Vec<Arc<Subscription>> = {
            let subs = self.subscriptions.lock();
            match subs.get(&table_key) {
                Some(bucket) => bucket.values().cloned().collect(),
                None => return Ok(()),
            }
        };
        if targets.is_empty() {
            return Ok(());
        }

        let Some(snapshot) = self.schema_cache.get() else {
            tracing::warn!("dropping change event, schema cache not ready");
            return Ok(());
        };
        let Some(table) = snapshot.table(&event.schema, &event.table) else {
            return Ok(());
        };

        let mut to_terminate = Vec::new();

        for sub in &targets {
            let visible = match event.action {
                Action::Delete => true,
                Action::Insert | Action::Update => {
                    probe_visibility(&self.pool, &sub.claims, &self.role, table, &event.pk, sub.filter.as_ref())
                        .await
                        .unwrap_or(false)
                }
            };
            if !visible {
                continue;
            }

            let data = event.new_row.clone().unwrap_or_else(|| serde_json::json!({ "pk": event.pk }));
            match sub.push(OutboundEvent { action: event.action, data }) {
                PushOutcome::Delivered | PushOutcome::Dropped => {}
                PushOutcome::Terminate => to_terminate.push(sub.id),
            }
        }

        for id in to_terminate {
            self.remove(&table_key, id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_key_matches_schema_dot_table() {
        let event = ChangeEvent {
            schema: "public".into(),
            table: "posts".into(),
            action: Action::Insert,
            pk: vec![serde_json::json!(1)],
            new_row: None,
        };
        assert_eq!(event.table_key(), "public.posts");
    }
}
