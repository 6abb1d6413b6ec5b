//! Live queries
//!
//! A live query keeps a `(class, query, options)` result up to date. It is
//! evaluated once on registration and again whenever a committed
//! transaction touches a class the query covers; the callback only runs
//! when the result actually changed.
//!
//! Dispatch takes a query's callback out of the table for the duration of
//! the call, so a callback may unsubscribe itself (or anything else)
//! without deadlocking. Each query has a reentrant gate held around its
//! callback; [`QueryHandle::unsubscribe`] closes the gate, so once it
//! returns the callback is not running and never runs again.

use crate::client::Client;
use doctx_core::{Class, FindOptions, FindResult, Query, Ref, Result, Storage, Tx};
use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Receives the current result of a live query
pub type QueryCallback = Box<dyn FnMut(&FindResult) + Send>;

/// Open until unsubscribed; held while the callback runs
type Gate = Arc<ReentrantMutex<Cell<bool>>>;

struct Entry {
    class: Ref<Class>,
    query: Query,
    options: FindOptions,
    callback: Option<QueryCallback>,
    last: FindResult,
    gate: Gate,
}

#[derive(Default)]
struct Table {
    entries: Mutex<FxHashMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl Table {
    fn remove(&self, id: u64) -> bool {
        self.entries.lock().remove(&id).is_some()
    }
}

/// Live queries over one client
pub struct LiveQuery {
    client: Arc<Client>,
    table: Arc<Table>,
}

impl std::fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("client", &self.client)
            .field("queries", &self.len())
            .finish()
    }
}

impl LiveQuery {
    /// Attach to `client`; notifications arrive whenever the client pumps
    pub fn new(client: Arc<Client>) -> Arc<Self> {
        let live = Arc::new(LiveQuery {
            client: Arc::clone(&client),
            table: Arc::new(Table::default()),
        });
        let weak: Weak<LiveQuery> = Arc::downgrade(&live);
        client.add_listener(Arc::new(move |tx: &Tx| {
            if let Some(live) = weak.upgrade() {
                live.notify(tx);
            }
        }));
        live
    }

    /// Client the queries run against
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Number of registered queries
    pub fn len(&self) -> usize {
        self.table.entries.lock().len()
    }

    /// True if no query is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a query; `callback` receives the initial result before this
    /// returns, then every changed result.
    pub fn query<F>(&self, class: Ref<Class>, query: Query, options: FindOptions, callback: F) -> Result<QueryHandle>
    where
        F: FnMut(&FindResult) + Send + 'static,
    {
        let mut callback: QueryCallback = Box::new(callback);
        let initial = self.client.find_all(&class, &query, &options)?;
        callback(&initial);

        let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
        let gate: Gate = Arc::new(ReentrantMutex::new(Cell::new(true)));
        self.table.entries.lock().insert(
            id,
            Entry {
                class: class.clone(),
                query,
                options,
                callback: Some(callback),
                last: initial,
                gate: Arc::clone(&gate),
            },
        );
        debug!(target: "doctx::live", id, class = %class, "query registered");
        Ok(QueryHandle {
            id,
            table: Arc::downgrade(&self.table),
            gate,
        })
    }

    fn affects(&self, tx: &Tx, class: &Ref<Class>) -> bool {
        self.client.with_hierarchy(|h| {
            tx.extract()
                .into_iter()
                .filter(|inner| !matches!(inner, Tx::ApplyIf(_)))
                .any(|inner| {
                    // classes the local model does not know yet count as changed
                    h.is_derived(inner.object_class(), class).unwrap_or(true)
                })
        })
    }

    /// Re-evaluate the queries `tx` may change and call back those whose
    /// result differs
    pub fn notify(&self, tx: &Tx) {
        let candidates: Vec<(u64, Ref<Class>, Query, FindOptions)> = {
            let entries = self.table.entries.lock();
            entries
                .iter()
                .map(|(id, e)| (*id, e.class.clone(), e.query.clone(), e.options.clone()))
                .collect()
        };

        for (id, class, query, options) in candidates {
            if !self.affects(tx, &class) {
                continue;
            }
            let result = match self.client.find_all(&class, &query, &options) {
                Ok(result) => result,
                Err(err) => {
                    warn!(target: "doctx::live", id, error = %err, "live query refresh failed");
                    continue;
                }
            };

            let (mut callback, gate) = {
                let mut entries = self.table.entries.lock();
                let Some(entry) = entries.get_mut(&id) else {
                    continue;
                };
                if entry.last == result {
                    continue;
                }
                entry.last = result.clone();
                let Some(callback) = entry.callback.take() else {
                    continue;
                };
                (callback, Arc::clone(&entry.gate))
            };

            {
                let open = gate.lock();
                if open.get() {
                    trace!(target: "doctx::live", id, tx = %tx.id(), docs = result.len(), "live query update");
                    callback(&result);
                }
            }

            // the entry may have been removed by the callback itself
            if let Some(entry) = self.table.entries.lock().get_mut(&id) {
                entry.callback = Some(callback);
            }
        }
    }
}

/// Registration of one live query; unsubscribes when dropped
#[derive(Debug)]
pub struct QueryHandle {
    id: u64,
    table: Weak<Table>,
    gate: Gate,
}

impl QueryHandle {
    /// True until [`QueryHandle::unsubscribe`]
    pub fn is_active(&self) -> bool {
        self.gate.lock().get()
    }

    /// Stop delivery and drop the registration. Safe to call repeatedly,
    /// including from inside the callback. Waits for a callback running on
    /// another thread to finish.
    pub fn unsubscribe(&self) {
        if !self.gate.lock().replace(false) {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            if table.remove(self.id) {
                debug!(target: "doctx::live", id = self.id, "query unsubscribed");
            }
        }
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctx_core::classes::CLASS_DOC;
    use doctx_core::{Attributes, Domain, TxFactory};
    use doctx_engine::{EngineConfig, WorkspaceBuilder};
    use serde_json::json;

    const TASK: Ref<Class> = Ref::from_static("test:class:Task");

    fn client() -> Arc<Client> {
        let workspace = WorkspaceBuilder::new(EngineConfig::in_memory())
            .with_model(|b| {
                b.create_class(TASK, CLASS_DOC, Some(Domain::new("task")));
            })
            .open()
            .unwrap();
        Arc::new(Client::connect(Arc::new(workspace), Ref::new("alice")).unwrap())
    }

    fn create(client: &Client, id: &str, done: bool) {
        let mut attrs = Attributes::new();
        attrs.insert("done".to_string(), json!(done));
        let tx = TxFactory::new(Ref::new("alice")).create_tx_create_doc(TASK, Ref::new("sp"), attrs, Some(Ref::new(id)));
        client.tx(tx).unwrap();
    }

    fn open_tasks(live: &LiveQuery, sizes: Arc<Mutex<Vec<usize>>>) -> QueryHandle {
        let mut query = Query::new();
        query.insert("done".to_string(), json!(false));
        live.query(TASK, query, FindOptions::default(), move |result| sizes.lock().push(result.len()))
            .unwrap()
    }

    #[test]
    fn test_initial_and_changed_results_are_delivered() {
        let client = client();
        let live = LiveQuery::new(Arc::clone(&client));
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let _handle = open_tasks(&live, Arc::clone(&sizes));

        create(&client, "t1", false);
        // unchanged result: no callback
        create(&client, "t2", true);
        create(&client, "t3", false);
        assert_eq!(*sizes.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_final() {
        let client = client();
        let live = LiveQuery::new(Arc::clone(&client));
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let handle = open_tasks(&live, Arc::clone(&sizes));
        assert_eq!(live.len(), 1);

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());
        assert!(live.is_empty());

        create(&client, "t1", false);
        assert_eq!(*sizes.lock(), vec![0]);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let client = client();
        let live = LiveQuery::new(Arc::clone(&client));
        let slot: Arc<Mutex<Option<QueryHandle>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let inner_slot = Arc::clone(&slot);
        let counter = Arc::clone(&calls);
        let handle = live
            .query(TASK, Query::new(), FindOptions::default(), move |result| {
                counter.fetch_add(1, Ordering::SeqCst);
                if !result.is_empty() {
                    if let Some(handle) = inner_slot.lock().as_ref() {
                        handle.unsubscribe();
                    }
                }
            })
            .unwrap();
        *slot.lock() = Some(handle);

        create(&client, "t1", false);
        create(&client, "t2", false);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(live.is_empty());
    }

    #[test]
    fn test_unsubscribe_waits_for_a_running_callback() {
        use std::sync::mpsc;
        use std::time::Duration;

        let client = client();
        let live = LiveQuery::new(Arc::clone(&client));
        let (started_tx, started_rx) = mpsc::channel();
        let finished = Arc::new(AtomicU64::new(0));

        let done = Arc::clone(&finished);
        let started_tx = Mutex::new(started_tx);
        let handle = live
            .query(TASK, Query::new(), FindOptions::default(), move |result| {
                if result.is_empty() {
                    return;
                }
                let _ = started_tx.lock().send(());
                std::thread::sleep(Duration::from_millis(100));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let writer = {
            let client = Arc::clone(&client);
            std::thread::spawn(move || create(&client, "t1", false))
        };
        started_rx.recv().unwrap();
        handle.unsubscribe();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        writer.join().unwrap();

        create(&client, "t2", false);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_the_handle_deregisters() {
        let client = client();
        let live = LiveQuery::new(Arc::clone(&client));
        {
            let _handle = open_tasks(&live, Arc::new(Mutex::new(Vec::new())));
            assert_eq!(live.len(), 1);
        }
        assert!(live.is_empty());
    }
}
