use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::store::{StoreError, TaskStore};
use crate::task::{Address, Task, TaskId, normalize_records};
use crate::view::{self, FilterKind, SortDir, SortKey, ViewState};

/// A user-facing notification. The action layer is the only place that
/// turns failures into these; no failure here is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The signing identity declined to authorize the transaction.
    Cancelled(String),
    /// The store refused the call; carries the reason verbatim.
    Rejected(String),
    /// Caught locally before any store call was attempted.
    Precondition(String),
    /// Connectivity or anything else; carries the raw error text.
    Failure(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Self::Cancelled(msg) | Self::Rejected(msg) | Self::Precondition(msg) | Self::Failure(msg) => msg,
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

fn classify(err: StoreError, verb: &str) -> Notice {
    match err {
        StoreError::Cancelled => Notice::Cancelled(format!("{verb} cancelled by user.")),
        StoreError::Rejected(reason) => Notice::Rejected(reason),
        StoreError::Other(message) => Notice::Failure(message),
    }
}

/// Session state for one connected identity: the read-replica task
/// cache, the current view state, and the pending input buffer.
///
/// The cache is rebuilt wholesale by `refresh` and mutated nowhere
/// else; every other method reads it or requests a refresh.
pub struct Session {
    store: Option<Arc<dyn TaskStore>>,
    identity: Option<Address>,
    tasks: Vec<Task>,
    view: ViewState,
    input: String,
    page_size: usize,
    max_tasks: usize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("cached", &self.tasks.len())
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(page_size: usize, max_tasks: usize) -> Self {
        Self {
            store: None,
            identity: None,
            tasks: Vec::new(),
            view: ViewState::default(),
            input: String::new(),
            page_size: page_size.max(1),
            max_tasks: max_tasks.max(1),
        }
    }

    /// Binds a store handle and identity. The caller follows up with a
    /// `refresh`; connecting alone does not touch the cache.
    pub fn connect(&mut self, store: Arc<dyn TaskStore>, identity: Address) {
        info!(identity = %identity, "session connected");
        self.store = Some(store);
        self.identity = Some(identity);
    }

    /// Drops the store handle and identity. The cache is deliberately
    /// retained; the next successful refresh replaces it.
    pub fn disconnect(&mut self) {
        info!("session disconnected");
        self.store = None;
        self.identity = None;
    }

    pub fn identity(&self) -> Option<&Address> {
        self.identity.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn TaskStore>> {
        self.store.as_ref()
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Fetch/Normalize: pulls the listing for the connected identity,
    /// drops soft-deleted records, and replaces the cache in full. A
    /// missing identity or store handle makes this a no-op. Failures
    /// propagate untranslated and leave the cache untouched.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&mut self, keep_page: bool) -> Result<(), StoreError> {
        let (Some(store), Some(identity)) = (self.store.clone(), self.identity.clone()) else {
            debug!("no store or identity bound; refresh skipped");
            return Ok(());
        };

        let records = store.get_my_tasks(&identity).await?;
        self.tasks = normalize_records(records);
        if !keep_page {
            self.view.page = 1;
        }
        debug!(count = self.tasks.len(), keep_page, "cache replaced");
        Ok(())
    }

    // --- View intents. User-initiated changes reset to page 1; only
    // --- background resyncs preserve the page (via refresh).

    pub fn set_filter(&mut self, filter: FilterKind) {
        self.view.filter = filter;
        self.view.page = 1;
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.view.search = search.into();
        self.view.page = 1;
    }

    pub fn set_sort(&mut self, key: SortKey, dir: SortDir) {
        self.view.sort_key = key;
        self.view.sort_dir = dir;
        self.view.page = 1;
    }

    pub fn set_page(&mut self, page: usize) {
        self.view.page = page.max(1);
    }

    /// The filtered/sorted sequence for the current view.
    pub fn visible(&self) -> Vec<Task> {
        view::apply(&self.tasks, &self.view, self.identity.as_ref())
    }

    /// The current page's slice of `visible()`.
    pub fn page_items(&self) -> Vec<Task> {
        let visible = self.visible();
        view::page_slice(&visible, self.view.page, self.page_size).to_vec()
    }

    pub fn total_pages(&self) -> usize {
        view::total_pages(self.visible().len(), self.page_size)
    }

    /// Looks up a cached task by unique id prefix.
    pub fn resolve_id(&self, prefix: &str) -> Option<TaskId> {
        let mut matches = self
            .tasks
            .iter()
            .filter(|t| t.id.as_str().starts_with(prefix))
            .map(|t| t.id.clone());
        let first = matches.next()?;
        if matches.next().is_some() { None } else { Some(first) }
    }

    fn bound(&self) -> Result<(Arc<dyn TaskStore>, Address), Notice> {
        match (self.store.clone(), self.identity.clone()) {
            (Some(store), Some(identity)) => Ok((store, identity)),
            _ => Err(Notice::Precondition(
                "No task store connection.".to_string(),
            )),
        }
    }

    async fn refresh_after_action(&mut self) -> Result<(), Notice> {
        // Page and filter are preserved across action-triggered reloads.
        self.refresh(true)
            .await
            .map_err(|err| classify(err, "Task refresh"))
    }

    // --- Action layer. Each operation awaits the mutating call to
    // --- confirmation, then re-fetches; each failed attempt surfaces
    // --- exactly one notice.

    #[tracing::instrument(skip(self, content))]
    pub async fn add(&mut self, content: &str, private: bool) -> Result<(), Notice> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(Notice::Precondition(
                "Task content cannot be empty.".to_string(),
            ));
        }

        let (store, identity) = self.bound()?;

        // Per-identity cap, checked against the cached listing the
        // same way the store would count it.
        let owned = self.tasks.iter().filter(|t| t.owner == identity).count();
        if owned >= self.max_tasks {
            warn!(owned, cap = self.max_tasks, "add short-circuited locally");
            return Err(Notice::Precondition(format!(
                "You can only have up to {} tasks. Please delete a task before adding a new one.",
                self.max_tasks
            )));
        }

        let id = TaskId::fresh();
        store
            .create_task(&identity, &id, trimmed, private)
            .await
            .map_err(|err| classify(err, "Task creation"))?;

        self.input.clear();
        self.refresh_after_action().await
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub async fn delete(&mut self, id: &TaskId) -> Result<(), Notice> {
        // Defensive local check; the cache holds no soft-deleted
        // records, so absence covers both "gone" and "never existed".
        // The store re-checks authoritatively.
        if !self.tasks.iter().any(|t| t.id == *id) {
            warn!(id = %id, "delete short-circuited locally");
            return Err(Notice::Precondition(
                "Task already deleted or does not exist.".to_string(),
            ));
        }

        let (store, identity) = self.bound()?;
        store
            .delete_task(&identity, id)
            .await
            .map_err(|err| classify(err, "Transaction"))?;

        self.refresh_after_action().await
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub async fn toggle_completed(&mut self, id: &TaskId) -> Result<(), Notice> {
        if !self.tasks.iter().any(|t| t.id == *id) {
            warn!(id = %id, "toggle short-circuited locally");
            return Err(Notice::Precondition(
                "Task already deleted or does not exist.".to_string(),
            ));
        }

        let (store, identity) = self.bound()?;
        store
            .toggle_completed(&identity, id)
            .await
            .map_err(|err| classify(err, "Transaction"))?;

        self.refresh_after_action().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear_completed(&mut self) -> Result<(), Notice> {
        let (store, identity) = self.bound()?;

        let owned_completed = self
            .tasks
            .iter()
            .filter(|t| t.completed && t.owner == identity)
            .count();
        if owned_completed == 0 {
            warn!("clear short-circuited locally");
            return Err(Notice::Precondition(
                "No completed tasks you own to clear.".to_string(),
            ));
        }

        store
            .clear_completed_tasks(&identity)
            .await
            .map_err(|err| classify(err, "Transaction"))?;

        self.refresh_after_action().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::{Notice, Session};
    use crate::datastore::LocalStore;
    use crate::store::{StoreError, StoreOrigin, TaskEvent, TaskStore};
    use crate::task::{Address, Task, TaskId};
    use crate::view::FilterKind;

    fn me() -> Address {
        Address::new("0xMe")
    }

    /// Counts mutating calls so tests can assert local short-circuits
    /// reached the store zero times.
    struct CountingStore {
        inner: LocalStore,
        mutations: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: LocalStore::in_memory(100),
                mutations: AtomicUsize::new(0),
            }
        }

        fn mutation_count(&self) -> usize {
            self.mutations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskStore for CountingStore {
        fn origin(&self) -> StoreOrigin {
            self.inner.origin()
        }

        fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
            self.inner.subscribe()
        }

        async fn create_task(
            &self,
            signer: &Address,
            id: &TaskId,
            content: &str,
            private: bool,
        ) -> Result<(), StoreError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.inner.create_task(signer, id, content, private).await
        }

        async fn delete_task(&self, signer: &Address, id: &TaskId) -> Result<(), StoreError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_task(signer, id).await
        }

        async fn toggle_completed(&self, signer: &Address, id: &TaskId) -> Result<(), StoreError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.inner.toggle_completed(signer, id).await
        }

        async fn clear_completed_tasks(&self, signer: &Address) -> Result<(), StoreError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.inner.clear_completed_tasks(signer).await
        }

        async fn get_my_tasks(&self, caller: &Address) -> Result<Vec<Task>, StoreError> {
            self.inner.get_my_tasks(caller).await
        }
    }

    /// Fails every call with a fixed error; for classification tests.
    struct FailingStore {
        origin: StoreOrigin,
        error: StoreError,
        events: broadcast::Sender<TaskEvent>,
    }

    impl FailingStore {
        fn new(error: StoreError) -> Self {
            let (events, _) = broadcast::channel(4);
            Self {
                origin: StoreOrigin::fresh(),
                error,
                events,
            }
        }
    }

    #[async_trait]
    impl TaskStore for FailingStore {
        fn origin(&self) -> StoreOrigin {
            self.origin
        }

        fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
            self.events.subscribe()
        }

        async fn create_task(
            &self,
            _signer: &Address,
            _id: &TaskId,
            _content: &str,
            _private: bool,
        ) -> Result<(), StoreError> {
            Err(self.error.clone())
        }

        async fn delete_task(&self, _signer: &Address, _id: &TaskId) -> Result<(), StoreError> {
            Err(self.error.clone())
        }

        async fn toggle_completed(&self, _signer: &Address, _id: &TaskId) -> Result<(), StoreError> {
            Err(self.error.clone())
        }

        async fn clear_completed_tasks(&self, _signer: &Address) -> Result<(), StoreError> {
            Err(self.error.clone())
        }

        async fn get_my_tasks(&self, _caller: &Address) -> Result<Vec<Task>, StoreError> {
            Err(self.error.clone())
        }
    }

    async fn connected_session(store: Arc<dyn TaskStore>) -> Session {
        // Cap well above what any test adds.
        let mut session = Session::new(8, 64);
        session.connect(store, me());
        session.refresh(false).await.expect("initial refresh");
        session
    }

    #[tokio::test]
    async fn refresh_without_connection_is_a_noop() {
        let mut session = Session::new(8, 8);
        session.refresh(false).await.expect("noop refresh");
        assert!(session.visible().is_empty());
    }

    #[tokio::test]
    async fn add_trims_content_and_clears_the_input_buffer() {
        let store = Arc::new(CountingStore::new());
        let mut session = connected_session(store.clone()).await;

        session.set_input("  Buy milk  ");
        session.add("  Buy milk  ", false).await.expect("add");

        assert!(session.input().is_empty());
        let visible = session.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].content, "Buy milk");
    }

    #[tokio::test]
    async fn empty_content_is_rejected_before_any_store_call() {
        let store = Arc::new(CountingStore::new());
        let mut session = connected_session(store.clone()).await;

        let err = session.add("   ", false).await.expect_err("whitespace only");
        assert!(matches!(err, Notice::Precondition(_)));
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn a_full_task_list_rejects_adds_before_any_store_call() {
        let store = Arc::new(CountingStore::new());
        let mut session = Session::new(8, 2);
        session.connect(store.clone(), me());
        session.refresh(false).await.expect("initial refresh");

        session.add("Buy milk", false).await.expect("add");
        session.add("Walk dog", true).await.expect("add");
        let before = store.mutation_count();

        let err = session.add("One too many", false).await.expect_err("at cap");
        assert_eq!(
            err,
            Notice::Precondition(
                "You can only have up to 2 tasks. Please delete a task before adding a new one."
                    .to_string()
            )
        );
        assert_eq!(store.mutation_count(), before);

        // Someone else's public tasks do not count against my cap.
        let theirs = TaskId::fresh();
        store
            .inner
            .create_task(&Address::new("0xOther"), &theirs, "Not mine", false)
            .await
            .expect("their task");
        session.refresh(true).await.expect("refresh");
        assert!(matches!(
            session.add("Still capped", false).await,
            Err(Notice::Precondition(_))
        ));

        // Deleting one of mine frees a slot.
        let mine = session
            .visible()
            .into_iter()
            .find(|t| t.content == "Buy milk")
            .expect("buy milk");
        session.delete(&mine.id).await.expect("delete");
        session.add("Fits again", false).await.expect("add after delete");
    }

    #[tokio::test]
    async fn second_delete_is_a_local_noop() {
        let store = Arc::new(CountingStore::new());
        let mut session = connected_session(store.clone()).await;

        session.add("Buy milk", false).await.expect("add");
        let id = session.visible()[0].id.clone();

        session.delete(&id).await.expect("first delete");
        let calls_after_first = store.mutation_count();

        let err = session.delete(&id).await.expect_err("second delete");
        assert_eq!(
            err,
            Notice::Precondition("Task already deleted or does not exist.".to_string())
        );
        assert_eq!(store.mutation_count(), calls_after_first);
    }

    #[tokio::test]
    async fn toggle_of_unknown_id_is_a_local_noop() {
        let store = Arc::new(CountingStore::new());
        let mut session = connected_session(store.clone()).await;

        let err = session
            .toggle_completed(&TaskId::new("missing"))
            .await
            .expect_err("unknown id");
        assert!(matches!(err, Notice::Precondition(_)));
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn clear_without_owned_completed_tasks_short_circuits() {
        let store = Arc::new(CountingStore::new());

        // Someone else's completed task must not count as clearable.
        let theirs = TaskId::fresh();
        store
            .inner
            .create_task(&Address::new("0xOther"), &theirs, "Walk dog", false)
            .await
            .expect("their task");
        store
            .inner
            .toggle_completed(&Address::new("0xOther"), &theirs)
            .await
            .expect("their toggle");

        let mut session = connected_session(store.clone()).await;
        let before = store.mutation_count();

        let err = session.clear_completed().await.expect_err("nothing to clear");
        assert_eq!(
            err,
            Notice::Precondition("No completed tasks you own to clear.".to_string())
        );
        assert_eq!(store.mutation_count(), before);
    }

    #[tokio::test]
    async fn stale_local_cache_still_defers_to_the_store() {
        // The local pre-check and the authoritative store check can
        // disagree: here the cache says the task exists but the store
        // already dropped it.
        let store = Arc::new(CountingStore::new());
        let mut session = connected_session(store.clone()).await;

        session.add("Buy milk", false).await.expect("add");
        let id = session.visible()[0].id.clone();

        // Delete behind the session's back; its cache is now stale.
        store
            .inner
            .delete_task(&me(), &id)
            .await
            .expect("out-of-band delete");

        let err = session.delete(&id).await.expect_err("store rejects");
        assert_eq!(err, Notice::Rejected("Task already deleted".to_string()));
    }

    #[tokio::test]
    async fn cancelled_and_unknown_failures_classify_distinctly() {
        // FailingStore also fails get_my_tasks; connect without refresh.
        let mut session = Session::new(8, 8);
        session.connect(Arc::new(FailingStore::new(StoreError::Cancelled)), me());
        let err = session.add("Buy milk", false).await.expect_err("cancelled");
        assert_eq!(
            err,
            Notice::Cancelled("Task creation cancelled by user.".to_string())
        );

        let mut session = Session::new(8, 8);
        session.connect(
            Arc::new(FailingStore::new(StoreError::Other("connection reset".to_string()))),
            me(),
        );
        let err = session.add("Buy milk", false).await.expect_err("unknown");
        assert_eq!(err, Notice::Failure("connection reset".to_string()));
    }

    #[tokio::test]
    async fn view_changes_reset_the_page_but_resync_keeps_it() {
        let store = Arc::new(CountingStore::new());
        let mut session = connected_session(store.clone()).await;

        for n in 0..20 {
            session.add(&format!("Task {n}"), false).await.expect("add");
        }

        session.set_page(3);
        assert_eq!(session.view().page, 3);

        // Background resync preserves the page.
        session.refresh(true).await.expect("resync refresh");
        assert_eq!(session.view().page, 3);

        // A user-initiated filter change does not.
        session.set_filter(FilterKind::Pending);
        assert_eq!(session.view().page, 1);

        session.set_page(2);
        session.set_search("task");
        assert_eq!(session.view().page, 1);
    }

    #[tokio::test]
    async fn page_items_and_total_pages_agree_with_the_pipeline() {
        let store = Arc::new(CountingStore::new());
        let mut session = connected_session(store.clone()).await;

        for n in 0..10 {
            session.add(&format!("Task {n}"), false).await.expect("add");
        }

        assert_eq!(session.total_pages(), 2);
        assert_eq!(session.page_items().len(), 8);
        session.set_page(2);
        assert_eq!(session.page_items().len(), 2);
        session.set_page(5);
        assert!(session.page_items().is_empty());
    }

    #[tokio::test]
    async fn refresh_failure_leaves_the_cache_untouched() {
        let store = Arc::new(CountingStore::new());
        let mut session = connected_session(store.clone()).await;
        session.add("Buy milk", false).await.expect("add");
        assert_eq!(session.visible().len(), 1);

        // Swap to a failing handle; the cache is a stale but intact replica.
        session.connect(
            Arc::new(FailingStore::new(StoreError::Other("gone".to_string()))),
            me(),
        );
        let err = session.refresh(false).await.expect_err("failing refresh");
        assert_eq!(err, StoreError::Other("gone".to_string()));
        assert_eq!(session.visible().len(), 1);
    }
}
