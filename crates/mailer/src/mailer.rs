//! One broadcast: recipients, content, pacing and the send loop.
//!
//! ```text
//! STOPPED   --start()-->                 STARTED
//! STARTED   --stop() / interrupted-->    STOPPED
//! STARTED   --all pending drained-->     COMPLETED
//! COMPLETED --add_recipients (new)-->    STOPPED
//! any       --destroy()-->               DESTROYED
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex as StdMutex, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    herald_common::{ChatSet, ChatState, Context, MailerId, MailerSettings, RecipientId},
    herald_storage::{MailerStore, update_record},
    serde::{Deserialize, Serialize},
    serde_json::json,
    tokio::sync::{Mutex, watch},
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, gauge, histogram, labels, mailer as mailer_metrics};

use crate::{
    Error, Result,
    content::ContentResolver,
    events::{EventHub, MailerEvent},
    placeholder::PlaceholderRenderer,
    task::TaskHandle,
    transport::{Transport, TransportError},
};

pub(crate) type Registry = RwLock<HashMap<MailerId, Mailer>>;

tokio::task_local! {
    /// The mailer whose send loop is running on the current task.
    static SEND_LOOP: Weak<Inner>;
}

/// Collaborators shared by every mailer of one pool.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Option<Arc<dyn MailerStore>>,
    pub(crate) hub: Option<EventHub>,
    pub(crate) renderer: Option<Arc<dyn PlaceholderRenderer>>,
    pub(crate) registry: Weak<Registry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MailerStatus {
    Stopped,
    Started,
    Completed,
    Destroyed,
}

impl fmt::Display for MailerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// How one run of the send loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every recipient was attempted.
    Completed,
    /// Stopped on request with recipients still pending.
    Stopped,
    /// Aborted by an error (storage, content resolution or a handler).
    Failed(String),
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailerStatistics {
    pub total: usize,
    pub pending: usize,
    pub success: usize,
    pub failed: usize,
    pub success_ratio: f64,
    pub failed_ratio: f64,
}

impl MailerStatistics {
    fn new(pending: usize, success: usize, failed: usize) -> Self {
        let total = pending + success + failed;
        let ratio = |n: usize| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64
            }
        };
        Self {
            total,
            pending,
            success,
            failed,
            success_ratio: ratio(success),
            failed_ratio: ratio(failed),
        }
    }
}

/// Recipient buckets plus the one recipient currently being delivered to,
/// which sits in no bucket.
struct Delivery {
    chats: ChatSet,
    in_flight: Option<RecipientId>,
}

impl Delivery {
    fn snapshot(&self) -> ChatSet {
        let mut chats = self.chats.clone();
        if let Some(id) = self.in_flight {
            chats.insert(id, ChatState::Pending);
        }
        chats
    }
}

enum Attempt {
    Delivered,
    Interrupted,
}

/// Everything needed to build a [`Mailer`].
pub(crate) struct MailerParts {
    pub(crate) id: MailerId,
    pub(crate) bot_id: i64,
    pub(crate) content: Arc<dyn ContentResolver>,
    pub(crate) chats: ChatSet,
    pub(crate) settings: MailerSettings,
    pub(crate) context: Context,
    pub(crate) status: MailerStatus,
    /// A record for this mailer exists in the pool's store.
    pub(crate) stored: bool,
}

struct Inner {
    id: MailerId,
    bot_id: i64,
    settings: MailerSettings,
    context: Context,
    content: Arc<dyn ContentResolver>,
    delivery: Mutex<Delivery>,
    status: watch::Sender<MailerStatus>,
    stop_signal: watch::Sender<bool>,
    control: Mutex<()>,
    task: TaskHandle<RunOutcome>,
    /// Outcome of the last finished run, cleared on start.
    last_outcome: StdMutex<Option<RunOutcome>>,
    stored: AtomicBool,
    shared: Arc<Shared>,
}

/// Cheaply cloneable handle to one broadcast.
#[derive(Clone)]
pub struct Mailer {
    inner: Arc<Inner>,
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailer")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Mailer {
    pub(crate) fn new(parts: MailerParts, shared: Arc<Shared>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: parts.id,
                bot_id: parts.bot_id,
                settings: parts.settings,
                context: parts.context,
                content: parts.content,
                delivery: Mutex::new(Delivery {
                    chats: parts.chats,
                    in_flight: None,
                }),
                status: watch::Sender::new(parts.status),
                stop_signal: watch::Sender::new(true),
                control: Mutex::new(()),
                task: TaskHandle::new(),
                last_outcome: StdMutex::new(None),
                stored: AtomicBool::new(parts.stored),
                shared,
            }),
        }
    }

    pub fn id(&self) -> MailerId {
        self.inner.id
    }

    pub fn bot_id(&self) -> i64 {
        self.inner.bot_id
    }

    pub fn settings(&self) -> &MailerSettings {
        &self.inner.settings
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn status(&self) -> MailerStatus {
        *self.inner.status.borrow()
    }

    /// Receiver notified on every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<MailerStatus> {
        self.inner.status.subscribe()
    }

    /// Whether a send loop task is alive (it may be finishing up).
    pub fn is_running(&self) -> bool {
        self.inner.task.is_running()
    }

    pub(crate) fn same_as(&self, other: &Mailer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn is_stored(&self) -> bool {
        self.inner.stored.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stored(&self) {
        self.inner.stored.store(true, Ordering::Release);
    }

    /// Forget the stored record without touching the store.
    pub(crate) fn mark_unstored(&self) {
        self.inner.stored.store(false, Ordering::Release);
    }

    /// Snapshot of the recipient buckets. A recipient being delivered to
    /// right now is reported as pending.
    pub async fn chats(&self) -> ChatSet {
        self.inner.delivery.lock().await.snapshot()
    }

    pub async fn statistics(&self) -> MailerStatistics {
        let delivery = self.inner.delivery.lock().await;
        let chats = &delivery.chats;
        MailerStatistics::new(
            chats.count(ChatState::Pending) + usize::from(delivery.in_flight.is_some()),
            chats.count(ChatState::Success),
            chats.count(ChatState::Failed),
        )
    }

    // ── Control ─────────────────────────────────────────────────────────────

    /// Launch the send loop in the background.
    pub async fn start(&self) -> Result<()> {
        let id = self.id();
        let _control = loop {
            let control = self.inner.control.lock().await;
            match self.status() {
                MailerStatus::Destroyed => return Err(Error::Destroyed { id }),
                MailerStatus::Started => return Err(Error::AlreadyStarted { id }),
                MailerStatus::Completed => return Err(Error::AlreadyCompleted { id }),
                MailerStatus::Stopped => {},
            }
            if !self.inner.task.is_running() {
                break control;
            }
            if self.in_own_loop() {
                return Err(Error::TaskAlreadyStarted);
            }
            // A previous run is still emitting its final events.
            drop(control);
            self.inner.task.idle().await;
        };

        self.inner.stop_signal.send_replace(false);
        self.inner.status.send_replace(MailerStatus::Started);
        *self
            .inner
            .last_outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;

        let mailer = self.clone();
        let run = SEND_LOOP.scope(Arc::downgrade(&self.inner), async move { mailer.run().await });
        if let Err(e) = self.inner.task.start(run) {
            self.inner.stop_signal.send_replace(true);
            self.inner.status.send_replace(MailerStatus::Stopped);
            return Err(e);
        }
        debug!(mailer_id = %id, "mailer start requested");
        Ok(())
    }

    /// Ask the send loop to stop and wait until it has exited.
    ///
    /// From an event handler of this mailer the call only signals: the loop
    /// stops once the handler returns.
    pub async fn stop(&self) -> Result<()> {
        {
            let _control = self.inner.control.lock().await;
            let id = self.id();
            match self.status() {
                MailerStatus::Destroyed => return Err(Error::Destroyed { id }),
                MailerStatus::Stopped => return Err(Error::AlreadyStopped { id }),
                MailerStatus::Completed => return Err(Error::AlreadyCompleted { id }),
                MailerStatus::Started => {},
            }

            info!(mailer_id = %id, "stopping mailer");
            self.inner.stop_signal.send_replace(true);
        }

        if !self.in_own_loop() {
            self.wait_loop_exit().await;
        }
        Ok(())
    }

    /// Wait for the send loop and return how it ended. A run that already
    /// finished reports its outcome until the next start.
    pub async fn wait(&self) -> Result<RunOutcome> {
        if self.status() == MailerStatus::Destroyed {
            return Err(Error::Destroyed { id: self.id() });
        }
        match self.inner.task.wait().await {
            Err(Error::NoTask) => self
                .inner
                .last_outcome
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .ok_or(Error::NoTask),
            other => other,
        }
    }

    /// Stop the mailer if needed, delete its stored record and unregister it
    /// from its pool.
    ///
    /// A failed record deletion leaves the mailer as it was, so the call can
    /// be retried. From an event handler of this mailer the loop is signalled
    /// and stops once the handler returns.
    pub async fn destroy(&self) -> Result<()> {
        let id = self.id();
        let _control = loop {
            let control = self.inner.control.lock().await;
            if self.status() == MailerStatus::Destroyed {
                return Err(Error::Destroyed { id });
            }
            if !self.is_registered() && !self.is_stored() {
                return Err(Error::Detached { id });
            }
            if self.status() != MailerStatus::Started || self.in_own_loop() {
                break control;
            }
            self.inner.stop_signal.send_replace(true);
            drop(control);
            self.wait_loop_exit().await;
        };

        self.release().await?;
        info!(mailer_id = %id, "mailer destroyed");
        Ok(())
    }

    /// Add recipients as pending. Returns whether anything new was added; a
    /// completed mailer with new recipients goes back to stopped.
    pub async fn add_recipients(
        &self,
        ids: impl IntoIterator<Item = RecipientId>,
    ) -> Result<bool> {
        let _control = self.inner.control.lock().await;
        let id = self.id();
        if self.status() == MailerStatus::Destroyed {
            return Err(Error::Destroyed { id });
        }

        let mut delivery = self.inner.delivery.lock().await;
        let in_flight = delivery.in_flight;
        let mut next = delivery.chats.clone();
        let added = next.add(
            ids.into_iter().filter(|recipient| Some(*recipient) != in_flight),
            ChatState::Pending,
        );
        if added.is_empty() {
            return Ok(false);
        }

        self.persist_chats(|stored| {
            stored.add(added.iter().copied(), ChatState::Pending);
            Ok(())
        })
        .await?;
        delivery.chats = next;

        self.inner.status.send_if_modified(|status| {
            if *status == MailerStatus::Completed {
                *status = MailerStatus::Stopped;
                true
            } else {
                false
            }
        });

        #[cfg(feature = "metrics")]
        counter!(mailer_metrics::RECIPIENTS_ADDED_TOTAL).increment(added.len() as u64);

        info!(mailer_id = %id, added = added.len(), status = %self.status(), "recipients added");
        Ok(true)
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn in_own_loop(&self) -> bool {
        SEND_LOOP
            .try_with(|inner| Weak::as_ptr(inner) == Arc::as_ptr(&self.inner))
            .unwrap_or(false)
    }

    async fn wait_loop_exit(&self) {
        let mut status = self.inner.status.subscribe();
        let _ = status
            .wait_for(|status| *status != MailerStatus::Started)
            .await;
        self.inner.task.idle().await;
    }

    fn is_registered(&self) -> bool {
        let Some(registry) = self.inner.shared.registry.upgrade() else {
            return false;
        };
        registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&self.id())
            .is_some_and(|mailer| mailer.same_as(self))
    }

    /// Remove this exact mailer from its pool's registry.
    pub(crate) fn unregister(&self) -> bool {
        let Some(registry) = self.inner.shared.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.write().unwrap_or_else(|e| e.into_inner());
        if registry
            .get(&self.id())
            .is_some_and(|mailer| mailer.same_as(self))
        {
            registry.remove(&self.id());
            #[cfg(feature = "metrics")]
            gauge!(herald_metrics::pool::MAILERS).set(registry.len() as f64);
            return true;
        }
        false
    }

    /// Delete the stored record, then mark the mailer destroyed and
    /// unregister it. Callers hold `control`.
    async fn release(&self) -> Result<()> {
        if let Some(store) = self.store() {
            match store.delete_record(self.id()).await {
                Ok(()) | Err(herald_storage::Error::RecordNotFound { .. }) => {},
                Err(e) => return Err(e.into()),
            }
        }

        self.inner.stored.store(false, Ordering::Release);
        self.inner.stop_signal.send_replace(true);
        self.inner.status.send_replace(MailerStatus::Destroyed);
        self.unregister();
        #[cfg(feature = "metrics")]
        counter!(herald_metrics::pool::REMOVED_TOTAL).increment(1);
        Ok(())
    }

    fn store(&self) -> Option<&Arc<dyn MailerStore>> {
        if self.is_stored() {
            self.inner.shared.store.as_ref()
        } else {
            None
        }
    }

    /// Apply `f` to the stored chat set. No-op for mailers without a record.
    async fn persist_chats<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ChatSet) -> herald_common::Result<()> + Send,
    {
        let Some(store) = self.store() else {
            return Ok(());
        };
        update_record(store.as_ref(), self.id(), |record| f(&mut record.chats)).await??;
        Ok(())
    }

    fn event_context(&self) -> Context {
        let mut context = self.inner.context.clone();
        context.insert("mailer_id".into(), json!(self.id()));
        context.insert("bot_id".into(), json!(self.inner.bot_id));
        context
    }

    async fn emit(&self, event: MailerEvent, context: Context) -> Result<Context> {
        match &self.inner.shared.hub {
            Some(hub) if !self.inner.settings.disable_events => hub.emit(event, context).await,
            _ => Ok(context),
        }
    }

    /// Move the in-flight recipient into its final bucket, store first.
    async fn record_outcome(&self, chat_id: RecipientId, state: ChatState) -> Result<()> {
        let mut delivery = self.inner.delivery.lock().await;
        self.persist_chats(|stored| stored.transition(chat_id, ChatState::Pending, state))
            .await?;
        delivery.chats.insert(chat_id, state);
        delivery.in_flight = None;
        Ok(())
    }

    /// Put an unfinished in-flight recipient back into pending.
    async fn release_in_flight(&self) {
        let mut delivery = self.inner.delivery.lock().await;
        if let Some(chat_id) = delivery.in_flight.take() {
            delivery.chats.insert(chat_id, ChatState::Pending);
            debug!(mailer_id = %self.id(), chat_id = %chat_id, "recipient returned to pending");
        }
    }

    // ── Send loop ───────────────────────────────────────────────────────────

    async fn run(self) -> RunOutcome {
        let id = self.id();
        let mut stop = self.inner.stop_signal.subscribe();
        info!(mailer_id = %id, "mailer started");

        #[cfg(feature = "metrics")]
        {
            counter!(mailer_metrics::RUNS_STARTED_TOTAL).increment(1);
            gauge!(mailer_metrics::RUNNING).increment(1.0);
        }

        let result = self.send_loop(&mut stop).await;
        self.inner.stop_signal.send_replace(true);
        self.release_in_flight().await;

        let outcome = match result {
            Ok(true) => self.finish_completed().await,
            Ok(false) => {
                self.finish_stopped().await;
                RunOutcome::Stopped
            },
            Err(e) => {
                error!(mailer_id = %id, error = %e, "mailer run failed");
                self.set_stopped();
                RunOutcome::Failed(e.to_string())
            },
        };

        #[cfg(feature = "metrics")]
        {
            gauge!(mailer_metrics::RUNNING).decrement(1.0);
            counter!(mailer_metrics::RUNS_FINISHED_TOTAL, labels::OUTCOME => outcome.label())
                .increment(1);
        }

        debug!(mailer_id = %id, outcome = outcome.label(), "mailer run finished");
        *self
            .inner
            .last_outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(outcome.clone());
        outcome
    }

    /// Returns `true` when every pending recipient was attempted.
    async fn send_loop(&self, stop: &mut watch::Receiver<bool>) -> Result<bool> {
        self.emit(MailerEvent::Started, self.event_context())
            .await?;

        let delay = {
            let delivery = self.inner.delivery.lock().await;
            self.inner
                .settings
                .interval
                .next_delay(delivery.chats.count(ChatState::Pending))
        };

        loop {
            if *stop.borrow() {
                return Ok(false);
            }

            let chat_id = {
                let mut delivery = self.inner.delivery.lock().await;
                match delivery.chats.pop_pending() {
                    Some(chat_id) => {
                        delivery.in_flight = Some(chat_id);
                        chat_id
                    },
                    None => {
                        self.inner.status.send_replace(MailerStatus::Completed);
                        return Ok(true);
                    },
                }
            };

            if let Attempt::Interrupted = self.deliver(chat_id, stop).await? {
                return Ok(false);
            }

            let has_pending = self.inner.delivery.lock().await.chats.has_pending();
            if has_pending && !sleep_or_stop(delay, stop).await {
                return Ok(false);
            }
        }
    }

    async fn deliver(
        &self,
        chat_id: RecipientId,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Attempt> {
        let id = self.id();
        let mut context = self.event_context();
        context.insert("chat_id".into(), json!(chat_id));
        let context = self.emit(MailerEvent::BeforeSent, context).await?;

        let mut call = self.inner.content.resolve(chat_id, &context).await?;
        if let Some(renderer) = &self.inner.shared.renderer {
            call = renderer
                .render(call, &self.inner.settings.excluded_placeholders, &context)
                .await;
        }

        let result = loop {
            #[cfg(feature = "metrics")]
            let started = std::time::Instant::now();

            let result = self.inner.shared.transport.send(&call).await;

            #[cfg(feature = "metrics")]
            histogram!(mailer_metrics::SEND_DURATION_SECONDS, labels::METHOD => call.method())
                .record(started.elapsed().as_secs_f64());

            match result {
                Err(TransportError::RateLimited { retry_after })
                    if self.inner.settings.handle_retry_after =>
                {
                    #[cfg(feature = "metrics")]
                    counter!(mailer_metrics::RATE_LIMITED_TOTAL).increment(1);

                    warn!(
                        mailer_id = %id,
                        chat_id = %chat_id,
                        retry_after_secs = retry_after.as_secs_f64(),
                        "rate limited, retrying recipient"
                    );
                    if !sleep_or_stop(retry_after, stop).await {
                        return Ok(Attempt::Interrupted);
                    }
                },
                other => break other,
            }
        };

        let mut context = context;
        match result {
            Ok(response) => {
                self.record_outcome(chat_id, ChatState::Success).await?;
                #[cfg(feature = "metrics")]
                counter!(mailer_metrics::SENDS_TOTAL, labels::OUTCOME => "success").increment(1);
                debug!(mailer_id = %id, chat_id = %chat_id, "message delivered");

                context.insert("response".into(), response);
                self.emit(MailerEvent::SuccessSent, context).await?;
            },
            Err(e) => {
                self.record_outcome(chat_id, ChatState::Failed).await?;
                #[cfg(feature = "metrics")]
                counter!(mailer_metrics::SENDS_TOTAL, labels::OUTCOME => "failed").increment(1);
                debug!(mailer_id = %id, chat_id = %chat_id, error = %e, "delivery failed");

                context.insert("error".into(), json!(e.to_string()));
                self.emit(MailerEvent::FailedSent, context).await?;
            },
        }
        Ok(Attempt::Delivered)
    }

    fn set_stopped(&self) {
        self.inner.status.send_if_modified(|status| {
            if *status == MailerStatus::Started {
                *status = MailerStatus::Stopped;
                true
            } else {
                false
            }
        });
    }

    async fn finish_stopped(&self) {
        self.set_stopped();
        info!(mailer_id = %self.id(), "mailer stopped");
        if let Err(e) = self
            .emit(MailerEvent::Stopped, self.event_context())
            .await
        {
            warn!(mailer_id = %self.id(), error = %e, "stopped handler failed");
        }
    }

    async fn finish_completed(&self) -> RunOutcome {
        let id = self.id();
        info!(mailer_id = %id, "mailer completed");
        if let Err(e) = self
            .emit(MailerEvent::Completed, self.event_context())
            .await
        {
            warn!(mailer_id = %id, error = %e, "completed handler failed");
        }

        if self.inner.settings.destroy_on_complete {
            let _control = self.inner.control.lock().await;
            // Recipients added meanwhile turn the mailer back to stopped; keep it then.
            if self.status() == MailerStatus::Completed {
                match self.release().await {
                    Ok(()) => info!(mailer_id = %id, "mailer destroyed after completion"),
                    Err(e) => {
                        error!(mailer_id = %id, error = %e, "failed to remove completed mailer")
                    },
                }
            }
        }
        RunOutcome::Completed
    }
}

/// Sleep for `duration` unless the stop signal fires first. Returns `true`
/// when the full duration elapsed without a stop request.
async fn sleep_or_stop(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }
    let interrupted = tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = stop.wait_for(|stop| *stop) => true,
    };
    !interrupted && !*stop.borrow()
}
