//! Lifecycle events and the hub tree that dispatches them.
//!
//! An [`EventHub`] is a named node holding per-event handler lists and child
//! hubs. Emitting on a hub runs its own handlers first, then each child's
//! subtree in bind order. Hubs are assembled at setup, frozen when handed to a
//! pool, and read-only afterwards.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    herald_common::Context,
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{Error, Result};

// ── MailerEvent ─────────────────────────────────────────────────────────────

/// Lifecycle events emitted by a mailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MailerEvent {
    /// A send loop began.
    Started,
    /// A send loop ended with recipients still pending.
    Stopped,
    /// Every recipient has been attempted.
    Completed,
    /// About to deliver to one recipient. Handlers may extend the context the
    /// content resolver and placeholders will see.
    BeforeSent,
    SuccessSent,
    FailedSent,
}

impl MailerEvent {
    /// All variants, for iteration.
    pub const ALL: &'static [MailerEvent] = &[
        Self::Started,
        Self::Stopped,
        Self::Completed,
        Self::BeforeSent,
        Self::SuccessSent,
        Self::FailedSent,
    ];
}

impl fmt::Display for MailerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ── HookAction ──────────────────────────────────────────────────────────────

/// The outcome a handler returns.
#[derive(Debug, Default)]
pub enum HookAction {
    /// Let the remaining handlers run.
    #[default]
    Continue,
    /// Merge these keys into the context seen by later handlers and returned
    /// from [`EventHub::emit`].
    Extend(Context),
    /// Do not run the remaining handlers of this emit.
    Skip,
}

// ── EventHandler ────────────────────────────────────────────────────────────

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// A human-readable name for logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn handle(&self, event: MailerEvent, context: &Context) -> Result<HookAction>;
}

struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(MailerEvent, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookAction>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: MailerEvent, context: &Context) -> Result<HookAction> {
        (self.f)(event, context.clone()).await
    }
}

// ── EventHub ────────────────────────────────────────────────────────────────

struct HubNode {
    name: String,
    handlers: RwLock<HashMap<MailerEvent, Vec<Arc<dyn EventHandler>>>>,
    children: RwLock<Vec<EventHub>>,
    parent: Mutex<Weak<HubNode>>,
    frozen: AtomicBool,
}

/// Shared handle to one node of the hub tree.
#[derive(Clone)]
pub struct EventHub {
    node: Arc<HubNode>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("name", &self.node.name)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

impl EventHub {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            node: Arc::new(HubNode {
                name: name.into(),
                handlers: RwLock::new(HashMap::new()),
                children: RwLock::new(Vec::new()),
                parent: Mutex::new(Weak::new()),
                frozen: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn is_frozen(&self) -> bool {
        self.node.frozen.load(Ordering::Acquire)
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::HubFrozen {
                name: self.node.name.clone(),
            });
        }
        Ok(())
    }

    /// Register a handler for `event` on this node.
    pub fn register(&self, event: MailerEvent, handler: Arc<dyn EventHandler>) -> Result<()> {
        self.ensure_mutable()?;
        debug!(hub = %self.node.name, event = %event, handler = handler.name(), "event handler registered");
        self.node
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event)
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Register an async closure for `event`.
    pub fn on<F, Fut>(&self, event: MailerEvent, f: F) -> Result<()>
    where
        F: Fn(MailerEvent, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookAction>> + Send + 'static,
    {
        let handler = FnHandler {
            name: format!("{}:{event}", self.node.name),
            f,
        };
        self.register(event, Arc::new(handler))
    }

    /// Attach `child` below this hub.
    pub fn bind(&self, child: &EventHub) -> Result<()> {
        self.ensure_mutable()?;
        child.ensure_mutable()?;

        // Refuse when the child is this hub or one of its ancestors.
        let mut current = Some(Arc::clone(&self.node));
        while let Some(node) = current {
            if Arc::ptr_eq(&node, &child.node) {
                return Err(Error::HubCycle {
                    parent: self.node.name.clone(),
                    child: child.node.name.clone(),
                });
            }
            current = node
                .parent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .upgrade();
        }

        {
            let mut parent = child
                .node
                .parent
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if parent.upgrade().is_some() {
                return Err(Error::HubAlreadyBound {
                    name: child.node.name.clone(),
                });
            }
            *parent = Arc::downgrade(&self.node);
        }

        self.node
            .children
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(child.clone());
        debug!(parent = %self.node.name, child = %child.node.name, "event hub bound");
        Ok(())
    }

    /// Freeze this hub and its whole subtree.
    pub fn freeze(&self) {
        self.node.frozen.store(true, Ordering::Release);
        let children = self
            .node
            .children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for child in children {
            child.freeze();
        }
    }

    /// Handlers for `event` in dispatch order: this node first, then each
    /// child subtree depth-first.
    fn collect(&self, event: MailerEvent, out: &mut Vec<Arc<dyn EventHandler>>) {
        if let Some(handlers) = self
            .node
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event)
        {
            out.extend(handlers.iter().cloned());
        }
        let children = self
            .node
            .children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for child in &children {
            child.collect(event, out);
        }
    }

    /// Number of handlers an emit of `event` would run.
    pub fn handler_count(&self, event: MailerEvent) -> usize {
        let mut handlers = Vec::new();
        self.collect(event, &mut handlers);
        handlers.len()
    }

    /// Run every handler for `event` sequentially and return the context as
    /// extended by them. The first handler error is returned as is.
    pub async fn emit(&self, event: MailerEvent, mut context: Context) -> Result<Context> {
        let mut handlers = Vec::new();
        self.collect(event, &mut handlers);
        if handlers.is_empty() {
            return Ok(context);
        }

        debug!(hub = %self.node.name, event = %event, count = handlers.len(), "dispatching event");

        for handler in handlers {
            let action = handler.handle(event, &context).await.inspect_err(|e| {
                warn!(handler = handler.name(), event = %event, error = %e, "event handler failed");
            })?;
            match action {
                HookAction::Continue => {},
                HookAction::Extend(data) => context.extend(data),
                HookAction::Skip => {
                    debug!(handler = handler.name(), event = %event, "event handler skipped the rest");
                    break;
                },
            }
        }

        Ok(context)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(hub: &EventHub, log: &Log, label: &'static str, action: fn() -> HookAction) {
        let log = Arc::clone(log);
        hub.on(MailerEvent::Started, move |_, ctx| {
            let log = Arc::clone(&log);
            async move {
                let seen: Vec<_> = ctx.keys().cloned().collect();
                log.lock().unwrap().push(format!("{label}{seen:?}"));
                Ok(action())
            }
        })
        .unwrap();
    }

    fn extend(key: &str) -> HookAction {
        let mut data = Context::new();
        data.insert(key.to_string(), json!(true));
        HookAction::Extend(data)
    }

    #[tokio::test]
    async fn emit_runs_parent_then_children_with_accumulated_data() {
        let log: Log = Arc::default();
        let root = EventHub::new("root");
        let left = EventHub::new("left");
        let right = EventHub::new("right");
        let leaf = EventHub::new("leaf");

        recorder(&root, &log, "root", || extend("a"));
        recorder(&left, &log, "left", || extend("b"));
        recorder(&leaf, &log, "leaf", || HookAction::Continue);
        recorder(&right, &log, "right", || HookAction::Continue);

        left.bind(&leaf).unwrap();
        root.bind(&left).unwrap();
        root.bind(&right).unwrap();

        let ctx = root.emit(MailerEvent::Started, Context::new()).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![
            "root[]",
            r#"left["a"]"#,
            r#"leaf["a", "b"]"#,
            r#"right["a", "b"]"#,
        ]);
        assert_eq!(ctx.get("a"), Some(&json!(true)));
        assert_eq!(ctx.get("b"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn skip_stops_remaining_handlers_only_for_that_emit() {
        let log: Log = Arc::default();
        let root = EventHub::new("root");
        let child = EventHub::new("child");
        recorder(&root, &log, "first", || HookAction::Skip);
        recorder(&child, &log, "second", || HookAction::Continue);
        root.bind(&child).unwrap();

        root.emit(MailerEvent::Started, Context::new()).await.unwrap();
        root.emit(MailerEvent::Started, Context::new()).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first[]", "first[]"]);
    }

    #[tokio::test]
    async fn handler_error_propagates() {
        let hub = EventHub::new("root");
        hub.on(MailerEvent::FailedSent, |_, _| async {
            Err(Error::message("boom"))
        })
        .unwrap();

        let err = hub
            .emit(MailerEvent::FailedSent, Context::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        // Other events are unaffected.
        assert!(hub.emit(MailerEvent::Started, Context::new()).await.is_ok());
    }

    #[test]
    fn bind_rejects_second_parent() {
        let a = EventHub::new("a");
        let b = EventHub::new("b");
        let child = EventHub::new("child");
        a.bind(&child).unwrap();
        assert!(matches!(
            b.bind(&child),
            Err(Error::HubAlreadyBound { .. })
        ));
    }

    #[test]
    fn bind_rejects_cycles() {
        let a = EventHub::new("a");
        let b = EventHub::new("b");
        let c = EventHub::new("c");
        a.bind(&b).unwrap();
        b.bind(&c).unwrap();

        assert!(matches!(c.bind(&a), Err(Error::HubCycle { .. })));
        assert!(matches!(a.bind(&a), Err(Error::HubCycle { .. })));
    }

    #[test]
    fn frozen_hub_rejects_changes_in_whole_subtree() {
        let root = EventHub::new("root");
        let child = EventHub::new("child");
        root.bind(&child).unwrap();
        root.freeze();

        assert!(child.is_frozen());
        assert!(matches!(
            root.bind(&EventHub::new("late")),
            Err(Error::HubFrozen { .. })
        ));
        assert!(matches!(
            child.on(MailerEvent::Started, |_, _| async { Ok(HookAction::Continue) }),
            Err(Error::HubFrozen { .. })
        ));
    }

    #[test]
    fn frozen_child_cannot_be_bound() {
        let root = EventHub::new("root");
        let child = EventHub::new("pooled");
        child.freeze();

        assert!(matches!(root.bind(&child), Err(Error::HubFrozen { name }) if name == "pooled"));
        assert_eq!(root.handler_count(MailerEvent::Started), 0);
        assert!(!root.is_frozen());
    }

    #[test]
    fn handler_count_walks_subtree() {
        let root = EventHub::new("root");
        let child = EventHub::new("child");
        for hub in [&root, &child] {
            hub.on(MailerEvent::Completed, |_, _| async { Ok(HookAction::Continue) })
                .unwrap();
        }
        root.bind(&child).unwrap();
        assert_eq!(root.handler_count(MailerEvent::Completed), 2);
        assert_eq!(child.handler_count(MailerEvent::Completed), 1);
        assert_eq!(root.handler_count(MailerEvent::Stopped), 0);
    }
}
