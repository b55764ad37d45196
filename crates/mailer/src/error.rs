use {herald_common::MailerId, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] herald_common::Error),

    #[error(transparent)]
    Storage(#[from] herald_storage::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    // ── Lifecycle guards ────────────────────────────────────────────────────
    #[error("mailer {id} is destroyed")]
    Destroyed { id: MailerId },

    #[error("mailer {id} is already started")]
    AlreadyStarted { id: MailerId },

    #[error("mailer {id} is already stopped")]
    AlreadyStopped { id: MailerId },

    #[error("mailer {id} is already completed")]
    AlreadyCompleted { id: MailerId },

    #[error("mailer {id} is neither registered in a pool nor persisted")]
    Detached { id: MailerId },

    // ── Task handle ─────────────────────────────────────────────────────────
    #[error("a task is already running")]
    TaskAlreadyStarted,

    #[error("no task is running")]
    NoTask,

    #[error("another caller is already waiting for the task")]
    AlreadyWaiting,

    #[error("task ended without producing a result")]
    TaskAborted,

    // ── Pool ────────────────────────────────────────────────────────────────
    #[error("mailer not found: {id}")]
    MailerNotFound { id: MailerId },

    #[error("mailer id already in use: {id}")]
    MailerExists { id: MailerId },

    #[error("could not generate a free mailer id after {attempts} attempts")]
    IdGenerationExhausted { attempts: usize },

    // ── Event hub ───────────────────────────────────────────────────────────
    #[error("event hub '{name}' is already bound to a parent")]
    HubAlreadyBound { name: String },

    #[error("binding '{child}' under '{parent}' would create a cycle")]
    HubCycle { parent: String, child: String },

    #[error("event hub '{name}' is frozen")]
    HubFrozen { name: String },

    // ── Content ─────────────────────────────────────────────────────────────
    #[error("content: {message}")]
    Content { message: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn content(message: impl Into<String>) -> Self {
        Self::Content {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl herald_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
