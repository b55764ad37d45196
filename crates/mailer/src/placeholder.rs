//! `$key` / `${key}` substitution in outgoing text.

use std::{
    collections::{BTreeSet, HashMap},
    future::Future,
    sync::Arc,
};

use {async_trait::async_trait, herald_common::Context, tracing::warn};

use crate::{Result, content::OutboundCall};

/// Fills placeholders in a call's text or caption.
///
/// Rendering never fails: when a value cannot be produced the call is returned
/// unchanged.
#[async_trait]
pub trait PlaceholderRenderer: Send + Sync {
    async fn render(
        &self,
        call: OutboundCall,
        excluded: &BTreeSet<String>,
        context: &Context,
    ) -> OutboundCall;
}

/// Produces the value of one placeholder for one recipient.
#[async_trait]
pub trait PlaceholderProvider: Send + Sync {
    async fn value(&self, context: &Context) -> Result<String>;
}

struct FnProvider<F>(F);

#[async_trait]
impl<F, Fut> PlaceholderProvider for FnProvider<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    async fn value(&self, context: &Context) -> Result<String> {
        (self.0)(context.clone()).await
    }
}

#[derive(Clone)]
enum Placeholder {
    Static(String),
    Provider(Arc<dyn PlaceholderProvider>),
}

/// Named placeholder values, either fixed strings or async providers.
#[derive(Clone, Default)]
pub struct PlaceholderRegistry {
    entries: HashMap<String, Placeholder>,
}

impl PlaceholderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_static(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries
            .insert(key.into(), Placeholder::Static(value.into()));
        self
    }

    pub fn add_provider(
        &mut self,
        key: impl Into<String>,
        provider: Arc<dyn PlaceholderProvider>,
    ) -> &mut Self {
        self.entries
            .insert(key.into(), Placeholder::Provider(provider));
        self
    }

    /// Register an async closure computing the value from the context.
    pub fn add_fn<F, Fut>(&mut self, key: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.add_provider(key, Arc::new(FnProvider(f)))
    }

    /// Copy every entry of `other` whose key is not defined here yet.
    pub fn include(&mut self, other: &PlaceholderRegistry) -> &mut Self {
        for (key, entry) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_insert_with(|| entry.clone());
        }
        self
    }

    pub fn keys(&self) -> BTreeSet<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn resolve(&self, key: &str, context: &Context) -> Option<Result<String>> {
        match self.entries.get(key)? {
            Placeholder::Static(value) => Some(Ok(value.clone())),
            Placeholder::Provider(provider) => Some(provider.value(context).await),
        }
    }
}

#[async_trait]
impl PlaceholderRenderer for PlaceholderRegistry {
    async fn render(
        &self,
        mut call: OutboundCall,
        excluded: &BTreeSet<String>,
        context: &Context,
    ) -> OutboundCall {
        let Some(text) = call.text() else {
            return call;
        };

        let mut values = HashMap::new();
        for key in placeholder_keys(text) {
            if excluded.contains(&key) {
                continue;
            }
            match self.resolve(&key, context).await {
                Some(Ok(value)) => {
                    values.insert(key, value);
                },
                Some(Err(e)) => {
                    warn!(placeholder = %key, error = %e, "placeholder provider failed, sending text as is");
                    return call;
                },
                None => {},
            }
        }
        if values.is_empty() {
            return call;
        }

        if let Some(text) = call.text_mut() {
            *text = substitute_with(text, |key| values.get(key).cloned());
        }
        call
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

enum Piece<'a> {
    Text(&'a str),
    /// A placeholder key and its literal source text.
    Key(&'a str, &'a str),
}

fn scan<'a>(input: &'a str, mut emit: impl FnMut(Piece<'a>)) {
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        emit(Piece::Text(&rest[..pos]));
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) if end > 0 => {
                    emit(Piece::Key(&braced[..end], &rest[pos..pos + end + 3]));
                    rest = &braced[end + 1..];
                },
                _ => {
                    // Malformed, emit literal.
                    emit(Piece::Text("${"));
                    rest = braced;
                },
            }
            continue;
        }

        let len = after.find(|c: char| !is_key_char(c)).unwrap_or(after.len());
        if len == 0 {
            emit(Piece::Text("$"));
        } else {
            emit(Piece::Key(&after[..len], &rest[pos..pos + len + 1]));
        }
        rest = &after[len..];
    }
    emit(Piece::Text(rest));
}

/// Keys referenced by `input`, deduplicated.
pub fn placeholder_keys(input: &str) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    scan(input, |piece| {
        if let Piece::Key(key, _) = piece {
            keys.insert(key.to_string());
        }
    });
    keys
}

/// Replace placeholders whose key `lookup` knows; leave the others as written.
pub fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    scan(input, |piece| match piece {
        Piece::Text(text) => result.push_str(text),
        Piece::Key(key, literal) => match lookup(key) {
            Some(value) => result.push_str(&value),
            None => result.push_str(literal),
        },
    });
    result
}
