//! The request object submitted to the router (spec.md §3.1 `Task`).

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::CoreError;
use crate::schema::StructuredOutput;

fn task_type_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[^.]+\.[^.]+$").expect("static regex is valid"))
}

/// Which LLM provider should service a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Anthropic Claude.
    Anthropic,
    /// OpenAI GPT.
    Openai,
    /// Google Gemini.
    Google,
}

impl Default for Provider {
    fn default() -> Self {
        Self::Anthropic
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::Openai => write!(f, "openai"),
            Self::Google => write!(f, "google"),
        }
    }
}

/// Per-call options overriding router and provider defaults.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Provider to route to. Defaults to [`Provider::Anthropic`].
    pub provider: Provider,
    /// Maximum output tokens for the generation.
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature, passed through unchanged to the adapter.
    pub temperature: Option<f32>,
    /// Per-call timeout.
    pub timeout_ms: Option<u64>,
    /// Whether to consult/populate the cache. Defaults to `true`.
    pub use_cache: bool,
    /// Cache TTL override in milliseconds.
    pub cache_ttl_ms: Option<u64>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            max_output_tokens: None,
            temperature: None,
            timeout_ms: None,
            use_cache: true,
            cache_ttl_ms: None,
        }
    }
}

/// A single request to generate structured output matching `T`.
#[derive(Debug, Clone)]
pub struct Task<T: StructuredOutput> {
    /// Tenant on whose behalf the call is made. `None` means "personal" mode.
    pub principal_id: Option<String>,
    /// The acting user; used as the rate-limit principal fallback.
    pub user_id: Option<String>,
    /// Free-form tag routed into the usage event unchanged.
    pub module_id: String,
    /// Must match `^[^.]+\.[^.]+$`.
    pub task_type: String,
    /// System prompt.
    pub system_prompt: String,
    /// User prompt (validated and sanitised by the router).
    pub user_prompt: String,
    /// Per-call options.
    pub options: TaskOptions,
    _marker: std::marker::PhantomData<T>,
}

impl<T: StructuredOutput> Task<T> {
    /// Construct a new task. Returns an error if `task_type` is malformed.
    pub fn new(
        module_id: impl Into<String>,
        task_type: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let task_type = task_type.into();
        validate_task_type(&task_type)?;
        Ok(Self {
            principal_id: None,
            user_id: None,
            module_id: module_id.into(),
            task_type,
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            options: TaskOptions::default(),
            _marker: std::marker::PhantomData,
        })
    }

    /// Set the principal (tenant) id.
    #[must_use]
    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    /// Set the acting user id.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Override the default options.
    #[must_use]
    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// The principal the rate limiter keys on: `principal_id ?? user_id`.
    #[must_use]
    pub fn rate_limit_principal(&self) -> Option<&str> {
        self.principal_id
            .as_deref()
            .or(self.user_id.as_deref())
    }

    /// Split `task_type` into `(module, task)`. Caller must have already
    /// validated the format via [`validate_task_type`].
    #[must_use]
    pub fn module_and_task(&self) -> (&str, &str) {
        self.task_type
            .split_once('.')
            .expect("task_type validated at construction")
    }

    /// The ledger action string: `"<module>:<task>:generate"`.
    #[must_use]
    pub fn action(&self) -> String {
        action_for(&self.task_type)
    }
}

/// Validate that `task_type` matches `^[^.]+\.[^.]+$` (exactly one dot,
/// non-empty on both sides).
pub fn validate_task_type(task_type: &str) -> Result<(), CoreError> {
    if task_type_regex().is_match(task_type) {
        Ok(())
    } else {
        Err(CoreError::MalformedTaskType(task_type.to_string()))
    }
}

/// Derive the ledger action string for an already-validated `task_type`.
///
/// # Panics
/// Panics if `task_type` does not match `^[^.]+\.[^.]+$`; callers should
/// validate with [`validate_task_type`] first.
#[must_use]
pub fn action_for(task_type: &str) -> String {
    let (module, task) = task_type
        .split_once('.')
        .expect("task_type must be validated before calling action_for");
    format!("{module}:{task}:generate")
}
