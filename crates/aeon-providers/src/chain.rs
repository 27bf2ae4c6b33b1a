//! Provider chain — role-based routing with cooldown and failover.
//!
//! Roles: `primary`, `fast`, `multimodal`, `fallback`; unset roles fall
//! back to primary. Retriable failures put a provider into an
//! exponentially-extended cooldown (1 min ×5 per consecutive failure,
//! capped at 1 h) and hand the request to the fallback. Non-retriable
//! failures return immediately — retrying a bad API key helps nobody.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use aeon_core::types::{CompletionRequest, CompletionResponse, RouteHint};

use crate::error::ProviderError;
use crate::traits::Provider;

/// Initial cooldown after the first failure.
const COOLDOWN_INITIAL_SECS: i64 = 60;
/// Backoff multiplier per consecutive failure.
const COOLDOWN_FACTOR: i32 = 5;
/// Cooldown ceiling.
const COOLDOWN_MAX_SECS: i64 = 3600;

/// Invoked as `(failed_provider, next_provider)` when the chain fails over,
/// so the kernel can tell the user what happened.
pub type RetryCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Clone, Debug)]
struct Cooldown {
    until: DateTime<Utc>,
    backoff: Duration,
}

struct Roles {
    primary: Arc<dyn Provider>,
    fast: Option<Arc<dyn Provider>>,
    multimodal: Option<Arc<dyn Provider>>,
    fallback: Option<Arc<dyn Provider>>,
}

/// Multi-backend router with error classification and failover.
pub struct ProviderChain {
    roles: RwLock<Roles>,
    /// All known providers, for runtime switching.
    all: HashMap<String, Arc<dyn Provider>>,
    cooldowns: Mutex<HashMap<String, Cooldown>>,
    on_retry: Mutex<Option<RetryCallback>>,
}

impl ProviderChain {
    /// Create a chain with the given primary and the full provider map.
    pub fn new(primary: Arc<dyn Provider>, all: HashMap<String, Arc<dyn Provider>>) -> Self {
        Self {
            roles: RwLock::new(Roles {
                primary,
                fast: None,
                multimodal: None,
                fallback: None,
            }),
            all,
            cooldowns: Mutex::new(HashMap::new()),
            on_retry: Mutex::new(None),
        }
    }

    pub fn with_fast(self, provider: Arc<dyn Provider>) -> Self {
        self.roles.write().unwrap().fast = Some(provider);
        self
    }

    pub fn with_multimodal(self, provider: Arc<dyn Provider>) -> Self {
        self.roles.write().unwrap().multimodal = Some(provider);
        self
    }

    pub fn with_fallback(self, provider: Arc<dyn Provider>) -> Self {
        self.roles.write().unwrap().fallback = Some(provider);
        self
    }

    /// Register the failover notification callback.
    pub fn set_on_retry(&self, callback: RetryCallback) {
        *self.on_retry.lock().unwrap() = Some(callback);
    }

    /// Name of the current primary provider.
    pub fn primary_name(&self) -> String {
        self.roles.read().unwrap().primary.name().to_string()
    }

    /// Names of every known provider, sorted.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.all.keys().cloned().collect();
        names.sort();
        names
    }

    /// Replace the primary provider at runtime.
    ///
    /// The caller (the agent loop) must clear its conversation history
    /// afterwards: tool-call-id conventions differ across providers.
    pub fn switch_to(&self, name: &str) -> anyhow::Result<()> {
        let Some(provider) = self.all.get(name) else {
            anyhow::bail!(
                "unknown provider '{}'. Known providers: {}",
                name,
                self.provider_names().join(", ")
            );
        };
        self.roles.write().unwrap().primary = provider.clone();
        info!(provider = name, "switched primary provider");
        Ok(())
    }

    // ─────────────────────────────────────────
    // Cooldown bookkeeping
    // ─────────────────────────────────────────

    /// Whether `name` is cooling down right now.
    pub fn in_cooldown(&self, name: &str) -> bool {
        self.cooldowns
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.until > Utc::now())
            .unwrap_or(false)
    }

    /// Cooldown expiry for `name`, if any.
    pub fn cooldown_until(&self, name: &str) -> Option<DateTime<Utc>> {
        self.cooldowns.lock().unwrap().get(name).map(|c| c.until)
    }

    fn mark_failure(&self, name: &str) {
        let mut cooldowns = self.cooldowns.lock().unwrap();
        let backoff = match cooldowns.get(name) {
            Some(prev) => {
                let next = prev.backoff * COOLDOWN_FACTOR;
                next.min(Duration::seconds(COOLDOWN_MAX_SECS))
            }
            None => Duration::seconds(COOLDOWN_INITIAL_SECS),
        };
        let until = Utc::now() + backoff;
        warn!(provider = name, backoff_secs = backoff.num_seconds(), "provider entering cooldown");
        cooldowns.insert(name.to_string(), Cooldown { until, backoff });
    }

    fn clear_cooldown(&self, name: &str) {
        self.cooldowns.lock().unwrap().remove(name);
    }

    // ─────────────────────────────────────────
    // Completion
    // ─────────────────────────────────────────

    /// Route a completion request through the chain.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let candidates = self.candidates(request.hint);
        if candidates.is_empty() {
            return Err(ProviderError::Overloaded("no provider available".into()));
        }

        let mut last_err: Option<ProviderError> = None;

        for (i, provider) in candidates.iter().enumerate() {
            let name = provider.name().to_string();

            if self.in_cooldown(&name) {
                last_err = Some(ProviderError::Overloaded(format!(
                    "provider '{name}' is cooling down"
                )));
                continue;
            }

            match provider.complete(request).await {
                Ok(mut response) => {
                    self.clear_cooldown(&name);
                    response.provider = name;
                    return Ok(response);
                }
                Err(e) if !e.is_retriable() => {
                    warn!(provider = %name, error = %e, "non-retriable provider error");
                    return Err(e);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "retriable provider error");
                    self.mark_failure(&name);
                    if let Some(next) = candidates.get(i + 1) {
                        if let Some(cb) = self.on_retry.lock().unwrap().as_ref() {
                            cb(&name, next.name());
                        }
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Overloaded("no provider available".into())))
    }

    /// Ordered candidate list for a hint: `[selected, fallback]`, with the
    /// fallback included only when distinct and available.
    fn candidates(&self, hint: RouteHint) -> Vec<Arc<dyn Provider>> {
        let roles = self.roles.read().unwrap();

        let role_choice = match hint {
            RouteHint::Fast => roles.fast.clone(),
            RouteHint::Multimodal => roles.multimodal.clone(),
            RouteHint::Normal => None,
        }
        .filter(|p| p.available());

        let selected = role_choice.unwrap_or_else(|| roles.primary.clone());
        let selected = if selected.available() {
            selected
        } else if let Some(fb) = roles.fallback.clone().filter(|p| p.available()) {
            fb
        } else {
            selected
        };

        let mut out = vec![selected.clone()];
        if let Some(fb) = roles.fallback.clone() {
            if fb.name() != selected.name() && fb.available() {
                out.push(fb);
            }
        }
        out
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A provider that returns a scripted sequence of results.
    struct ScriptedProvider {
        name: String,
        script: Mutex<Vec<Result<CompletionResponse, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &str, script: Vec<Result<CompletionResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn ok(name: &str, text: &str) -> Arc<Self> {
            Self::new(
                name,
                vec![Ok(CompletionResponse {
                    content: Some(text.into()),
                    ..Default::default()
                })],
            )
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(CompletionResponse {
                    content: Some("(script exhausted)".into()),
                    ..Default::default()
                })
            } else {
                script.remove(0)
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn chain_of(
        primary: Arc<ScriptedProvider>,
        fallback: Option<Arc<ScriptedProvider>>,
    ) -> ProviderChain {
        let mut all: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        all.insert(primary.name().to_string(), primary.clone() as Arc<dyn Provider>);
        if let Some(ref fb) = fallback {
            all.insert(fb.name().to_string(), fb.clone() as Arc<dyn Provider>);
        }
        let chain = ProviderChain::new(primary, all);
        match fallback {
            Some(fb) => chain.with_fallback(fb),
            None => chain,
        }
    }

    #[tokio::test]
    async fn test_success_path() {
        let primary = ScriptedProvider::ok("alpha", "hello");
        let chain = chain_of(primary, None);

        let resp = chain.complete(&CompletionRequest::default()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("hello"));
        assert_eq!(resp.provider, "alpha");
    }

    #[tokio::test]
    async fn test_failover_on_retriable() {
        let primary = ScriptedProvider::new(
            "alpha",
            vec![Err(ProviderError::RateLimited("429".into()))],
        );
        let fallback = ScriptedProvider::ok("beta", "from fallback");
        let chain = chain_of(primary.clone(), Some(fallback));

        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        chain.set_on_retry(Arc::new(move |failed, next| {
            sink.lock().unwrap().push((failed.to_string(), next.to_string()));
        }));

        let resp = chain.complete(&CompletionRequest::default()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("from fallback"));
        assert_eq!(resp.provider, "beta");

        // Primary is cooling down and the callback fired exactly once.
        assert!(chain.in_cooldown("alpha"));
        let calls = notified.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("alpha".to_string(), "beta".to_string())]);
    }

    #[tokio::test]
    async fn test_non_retriable_skips_fallback() {
        let primary = ScriptedProvider::new(
            "alpha",
            vec![Err(ProviderError::Auth("bad key".into()))],
        );
        let fallback = ScriptedProvider::ok("beta", "never seen");
        let chain = chain_of(primary, Some(fallback.clone()));

        let err = chain.complete(&CompletionRequest::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
        assert_eq!(fallback.call_count(), 0);
        assert!(!chain.in_cooldown("alpha"));
    }

    #[tokio::test]
    async fn test_cooldown_skipped_until_expiry() {
        let primary = ScriptedProvider::new(
            "alpha",
            vec![
                Err(ProviderError::Server("boom".into())),
                Ok(CompletionResponse {
                    content: Some("should not be reached".into()),
                    ..Default::default()
                }),
            ],
        );
        let chain = chain_of(primary.clone(), None);

        assert!(chain.complete(&CompletionRequest::default()).await.is_err());
        assert_eq!(primary.call_count(), 1);

        // Second attempt: the provider is in cooldown and is not invoked.
        let err = chain.complete(&CompletionRequest::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Overloaded(_)));
        assert_eq!(primary.call_count(), 1);
    }

    #[tokio::test]
    async fn test_success_clears_cooldown() {
        let primary = ScriptedProvider::ok("alpha", "fine now");
        let chain = chain_of(primary, None);

        chain.mark_failure("alpha");
        assert!(chain.in_cooldown("alpha"));

        // Force past the cooldown by clearing it the way a success does.
        chain.clear_cooldown("alpha");
        let resp = chain.complete(&CompletionRequest::default()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("fine now"));
        assert!(chain.cooldown_until("alpha").is_none());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let primary = ScriptedProvider::ok("alpha", "x");
        let chain = chain_of(primary, None);

        chain.mark_failure("alpha");
        let first = chain.cooldown_until("alpha").unwrap();

        chain.mark_failure("alpha");
        let second = chain.cooldown_until("alpha").unwrap();
        assert!(second > first, "each failure must extend the cooldown");

        // 60 → 300 → 1500 → 7500 capped to 3600.
        chain.mark_failure("alpha");
        chain.mark_failure("alpha");
        chain.mark_failure("alpha");
        let capped = chain.cooldowns.lock().unwrap()["alpha"].backoff;
        assert_eq!(capped.num_seconds(), 3600);
    }

    #[tokio::test]
    async fn test_fast_hint_routes_to_fast_role() {
        let primary = ScriptedProvider::ok("alpha", "slow answer");
        let fast = ScriptedProvider::ok("quick", "fast answer");

        let mut all: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        all.insert("alpha".into(), primary.clone() as Arc<dyn Provider>);
        all.insert("quick".into(), fast.clone() as Arc<dyn Provider>);
        let chain = ProviderChain::new(primary, all).with_fast(fast);

        let request = CompletionRequest {
            hint: RouteHint::Fast,
            ..Default::default()
        };
        let resp = chain.complete(&request).await.unwrap();
        assert_eq!(resp.provider, "quick");
    }

    #[tokio::test]
    async fn test_hint_without_role_uses_primary() {
        let primary = ScriptedProvider::ok("alpha", "primary answer");
        let chain = chain_of(primary, None);

        let request = CompletionRequest {
            hint: RouteHint::Multimodal,
            ..Default::default()
        };
        let resp = chain.complete(&request).await.unwrap();
        assert_eq!(resp.provider, "alpha");
    }

    #[tokio::test]
    async fn test_switch_to_known_provider() {
        let primary = ScriptedProvider::ok("alpha", "a");
        let other = ScriptedProvider::ok("beta", "b");
        let chain = chain_of(primary, Some(other));

        chain.switch_to("beta").unwrap();
        assert_eq!(chain.primary_name(), "beta");

        let resp = chain.complete(&CompletionRequest::default()).await.unwrap();
        assert_eq!(resp.provider, "beta");
    }

    #[test]
    fn test_switch_to_unknown_lists_known() {
        let primary = ScriptedProvider::ok("alpha", "a");
        let chain = chain_of(primary, None);

        let err = chain.switch_to("nonexistent").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nonexistent"));
        assert!(msg.contains("alpha"));
    }

    #[test]
    fn test_provider_names_sorted() {
        let primary = ScriptedProvider::ok("zeta", "z");
        let other = ScriptedProvider::ok("alpha", "a");
        let chain = chain_of(primary, Some(other));
        assert_eq!(chain.provider_names(), vec!["alpha", "zeta"]);
    }
}
