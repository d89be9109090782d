//! Scripted provider for tests.
//!
//! [`ScriptedProvider`] answers from a queue of prepared replies, counts its
//! calls and remembers the credential and request it last saw. An empty
//! queue answers with the `repeat` reply if one is set, otherwise with an
//! API error.
//!
//! ```rust,no_run
//! use helmsman_providers::testing::ScriptedProvider;
//! use helmsman_core::BackendReply;
//!
//! let provider = ScriptedProvider::new("mock");
//! provider.push_ok(BackendReply::text("All done."));
//! ```

use async_trait::async_trait;
use helmsman_core::error::ProviderError;
use helmsman_core::provider::{BackendReply, Provider, ProviderRequest, Usage};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub struct ScriptedProvider {
    name: String,
    models: Vec<String>,
    script: Mutex<VecDeque<Result<BackendReply, ProviderError>>>,
    repeat: Option<BackendReply>,
    delay: Option<Duration>,
    flat_cost: Option<f64>,
    call_count: Mutex<usize>,
    last_request: Mutex<Option<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            repeat: None,
            delay: None,
            flat_cost: None,
            call_count: Mutex::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Advertise models so the resolver maps them to this provider.
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Reply used whenever the script is empty.
    pub fn with_repeat(mut self, reply: BackendReply) -> Self {
        self.repeat = Some(reply);
        self
    }

    /// Sleep (on the tokio clock) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Price every call at `cost_usd` instead of deferring to the pricing table.
    pub fn with_flat_cost(mut self, cost_usd: f64) -> Self {
        self.flat_cost = Some(cost_usd);
        self
    }

    pub fn push_ok(&self, reply: BackendReply) {
        self.lock_script().push_back(Ok(reply));
    }

    pub fn push_err(&self, error: ProviderError) {
        self.lock_script().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        *self.call_count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_credential(&self) -> Option<String> {
        self.last_request().and_then(|r| r.credential)
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<BackendReply, ProviderError>>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn complete(&self, request: ProviderRequest) -> Result<BackendReply, ProviderError> {
        *self.call_count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        *self.last_request.lock().unwrap_or_else(PoisonError::into_inner) = Some(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.lock_script().pop_front();
        match (next, &self.repeat) {
            (Some(step), _) => step,
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Err(ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            }),
        }
    }

    fn estimate_cost(&self, _usage: &Usage, _model: &str) -> Option<f64> {
        self.flat_cost
    }
}
