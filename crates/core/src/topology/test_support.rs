//! Scripted gateway for executor tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::credentials::CredentialResolver;
use crate::gateway::{GatewayError, InvokeRequest, ProviderGateway};
use crate::models::Provider;
use crate::topology::StageRunner;

type Reply = Result<String, (Option<u16>, String)>;

/// Replies queued per provider; an empty queue echoes a canned answer
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<HashMap<Provider, VecDeque<Reply>>>,
    calls: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, provider: Provider, text: &str) -> Self {
        self.push(provider, Ok(text.to_string()));
        self
    }

    pub fn fail(self, provider: Provider, status: u16, message: &str) -> Self {
        self.push(provider, Err((Some(status), message.to_string())));
        self
    }

    fn push(&self, provider: Provider, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(provider)
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<InvokeRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn prompts_for(&self, provider: Provider) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.provider == provider)
            .map(|c| c.prompt)
            .collect()
    }
}

#[async_trait]
impl ProviderGateway for ScriptedGateway {
    async fn invoke(&self, request: InvokeRequest) -> Result<String, GatewayError> {
        let provider = request.provider;
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request);
            calls.len()
        };
        let next = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&provider)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err((status, message))) => Err(GatewayError::provider(provider, status, message)),
            None => Ok(format!("{provider} reply #{n}")),
        }
    }
}

/// Resolver with a key for every provider
pub fn all_keys() -> Arc<CredentialResolver> {
    let resolver = Provider::all()
        .into_iter()
        .fold(CredentialResolver::in_memory(), |r, p| {
            r.with_override(p, format!("{}-key", p.id()))
        });
    Arc::new(resolver)
}

pub fn runner(gateway: &Arc<ScriptedGateway>) -> StageRunner {
    StageRunner::new(gateway.clone(), all_keys())
}
