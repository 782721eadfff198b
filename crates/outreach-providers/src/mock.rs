//! Deterministic mock provider for tests and unconfigured environments.
//!
//! Behavior is scripted per recipient: fail always, fail the first N calls,
//! or panic (for batch-isolation fault injection). Everything else succeeds
//! with sequential `mock-N` message ids, and every accepted message is
//! recorded for assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use outreach_core::error::Result;
use outreach_core::traits::Provider;
use outreach_core::types::{OutboundMessage, SendResult};

#[derive(Debug, Clone)]
enum Script {
    FailAlways(String),
    FailFirst(u32),
    Panic,
}

#[derive(Default)]
pub struct MockProvider {
    counter: AtomicU64,
    scripts: Mutex<HashMap<String, Script>>,
    /// Per-recipient call counts, used by `FailFirst`.
    calls: Mutex<HashMap<String, u32>>,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `recipient` fails with `error`.
    pub fn fail_always(self, recipient: &str, error: &str) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(recipient.to_string(), Script::FailAlways(error.to_string()));
        self
    }

    /// The first `n` sends to `recipient` fail, then sends succeed.
    pub fn fail_first(self, recipient: &str, n: u32) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(recipient.to_string(), Script::FailFirst(n));
        self
    }

    /// Sends to `recipient` panic — simulates a programming fault inside a
    /// send task for batch-isolation tests.
    pub fn panic_on(self, recipient: &str) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(recipient.to_string(), Script::Panic);
        self
    }

    /// Messages accepted so far, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendResult> {
        let script = self.scripts.lock().unwrap().get(&message.to).cloned();
        match script {
            Some(Script::Panic) => panic!("mock provider: scripted panic for {}", message.to),
            Some(Script::FailAlways(error)) => {
                return Ok(SendResult::failure(self.name(), error));
            }
            Some(Script::FailFirst(n)) => {
                let mut calls = self.calls.lock().unwrap();
                let seen = calls.entry(message.to.clone()).or_insert(0);
                *seen += 1;
                if *seen <= n {
                    return Ok(SendResult::failure(
                        self.name(),
                        format!("scripted failure {seen}/{n}"),
                    ));
                }
            }
            None => {}
        }

        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(message.clone());
        Ok(SendResult::ok(self.name(), format!("mock-{seq}")))
    }
}
