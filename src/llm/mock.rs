//! Scripted completion model for development & testing
//! Keeps the workflow runnable without a live LLM

use crate::llm::{CompletionModel, PromptPurpose, PromptSpec};
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Replies per prompt purpose from queued responses, falling back to a fixed
/// reply once a queue runs dry.
pub struct ScriptedModel {
    queues: Mutex<HashMap<PromptPurpose, VecDeque<String>>>,
    fallback: HashMap<PromptPurpose, String>,
    calls: Mutex<HashMap<PromptPurpose, usize>>,
    prompts: Mutex<Vec<PromptSpec>>,
    delay: Option<(PromptPurpose, Duration)>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            fallback: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Queue one reply for `purpose`.
    pub fn reply(self, purpose: PromptPurpose, text: impl Into<String>) -> Self {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(purpose).or_default().push_back(text.into());
        }
        self
    }

    /// Reply used whenever the queue for `purpose` is empty.
    pub fn always(mut self, purpose: PromptPurpose, text: impl Into<String>) -> Self {
        self.fallback.insert(purpose, text.into());
        self
    }

    /// Sleep before answering prompts of `purpose`.
    pub fn with_delay(mut self, purpose: PromptPurpose, delay: Duration) -> Self {
        self.delay = Some((purpose, delay));
        self
    }

    pub fn calls(&self, purpose: PromptPurpose) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&purpose).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Every prompt received so far, in order.
    pub fn prompts(&self) -> Vec<PromptSpec> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &PromptSpec) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(prompt.purpose).or_insert(0) += 1;
        }
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }

        if let Some((purpose, delay)) = self.delay {
            if purpose == prompt.purpose {
                tokio::time::sleep(delay).await;
            }
        }

        let queued = self
            .queues
            .lock()
            .ok()
            .and_then(|mut queues| queues.get_mut(&prompt.purpose).and_then(VecDeque::pop_front));

        Ok(queued
            .or_else(|| self.fallback.get(&prompt.purpose).cloned())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let model = ScriptedModel::new()
            .reply(PromptPurpose::Draft, "first")
            .always(PromptPurpose::Draft, "again");
        let prompt = PromptSpec::text(PromptPurpose::Draft, "s", "u");

        assert_eq!(model.complete(&prompt).await.unwrap(), "first");
        assert_eq!(model.complete(&prompt).await.unwrap(), "again");
        assert_eq!(model.calls(PromptPurpose::Draft), 2);
        assert_eq!(model.calls(PromptPurpose::Verify), 0);
    }
}
