//! Shared fixtures for foreman-core integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use foreman_core::{
    ExecutionContext, ForemanConfig, ForemanService, RiskLevel, ToolAdapter, ToolDescriptor,
    ToolError, ToolHandler, ToolRegistry,
};
use foreman_state::{MemoryRunStore, RunStore};
use serde_json::{json, Value};

/// One scripted reaction of a fake tool.
#[derive(Debug, Clone)]
pub enum Step {
    Return(Value),
    Fail(ToolError),
    /// Sleep, then return a payload. Long sleeps exercise timeouts.
    Sleep(Duration),
}

/// Tool that replays a script, then keeps returning `{"ok": true}`.
#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

impl ScriptedAdapter {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new([])
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new(std::iter::repeat(step).take(64))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolAdapter for ScriptedAdapter {
    async fn call(
        &self,
        tool: &ToolDescriptor,
        _input: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(ctx.workdir.is_dir(), "context workdir must exist while the tool runs");
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(json!({"ok": true, "tool": tool.id})),
            Some(Step::Return(value)) => Ok(value),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Sleep(d)) => {
                tokio::time::sleep(d).await;
                Ok(json!({"ok": true, "tool": tool.id}))
            }
        }
    }
}

pub fn tool(id: &str, capability: &str, risk: RiskLevel) -> ToolDescriptor {
    ToolDescriptor::new(id, capability, risk)
}

pub fn scripted(adapter: &Arc<ScriptedAdapter>) -> ToolHandler {
    ToolHandler::External(Arc::clone(adapter) as Arc<dyn ToolAdapter>)
}

pub fn registry(tools: Vec<(ToolDescriptor, ToolHandler)>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for (descriptor, handler) in tools {
        registry.register(descriptor, handler).unwrap();
    }
    registry
}

pub fn service(config: ForemanConfig, registry: ToolRegistry) -> (ForemanService, Arc<MemoryRunStore>) {
    let store = Arc::new(MemoryRunStore::new());
    let service = ForemanService::new(config, registry, Arc::clone(&store) as Arc<dyn RunStore>).unwrap();
    (service, store)
}

/// Defaults with short backoff so tests stay fast in real time.
pub fn fast_config() -> ForemanConfig {
    let mut config = ForemanConfig::default();
    config.executor.backoff_base_ms = 10;
    config.executor.backoff_cap_ms = 50;
    config
}
