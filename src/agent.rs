use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{ChatMessage, LlmClient, ToolCall, ToolSpec};

pub const MAX_FUNCTION_CALLS: usize = 5;

/// Upper bound on remembered messages at the start of a turn. Older turns are
/// dropped whole so tool calls never lose their results.
pub const MEMORY_WINDOW: usize = 24;

#[async_trait]
pub trait AgentTool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn call(&self, args: &Value) -> Result<String>;
}

/// Function-calling agent: the model decides when to call a tool, tool outputs
/// are fed back, and the loop ends on the first plain assistant reply.
#[derive(Clone)]
pub struct ToolAgent {
    llm: Arc<dyn LlmClient>,
    tools: Vec<Arc<dyn AgentTool>>,
}

impl ToolAgent {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Vec<Arc<dyn AgentTool>>) -> Self {
        Self { llm, tools }
    }

    pub async fn chat(&self, memory: &mut Vec<ChatMessage>, prompt: &str) -> Result<String> {
        memory.push(ChatMessage::user(prompt));
        trim_memory(memory, MEMORY_WINDOW);

        let specs: Vec<ToolSpec> = self.tools.iter().map(|tool| tool.spec()).collect();
        let mut rounds = 0;

        loop {
            let tools: &[ToolSpec] = if rounds < MAX_FUNCTION_CALLS {
                &specs
            } else {
                &[]
            };
            let reply = self.llm.chat(&memory[..], tools).await?;

            if reply.tool_calls.is_empty() || tools.is_empty() {
                let text = reply.text().to_string();
                memory.push(ChatMessage::assistant(text.clone()));
                return Ok(text);
            }

            let calls = reply.tool_calls.clone();
            memory.push(reply);
            for call in &calls {
                let output = self.run_tool(call).await;
                memory.push(ChatMessage::tool_result(&call.id, output));
            }
            rounds += 1;
        }
    }

    async fn run_tool(&self, call: &ToolCall) -> String {
        let Some(tool) = self
            .tools
            .iter()
            .find(|tool| tool.spec().name == call.function.name)
        else {
            tracing::warn!(tool = %call.function.name, "model requested an unknown tool");
            return format!("Error: tool {} does not exist", call.function.name);
        };

        let args: Value = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(err) => return format!("Error: invalid tool arguments: {err}"),
        };

        tracing::info!(tool = %call.function.name, args = %args, "calling tool");
        match tool.call(&args).await {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(tool = %call.function.name, "tool call failed: {err:#}");
                format!("Error: {err}")
            }
        }
    }
}

/// Drops the oldest turns until at most `window` messages remain. Cuts only
/// land on user messages; the current turn is always kept.
fn trim_memory(memory: &mut Vec<ChatMessage>, window: usize) {
    if memory.len() <= window {
        return;
    }

    let turn_starts: Vec<usize> = memory
        .iter()
        .enumerate()
        .filter(|(_, message)| message.role == "user")
        .map(|(index, _)| index)
        .collect();
    let cut = turn_starts
        .iter()
        .copied()
        .find(|&start| memory.len() - start <= window)
        .or_else(|| turn_starts.last().copied())
        .unwrap_or(0);

    if cut > 0 {
        memory.drain(..cut);
        tracing::debug!(dropped = cut, kept = memory.len(), "trimmed agent memory");
    }
}
