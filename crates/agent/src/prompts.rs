//! Prompt assembly.
//!
//! Three templates drive the whole runtime: the planner (request → task
//! list), the repair prompt (failed task → replacement or abort), and the
//! interpretation prompt (raw results → one sentence for the user).

use serde_json::Value;

use maestro_domain::error::CallError;
use maestro_domain::task::Task;
use maestro_llm::ChatMessage;
use maestro_mcp::ToolCatalog;
use maestro_state::ConversationEntry;

/// Appended to every template; guards against the observed model habit of
/// leaking the task description into tool arguments.
const JSON_ONLY_FOOTER: &str =
    "Output only JSON. Do not include the key `description` inside `params`.";

/// Everything the planner template draws on.
pub struct PromptContext<'a> {
    pub catalog: &'a ToolCatalog,
    pub conversation: &'a [ConversationEntry],
    pub memory: &'a serde_json::Map<String, Value>,
    pub custom_instructions: Option<&'a str>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Planner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn planner_messages(ctx: &PromptContext<'_>, user_request: &str) -> Vec<ChatMessage> {
    let mut system = String::from(
        "You are a planning assistant. Decompose the user's request into a \
         sequence of tool calls.\n\n\
         Answer with a single JSON document:\n\
         {\"tasks\": [{\"tool\": \"<name>\", \"params\": {...}, \"description\": \"<short summary>\"}, ...]}\n\n\
         Rules:\n\
         - Use only the tools listed below, with their declared parameter names and types.\n\
         - If no tool is needed (greeting, thanks, a question you can answer \
           directly), return {\"tasks\": [], \"response\": \"<your answer>\"}.\n\
         - If required information is missing, return exactly one task with \
           \"tool\": \"CLARIFICATION\" and a \"question\" field in params asking the user for it.\n\
         - When a later step needs an earlier step's result, write the string \
           \"{{previous_result}}\" as the parameter value, or \
           \"DEPENDENCY:<description of the value>\" when it is not simply the previous result.\n",
    );

    system.push_str("\nAvailable tools:\n");
    system.push_str(&render_catalog(ctx.catalog));

    if !ctx.memory.is_empty() {
        system.push_str("\nKnown facts about this session:\n");
        for (key, value) in ctx.memory {
            system.push_str(&format!("- {key} = {}\n", inline(value)));
        }
    }

    if let Some(instructions) = ctx.custom_instructions {
        system.push_str("\nAdditional instructions:\n");
        system.push_str(instructions);
        system.push('\n');
    }

    system.push('\n');
    system.push_str(JSON_ONLY_FOOTER);

    let mut messages = vec![ChatMessage::system(system)];
    for entry in ctx.conversation {
        match entry.role.as_str() {
            "user" => messages.push(ChatMessage::user(&entry.content)),
            "assistant" => messages.push(ChatMessage::assistant(&entry.content)),
            _ => messages.push(ChatMessage::system(&entry.content)),
        }
    }
    messages.push(ChatMessage::user(user_request));
    messages
}

/// Render every tool as `server.tool(param: type[, required]) - description`.
pub fn render_catalog(catalog: &ToolCatalog) -> String {
    if catalog.is_empty() {
        return "(no tools connected)\n".into();
    }
    let mut out = String::new();
    for desc in catalog.iter() {
        out.push_str(&desc.signature());
        out.push('\n');
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repair
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn repair_messages(
    task: &Task,
    error: &CallError,
    recent_results: &[Task],
    catalog: &ToolCatalog,
) -> Vec<ChatMessage> {
    let mut prompt = format!(
        "A tool call failed and needs fixing.\n\n\
         Failed task:\n  tool: {}\n  params: {}\n  error: {}\n",
        task.tool,
        Value::Object(task.params.clone()),
        error,
    );

    if !recent_results.is_empty() {
        prompt.push_str("\nResults of preceding tasks:\n");
        for done in recent_results {
            prompt.push_str(&format!(
                "  {} ({}): {}\n",
                done.task_id,
                done.tool,
                inline(done.result.as_ref().unwrap_or(&Value::Null)),
            ));
        }
    }

    prompt.push_str("\nAvailable tools:\n");
    prompt.push_str(&render_catalog(catalog));

    prompt.push_str(
        "\nAnswer with a corrected task as a single JSON document \
         {\"tool\": \"<name>\", \"params\": {...}, \"description\": \"<summary>\"} \
         or, if the failure cannot be fixed, {\"abort\": true, \"reason\": \"<why>\"}.\n",
    );
    prompt.push('\n');
    prompt.push_str(JSON_ONLY_FOOTER);

    vec![ChatMessage::user(prompt)]
}

/// Resolve a `DEPENDENCY:<pointer>` placeholder from completed results.
pub fn dependency_messages(pointer: &str, recent_results: &[Task]) -> Vec<ChatMessage> {
    let mut prompt = format!(
        "A pending tool call needs a value described as: {pointer}\n\n\
         Completed task results:\n"
    );
    for done in recent_results {
        prompt.push_str(&format!(
            "  {} ({}): {}\n",
            done.task_id,
            done.tool,
            inline(done.result.as_ref().unwrap_or(&Value::Null)),
        ));
    }
    prompt.push_str(
        "\nAnswer with {\"value\": <the value>} as a single JSON document. \
         Keep numbers as numbers.\n",
    );
    prompt.push('\n');
    prompt.push_str(JSON_ONLY_FOOTER);

    vec![ChatMessage::user(prompt)]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interpretation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn interpretation_messages(user_request: &str, results: &[Task]) -> Vec<ChatMessage> {
    let mut prompt = format!(
        "The user asked: {user_request}\n\nThe tools produced:\n"
    );
    for done in results {
        prompt.push_str(&format!(
            "  {}: {}\n",
            done.tool,
            inline(done.result.as_ref().unwrap_or(&Value::Null)),
        ));
    }
    prompt.push_str(
        "\nAnswer the user in one short, natural sentence. \
         Include the concrete result value. Output plain text, not JSON.\n",
    );
    vec![ChatMessage::user(prompt)]
}

/// Stricter re-prompt after a plan that would not parse.
pub fn plan_retry_messages(
    ctx: &PromptContext<'_>,
    user_request: &str,
    bad_output: &str,
) -> Vec<ChatMessage> {
    let mut messages = planner_messages(ctx, user_request);
    messages.push(ChatMessage::assistant(bad_output));
    messages.push(ChatMessage::user(
        "That was not valid JSON. Return only a valid JSON document with a \
         `tasks` array. No prose, no markdown fences.",
    ));
    messages
}

fn inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
