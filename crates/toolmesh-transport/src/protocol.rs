//! JSON-RPC 2.0 message types and the two tool-protocol calls every server
//! understands: `tools/list` (capability probe) and `tools/call`.

use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use toolmesh_core::{ToolmeshError, ToolmeshResult};

/// Well-known method names.
pub mod methods {
    /// Argument-less capability listing, also used as the liveness probe.
    pub const LIST_TOOLS: &str = "tools/list";
    /// Tool invocation with `{name, arguments}` params.
    pub const CALL_TOOL: &str = "tools/call";
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Request id, unique per transport.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response. Plain `{result}` / `{error: {message}}` bodies
/// parse too, since every other field has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    #[allow(dead_code)]
    jsonrpc: String,
    /// Id of the request this answers.
    #[serde(default)]
    pub id: Option<u64>,
    /// Success payload.
    #[serde(default)]
    pub result: serde_json::Value,
    /// Error payload.
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    /// Error code (0 when the server did not send one).
    #[serde(default)]
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional extra data.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Tool definition from the `tools/list` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpToolDef {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments.
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Turn a response into its result, mapping an error object to
/// [`ToolmeshError::Tool`].
pub fn into_result(server: &str, response: JsonRpcResponse) -> ToolmeshResult<serde_json::Value> {
    match response.error {
        Some(err) if err.code != 0 => Err(ToolmeshError::Tool {
            server: server.to_string(),
            message: format!("[{}] {}", err.code, err.message),
        }),
        Some(err) => Err(ToolmeshError::Tool {
            server: server.to_string(),
            message: err.message,
        }),
        None => Ok(response.result),
    }
}

/// List the tools a server exposes.
pub async fn list_tools(transport: &dyn Transport) -> ToolmeshResult<Vec<McpToolDef>> {
    let result = transport.send(methods::LIST_TOOLS, None).await?;
    let tools = result
        .get("tools")
        .cloned()
        .unwrap_or_else(|| serde_json::json!([]));
    Ok(serde_json::from_value(tools)?)
}

/// Invoke a tool. A result flagged `"isError": true` is returned as
/// [`ToolmeshError::Tool`].
pub async fn call_tool(
    transport: &dyn Transport,
    name: &str,
    arguments: serde_json::Value,
) -> ToolmeshResult<serde_json::Value> {
    let params = serde_json::json!({
        "name": name,
        "arguments": arguments,
    });

    let result = transport.send(methods::CALL_TOOL, Some(params)).await?;

    if result.get("isError").and_then(serde_json::Value::as_bool) == Some(true) {
        return Err(ToolmeshError::Tool {
            server: transport.name().to_string(),
            message: content_text(&result).unwrap_or_else(|| format!("tool '{name}' failed")),
        });
    }

    Ok(result)
}

/// Join the text blocks of an MCP `content` array.
fn content_text(result: &serde_json::Value) -> Option<String> {
    let blocks = result.get("content")?.as_array()?;
    let text: Vec<&str> = blocks
        .iter()
        .filter_map(|b| b.get("text").and_then(serde_json::Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}
