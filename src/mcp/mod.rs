//! MCP (Model Context Protocol) server side, on top of `rmcp`.
//!
//! [`McpServer`] exposes the tool registry through `tools/list` and
//! `tools/call`; `rmcp` owns the JSON-RPC framing, `initialize` and `ping`.
//! [`server`] mounts it as a stateless streamable-HTTP endpoint.

pub mod server;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Implementation, InitializeRequestParam,
    InitializeResult, JsonObject, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
    ServerCapabilities, ServerInfo, Tool as McpTool,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleServer, ServerHandler};
use serde_json::Value;
use tracing::{debug, warn};

use crate::tools::{ToolDefinition, ToolError, ToolRegistry};

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: [ProtocolVersion; 3] = [
    ProtocolVersion::V_2025_06_18,
    ProtocolVersion::V_2025_03_26,
    ProtocolVersion::V_2024_11_05,
];

const SERVER_NAME: &str = "js-eval";
const SERVER_TITLE: &str = "JavaScript Evaluator";
const SERVER_VERSION: &str = "v0.1.0";

/// Echoes the client's revision when supported, else offers our default.
pub fn negotiate_version(requested: &ProtocolVersion) -> ProtocolVersion {
    if SUPPORTED_PROTOCOL_VERSIONS.contains(requested) {
        requested.clone()
    } else {
        ProtocolVersion::LATEST
    }
}

impl From<ToolError> for ErrorData {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::InvalidParams(_) => ErrorData::invalid_params(e.to_string(), None),
            ToolError::Internal(_) => ErrorData::internal_error(e.to_string(), None),
        }
    }
}

impl From<ToolDefinition> for McpTool {
    fn from(def: ToolDefinition) -> Self {
        let schema = match def.input_schema {
            Value::Object(schema) => schema,
            _ => JsonObject::new(),
        };
        McpTool {
            title: Some(def.title),
            ..McpTool::new(def.name, def.description, schema)
        }
    }
}

/// Serves the registered tools to MCP clients.
#[derive(Clone)]
pub struct McpServer {
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> Vec<McpTool> {
        self.tools
            .definitions()
            .into_iter()
            .map(McpTool::from)
            .collect()
    }

    /// Runs tool `name`. Tool output, including evaluation failures, is
    /// returned as structured content; only bad calls become errors.
    pub async fn call(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, ErrorData> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ErrorData::invalid_params(format!("unknown tool: {name}"), None))?;

        debug!("Calling tool {name}");
        let output = tool
            .execute(Value::Object(arguments.unwrap_or_default()))
            .await
            .inspect_err(|e| warn!("Tool {name} failed: {e}"))?;
        Ok(CallToolResult::structured(output))
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some(SERVER_TITLE.to_string()),
                version: SERVER_VERSION.to_string(),
                ..Implementation::default()
            },
            instructions: Some(
                "Call eval-js with {\"code\": \"...\"}; the value of the last expression \
                 comes back as {\"result\": ...}, failures as {\"error\": {\"code\", \"message\"}}."
                    .to_string(),
            ),
        }
    }

    async fn initialize(
        &self,
        request: InitializeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, ErrorData> {
        let protocol_version = negotiate_version(&request.protocol_version);
        debug!(
            "Initialize from {} {} (protocol {})",
            request.client_info.name, request.client_info.version, protocol_version
        );
        if context.peer.peer_info().is_none() {
            context.peer.set_peer_info(request);
        }
        Ok(InitializeResult {
            protocol_version,
            ..self.get_info()
        })
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        tokio::select! {
            result = self.call(&request.name, request.arguments) => result,
            _ = context.ct.cancelled() => {
                Err(ErrorData::internal_error("request canceled by client", None))
            }
        }
    }
}
