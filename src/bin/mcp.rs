//! uspark-mcp: MCP server exposing the project mirror to coding agents
//!
//! This MCP server exposes pull/list/status tools over stdio so an LLM
//! agent can materialize a project's files into its working directory
//! and inspect them without touching the sync engine.

use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolResult, Content, ErrorCode, ErrorData, Implementation, InitializeRequestParam,
        InitializeResult, ListToolsResult, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
    },
    schemars, service,
    transport::io::stdio,
    ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::PathBuf;

use uspark_sync::blob::{BlobStoreClient, BlobStoreConfig};
use uspark_sync::mirror::{ApiSnapshotClient, MirrorConfig, PullMirror};

/// Parameters for the uspark_pull tool
#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
struct PullParams {
    /// Project to pull; defaults to USPARK_PROJECT_ID
    #[serde(default)]
    project_id: Option<String>,
    /// Directory to write into; defaults to USPARK_OUTPUT_DIR
    #[serde(default)]
    output_dir: Option<String>,
}

/// Parameters for the uspark_list_files tool
#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
struct ListFilesParams {
    /// Project to list; defaults to USPARK_PROJECT_ID
    #[serde(default)]
    project_id: Option<String>,
}

/// Parameters for the uspark_status tool
#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
struct StatusParams {}

/// The MCP server for uSpark project mirrors
#[derive(Clone)]
struct UsparkMcp {
    config: MirrorConfig,
    blob_store_configured: bool,
}

impl UsparkMcp {
    fn new(config: MirrorConfig) -> Self {
        let blob_store_configured = BlobStoreConfig::from_env().is_ok();
        Self {
            config,
            blob_store_configured,
        }
    }

    /// Build a fresh mirror for one tool call
    fn mirror(&self) -> PullMirror<ApiSnapshotClient, BlobStoreClient> {
        let source = ApiSnapshotClient::new(&self.config.api_url, &self.config.api_token);
        let blobs = match BlobStoreConfig::from_env().and_then(BlobStoreClient::new) {
            Ok(client) => client,
            Err(_) => BlobStoreClient::unconfigured(),
        };
        PullMirror::new(source, blobs)
    }

    async fn pull(&self, params: PullParams) -> Result<String, String> {
        let project_id = params
            .project_id
            .unwrap_or_else(|| self.config.project_id.clone());
        let output_dir = params
            .output_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.output_dir.clone());

        let written = self
            .mirror()
            .pull_all(&project_id, &output_dir)
            .await
            .map_err(|e| e.to_string())?;

        Ok(format!("Pulled {} file(s) into {}", written, output_dir.display()))
    }

    async fn list_files(&self, params: ListFilesParams) -> Result<String, String> {
        let project_id = params
            .project_id
            .unwrap_or_else(|| self.config.project_id.clone());

        let paths = self
            .mirror()
            .list_files(&project_id)
            .await
            .map_err(|e| e.to_string())?;

        if paths.is_empty() {
            return Ok("Project has no files".to_string());
        }
        Ok(format!("{} file(s):\n{}", paths.len(), paths.join("\n")))
    }

    fn status(&self) -> String {
        format!(
            "API URL: {}\nProject: {}\nOutput directory: {}\nBlob store configured: {}",
            self.config.api_url,
            self.config.project_id,
            self.config.output_dir.display(),
            self.blob_store_configured,
        )
    }
}

/// Build a tool descriptor from a params type
fn tool<P: schemars::JsonSchema>(name: &'static str, description: &'static str) -> Tool {
    let schema = schemars::schema_for!(P);
    let schema_value = serde_json::to_value(schema).unwrap_or_default();
    Tool {
        name: name.into(),
        description: Some(description.into()),
        input_schema: serde_json::from_value(schema_value).unwrap_or_default(),
        annotations: None,
        icons: None,
        meta: None,
        output_schema: None,
        title: None,
    }
}

fn parse_params<P: serde::de::DeserializeOwned>(
    args: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<P, ErrorData> {
    serde_json::from_value(serde_json::Value::Object(args.unwrap_or_default())).map_err(|e| {
        ErrorData {
            code: ErrorCode::INVALID_PARAMS,
            message: Cow::Owned(format!("Invalid parameters: {}", e)),
            data: None,
        }
    })
}

impl ServerHandler for UsparkMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities {
                tools: Some(Default::default()),
                ..Default::default()
            },
            server_info: Implementation {
                name: "uspark-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: Some(
                "Use uspark_pull to materialize project files locally, uspark_list_files to \
                 inspect them, and uspark_status to check the configuration."
                    .into(),
            ),
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParam,
        _context: service::RequestContext<service::RoleServer>,
    ) -> Result<InitializeResult, ErrorData> {
        Ok(self.get_info())
    }

    async fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: service::RequestContext<service::RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: vec![
                tool::<PullParams>(
                    "uspark_pull",
                    "Pull all project files into the local output directory",
                ),
                tool::<ListFilesParams>(
                    "uspark_list_files",
                    "List the project's file paths without downloading content",
                ),
                tool::<StatusParams>(
                    "uspark_status",
                    "Show the mirror configuration this server is running with",
                ),
            ],
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: rmcp::model::CallToolRequestParam,
        _context: service::RequestContext<service::RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        match request.name.as_ref() {
            "uspark_pull" => {
                let params: PullParams = parse_params(request.arguments)?;
                match self.pull(params).await {
                    Ok(result) => Ok(CallToolResult::success(vec![Content::text(result)])),
                    Err(e) => Ok(CallToolResult::error(vec![Content::text(e)])),
                }
            }
            "uspark_list_files" => {
                let params: ListFilesParams = parse_params(request.arguments)?;
                match self.list_files(params).await {
                    Ok(result) => Ok(CallToolResult::success(vec![Content::text(result)])),
                    Err(e) => Ok(CallToolResult::error(vec![Content::text(e)])),
                }
            }
            "uspark_status" => Ok(CallToolResult::success(vec![Content::text(self.status())])),
            _ => Err(ErrorData {
                code: ErrorCode::METHOD_NOT_FOUND,
                message: Cow::Owned(format!("Unknown tool: {}", request.name)),
                data: None,
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = MirrorConfig::from_env()?;

    let server = UsparkMcp::new(config);

    // Start the MCP server on stdio
    let transport = stdio();
    server.serve(transport).await?;

    Ok(())
}
