//! Tool trait and registry
//!
//! Tools are external collaborators with a structured-args-in/text-out
//! contract. HTTP-backed tools call the web-search provider and the
//! research data API service.

use crate::error::{OrchestrationError, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Trait for a single collaborator tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn invoke(&self, args: &Value) -> Result<String>;
}

/// Tool registry for looking up and dispatching tools by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        OrchestrationError::ToolError(format!("Expected string argument '{}'", key))
    })
}

#[derive(Clone)]
struct ResearchApiClient {
    client: Client,
    base_url: String,
}

impl ResearchApiClient {
    fn from_env() -> Option<Self> {
        let base_url = env::var("RESEARCH_API_BASE_URL").ok()?;

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .ok()?;

        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                OrchestrationError::ToolError(format!(
                    "Research API request failed for {}: {}",
                    path, e
                ))
            })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| OrchestrationError::ToolError(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(OrchestrationError::ToolError(format!(
                "Research API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

fn render_response(body: &Value) -> String {
    // Collaborator services return either a plain text report or a
    // structured payload; pass structured payloads through pretty-printed.
    body.get("report")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string())
        })
}

/// Web search via the Tavily API.
pub struct WebSearchTool {
    client: Client,
    api_key: Option<String>,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, api_key }
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Retrieve live financial data or macro information from the web"
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let api_key = self.api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
            OrchestrationError::ToolError("TAVILY_API_KEY not configured".to_string())
        })?;
        let query = require_str(args, "query")?;

        let response = self
            .client
            .post("https://api.tavily.com/search")
            .json(&json!({
                "api_key": api_key,
                "query": query,
                "max_results": 5,
            }))
            .send()
            .await
            .map_err(|e| OrchestrationError::ToolError(format!("Search request failed: {}", e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| OrchestrationError::ToolError(format!("Invalid search response: {}", e)))?;

        if !status.is_success() {
            return Err(OrchestrationError::ToolError(format!(
                "Search API returned {}: {}",
                status, body
            )));
        }

        let mut out = String::new();
        if let Some(answer) = body.get("answer").and_then(Value::as_str) {
            out.push_str(answer);
            out.push_str("\n\n");
        }
        if let Some(results) = body.get("results").and_then(Value::as_array) {
            for result in results {
                let title = result.get("title").and_then(Value::as_str).unwrap_or("");
                let content = result.get("content").and_then(Value::as_str).unwrap_or("");
                out.push_str(&format!("- {}: {}\n", title, content));
            }
        }

        if out.trim().is_empty() {
            out = body.to_string();
        }

        Ok(out)
    }
}

/// Company fundamentals via the research data API.
pub struct CompanyFundamentalsTool {
    api: Option<ResearchApiClient>,
}

#[async_trait::async_trait]
impl Tool for CompanyFundamentalsTool {
    fn name(&self) -> &'static str {
        "company_fundamentals"
    }

    fn description(&self) -> &'static str {
        "Fetch fundamental data and calculated metrics for one ticker"
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let api = self.api.as_ref().ok_or_else(|| {
            OrchestrationError::ToolError("RESEARCH_API_BASE_URL is not configured".to_string())
        })?;

        let ticker = require_str(args, "ticker")?;
        let response = api
            .post_json("/api/v1/fundamentals", &json!({ "ticker": ticker }))
            .await?;

        Ok(render_response(&response))
    }
}

/// Historical performance and CAGR comparison via the research data API.
pub struct HistoricalPerformanceTool {
    api: Option<ResearchApiClient>,
}

#[async_trait::async_trait]
impl Tool for HistoricalPerformanceTool {
    fn name(&self) -> &'static str {
        "historical_performance"
    }

    fn description(&self) -> &'static str {
        "Fetch historical performance with CAGR for one or more tickers"
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let api = self.api.as_ref().ok_or_else(|| {
            OrchestrationError::ToolError("RESEARCH_API_BASE_URL is not configured".to_string())
        })?;

        let tickers = require_str(args, "tickers")?;
        let period = args
            .get("period")
            .and_then(Value::as_str)
            .unwrap_or("5y");

        let response = api
            .post_json(
                "/api/v1/performance",
                &json!({ "tickers": tickers, "period": period }),
            )
            .await?;

        Ok(render_response(&response))
    }
}

/// Canned-response tool for development and testing.
pub struct StaticTool {
    pub tool_name: &'static str,
    pub response: &'static str,
}

#[async_trait::async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &'static str {
        self.tool_name
    }

    fn description(&self) -> &'static str {
        "Static development tool"
    }

    async fn invoke(&self, _args: &Value) -> Result<String> {
        Ok(self.response.to_string())
    }
}

/// Create the default registry with the HTTP-backed collaborator tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let research_api = ResearchApiClient::from_env();
    let tavily_api_key = env::var("TAVILY_API_KEY").ok();

    registry.register(Arc::new(WebSearchTool::new(tavily_api_key)));
    registry.register(Arc::new(CompanyFundamentalsTool {
        api: research_api.clone(),
    }));
    registry.register(Arc::new(HistoricalPerformanceTool { api: research_api }));

    registry
}
