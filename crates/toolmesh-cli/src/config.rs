use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use toolmesh_core::{ServerConfig, ToolCallSpec};
use toolmesh_router::ChainSettings;
use toolmesh_supervisor::SupervisorSettings;

/// Contents of the servers file.
#[derive(Debug, Deserialize)]
pub struct ServersFile {
    /// Servers to connect.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Supervisor overrides.
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    /// Chain polling overrides.
    #[serde(default)]
    pub chain: ChainSettings,
}

impl ServersFile {
    /// Parse `text` as JSON when `path` ends in `.json`, TOML otherwise, and
    /// validate every server.
    pub fn parse(path: &Path, text: &str) -> anyhow::Result<Self> {
        let file: ServersFile = if is_json(path) {
            serde_json::from_str(text)?
        } else {
            toml::from_str(text)?
        };

        let mut seen = HashSet::new();
        for server in &file.servers {
            server.validate()?;
            if !seen.insert(server.name.as_str()) {
                anyhow::bail!("duplicate server name '{}'", server.name);
            }
        }
        Ok(file)
    }

    /// Read and parse the servers file at `path`.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        Self::parse(path, &text)
    }
}

/// Read a JSON list of tool calls.
pub async fn load_calls(path: &Path) -> anyhow::Result<Vec<ToolCallSpec>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read chain file '{}': {e}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
