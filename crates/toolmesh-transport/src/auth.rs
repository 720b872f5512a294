//! Request decoration: configured headers plus already-resolved credentials.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use toolmesh_core::{AuthConfig, AuthKind, ToolmeshError, ToolmeshResult};

/// Header carrying API keys.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Configured headers followed by the credential header, if any.
pub fn header_pairs(
    headers: &BTreeMap<String, String>,
    auth: Option<&AuthConfig>,
) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(auth) = auth {
        let pair = match auth.kind {
            AuthKind::Bearer => ("Authorization".to_string(), format!("Bearer {}", auth.value)),
            AuthKind::ApiKey => (API_KEY_HEADER.to_string(), auth.value.clone()),
            AuthKind::Basic => (
                "Authorization".to_string(),
                format!("Basic {}", STANDARD.encode(auth.value.as_bytes())),
            ),
        };
        pairs.push(pair);
    }

    pairs
}

/// Build a reqwest header map, rejecting names or values HTTP can't carry.
pub(crate) fn header_map(pairs: &[(String, String)]) -> ToolmeshResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ToolmeshError::Config(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ToolmeshError::Config(format!("invalid value for header '{name}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
