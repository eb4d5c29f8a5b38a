use serde_json::Map;

use merchx_core::{ApiResponse, Engine, ResponseKind, ResponseMeta};

use crate::error::CliError;

pub fn run(engine: &Engine) -> Result<ApiResponse, CliError> {
    let mut data = Map::new();
    for (id, quota) in engine.manager.quota_info() {
        data.insert(id.as_str().to_owned(), serde_json::to_value(&quota)?);
    }

    Ok(ApiResponse {
        success: true,
        kind: ResponseKind::Unknown,
        data,
        meta: ResponseMeta::default(),
        error: None,
        raw_response: None,
    })
}
