use std::str::FromStr;

use serde_json::Map;

use merchx_core::{ApiResponse, Engine, ProviderId, ResponseKind, ResponseMeta};

use crate::cli::ConnectionArgs;
use crate::error::CliError;

pub async fn run(engine: &Engine, args: &ConnectionArgs) -> Result<ApiResponse, CliError> {
    let provider = args
        .provider
        .as_deref()
        .map(ProviderId::from_str)
        .transpose()?;

    let results = engine.manager.test_connection(provider).await;

    let mut data = Map::new();
    for (id, test) in results {
        data.insert(id.as_str().to_owned(), serde_json::to_value(&test)?);
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
