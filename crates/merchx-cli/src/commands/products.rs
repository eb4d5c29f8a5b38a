use serde_json::{Map, Value};

use merchx_core::{ApiResponse, Engine, RequestOptions, ResponseKind, ResponseMeta};

use crate::cli::ProductsArgs;
use crate::error::CliError;

pub async fn run(engine: &Engine, args: &ProductsArgs) -> Result<ApiResponse, CliError> {
    let mut options = RequestOptions::default();
    options.marketplace = args.marketplace.clone();

    let result = engine
        .manager
        .get_multiple_products(args.asins.clone(), options)
        .await;

    let mut data = Map::new();
    data.insert(String::from("products"), serde_json::to_value(&result.products)?);
    data.insert(String::from("failed"), serde_json::to_value(&result.failed)?);
    data.insert(
        String::from("requested"),
        Value::from(args.asins.len() as u64),
    );

    Ok(ApiResponse {
        success: true,
        kind: ResponseKind::Unknown,
        data,
        meta: ResponseMeta::default(),
        error: None,
        raw_response: None,
    })
}
