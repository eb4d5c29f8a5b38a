use serde_json::{Map, Value};

use merchx_core::{ApiResponse, Engine, RequestOptions, ResponseMeta};

use crate::cli::ProductArgs;
use crate::error::CliError;

pub async fn run(engine: &Engine, args: &ProductArgs) -> Result<ApiResponse, CliError> {
    let mut options = RequestOptions::default();
    options.marketplace = args.marketplace.clone();

    match engine.manager.get_product(&args.asin, options).await {
        Some(record) => {
            let data = match serde_json::to_value(&record)? {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            Ok(ApiResponse::product(data, ResponseMeta::default()))
        }
        None => Ok(ApiResponse::error(
            format!("product '{}' is not available from any provider", args.asin),
            404,
            None,
        )),
    }
}
