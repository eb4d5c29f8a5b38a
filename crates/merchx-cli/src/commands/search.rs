use merchx_core::{ApiResponse, Engine, RequestOptions, ResponseMeta, SearchRequest};
use serde_json::Value;

use crate::cli::SearchArgs;
use crate::error::CliError;

pub async fn run(engine: &Engine, args: &SearchArgs) -> Result<ApiResponse, CliError> {
    let mut options = RequestOptions::default();
    options.marketplace = args.marketplace.clone();
    options.page = Some(args.page);

    let request = SearchRequest::new(&args.keyword, options)?;
    let results = engine.manager.search_products(request).await;

    let products = results
        .products
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<Value>, _>>()?;

    let mut response = ApiResponse::search(products, ResponseMeta::default());
    response.set("total_results", Value::from(results.total_results));
    response.set("current_page", Value::from(results.current_page));
    response.set("total_pages", Value::from(results.total_pages));
    Ok(response)
}
