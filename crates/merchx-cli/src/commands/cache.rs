use serde_json::{Map, Value};

use merchx_core::{ApiResponse, Engine, ResponseKind, ResponseMeta};

use crate::cli::CacheCommand;
use crate::error::CliError;

pub fn run(engine: &Engine, command: &CacheCommand) -> Result<ApiResponse, CliError> {
    let data = match command {
        CacheCommand::Stats => {
            let stats = engine.cache.statistics();
            let mut data = match serde_json::to_value(stats)? {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            data.insert(String::from("hit_rate"), Value::from(stats.hit_rate()));
            data.insert(String::from("enabled"), Value::from(engine.cache.is_enabled()));
            data
        }
        CacheCommand::Size => match serde_json::to_value(engine.cache.size_info())? {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        CacheCommand::Clear(args) => {
            let mut data = Map::new();
            match &args.tag {
                Some(tag) => {
                    data.insert(
                        String::from("deleted"),
                        Value::from(engine.cache.delete_by_tag(tag)),
                    );
                }
                None => {
                    engine.cache.clear_all();
                    data.insert(String::from("cleared"), Value::from(true));
                }
            }
            data
        }
    };

    Ok(ApiResponse {
        success: true,
        kind: ResponseKind::Unknown,
        data,
        meta: ResponseMeta::default(),
        error: None,
        raw_response: None,
    })
}
