use merchx_core::ApiResponse;

use crate::error::CliError;

pub fn render(response: &ApiResponse, pretty: bool) -> Result<(), CliError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(response)?
    } else {
        serde_json::to_string(response)?
    };
    println!("{rendered}");
    Ok(())
}
