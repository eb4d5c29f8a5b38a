use serde_json::{Map, Value};

use merchx_core::{ApiResponse, ResponseKind, ResponseMeta};
use merchx_queue::{JobOptions, ProcessOutcome, QueueEngine};

use crate::cli::QueueCommand;
use crate::error::CliError;

pub async fn run(queue: &QueueEngine, command: &QueueCommand) -> Result<ApiResponse, CliError> {
    let data = match command {
        QueueCommand::Add(args) => {
            let payload: Value = serde_json::from_str(&args.payload)
                .map_err(|error| CliError::Command(format!("invalid payload JSON: {error}")))?;
            let options = JobOptions {
                priority: args.priority,
                ..JobOptions::default()
            };

            let job_id = queue.add(&args.action, payload, options).await;
            let mut data = Map::new();
            data.insert(String::from("job_id"), Value::from(job_id));

            if args.process_now {
                let outcome = queue.process_queue(None).await;
                data.insert(String::from("pass"), outcome_value(&outcome)?);
                if let Some(job) = queue.get_job(job_id) {
                    data.insert(String::from("job"), serde_json::to_value(&job)?);
                }
            }
            data
        }
        QueueCommand::Process(args) => {
            let outcome = queue.process_queue(args.limit).await;
            let mut data = Map::new();
            data.insert(String::from("pass"), outcome_value(&outcome)?);
            data
        }
        QueueCommand::Status(args) => {
            let status = queue.get_batch_status(&args.batch_id);
            match serde_json::to_value(&status)? {
                Value::Object(map) => map,
                _ => Map::new(),
            }
        }
        QueueCommand::Retry(args) => {
            let reset = queue.retry_failed_jobs(args.batch_id.as_deref());
            let mut data = Map::new();
            data.insert(String::from("reset"), Value::from(reset));
            data
        }
        QueueCommand::Stats => match serde_json::to_value(queue.statistics())? {
            Value::Object(map) => map,
            _ => Map::new(),
        },
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

fn outcome_value(outcome: &ProcessOutcome) -> Result<Value, CliError> {
    match outcome {
        ProcessOutcome::AlreadyRunning => Ok(Value::String(String::from("already_running"))),
        ProcessOutcome::Completed(report) => Ok(serde_json::to_value(report)?),
    }
}
