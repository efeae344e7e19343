//! The api-call step: one templated HTTP operation.

use super::{AttemptError, AttemptOutcome, StepRunner};
use crate::context::ExecutionContext;
use crate::expression::Evaluator;
use crate::workflow::ApiCallStep;
use cliforge_core::types::HttpRequest;
use log::debug;
use serde_json::json;
use std::collections::HashMap;

pub(crate) async fn run(
    runner: &StepRunner,
    payload: &ApiCallStep,
    context: &ExecutionContext,
) -> AttemptOutcome {
    let evaluator = Evaluator::new(context);

    let endpoint = match evaluator.interpolate_string(&payload.endpoint) {
        Ok(endpoint) => endpoint,
        Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
    };
    let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint
    } else {
        format!(
            "{}/{}",
            runner.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    };

    let method = payload.method.clone().unwrap_or_else(|| "GET".to_string());
    let mut request = HttpRequest::new(method, url);

    for (name, template) in &payload.headers {
        match evaluator.interpolate_string(template) {
            Ok(value) => {
                request.headers.insert(name.clone(), value);
            }
            Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
        }
    }
    for (name, template) in &payload.query {
        match evaluator.interpolate_string(template) {
            Ok(value) => request.query.push((name.clone(), value)),
            Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
        }
    }
    if let Some(body) = &payload.body {
        match evaluator.interpolate(body) {
            Ok(body) => {
                if !request.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                    request
                        .headers
                        .insert("Content-Type".to_string(), "application/json".to_string());
                }
                request.body = Some(body);
            }
            Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
        }
    }

    debug!("api-call {} {}", request.method, request.url);
    let response = match runner.transport.execute(request, &runner.cancel).await {
        Ok(response) => response,
        Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
    };

    let mut output = HashMap::new();
    output.insert("response".to_string(), response.parsed_body());
    output.insert("status_code".to_string(), json!(response.status));
    output.insert("headers".to_string(), json!(response.headers));

    if response.is_success() {
        AttemptOutcome::ok(output)
    } else {
        let error = AttemptError::Http {
            status: response.status,
            body: response.body.clone(),
        };
        AttemptOutcome::failed(output, error)
    }
}
