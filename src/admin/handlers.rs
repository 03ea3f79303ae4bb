use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use crate::admin::AdminState;
use crate::routing::aggregator::AggregationError;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub table_version: u64,
    pub routes: usize,
    pub aggregates: usize,
    pub warnings: usize,
    pub errors: usize,
    pub strategies: Vec<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let table = state.reloader.current();
    let report = table.report();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if table.version() == 0 { "empty" } else { "operational" },
        table_version: table.version(),
        routes: table.route_count(),
        aggregates: table.aggregate_count(),
        warnings: report.warnings().count(),
        errors: report.errors().count(),
        strategies: state
            .reloader
            .aggregator()
            .strategies()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

pub async fn get_table(State(state): State<AdminState>) -> Json<serde_json::Value> {
    let table = state.reloader.current();
    Json(json!({
        "version": table.version(),
        "contents": table.contents(),
        "report": table.report(),
    }))
}

pub async fn post_reload(State(state): State<AdminState>) -> Response {
    match state.reloader.reload().await {
        Ok(table) => Json(json!({
            "version": table.version(),
            "routes": table.route_count(),
            "aggregates": table.aggregate_count(),
            "report": table.report(),
        }))
        .into_response(),
        Err(e) => {
            let report = match &e {
                AggregationError::NoValidFragments { report } => Some(report),
                _ => None,
            };
            let body = json!({
                "error": e.to_string(),
                "current_version": state.reloader.current().version(),
                "report": report,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
        }
    }
}
