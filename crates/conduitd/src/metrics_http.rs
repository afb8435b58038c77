//! The metrics HTTP endpoint (spec.md section 6): a per-node JSON snapshot
//! and a small HTML dashboard, served over axum the way the teacher's own
//! daemon serves its job-status API.
//!
//! Grounded on `examples/rm-dr-copper`'s `ufod` binary, which builds an
//! axum `Router`, layers `tower_http::trace::TraceLayer` over it, and
//! serves it with `axum::serve` inside a `tokio` runtime; this module
//! keeps that shape but serves status snapshots instead of job state.

use std::sync::Arc;

use axum::{extract::State, response::Html, routing::get, Json, Router};
use conduit_pipeline::builder::SupervisorHandle;
use serde::Serialize;
use tower_http::trace::TraceLayer;

struct MetricsState {
	supervisor: Arc<SupervisorHandle>,
}

#[derive(Serialize)]
struct NodeReport {
	name: String,
	status: &'static str,
	metrics: conduit_pipeline::metrics::MetricsSnapshot,
}

fn status_label(status: conduit_pipeline::NodeStatus) -> &'static str {
	use conduit_pipeline::NodeStatus::*;
	match status {
		Pending => "pending",
		Alive => "alive",
		Completed => "completed",
		Terminated => "terminated",
	}
}

fn reports(state: &MetricsState) -> Vec<NodeReport> {
	state
		.supervisor
		.nodes()
		.iter()
		.map(|node| NodeReport {
			name: node.name().to_string(),
			status: status_label(node.status()),
			metrics: node.metrics_snapshot(),
		})
		.collect()
}

async fn snapshot_json(State(state): State<Arc<MetricsState>>) -> Json<Vec<NodeReport>> {
	Json(reports(&state))
}

async fn dashboard(State(state): State<Arc<MetricsState>>) -> Html<String> {
	let mut rows = String::new();
	for report in reports(&state) {
		rows.push_str(&format!(
			"<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td></tr>\n",
			report.name,
			report.status,
			report.metrics.iterations,
			report.metrics.errors,
			report.metrics.duration_mean_ms,
		));
	}

	Html(format!(
		"<!doctype html><html><head><title>conduitd</title></head><body>\
		<h1>conduitd pipeline status</h1>\
		<table border=\"1\" cellpadding=\"4\">\
		<tr><th>node</th><th>status</th><th>iterations</th><th>errors</th><th>mean ms</th></tr>\n\
		{rows}\
		</table>\
		</body></html>"
	))
}

/// Build the metrics router. `supervisor` is read on every request, never
/// mutated: the HTTP layer only ever observes the pipeline.
pub fn router(supervisor: Arc<SupervisorHandle>) -> Router {
	let state = Arc::new(MetricsState { supervisor });
	Router::new()
		.route("/", get(dashboard))
		.route("/metrics", get(snapshot_json))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

/// Bind and serve the metrics router until the process exits. Runs on the
/// caller's tokio runtime; the daemon spawns this as its own task so it
/// never blocks the pipeline itself.
pub async fn serve(addr: &str, supervisor: Arc<SupervisorHandle>) -> std::io::Result<()> {
	let listener = tokio::net::TcpListener::bind(addr).await?;
	tracing::info!(%addr, "metrics endpoint listening");
	axum::serve(listener, router(supervisor)).await
}
