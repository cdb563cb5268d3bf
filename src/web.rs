// Browser shell for the pipeline: three buttons pressed in order, each one
// running its stage on a background task while the page polls /logs.

use crate::audit::{AuditSink, JsonFileAudit, LogEntry};
use crate::error::ResearchError;
use crate::pipeline::Researcher;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;
use warp::Filter;

#[derive(Debug, Serialize)]
struct StatusMessage {
    status: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ThemeRequest {
    theme: String,
}

#[derive(Clone)]
struct ShellState {
    researcher: Arc<Researcher>,
    logs: Arc<Mutex<Vec<String>>>,
    busy: Arc<AtomicBool>,
}

/// Audit sink used in web mode: entries go to the JSON file as usual and are
/// mirrored into the in-memory buffer behind the Logs panel.
pub struct UiAudit {
    file: JsonFileAudit,
    lines: Arc<Mutex<Vec<String>>>,
}

impl UiAudit {
    pub fn new(file: JsonFileAudit, lines: Arc<Mutex<Vec<String>>>) -> Self {
        Self { file, lines }
    }
}

impl AuditSink for UiAudit {
    fn record(&self, entry: LogEntry) {
        add_log(
            &self.lines,
            &format!("{} {}: {}", entry.level.to_uppercase(), entry.function, entry.message),
        );
        self.file.record(entry);
    }
}

fn add_log(logs: &Arc<Mutex<Vec<String>>>, message: &str) {
    let timestamp = Local::now().format("%H:%M:%S");
    let log_entry = format!("[{}] {}", timestamp, message);

    if let Ok(mut logs) = logs.lock() {
        logs.push(log_entry.clone());
        if logs.len() > 500 {
            logs.remove(0);
        }
    }

    info!("{}", log_entry);
}

fn ok_message(message: &str) -> warp::reply::Json {
    warp::reply::json(&StatusMessage { status: "ok".to_string(), message: message.to_string() })
}

fn error_message(message: &str) -> warp::reply::Json {
    warp::reply::json(&StatusMessage { status: "error".to_string(), message: message.to_string() })
}

/// Claim the single background slot, or explain why not. The store's append
/// is not safe under overlapping collection runs, so overlapping stage runs
/// are refused here.
fn try_claim(state: &ShellState) -> Option<warp::reply::Json> {
    if state.busy.swap(true, Ordering::SeqCst) {
        return Some(error_message("Another operation is still running"));
    }
    None
}

pub async fn serve(researcher: Arc<Researcher>, logs: Arc<Mutex<Vec<String>>>, port: u16) {
    let state = ShellState { researcher, logs, busy: Arc::new(AtomicBool::new(false)) };
    let state_filter = warp::any().map(move || state.clone());

    let index = warp::get().and(warp::path::end()).map(|| warp::reply::html(index_html()));

    let queries = warp::post()
        .and(warp::path("queries"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .map(|request: ThemeRequest, state: ShellState| {
            let theme = request.theme.trim().to_string();
            if theme.is_empty() {
                return error_message("Please enter a research theme");
            }
            if let Some(reply) = try_claim(&state) {
                return reply;
            }

            add_log(&state.logs, &format!("Generating queries for theme: {theme}"));
            tokio::spawn(async move {
                match state.researcher.generate_queries(&theme).await {
                    Ok(queries) => {
                        add_log(&state.logs, &format!("Generated {} queries:", queries.len()));
                        for (i, query) in queries.iter().enumerate() {
                            add_log(&state.logs, &format!("  {}. {}", i + 1, query));
                        }
                    }
                    Err(e) => add_log(&state.logs, &format!("Query generation failed: {e}")),
                }
                state.busy.store(false, Ordering::SeqCst);
            });

            ok_message("Query generation started in background")
        });

    let search = warp::post()
        .and(warp::path("search"))
        .and(state_filter.clone())
        .map(|state: ShellState| {
            if let Some(reply) = try_claim(&state) {
                return reply;
            }

            add_log(&state.logs, "Starting web searches");
            tokio::spawn(async move {
                run_all_searches(&state).await;
                state.busy.store(false, Ordering::SeqCst);
            });

            ok_message("Searches started in background")
        });

    let report = warp::post()
        .and(warp::path("report"))
        .and(state_filter.clone())
        .map(|state: ShellState| {
            if let Some(reply) = try_claim(&state) {
                return reply;
            }

            add_log(&state.logs, "Generating final research report");
            tokio::spawn(async move {
                match state.researcher.synthesize().await {
                    Ok(report) => {
                        add_log(&state.logs, &format!("Report generated ({} chars)", report.len()));
                    }
                    Err(ResearchError::Precondition(msg)) => add_log(&state.logs, &msg),
                    Err(e) => add_log(&state.logs, &format!("Report generation failed: {e}")),
                }
                state.busy.store(false, Ordering::SeqCst);
            });

            ok_message("Report generation started in background")
        });

    let get_report = warp::get()
        .and(warp::path("report"))
        .and(state_filter.clone())
        .map(|state: ShellState| match state.researcher.store().load_report() {
            Ok(report) => warp::reply::json(&serde_json::json!({ "report": report })),
            Err(e) => error_message(&format!("Could not read report: {e}")),
        });

    let clear = warp::post()
        .and(warp::path("clear_results"))
        .and(state_filter.clone())
        .map(|state: ShellState| match state.researcher.store().clear_results() {
            Ok(()) => {
                add_log(&state.logs, "Results store cleared");
                ok_message("All collected results cleared")
            }
            Err(e) => error_message(&format!("Could not clear results: {e}")),
        });

    let get_logs = warp::get()
        .and(warp::path("logs"))
        .and(state_filter.clone())
        .map(|state: ShellState| {
            let logs = state.logs.lock().unwrap_or_else(|e| e.into_inner());
            warp::reply::json(&*logs)
        });

    let routes = index
        .or(queries)
        .or(search)
        .or(report.or(get_report))
        .or(clear)
        .or(get_logs);

    info!("Web interface running on http://localhost:{}", port);
    warp::serve(routes).run(([127, 0, 0, 1], port)).await;
}

/// Mirror of the original desktop flow: run every saved query in sequence.
/// A failing search call for one query stops the run; per-page trouble is
/// already absorbed inside `collect`.
async fn run_all_searches(state: &ShellState) {
    let queries = match state.researcher.store().load_queries() {
        Ok(queries) => queries,
        Err(e) => {
            add_log(&state.logs, &format!("Could not load queries: {e}"));
            return;
        }
    };

    if queries.is_empty() {
        add_log(&state.logs, "No queries saved yet. Generate queries first.");
        return;
    }

    let total = queries.len();
    for (i, query) in queries.iter().enumerate() {
        add_log(&state.logs, &format!("Search {}/{}: {}", i + 1, total, query));
        if let Err(e) = state.researcher.collect(query).await {
            add_log(&state.logs, &format!("Search failed: {e}"));
            return;
        }
    }

    add_log(&state.logs, "All searches completed");
}

fn index_html() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Deep Researcher</title>
    <style>
        body { font-family: Arial; margin: 20px; background: #f5f5f5; }
        h1 { color: #333; }

        .status-message { padding: 10px; margin: 10px 0; display: none; }
        .status-message.success { background: #d4edda; color: #155724; border: 1px solid #c3e6cb; }
        .status-message.error { background: #f8d7da; color: #721c24; border: 1px solid #f5c6cb; }

        input[type="text"] { padding: 8px; margin: 5px 0; width: 400px; }

        button { padding: 8px 16px; background: rgb(100, 149, 237); color: white; border: none; cursor: pointer; margin-right: 5px; }
        button:hover { background: #5a8dd4; }
        button.danger { background: #dc3545; }
        button.danger:hover { background: #c82333; }

        .panel { background: white; padding: 20px; margin: 10px 0; border: 1px solid #ddd; max-width: 900px; }

        .report { white-space: pre-wrap; font-size: 14px; }

        .log-container {
            background: #1e1e1e;
            color: #d4d4d4;
            padding: 15px;
            max-height: 400px;
            overflow-y: auto;
            font-family: 'Courier New', monospace;
            font-size: 13px;
        }
        .log-entry { margin: 3px 0; }
    </style>
</head>
<body>
    <h1>Deep Researcher</h1>

    <div id="status-message" class="status-message"></div>

    <div class="panel">
        <label>Research theme:</label><br>
        <input type="text" id="theme" placeholder="e.g. solid state batteries">
        <br><br>
        <button onclick="generateQueries()">1. Generate Queries</button>
        <button onclick="runSearches()">2. Run Searches</button>
        <button onclick="generateReport()">3. Generate Report</button>
        <button class="danger" onclick="clearResults()">Clear Results</button>
    </div>

    <div class="panel">
        <h2>Report</h2>
        <button onclick="loadReport()">Refresh Report</button>
        <div class="report" id="report"></div>
    </div>

    <div class="panel">
        <h2>Logs</h2>
        <div class="log-container" id="log-container"></div>
    </div>

    <script>
        function showStatusMessage(message, isSuccess) {
            const element = document.getElementById('status-message');
            element.textContent = message;
            element.className = 'status-message ' + (isSuccess ? 'success' : 'error');
            element.style.display = 'block';
            setTimeout(() => { element.style.display = 'none'; }, 5000);
        }

        function post(path, body) {
            return fetch(path, {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: body ? JSON.stringify(body) : undefined
            })
            .then(r => r.json())
            .then(data => showStatusMessage(data.message, data.status === 'ok'))
            .catch(err => showStatusMessage('Something went wrong: ' + err, false));
        }

        function generateQueries() {
            post('/queries', { theme: document.getElementById('theme').value });
        }

        function runSearches() { post('/search'); }
        function generateReport() { post('/report'); }

        function clearResults() {
            if (!confirm('Clear all collected results?')) return;
            post('/clear_results');
        }

        function loadReport() {
            fetch('/report')
                .then(r => r.json())
                .then(data => {
                    document.getElementById('report').textContent =
                        data.report || 'No report generated yet.';
                });
        }

        function loadLogs() {
            fetch('/logs')
                .then(r => r.json())
                .then(logs => {
                    const container = document.getElementById('log-container');
                    container.innerHTML = '';
                    if (logs.length === 0) {
                        container.innerHTML = '<div class="log-entry">No logs yet. Start with step 1.</div>';
                        return;
                    }
                    logs.forEach(log => {
                        const div = document.createElement('div');
                        div.className = 'log-entry';
                        div.textContent = log;
                        container.appendChild(div);
                    });
                    container.scrollTop = container.scrollHeight;
                });
        }

        setInterval(loadLogs, 2000);
        loadLogs();
        loadReport();
    </script>
</body>
</html>"#
        .to_string()
}
