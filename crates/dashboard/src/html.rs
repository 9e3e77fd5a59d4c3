//! HTML rendering for the monitoring dashboard.

use std::fmt::Write as _;

use engine::MonitorSnapshot;

/// Render the snapshot as a self-refreshing dashboard page.
pub fn render(snapshot: &MonitorSnapshot) -> String {
    let mut page = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Drover Pipeline Monitor</title>
    <meta http-equiv="refresh" content="2">
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        h1 {{ color: #333; }}
        .progress-bar {{ width: 100%; background-color: #f3f3f3; border-radius: 5px; margin: 10px 0; }}
        .progress-bar-fill {{
            height: 30px; background-color: #4CAF50; border-radius: 5px;
            width: {progress:.1}%; display: flex; align-items: center;
            justify-content: center; color: white; font-weight: bold;
        }}
        .stats {{ display: flex; flex-wrap: wrap; }}
        .stat-box {{
            background-color: #f9f9f9; border: 1px solid #ddd; border-radius: 5px;
            padding: 10px; margin: 5px; flex: 1; min-width: 200px;
        }}
        .node-table {{ width: 100%; border-collapse: collapse; margin-top: 20px; }}
        .node-table th, .node-table td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}
        .node-table th {{ background-color: #f2f2f2; }}
        .node-table tr:nth-child(even) {{ background-color: #f9f9f9; }}
        .status-succeeded {{ color: green; }}
        .status-failed {{ color: red; }}
        .status-running {{ color: blue; }}
        .status-pending {{ color: gray; }}
        .status-skipped {{ color: orange; }}
        .status-retrying {{ color: purple; }}
    </style>
</head>
<body>
    <h1>Drover Pipeline Monitor</h1>
    <p><strong>Pipeline:</strong> {dag}</p>
    <p><strong>Started:</strong> {start} (elapsed: {elapsed_ms} ms)</p>

    <div class="progress-bar">
        <div class="progress-bar-fill">{progress:.1}%</div>
    </div>

    <div class="stats">
        <div class="stat-box">
            <h3>Node Status</h3>
            <p>Total: {total}</p>
            <p>Completed: {completed}</p>
            <p>Running: {running}</p>
            <p>Pending: {pending}</p>
            <p>Failed: {failed}</p>
            <p>Skipped: {skipped}</p>
            <p>Retrying: {retrying}</p>
        </div>

        <div class="stat-box">
            <h3>Resource Usage</h3>
            <p>Current Memory: {current_mem:.2} MB</p>
            <p>Peak Memory: {peak_mem:.2} MB</p>
            <p>CPU Time: {cpu_ms} ms</p>
            <p>Active Tasks: {tasks}</p>
        </div>
    </div>

    <h2>Node Details</h2>
    <table class="node-table">
        <tr>
            <th>Node</th>
            <th>Status</th>
            <th>Start Time</th>
            <th>Duration</th>
            <th>Memory Delta</th>
            <th>Retries</th>
            <th>Error</th>
        </tr>
"#,
        progress = snapshot.progress * 100.0,
        dag = snapshot.dag_name,
        start = snapshot.start_time.format("%Y-%m-%d %H:%M:%S"),
        elapsed_ms = snapshot.elapsed_ms,
        total = snapshot.total_nodes,
        completed = snapshot.completed_nodes,
        running = snapshot.running_nodes,
        pending = snapshot.pending_nodes,
        failed = snapshot.failed_nodes,
        skipped = snapshot.skipped_nodes,
        retrying = snapshot.retrying_nodes,
        current_mem = snapshot.resource_metrics.current_memory as f64 / 1024.0 / 1024.0,
        peak_mem = snapshot.resource_metrics.peak_memory as f64 / 1024.0 / 1024.0,
        cpu_ms = snapshot.resource_metrics.cpu_time_ms,
        tasks = snapshot.resource_metrics.active_tasks,
    );

    for metric in snapshot.node_metrics.values() {
        let duration = metric
            .duration_ms
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| "-".to_string());
        let memory_delta = if metric.memory_delta != 0 {
            format!("{:.2} MB", metric.memory_delta as f64 / 1024.0 / 1024.0)
        } else {
            "-".to_string()
        };

        let _ = write!(
            page,
            r#"        <tr>
            <td>{name}</td>
            <td class="status-{status}">{status}</td>
            <td>{start}</td>
            <td>{duration}</td>
            <td>{memory_delta}</td>
            <td>{retries}</td>
            <td>{error}</td>
        </tr>
"#,
            name = metric.node_name,
            status = metric.status,
            start = metric.start_time.format("%H:%M:%S"),
            duration = duration,
            memory_delta = memory_delta,
            retries = metric.retry_count,
            error = metric.error.as_deref().unwrap_or(""),
        );
    }

    page.push_str("    </table>\n</body>\n</html>\n");
    page
}
