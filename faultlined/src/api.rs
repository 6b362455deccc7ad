//! Newline-delimited JSON control protocol on the daemon socket.
//!
//! One request per line, one response line back. Failures always carry
//! the structured `{code, message, args}` shape from the error catalog,
//! never a bare string.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use faultline_common::errors::FaultlineError;
use faultline_common::specs::FaultSpec;
use faultline_common::task::Task;
use faultline_common::types::TaskId;

use crate::events::DaemonEvent;
use crate::DaemonContext;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Request {
    Inject { spec: FaultSpec },
    Remediate { task_id: String },
    Cancel { task_id: String },
    PauseTask { task_id: String },
    ResumeTask { task_id: String },
    Task { task_id: String },
    ListTasks,
    Schedule { spec: FaultSpec },
    CancelSchedule { schedule_id: String },
    PauseSchedule { schedule_id: String },
    ResumeSchedule { schedule_id: String },
    ListSchedules,
    Status,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: bool, data: serde_json::Value },
    Err { ok: bool, error: WireError },
}

/// The catalog error shape on the wire.
#[derive(Debug, Serialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    pub args: Vec<String>,
}

impl Response {
    fn ok(data: serde_json::Value) -> Self {
        Self::Ok { ok: true, data }
    }

    fn err(error: FaultlineError) -> Self {
        let message = error.message();
        Self::Err {
            ok: false,
            error: WireError {
                code: error.code.code_string(),
                message,
                args: error.args,
            },
        }
    }
}

fn task_view(task: &Task) -> serde_json::Value {
    json!({
        "task_id": task.id,
        "task_type": task.task_type,
        "fault_name": task.fault_spec.fault_name,
        "endpoint": task.fault_spec.endpoint.name,
        "status": task.status(),
        "long_lasting": task.long_lasting,
        "remediated": task.remediated,
        "substage": task.current_trigger().map(|t| t.substage),
        "properties": task.properties,
    })
}

pub async fn handle_connection(stream: UnixStream, ctx: DaemonContext) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle_request(request, &ctx).await,
            Err(err) => {
                warn!(%err, "malformed control request");
                Response::Err {
                    ok: false,
                    error: WireError {
                        code: "FLN-E503".to_string(),
                        message: format!("Daemon protocol error: {err}"),
                        args: vec![err.to_string()],
                    },
                }
            }
        };
        let mut serialized = serde_json::to_string(&response)?;
        serialized.push('\n');
        writer.write_all(serialized.as_bytes()).await?;
        writer.flush().await?;
    }
}

pub async fn handle_request(request: Request, ctx: &DaemonContext) -> Response {
    match request {
        Request::Inject { spec } => inject(ctx, spec).await,
        Request::Remediate { task_id } => remediate(ctx, TaskId::new(task_id)).await,
        Request::Cancel { task_id } => {
            respond_with_task(ctx, ctx.helper.cancel(&TaskId::new(task_id)))
        }
        Request::PauseTask { task_id } => {
            respond_with_task(ctx, ctx.helper.pause(&TaskId::new(task_id)))
        }
        Request::ResumeTask { task_id } => {
            respond_with_task(ctx, ctx.helper.resume(&TaskId::new(task_id)))
        }
        Request::Task { task_id } => match ctx.helper.store().load(&TaskId::new(task_id)) {
            Ok(task) => Response::ok(task_view(&task)),
            Err(err) => Response::err(err),
        },
        Request::ListTasks => {
            let tasks: Vec<serde_json::Value> =
                ctx.helper.store().list().iter().map(task_view).collect();
            Response::ok(json!({ "tasks": tasks }))
        }
        Request::Schedule { spec } => match ctx.scheduler.schedule(spec) {
            Ok(id) => Response::ok(json!({ "schedule_id": id })),
            Err(err) => Response::err(err),
        },
        Request::CancelSchedule { schedule_id } => {
            respond_empty(ctx.scheduler.cancel(&schedule_id))
        }
        Request::PauseSchedule { schedule_id } => respond_empty(ctx.scheduler.pause(&schedule_id)),
        Request::ResumeSchedule { schedule_id } => {
            respond_empty(ctx.scheduler.resume(&schedule_id))
        }
        Request::ListSchedules => Response::ok(json!({
            "schedule_ids": ctx.scheduler.active_schedule_ids(),
        })),
        Request::Status => Response::ok(json!({
            "version": ctx.version,
            "pid": ctx.pid,
            "socket": ctx.socket_path,
            "node": ctx.node_name,
            "uptime_secs": ctx.started_at.elapsed().as_secs(),
        })),
    }
}

async fn inject(ctx: &DaemonContext, spec: FaultSpec) -> Response {
    debug!(fault = %spec.fault_name, endpoint = %spec.endpoint.name, "inject request");
    let task = match ctx.helper.init_injection(spec) {
        Ok(task) => task,
        Err(err) => return Response::err(err),
    };
    run_and_respond(ctx, task).await
}

async fn remediate(ctx: &DaemonContext, injected_task_id: TaskId) -> Response {
    let task = match ctx.helper.init_remediation(&injected_task_id) {
        Ok(task) => task,
        Err(err) => return Response::err(err),
    };
    run_and_respond(ctx, task).await
}

async fn run_and_respond(ctx: &DaemonContext, task: Task) -> Response {
    let result = ctx.helper.run(&task.id).await;
    let terminal = match &result {
        Ok(task) => task.clone(),
        Err(_) => match ctx.helper.store().load(&task.id) {
            Ok(task) => task,
            Err(err) => return Response::err(err),
        },
    };
    ctx.events.emit(&DaemonEvent::TaskTransition {
        task_id: terminal.id.clone(),
        task_type: terminal.task_type,
        fault_name: terminal.fault_spec.fault_name.clone(),
        endpoint: terminal.fault_spec.endpoint.name.clone(),
        status: terminal.status(),
    });
    match result {
        Ok(task) => Response::ok(task_view(&task)),
        Err(err) => Response::err(err),
    }
}

fn respond_with_task(
    _ctx: &DaemonContext,
    result: faultline_common::errors::Result<Task>,
) -> Response {
    match result {
        Ok(task) => Response::ok(task_view(&task)),
        Err(err) => Response::err(err),
    }
}

fn respond_empty(result: faultline_common::errors::Result<()>) -> Response {
    match result {
        Ok(()) => Response::ok(json!({})),
        Err(err) => Response::err(err),
    }
}
