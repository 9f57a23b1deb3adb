//! HTTP routes for remote control, status and scheduling.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::command::{accepted_message, ControlRequest};
use crate::schedule::{Schedule, ScheduleView, Scheduler};
use crate::Controller;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(controller: Arc<Controller>, scheduler: Scheduler) -> Self {
        Self {
            controller,
            scheduler,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Reply {
    pub status: String,
    pub message: String,
}

impl Reply {
    fn success(message: impl Into<String>) -> Json<Reply> {
        Json(Reply {
            status: "success".to_string(),
            message: message.into(),
        })
    }

    fn error(message: impl Into<String>) -> (StatusCode, Json<Reply>) {
        (
            StatusCode::BAD_REQUEST,
            Json(Reply {
                status: "error".to_string(),
                message: message.into(),
            }),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: String,
    pub mode: String,
    pub fan_speed: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub start_time: String,
    pub end_time: String,
    #[serde(flatten)]
    pub command: ControlRequest,
}

type Rejection = (StatusCode, Json<Reply>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/control", post(control))
        .route("/api/status", get(status))
        .route(
            "/api/schedule",
            get(get_schedule).post(set_schedule).delete(clear_schedule),
        )
        .with_state(state)
}

/// POST /api/control - apply a new operating mode.
async fn control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<Reply>, Rejection> {
    debug!("control request: {:?}", request);
    let mode = request.into_mode().map_err(|e| {
        warn!("rejected control request: {}", e);
        Reply::error(e.to_string())
    })?;
    state.controller.apply(mode).await;
    Ok(Reply::success(accepted_message(mode)))
}

/// GET /api/status - report the current operating mode.
async fn status(State(state): State<AppState>) -> Json<StatusReply> {
    let status = state.controller.status();
    Json(StatusReply {
        status: if status.on { "on" } else { "off" }.to_string(),
        mode: status.mode.name().to_string(),
        fan_speed: status.mode.fan_speed().map(|speed| speed.to_string()),
    })
}

/// POST /api/schedule - replace the daily schedule.
async fn set_schedule(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<Reply>, Rejection> {
    let schedule = Schedule::parse(&request.start_time, &request.end_time, request.command)
        .map_err(|e| {
            warn!("rejected schedule request: {}", e);
            Reply::error(e.to_string())
        })?;
    state.scheduler.set(Some(schedule));
    Ok(Reply::success(format!(
        "Schedule set: {} to {}",
        request.start_time, request.end_time
    )))
}

/// GET /api/schedule - the active schedule, if any.
async fn get_schedule(State(state): State<AppState>) -> Json<Option<ScheduleView>> {
    Json(state.scheduler.current().map(|s| s.view()))
}

/// DELETE /api/schedule - drop every schedule trigger.
async fn clear_schedule(State(state): State<AppState>) -> Json<Reply> {
    state.scheduler.set(None);
    Reply::success("Schedule cleared")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use coolbox_peripherals::cycle::CycleController;
    use coolbox_peripherals::lines::{Line, MemoryLines, OutputLines};
    use serde::de::DeserializeOwned;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};
    use tower::ServiceExt;

    fn app() -> (Router, AppState, MemoryLines) {
        let lines = MemoryLines::new();
        let boxed: Box<dyn OutputLines> = Box::new(lines.clone());
        let state = AppState::new(Arc::new(CycleController::new(boxed)), Scheduler::new());
        (router(state.clone()), state, lines)
    }

    async fn send<T: DeserializeOwned>(
        app: Router,
        method: Method,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, T) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn control_drives_appliance() {
        let (app, _, lines) = app();
        let (code, reply): (_, Reply) = send(
            app.clone(),
            Method::POST,
            "/api/control",
            Some(r#"{"mode":"fan_only","fan_speed":"medium"}"#),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(reply.status, "success");
        assert_eq!(reply.message, "Fan mode activated");
        assert_eq!(lines.asserted_fans(), vec![Line::FanMedium]);

        let (_, status): (_, StatusReply) = send(app.clone(), Method::GET, "/api/status", None).await;
        assert_eq!(status.status, "on");
        assert_eq!(status.mode, "fan_only");
        assert_eq!(status.fan_speed.as_deref(), Some("medium"));

        let (_, reply): (_, Reply) =
            send(app.clone(), Method::POST, "/api/control", Some(r#"{"mode":"off"}"#)).await;
        assert_eq!(reply.message, "AC turned off");
        assert!(lines.all_deasserted());

        let (_, status): (_, StatusReply) = send(app, Method::GET, "/api/status", None).await;
        assert_eq!(status.status, "off");
        assert_eq!(status.fan_speed, None);
    }

    #[tokio::test(start_paused = true)]
    async fn control_starts_and_stops_compressor_cycle() {
        let (app, state, lines) = app();
        let start = Instant::now();
        let (code, reply): (_, Reply) = send(
            app.clone(),
            Method::POST,
            "/api/control",
            Some(r#"{"mode":"with_compressor","fan_speed":"medium"}"#),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(reply.message, "Compressor cycle started");

        sleep(Duration::from_secs(1)).await;
        assert_eq!(lines.asserted_fans(), vec![Line::FanMedium]);
        assert!(!lines.is_asserted(Line::Compressor));

        sleep(Duration::from_secs(3)).await;
        assert!(lines.is_asserted(Line::Compressor));
        let history = lines.history();
        let fan_on = history
            .iter()
            .find(|w| w.line == Line::FanMedium && w.asserted)
            .unwrap();
        let compressor_on = history
            .iter()
            .find(|w| w.line == Line::Compressor && w.asserted)
            .unwrap();
        assert_eq!(fan_on.at - start, Duration::ZERO);
        assert_eq!(compressor_on.at - start, Duration::from_millis(3_200));
        assert!(state.controller.is_cycling().await);

        let (_, status): (_, StatusReply) = send(app.clone(), Method::GET, "/api/status", None).await;
        assert_eq!(status.mode, "with_compressor");
        assert_eq!(status.fan_speed.as_deref(), Some("medium"));

        let (_, reply): (_, Reply) =
            send(app, Method::POST, "/api/control", Some(r#"{"mode":"off"}"#)).await;
        assert_eq!(reply.message, "AC turned off");
        assert!(lines.all_deasserted());
        assert!(!state.controller.is_cycling().await);
        assert!(!state.controller.status().on);
    }

    #[tokio::test(start_paused = true)]
    async fn control_rejects_unknown_mode() {
        let (app, state, lines) = app();
        let (code, reply): (_, Reply) = send(
            app,
            Method::POST,
            "/api/control",
            Some(r#"{"mode":"heat","fan_speed":"low"}"#),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(reply.status, "error");
        assert_eq!(reply.message, "Invalid mode selected");
        assert_eq!(lines.write_count(), 5);
        assert!(!state.controller.status().on);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_round_trip() {
        let (app, state, _) = app();
        let (code, reply): (_, Reply) = send(
            app.clone(),
            Method::POST,
            "/api/schedule",
            Some(r#"{"start_time":"07:30","end_time":"09:00","mode":"with_compressor","fan_speed":"high"}"#),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(reply.message, "Schedule set: 07:30 to 09:00");
        assert!(state.scheduler.current().is_some());

        let (_, view): (_, Option<serde_json::Value>) =
            send(app.clone(), Method::GET, "/api/schedule", None).await;
        let view = view.unwrap();
        assert_eq!(view["mode"], "with_compressor");
        assert_eq!(view["fan_speed"], "high");

        let (code, _): (_, Reply) = send(
            app.clone(),
            Method::POST,
            "/api/schedule",
            Some(r#"{"start_time":"7h","end_time":"09:00","mode":"off"}"#),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (_, reply): (_, Reply) = send(app, Method::DELETE, "/api/schedule", None).await;
        assert_eq!(reply.message, "Schedule cleared");
        assert!(state.scheduler.current().is_none());
    }
}
