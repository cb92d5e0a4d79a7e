//! dispatch.rs
//!
//! Inbound request handling: picks an action from the request parameters and
//! either answers with UPS data or forwards it to the hub.

use actix_web::http::header::{CONTENT_TYPE, REFERER};
use actix_web::{web, HttpResponse};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::apcaccess::{self, NisError, Status};
use crate::config::Config;
use crate::hub::HubClient;
use crate::metrics::{Metrics, PushOutcome, QueryOutcome};
use crate::status::StatusMap;

const REFERER_VALUE: &str = "apcupsd";

pub struct AppState {
    pub config: Config,
    pub hub: HubClient,
    pub metrics: Metrics,
}

/// Request parameters, from the query string or a form body.
#[derive(Debug, Default, Deserialize)]
pub struct Params {
    /// Action name.
    pub a: Option<String>,
    /// Present when the caller wants the status in the response.
    pub p: Option<String>,
    /// Event text for `notify`.
    pub status: Option<String>,
}

impl Params {
    /// Form fields win over query-string fields of the same name.
    fn merge(self, form: Self) -> Self {
        Self {
            a: form.a.or(self.a),
            p: form.p.or(self.p),
            status: form.status.or(self.status),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Status,
    Notify,
    Ping,
}

impl Action {
    /// Anything unrecognised, including no action at all, means `status`.
    pub fn from_param(action: Option<&str>) -> Self {
        match action {
            Some("notify") => Self::Notify,
            Some("ping") => Self::Ping,
            _ => Self::Status,
        }
    }
}

#[derive(Serialize)]
struct DevicePayload<'a> {
    device: &'a StatusMap,
}

#[derive(Serialize)]
struct EventPayload<'a> {
    event: &'a str,
}

#[derive(Serialize)]
struct PullResponse<'a> {
    data: DevicePayload<'a>,
}

pub async fn dispatch_handler(
    query: web::Query<Params>,
    form: Option<web::Form<Params>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let params = match form {
        Some(form) => query.into_inner().merge(form.into_inner()),
        None => query.into_inner(),
    };
    let action = Action::from_param(params.a.as_deref());
    debug!("Dispatching {:?}", action);

    match action {
        Action::Status => status(&state, params.p.is_some()).await,
        Action::Notify => notify(&state, params.status.as_deref().unwrap_or_default()).await,
        Action::Ping => HttpResponse::Ok()
            .insert_header((REFERER, REFERER_VALUE))
            .body("OK"),
    }
}

async fn status(state: &AppState, pull: bool) -> HttpResponse {
    let Some(map) = fetch_status(state).await else {
        return HttpResponse::Ok().finish();
    };

    if pull {
        match serde_json::to_string(&PullResponse {
            data: DevicePayload { device: &map },
        }) {
            Ok(body) => HttpResponse::Ok()
                .insert_header((REFERER, REFERER_VALUE))
                .insert_header((CONTENT_TYPE, "text/json"))
                .body(body),
            Err(e) => {
                warn!("Failed to encode status response: {}", e);
                HttpResponse::Ok().finish()
            }
        }
    } else {
        push(state, &DevicePayload { device: &map }).await;
        HttpResponse::Ok().finish()
    }
}

async fn notify(state: &AppState, event: &str) -> HttpResponse {
    push(state, &EventPayload { event }).await;
    HttpResponse::Ok().body("OK")
}

/// Query apcupsd on the blocking pool. Every failure, and an empty status
/// block, comes back as `None`.
async fn fetch_status(state: &AppState) -> Option<StatusMap> {
    let host = state.config.apcupsd_host.clone();
    let port = state.config.apcupsd_port;
    let timeout = state.config.timeout;

    let result = match web::block(move || apcaccess::fetch_status(&host, port, timeout)).await {
        Ok(result) => result,
        Err(e) => {
            warn!("apcupsd query did not run: {}", e);
            state.metrics.record_query(QueryOutcome::Aborted);
            return None;
        }
    };

    match result {
        Ok(Status { map, truncated }) => {
            let outcome = if truncated {
                QueryOutcome::Truncated
            } else {
                QueryOutcome::Ok
            };
            state.metrics.record_query(outcome);
            if map.is_empty() {
                debug!("apcupsd returned no status fields");
                return None;
            }
            state.metrics.update_status(&map);
            Some(map)
        }
        Err(e) => {
            warn!("No UPS data: {}", e);
            state.metrics.record_query(outcome_for(&e));
            None
        }
    }
}

fn outcome_for(err: &NisError) -> QueryOutcome {
    if err.is_unreachable() {
        QueryOutcome::Unreachable
    } else {
        QueryOutcome::Aborted
    }
}

/// Fire-and-forget from the caller's point of view: failures are logged and
/// counted, never surfaced in the response.
async fn push<T: Serialize>(state: &AppState, payload: &T) {
    match state.hub.push(payload).await {
        Ok(()) => state.metrics.record_push(PushOutcome::Ok),
        Err(e) => {
            warn!("Push to hub at {} failed: {}", state.hub.url(), e);
            state.metrics.record_push(PushOutcome::Failed);
        }
    }
}

pub async fn metrics_handler(state: web::Data<AppState>) -> HttpResponse {
    match state.metrics.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(body),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Route table shared by the server and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(dispatch_handler))
            .route(web::post().to(dispatch_handler)),
    )
    .service(web::resource("/metrics").route(web::get().to(metrics_handler)));
}
