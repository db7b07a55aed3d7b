use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use crate::aggregator::order_by_address;
use crate::error::RoundError;
use crate::scheduler::{Discovery, SchedulerStatus};
use shared::types::Device;

#[derive(Clone)]
pub struct AppState {
    pub discovery: Discovery,
}

#[derive(Deserialize)]
pub struct DeviceQuery {
    pub sort: Option<String>,
}

#[derive(Deserialize)]
pub struct RoundQuery {
    pub wait: Option<bool>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub snapshot_version: u64,
    pub device_count: usize,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/devices", get(get_devices))
        .route("/v1/devices/hash", get(get_hash))
        .route("/v1/devices/:identity", get(get_device))
        .route("/v1/status", get(get_status))
        .route("/v1/rounds", post(post_round))
        .with_state(state)
}

async fn get_devices(
    State(state): State<AppState>,
    Query(params): Query<DeviceQuery>,
) -> Result<Json<Vec<Device>>, StatusCode> {
    let mut devices = state.discovery.get_snapshot().devices.clone();

    match params.sort.as_deref() {
        None | Some("identity") => {}
        Some("address") => order_by_address(&mut devices),
        Some(other) => {
            tracing::debug!("Rejecting unknown sort order {:?}", other);
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    Ok(Json(devices))
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.discovery.get_snapshot().hash.clone()
}

async fn get_device(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<Device>, StatusCode> {
    let snapshot = state.discovery.get_snapshot();

    // mDNS identities are stored lowercased; merged identities resolve through aliases
    snapshot
        .device(&identity)
        .or_else(|| snapshot.device(&identity.to_ascii_lowercase()))
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.discovery.get_snapshot();
    Json(StatusResponse {
        scheduler: state.discovery.status(),
        snapshot_version: snapshot.version,
        device_count: snapshot.devices.len(),
    })
}

async fn post_round(State(state): State<AppState>, Query(params): Query<RoundQuery>) -> Response {
    if !params.wait.unwrap_or(true) {
        state.discovery.request_round();
        return StatusCode::ACCEPTED.into_response();
    }

    match state.discovery.trigger_round().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::error!("Requested round failed: {}", e);
            let status = match e {
                RoundError::NoUsableSocket(_) | RoundError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(ErrorResponse { error: e.to_string() })).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;
    use shared::types::Protocol;
    use tokio::time::Duration;
    use tokio_util::sync::CancellationToken;
    use crate::aggregator::RetentionPolicy;
    use crate::error::FailureKind;
    use crate::parse::dns::build::ResponseBuilder;
    use crate::probe::fake::FakeProbe;
    use crate::probe::RawResponse;
    use crate::scheduler::ScheduledProbe;

    fn ssdp_reply(usn: &str, ip: &str) -> RawResponse {
        let sender: SocketAddr = format!("{}:1900", ip).parse().unwrap();
        let text = format!(
            "HTTP/1.1 200 OK\r\nLOCATION: http://{}:80/desc.xml\r\nSERVER: test/1.0\r\nST: upnp:rootdevice\r\nUSN: {}\r\n\r\n",
            ip, usn
        );
        RawResponse::new(sender, text)
    }

    fn state_with(probe: FakeProbe) -> AppState {
        AppState {
            discovery: Discovery::new(
                vec![ScheduledProbe {
                    probe: Arc::new(probe),
                    timeout: Duration::from_secs(1),
                }],
                RetentionPolicy::HardReset,
                CancellationToken::new(),
            ),
        }
    }

    fn two_devices() -> AppState {
        state_with(FakeProbe::answering(
            Protocol::Ssdp,
            vec![
                ssdp_reply("uuid:aaa", "10.0.0.20"),
                ssdp_reply("uuid:bbb", "10.0.0.3"),
            ],
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_devices_default_and_address_order() {
        let state = two_devices();
        state.discovery.trigger_round().await.unwrap();

        let Json(by_identity) = get_devices(State(state.clone()), Query(DeviceQuery { sort: None }))
            .await
            .unwrap();
        let Json(by_address) = get_devices(
            State(state.clone()),
            Query(DeviceQuery { sort: Some("address".to_string()) }),
        )
        .await
        .unwrap();

        let ids = |devices: &[Device]| devices.iter().map(|d| d.identity.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&by_identity), vec!["aaa", "bbb"]);
        assert_eq!(ids(&by_address), vec!["bbb", "aaa"], "10.0.0.3 sorts before 10.0.0.20");

        let rejected = get_devices(State(state), Query(DeviceQuery { sort: Some("color".to_string()) })).await;
        assert_eq!(rejected.unwrap_err(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_device_lookup() {
        let state = two_devices();
        state.discovery.trigger_round().await.unwrap();

        let Json(device) = get_device(State(state.clone()), Path("aaa".to_string())).await.unwrap();
        assert_eq!(device.identity, "aaa");

        let missing = get_device(State(state), Path("zzz".to_string())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merged_device_found_by_either_identity() {
        let printer = ResponseBuilder::new()
            .ptr("_ipp._tcp.local", "Printer._ipp._tcp.local")
            .srv("Printer._ipp._tcp.local", 631, "printer.local")
            .a("printer.local", Ipv4Addr::new(10, 0, 0, 3))
            .build();
        let state = AppState {
            discovery: Discovery::new(
                vec![
                    ScheduledProbe {
                        probe: Arc::new(FakeProbe::answering(
                            Protocol::Ssdp,
                            vec![ssdp_reply("uuid:bbb", "10.0.0.3")],
                        )),
                        timeout: Duration::from_secs(1),
                    },
                    ScheduledProbe {
                        probe: Arc::new(FakeProbe::answering(
                            Protocol::Mdns,
                            vec![RawResponse::new("10.0.0.3:5353".parse().unwrap(), printer)],
                        )),
                        timeout: Duration::from_secs(1),
                    },
                ],
                RetentionPolicy::HardReset,
                CancellationToken::new(),
            ),
        };
        state.discovery.trigger_round().await.unwrap();

        for identity in ["bbb", "printer._ipp._tcp.local", "Printer._ipp._tcp.local"] {
            let Json(device) = get_device(State(state.clone()), Path(identity.to_string()))
                .await
                .unwrap_or_else(|status| panic!("{} not found: {}", identity, status));
            assert_eq!(device.identity, "bbb");
            assert_eq!(device.discovered_via.len(), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hash_tracks_snapshot() {
        let state = two_devices();
        let before = get_hash(State(state.clone())).await;

        state.discovery.trigger_round().await.unwrap();
        let after = get_hash(State(state.clone())).await;

        assert_ne!(before, after);
        assert_eq!(after, state.discovery.get_snapshot().hash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_round_reports() {
        let state = two_devices();

        let response = post_round(State(state.clone()), Query(RoundQuery { wait: None })).await;
        assert_eq!(response.status(), StatusCode::OK);

        let Json(status) = get_status(State(state)).await;
        assert_eq!(status.snapshot_version, 1);
        assert_eq!(status.device_count, 2);
        assert_eq!(status.scheduler.rounds_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_round_without_socket_is_unavailable() {
        let state = state_with(FakeProbe::failing(Protocol::Mdns, FailureKind::NetworkUnavailable));

        let response = post_round(State(state.clone()), Query(RoundQuery { wait: None })).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.discovery.get_snapshot().version, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_round_fire_and_forget() {
        let state = two_devices();

        let response = post_round(State(state.clone()), Query(RoundQuery { wait: Some(false) })).await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(state.discovery.get_snapshot().version, 0, "no scheduler loop is running");
    }

    #[test]
    fn test_status_serializes_flat() {
        let response = StatusResponse {
            scheduler: SchedulerStatus {
                state: crate::scheduler::RoundState::Idle,
                rounds_completed: 2,
                last_report: None,
                last_error: None,
            },
            snapshot_version: 2,
            device_count: 0,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["rounds_completed"], 2);
        assert_eq!(json["snapshot_version"], 2);
    }
}
