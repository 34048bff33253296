//! End-to-end gateway tests: a real router on an ephemeral port, driven by a
//! tokio-tungstenite client.

use std::net::SocketAddr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ocpp_router::config::{StationSeed, WebsocketServerConfig};
use ocpp_router::domain::ports::cache::namespace;
use ocpp_router::domain::ports::{Cache, OcppSender, OutboundCall};
use ocpp_router::domain::{OcppVersion, StationIdentifier};
use ocpp_router::infrastructure::crypto::password::hash_password_with_cost;
use ocpp_router::{AppConfig, ServerHandle};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PASSWORD: &str = "s3cret-password";

async fn start_router() -> (ServerHandle, SocketAddr) {
    start_router_with(AppConfig::default()).await
}

async fn start_router_with(mut config: AppConfig) -> (ServerHandle, SocketAddr) {
    config.server.shutdown_timeout_secs = 5;
    config.websocket = vec![WebsocketServerConfig {
        id: "v16".into(),
        host: "127.0.0.1".into(),
        port: 0,
        protocol: OcppVersion::V16,
        security_profile: 1,
        ping_interval: 0,
        tenant_id: 1,
        allow_unknown_stations: false,
    }];
    config.stations = vec![StationSeed {
        tenant_id: 1,
        station_id: "CS-001".into(),
        password_hash: Some(hash_password_with_cost(PASSWORD, 4).unwrap()),
    }];

    let handle = ServerHandle::start(config).await.unwrap();
    let address = handle.gateways()[0].address;
    (handle, address)
}

async fn connect(
    address: SocketAddr,
    station: &str,
    subprotocol: Option<&str>,
    credentials: Option<(&str, &str)>,
) -> Result<Client, WsError> {
    let mut request = format!("ws://{address}/{station}")
        .into_client_request()
        .unwrap();
    if let Some(subprotocol) = subprotocol {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", subprotocol.parse().unwrap());
    }
    if let Some((user, password)) = credentials {
        let token = STANDARD.encode(format!("{user}:{password}"));
        request
            .headers_mut()
            .insert("Authorization", format!("Basic {token}").parse().unwrap());
    }
    connect_async(request).await.map(|(stream, _)| stream)
}

async fn connect_station(address: SocketAddr) -> Client {
    connect(address, "CS-001", Some("ocpp1.6"), Some(("CS-001", PASSWORD)))
        .await
        .unwrap()
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no frame within 5s")
            .expect("stream ended")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn next_close_code(client: &mut Client) -> Option<CloseCode> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no close within 5s")?;
        match message {
            Ok(Message::Close(frame)) => return frame.map(|f| f.code),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn status_of(err: WsError) -> u16 {
    match err {
        WsError::Http(response) => response.status().as_u16(),
        other => panic!("expected HTTP rejection, got {other}"),
    }
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let (handle, address) = start_router().await;

    let err = connect(address, "CS-001", Some("ocpp1.6"), Some(("CS-001", "nope")))
        .await
        .err()
        .unwrap();
    assert_eq!(status_of(err), 401);

    let err = connect(address, "CS-001", Some("ocpp1.6"), None).await.err().unwrap();
    assert_eq!(status_of(err), 401);

    // username must match the path
    let err = connect(address, "CS-001", Some("ocpp1.6"), Some(("CS-002", PASSWORD)))
        .await
        .err()
        .unwrap();
    assert_eq!(status_of(err), 401);

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_station_is_unauthorized() {
    let (handle, address) = start_router().await;
    let err = connect(address, "CS-404", Some("ocpp1.6"), Some(("CS-404", PASSWORD)))
        .await
        .err()
        .unwrap();
    assert_eq!(status_of(err), 401);
    handle.shutdown().await;
}

#[tokio::test]
async fn wrong_subprotocol_is_refused() {
    let (handle, address) = start_router().await;
    let err = connect(address, "CS-001", Some("ocpp2.0.1"), Some(("CS-001", PASSWORD)))
        .await
        .err()
        .unwrap();
    assert_eq!(status_of(err), 400);
    handle.shutdown().await;
}

#[tokio::test]
async fn boot_notification_is_answered() {
    let (handle, address) = start_router().await;
    let mut client = connect_station(address).await;

    let boot = json!([
        2,
        "boot-1",
        "BootNotification",
        {"chargePointVendor": "Acme", "chargePointModel": "X1"}
    ]);
    client.send(Message::Text(boot.to_string().into())).await.unwrap();

    let answer = next_frame(&mut client).await;
    assert_eq!(answer[0], 3);
    assert_eq!(answer[1], "boot-1");
    assert_eq!(answer[2]["status"], "Accepted");
    assert_eq!(answer[2]["interval"], 60);

    let heartbeat = json!([2, "hb-1", "Heartbeat", {}]);
    client.send(Message::Text(heartbeat.to_string().into())).await.unwrap();
    let answer = next_frame(&mut client).await;
    assert_eq!(answer[1], "hb-1");
    assert!(answer[2]["currentTime"].is_string());

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_action_is_not_implemented() {
    let (handle, address) = start_router().await;
    let mut client = connect_station(address).await;

    let call = json!([2, "x-1", "TeleportVehicle", {}]);
    client.send(Message::Text(call.to_string().into())).await.unwrap();

    let answer = next_frame(&mut client).await;
    assert_eq!(answer[0], 4);
    assert_eq!(answer[1], "x-1");
    assert_eq!(answer[2], "NotImplemented");

    handle.shutdown().await;
}

#[tokio::test]
async fn invalid_payload_is_a_formation_violation() {
    let (handle, address) = start_router().await;
    let mut client = connect_station(address).await;

    let call = json!([2, "b-1", "BootNotification", {"chargePointVendor": "Acme"}]);
    client.send(Message::Text(call.to_string().into())).await.unwrap();

    let answer = next_frame(&mut client).await;
    assert_eq!(answer[0], 4);
    assert_eq!(answer[2], "FormationViolation");

    handle.shutdown().await;
}

async fn send_frame(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn station_call_does_not_block_answer_to_pending_csms_call() {
    // A slot held for the full call length would outlast next_frame's timeout.
    let mut config = AppConfig::default();
    config.router.max_call_length_seconds = 30;
    let (handle, address) = start_router_with(config).await;
    let mut client = connect_station(address).await;

    send_frame(&mut client, json!([2, "hb-1", "Heartbeat", {}])).await;
    assert_eq!(next_frame(&mut client).await[1], "hb-1");

    let station = StationIdentifier::new(1, "CS-001");
    let reset = OutboundCall::new(station.clone(), OcppVersion::V16, "Reset", json!({"type": "Hard"}))
        .with_correlation_id("r-1");
    assert!(handle.router.send_call(reset).await.unwrap().success);

    let call = next_frame(&mut client).await;
    assert_eq!(call, json!([2, "r-1", "Reset", {"type": "Hard"}]));

    // The station's own Call arrives first and has to wait for the slot.
    send_frame(&mut client, json!([2, "hb-9", "Heartbeat", {}])).await;
    send_frame(&mut client, json!([3, "r-1", {"status": "Accepted"}])).await;

    let answer = next_frame(&mut client).await;
    assert_eq!(answer[0], 3);
    assert_eq!(answer[1], "hb-9");
    assert!(answer[2]["currentTime"].is_string());

    // the answered Heartbeat releases the slot again
    let cache = handle.cache.clone();
    tokio::time::timeout(Duration::from_secs(2), async {
        while cache
            .get(&station.to_string(), namespace::TRANSACTIONS)
            .await
            .unwrap()
            .is_some()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pending-call slot still held");

    handle.shutdown().await;
}

#[tokio::test]
async fn call_without_handler_is_answered_with_internal_error() {
    let (handle, address) = start_router().await;
    let mut client = connect_station(address).await;

    send_frame(&mut client, json!([2, "a-1", "Authorize", {"idTag": "TAG1"}])).await;
    let answer = next_frame(&mut client).await;
    assert_eq!(answer[0], 4);
    assert_eq!(answer[1], "a-1");
    assert_eq!(answer[2], "InternalError");
    assert_eq!(answer[4]["failure"], "no subscriber for Authorize");

    // the slot is free for the next Call
    send_frame(&mut client, json!([2, "hb-3", "Heartbeat", {}])).await;
    assert_eq!(next_frame(&mut client).await[1], "hb-3");

    handle.shutdown().await;
}

#[tokio::test]
async fn second_connection_replaces_first() {
    let (handle, address) = start_router().await;
    let mut first = connect_station(address).await;
    let mut second = connect_station(address).await;

    assert_eq!(next_close_code(&mut first).await, Some(CloseCode::from(4000)));

    // the replacement keeps routing
    let heartbeat = json!([2, "hb-2", "Heartbeat", {}]);
    second.send(Message::Text(heartbeat.to_string().into())).await.unwrap();
    let answer = next_frame(&mut second).await;
    assert_eq!(answer[1], "hb-2");

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_open_sockets() {
    let (handle, address) = start_router().await;
    let mut client = connect_station(address).await;

    let sessions = handle.sessions.clone();
    tokio::time::timeout(Duration::from_secs(2), async {
        while sessions.count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let stopping = tokio::spawn(handle.shutdown());
    assert_eq!(next_close_code(&mut client).await, Some(CloseCode::Away));
    assert!(stopping.await.unwrap());
    assert_eq!(sessions.count(), 0);
}
