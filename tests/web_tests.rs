use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use so101_servo_tools::{
    so101_motors,
    web::{center_on_start, router, AppState},
    Arm, Register, ServoBus, ServoModel, SimTransport,
};
use tower::ServiceExt;

fn panel(sim: Option<&SimTransport>) -> (Router, AppState<SimTransport>) {
    let motors = so101_motors(false);
    let robot = sim.map(|sim| {
        let bus = ServoBus::new(sim.clone(), ServoModel::Sts3215);
        let mut arm = Arm::connect(bus, motors.clone(), None).unwrap();
        arm.set_torque(true).unwrap();
        arm
    });
    let state = AppState::new(&motors, robot);
    (router(state.clone()), state)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn index_serves_the_panel() {
    let (app, _) = panel(None);
    let res = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("/api/motor"));
}

#[tokio::test]
async fn motor_command_moves_the_servo() {
    let sim = SimTransport::so101();
    let (app, state) = panel(Some(&sim));

    let (status, body) =
        send(app, post_json("/api/motor", json!({ "motor": "shoulder_pan", "position": 50.0 }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "motor": "shoulder_pan", "position": 50.0 }));
    assert_eq!(sim.register(1, Register::GoalPosition), Some(3071));
    assert_eq!(state.positions().await["shoulder_pan"], 50.0);
}

#[tokio::test]
async fn unknown_motor_is_a_bad_request() {
    let (app, _) = panel(None);
    let (status, body) =
        send(app, post_json("/api/motor", json!({ "motor": "elbow", "position": 1.0 }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("Invalid motor: elbow"));
}

#[tokio::test]
async fn malformed_body_gets_a_json_error() {
    let sim = SimTransport::so101();
    let (app, state) = panel(Some(&sim));

    let (status, body) =
        send(app, post_json("/api/motor", json!({ "motor": "gripper", "position": "abc" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    assert_eq!(sim.register(6, Register::GoalPosition), Some(2048));
    assert_eq!(state.positions().await["gripper"], 50.0);
}

#[tokio::test]
async fn failed_startup_centering_falls_back_to_storing() {
    let sim = SimTransport::so101();
    let (app, state) = panel(Some(&sim));
    sim.remove_servo(3);

    center_on_start(&state).await;
    assert!(!state.is_connected().await);
    assert_eq!(sim.register(1, Register::TorqueEnable), Some(0));

    let (status, body) =
        send(app, post_json("/api/motor", json!({ "motor": "elbow_flex", "position": 20.0 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(state.positions().await["elbow_flex"], 20.0);
}

#[tokio::test]
async fn startup_centering_keeps_a_healthy_robot() {
    let sim = SimTransport::so101();
    sim.set_register(2, Register::GoalPosition, 100);
    let (_, state) = panel(Some(&sim));

    center_on_start(&state).await;
    assert!(state.is_connected().await);
    assert_eq!(sim.register(2, Register::GoalPosition), Some(2048));
}

#[tokio::test]
async fn bus_failure_is_a_server_error() {
    let sim = SimTransport::so101();
    let (app, _) = panel(Some(&sim));
    sim.remove_servo(2);

    let (status, body) =
        send(app, post_json("/api/motor", json!({ "motor": "shoulder_lift", "position": 10.0 }))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn without_robot_positions_are_only_stored() {
    let (app, _) = panel(None);
    let (status, _) =
        send(app.clone(), post_json("/api/motor", json!({ "motor": "gripper", "position": 80.0 }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        send(app, Request::builder().uri("/api/positions").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["positions"]["gripper"], json!(80.0));
    assert_eq!(body["positions"]["elbow_flex"], json!(0.0));
}

#[tokio::test]
async fn center_resets_everything() {
    let sim = SimTransport::so101();
    sim.set_register(3, Register::GoalPosition, 100);
    let (app, state) = panel(Some(&sim));

    let (status, body) = send(app, post_json("/api/center", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "message": "All motors centered" }));
    assert_eq!(sim.register(3, Register::GoalPosition), Some(2048));
    assert_eq!(sim.register(6, Register::GoalPosition), Some(2048));
    assert_eq!(state.positions().await["gripper"], 50.0);
}

#[tokio::test]
async fn positions_read_back_from_the_robot() {
    let sim = SimTransport::so101();
    sim.set_register(5, Register::PresentPosition, 4095);
    sim.set_register(5, Register::GoalPosition, 4095);
    let (app, state) = panel(Some(&sim));

    let (status, body) =
        send(app, Request::builder().uri("/api/positions").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["positions"]["wrist_roll"], json!(100.0));
    assert_eq!(state.positions().await["wrist_roll"], 100.0);
}
