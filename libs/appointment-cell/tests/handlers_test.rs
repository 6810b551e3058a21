use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::router::appointment_routes;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn create_test_app(config: &TestConfig) -> Router {
    appointment_routes(Arc::new(config.to_app_config()))
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn requests_without_a_token_are_rejected() {
    let config = TestConfig::default();
    let app = create_test_app(&config);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn booking_reserves_the_slot_and_returns_the_record() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());

    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                slot_id, doctor_id, "2024-06-10", "10:00:00", "10:30:00", true
            )
        ])))
        .mount(&mock_server)
        .await;

    // Reservation is the conditional PATCH; returning the row means the CAS won.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .and(query_param("is_available", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                slot_id, doctor_id, "2024-06-10", "10:00:00", "10:30:00", false
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                appointment_id, patient_id, doctor_id, slot_id, "pending", "pending"
            )
        ])))
        .mount(&mock_server)
        .await;

    let patient = TestUser::with_id(patient_id, "patient@example.com", "patient");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    let body = json!({
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "slot_id": slot_id,
        "channel": "video",
        "reason": "persistent headaches"
    });

    let app = create_test_app(&config);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["success"], json!(true));
    assert_eq!(payload["appointment"]["status"], json!("pending"));
}

#[tokio::test]
async fn a_doctor_cannot_book_for_a_patient() {
    let config = TestConfig::default();

    let doctor = TestUser::doctor("doctor@example.com");
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, None);

    let body = json!({
        "patient_id": Uuid::new_v4(),
        "doctor_id": Uuid::new_v4(),
        "slot_id": Uuid::new_v4(),
        "channel": "chat",
        "reason": "follow up"
    });

    let app = create_test_app(&config);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn approving_before_capture_returns_payment_required() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());

    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                appointment_id, patient_id, doctor_id, slot_id, "pending", "pending"
            )
        ])))
        .mount(&mock_server)
        .await;

    let doctor = TestUser::with_id(doctor_id, "doctor@example.com", "doctor");
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, None);

    let app = create_test_app(&config);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/{}/approve", appointment_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn a_stale_approval_surfaces_as_a_conflict() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());

    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                appointment_id, patient_id, doctor_id, slot_id, "pending", "paid"
            )
        ])))
        .mount(&mock_server)
        .await;

    // Empty representation: the status guard matched no row, i.e. a
    // concurrent transition got there first.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let doctor = TestUser::with_id(doctor_id, "doctor@example.com", "doctor");
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, None);

    let app = create_test_app(&config);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/{}/approve", appointment_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn fetching_someone_elses_appointment_is_refused() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());

    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                appointment_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "confirmed",
                "paid"
            )
        ])))
        .mount(&mock_server)
        .await;

    let outsider = TestUser::patient("other@example.com");
    let token = JwtTestUtils::create_test_token(&outsider, &config.jwt_secret, None);

    let app = create_test_app(&config);
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/{}", appointment_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
