//! HTTP credential issuer and prompt store against a mock backend.

use serde_json::json;
use time::macros::datetime;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waav_session::session::{DEFAULT_TEMPLATE, resolve_template};
use waav_session::{
    BackendClient, ChatRole, CredentialIssuer, HttpCredentialIssuer, HttpPromptStore, PromptStore,
    SessionError, TranscriptEntry,
};

fn client(server: &MockServer) -> BackendClient {
    BackendClient::new(&server.uri()).unwrap()
}

// =============================================================================
// Credential issuer
// =============================================================================

#[tokio::test]
async fn test_issue_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/realtime/session"))
        .and(query_param("ttl", "600"))
        .and(header("authorization", "Bearer backend-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": "ek_abc",
            "expires_at": 1_700_000_600u64,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let issuer = HttpCredentialIssuer::new(client(&server).with_api_key("backend-key"));
    let credential = issuer.issue(600).await.unwrap();

    assert_eq!(credential.secret(), "ek_abc");
    assert_eq!(credential.expires_at, Some(1_700_000_600));
}

#[tokio::test]
async fn test_issue_credential_provider_shape() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/realtime/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sess_1",
            "client_secret": {"value": "ek_nested", "expires_at": 99},
        })))
        .mount(&server)
        .await;

    let issuer = HttpCredentialIssuer::new(client(&server));
    let credential = issuer.issue(60).await.unwrap();
    assert_eq!(credential.secret(), "ek_nested");
}

#[tokio::test]
async fn test_issue_credential_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/realtime/session"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let issuer = HttpCredentialIssuer::new(client(&server));
    let err = issuer.issue(600).await.unwrap_err();

    match err {
        SessionError::Credential(message) => {
            assert!(message.contains("500"), "{message}");
            assert!(message.contains("upstream down"), "{message}");
        }
        other => panic!("expected credential error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_issue_credential_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/realtime/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "x"})))
        .mount(&server)
        .await;

    let issuer = HttpCredentialIssuer::new(client(&server));
    assert!(matches!(
        issuer.issue(600).await,
        Err(SessionError::Credential(_))
    ));
}

// =============================================================================
// Prompt store
// =============================================================================

#[tokio::test]
async fn test_fetch_template() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompts/campaigns"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"template": "Hola {{agent_name}}"})),
        )
        .mount(&server)
        .await;

    let store = HttpPromptStore::new(client(&server));
    assert_eq!(
        store.fetch_template("campaigns").await.unwrap().as_deref(),
        Some("Hola {{agent_name}}")
    );
}

#[tokio::test]
async fn test_fetch_missing_template() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompts/unknown"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = HttpPromptStore::new(client(&server));
    assert_eq!(store.fetch_template("unknown").await.unwrap(), None);
}

#[tokio::test]
async fn test_save_template() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompts/campaigns"))
        .and(body_json(json!({"template": "Nuevo [TOOL_UPDATE] [TOOL_NAVIGATE]"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpPromptStore::new(client(&server));
    store
        .save_template("campaigns", "Nuevo [TOOL_UPDATE] [TOOL_NAVIGATE]")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_save_transcript() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/campaigns/transcript"))
        .and(body_json(json!({
            "entries": [
                {"role": "user", "text": "Hola", "timestamp": "2025-01-02T03:04:05Z"},
                {"role": "assistant", "text": "Buenas", "timestamp": "2025-01-02T03:04:06Z"},
            ]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let entries = vec![
        TranscriptEntry {
            role: ChatRole::User,
            text: "Hola".to_string(),
            timestamp: datetime!(2025-01-02 03:04:05 UTC),
        },
        TranscriptEntry {
            role: ChatRole::Assistant,
            text: "Buenas".to_string(),
            timestamp: datetime!(2025-01-02 03:04:06 UTC),
        },
    ];

    let store = HttpPromptStore::new(client(&server));
    store.save_transcript("campaigns", &entries).await.unwrap();
}

#[tokio::test]
async fn test_store_error_maps_to_prompt_store() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/campaigns/transcript"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = HttpPromptStore::new(client(&server));
    let err = store.save_transcript("campaigns", &[]).await.unwrap_err();
    assert!(matches!(err, SessionError::PromptStore(_)));
}

// =============================================================================
// Template resolution
// =============================================================================

#[tokio::test]
async fn test_resolve_uses_compatible_remote_template() {
    let server = MockServer::start().await;
    let remote = "Eres {{agent_name}} [TOOL_UPDATE]{}[/TOOL_UPDATE] [TOOL_NAVIGATE]{}[/TOOL_NAVIGATE]";
    Mock::given(method("GET"))
        .and(path("/prompts/campaigns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"template": remote})))
        .mount(&server)
        .await;

    let store = HttpPromptStore::new(client(&server));
    assert_eq!(
        resolve_template(&store, "campaigns", DEFAULT_TEMPLATE).await,
        remote
    );
}

#[tokio::test]
async fn test_resolve_falls_back_on_incompatible_template() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompts/campaigns"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"template": "Sin marcadores"})),
        )
        .mount(&server)
        .await;

    let store = HttpPromptStore::new(client(&server));
    assert_eq!(
        resolve_template(&store, "campaigns", DEFAULT_TEMPLATE).await,
        DEFAULT_TEMPLATE
    );
}

#[tokio::test]
async fn test_resolve_falls_back_when_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompts/campaigns"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = HttpPromptStore::new(client(&server));
    assert_eq!(
        resolve_template(&store, "campaigns", DEFAULT_TEMPLATE).await,
        DEFAULT_TEMPLATE
    );
}
