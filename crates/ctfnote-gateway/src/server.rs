use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use ctfnote_core::StoreError;
use ctfnote_hooks::{JwtClaims, Mutation, MutationContext, MutationName, MutationPipeline};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::interactions::{InteractionHandler, InteractionRejection};

pub struct GatewayState {
    pub pipeline: Arc<MutationPipeline>,
    /// `None` when Discord is not configured.
    pub interactions: Option<InteractionHandler>,
    pub mutation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MutationRequest {
    mutation: MutationName,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    claims: JwtClaims,
}

pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/interactions", post(handle_interaction))
        .route("/mutations", post(handle_mutation))
        .route("/healthz", get(handle_health))
        .with_state(state)
}

fn error_body(code: &str, message: impl std::fmt::Display) -> Json<Value> {
    Json(json!({"error":{"code":code,"message":message.to_string()}}))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

async fn handle_health(State(state): State<Arc<GatewayState>>) -> (StatusCode, Json<Value>) {
    let effects = state.pipeline.executor().stats();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "discord": state.interactions.is_some(),
            "effects": effects,
        })),
    )
}

async fn handle_interaction(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(handler) = state.interactions.as_ref() else {
        return (
            StatusCode::NOT_FOUND,
            error_body("discord_disabled", "discord is not configured"),
        );
    };
    match handler.handle(
        header(&headers, "x-signature-timestamp"),
        header(&headers, "x-signature-ed25519"),
        &body,
    ) {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(InteractionRejection::Unauthorized(message)) => {
            tracing::debug!(%message, "rejected interaction signature");
            (
                StatusCode::UNAUTHORIZED,
                error_body("invalid_signature", message),
            )
        }
        Err(InteractionRejection::BadRequest(message)) => {
            (StatusCode::BAD_REQUEST, error_body("bad_request", message))
        }
    }
}

async fn handle_mutation(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if let Some(expected) = state.mutation_token.as_deref() {
        let observed = header(&headers, "authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or("");
        if !timing_safe_equal(observed.as_bytes(), expected.trim().as_bytes()) {
            return (
                StatusCode::UNAUTHORIZED,
                error_body("auth_failed", "invalid mutation token"),
            );
        }
    }

    let request: MutationRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => return (StatusCode::BAD_REQUEST, error_body("bad_request", error)),
    };
    let input = if request.input.is_null() {
        json!({})
    } else {
        request.input
    };
    let mutation = match Mutation::from_input(request.mutation, input) {
        Ok(mutation) => mutation,
        Err(error) => return (StatusCode::BAD_REQUEST, error_body("invalid_input", error)),
    };

    let context = MutationContext {
        claims: request.claims,
    };
    match state.pipeline.execute(mutation, context).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "committed",
                "mutation": request.mutation.as_str(),
                "outcome": outcome,
            })),
        ),
        Err(error) => {
            let (status, code) = store_error_status(&error);
            tracing::debug!(mutation = request.mutation.as_str(), %error, "mutation rejected");
            (status, error_body(code, error))
        }
    }
}

fn timing_safe_equal(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut diff = 0u8;
    for (lhs, rhs) in left.iter().zip(right) {
        diff |= lhs ^ rhs;
    }
    diff == 0
}

fn store_error_status(error: &StoreError) -> (StatusCode, &'static str) {
    match error {
        error if error.is_not_found() => (StatusCode::NOT_FOUND, "not_found"),
        StoreError::DuplicateTaskTitle { .. } | StoreError::DuplicateCtfTitle(_) => {
            (StatusCode::CONFLICT, "conflict")
        }
        StoreError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "store_failure"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use ctfnote_archive::{ArchivePublisher, ArchiveWorkflow, DocumentService, PublishError};
    use ctfnote_core::{CtfStore, InMemoryCtfStore};
    use ctfnote_discord::{
        InMemoryWorkspace, InteractionSurface, LinkedLocator, RecordingSurface,
    };
    use ctfnote_hooks::{
        DiscordSync, DiscordSyncConfig, DiscordSyncHooks, EffectExecutor, HookRegistry,
        MutationPipeline,
    };
    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use super::{build_gateway_router, timing_safe_equal, GatewayState};
    use crate::interactions::{InteractionHandler, SurfaceFactory};
    use crate::signature::{encode_hex, InteractionVerifier};

    struct StubPad;

    #[async_trait]
    impl DocumentService for StubPad {
        fn max_document_chars(&self) -> usize {
            100_000
        }

        async fn create_document(
            &self,
            _title: &str,
            _content: &str,
        ) -> Result<String, PublishError> {
            Ok("https://pad.example/stub".to_string())
        }
    }

    struct SharedSurface(RecordingSurface);

    impl SurfaceFactory for SharedSurface {
        fn surface(&self, _interaction_token: &str) -> Arc<dyn InteractionSurface> {
            Arc::new(self.0.clone())
        }
    }

    struct TestGateway {
        base: String,
        key: SigningKey,
        store: Arc<InMemoryCtfStore>,
        workspace: Arc<InMemoryWorkspace>,
        surface: RecordingSurface,
        handle: tokio::task::JoinHandle<()>,
    }

    async fn spawn_gateway(mutation_token: Option<&str>) -> TestGateway {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let store = Arc::new(InMemoryCtfStore::new());
        let workspace = Arc::new(InMemoryWorkspace::new());
        let locator = LinkedLocator::new(workspace.clone(), store.clone());
        let hooks = DiscordSyncHooks::new(DiscordSync::new(
            store.clone(),
            locator.clone(),
            DiscordSyncConfig::default(),
        ));
        let pipeline = MutationPipeline::new(
            store.clone(),
            HookRegistry::build(&[&hooks]),
            Arc::new(EffectExecutor::new()),
        );
        let workflow = ArchiveWorkflow::new(
            store.clone(),
            locator,
            ArchivePublisher::new(Arc::new(StubPad)),
        );
        let surface = RecordingSurface::new();
        let verifier = InteractionVerifier::from_hex(&encode_hex(key.verifying_key().as_bytes()))
            .expect("key");
        let state = Arc::new(GatewayState {
            pipeline: Arc::new(pipeline),
            interactions: Some(InteractionHandler::new(
                verifier,
                workflow,
                Arc::new(SharedSurface(surface.clone())),
            )),
            mutation_token: mutation_token.map(str::to_string),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = build_gateway_router(state);
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        tokio::time::sleep(Duration::from_millis(25)).await;
        TestGateway {
            base: format!("http://{addr}"),
            key,
            store,
            workspace,
            surface,
            handle,
        }
    }

    fn unix_now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_secs()
    }

    async fn post_signed(
        gateway: &TestGateway,
        payload: &Value,
        signed_at: u64,
    ) -> reqwest::Response {
        let body = payload.to_string();
        let timestamp = signed_at.to_string();
        let signature = gateway
            .key
            .sign(format!("{timestamp}{body}").as_bytes());
        reqwest::Client::new()
            .post(format!("{}/interactions", gateway.base))
            .header("x-signature-ed25519", encode_hex(&signature.to_bytes()))
            .header("x-signature-timestamp", timestamp)
            .body(body)
            .send()
            .await
            .expect("send")
    }

    async fn post_interaction(gateway: &TestGateway, payload: &Value) -> reqwest::Response {
        post_signed(gateway, payload, unix_now()).await
    }

    async fn wait_for_views(surface: &RecordingSurface, count: usize) {
        for _ in 0..100 {
            if surface.views().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("surface saw {} views, wanted {count}", surface.views().len());
    }

    #[tokio::test]
    async fn integration_ping_is_answered_with_pong() {
        let gateway = spawn_gateway(None).await;
        let response = post_interaction(&gateway, &json!({"type": 1})).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("json");
        assert_eq!(body, json!({"type": 1}));
        gateway.handle.abort();
    }

    #[tokio::test]
    async fn regression_unsigned_interactions_are_rejected() {
        let gateway = spawn_gateway(None).await;
        let response = reqwest::Client::new()
            .post(format!("{}/interactions", gateway.base))
            .header("x-signature-ed25519", "00".repeat(64))
            .header("x-signature-timestamp", unix_now().to_string())
            .body(r#"{"type":1}"#)
            .send()
            .await
            .expect("send");
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
        gateway.handle.abort();
    }

    #[tokio::test]
    async fn regression_replayed_interaction_with_stale_timestamp_is_rejected() {
        let gateway = spawn_gateway(None).await;
        let response = post_signed(&gateway, &json!({"type": 1}), unix_now() - 3_600).await;
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.expect("json");
        assert_eq!(body["error"]["code"], "invalid_signature");
        gateway.handle.abort();
    }

    #[test]
    fn unit_token_comparison_requires_exact_bytes() {
        assert!(timing_safe_equal(b"secret", b"secret"));
        assert!(!timing_safe_equal(b"secret", b"secreT"));
        assert!(!timing_safe_equal(b"secret", b"secret-longer"));
        assert!(!timing_safe_equal(b"", b"secret"));
    }

    #[tokio::test]
    async fn regression_wrong_or_prefixed_mutation_token_is_rejected() {
        let gateway = spawn_gateway(Some("secret")).await;
        let client = reqwest::Client::new();
        let request = json!({"mutation": "deleteTask", "input": {"id": 1}});
        for token in ["secreT", "secre", "secret2"] {
            let response = client
                .post(format!("{}/mutations", gateway.base))
                .bearer_auth(token)
                .json(&request)
                .send()
                .await
                .expect("send");
            assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED, "{token}");
        }
        gateway.handle.abort();
    }

    #[tokio::test]
    async fn functional_archive_command_and_button_drive_the_workflow() {
        let gateway = spawn_gateway(None).await;
        let ctf = gateway.store.create_ctf("HTB").await.expect("ctf");
        gateway.workspace.add_category("HTB");

        let response = post_interaction(
            &gateway,
            &json!({
                "type": 2, "token": "tok", "data": {"name": "archive"},
                "member": {"permissions": "8"}
            }),
        )
        .await;
        let body: Value = response.json().await.expect("json");
        assert_eq!(body, json!({"type": 5, "data": {"flags": 64}}));
        wait_for_views(&gateway.surface, 1).await;
        assert_eq!(
            gateway.surface.last().expect("view").buttons[0].custom_id,
            "archive-ctf-button-HTB"
        );

        let response = post_interaction(
            &gateway,
            &json!({
                "type": 3, "token": "tok", "data": {"custom_id": "archive-ctf-button-HTB"},
                "member": {"permissions": "8"}
            }),
        )
        .await;
        let body: Value = response.json().await.expect("json");
        assert_eq!(body, json!({"type": 6}));
        wait_for_views(&gateway.surface, 3).await;
        assert_eq!(
            gateway.surface.last().expect("view").content,
            "Archived the CTF channels and roles for HTB"
        );
        let tasks = gateway.store.tasks_for_ctf(ctf.id).await.expect("tasks");
        assert_eq!(tasks[0].pad_url, "https://pad.example/stub");
        gateway.handle.abort();
    }

    #[tokio::test]
    async fn regression_archive_command_requires_administrator() {
        let gateway = spawn_gateway(None).await;
        let response = post_interaction(
            &gateway,
            &json!({
                "type": 2, "token": "tok", "data": {"name": "archive"},
                "member": {"permissions": "2048"}
            }),
        )
        .await;
        let body: Value = response.json().await.expect("json");
        assert_eq!(body["type"], 4);
        assert_eq!(body["data"]["flags"], 64);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(gateway.surface.views().is_empty());
        gateway.handle.abort();
    }

    #[tokio::test]
    async fn integration_mutations_endpoint_commits_and_reports_health() {
        let gateway = spawn_gateway(Some("secret")).await;
        let ctf = gateway.store.create_ctf("HTB").await.expect("ctf");
        let client = reqwest::Client::new();
        let request = json!({
            "mutation": "createTask",
            "input": {"ctfId": ctf.id, "title": "web"},
            "claims": {"user_id": 1}
        });

        let unauthorized = client
            .post(format!("{}/mutations", gateway.base))
            .json(&request)
            .send()
            .await
            .expect("send");
        assert_eq!(unauthorized.status(), reqwest::StatusCode::UNAUTHORIZED);

        let response = client
            .post(format!("{}/mutations", gateway.base))
            .bearer_auth("secret")
            .json(&request)
            .send()
            .await
            .expect("send");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("json");
        assert_eq!(body["outcome"]["type"], "task");
        assert_eq!(body["outcome"]["title"], "web");

        let missing = client
            .post(format!("{}/mutations", gateway.base))
            .bearer_auth("secret")
            .json(&json!({"mutation": "deleteTask", "input": {"id": 999}}))
            .send()
            .await
            .expect("send");
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let health: Value = client
            .get(format!("{}/healthz", gateway.base))
            .send()
            .await
            .expect("send")
            .json()
            .await
            .expect("json");
        assert_eq!(health["status"], "ok");
        assert_eq!(health["discord"], true);
        assert_eq!(health["effects"]["submitted"], 1);
        gateway.handle.abort();
    }
}
