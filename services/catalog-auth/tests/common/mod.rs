#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use catalog_auth::app::{AppState, StateSettings, build_router, build_state};
use catalog_auth::auth::oidc::{GoogleBridgeConfig, GoogleIdentityBridge};
use catalog_auth::auth::session::SessionConfig;
use catalog_auth::store::memory::InMemoryStore;
use jsonwebtoken::Algorithm;
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower::ServiceExt;

pub const GOOGLE_CLIENT_ID: &str = "web-client.apps.googleusercontent.com";
pub const AUDIENCE: &str = "catalog-api";
pub const ADMIN_TOKEN: &str = "operator-secret";
const GOOGLE_KID: &str = "google-1";

/// Local stand-in for Google's certificate endpoint.
pub struct FakeGoogle {
    key: RsaPrivateKey,
    pub jwks_url: String,
    _server: JoinHandle<()>,
}

impl FakeGoogle {
    pub async fn start() -> Self {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("key");
        let jwks = json!({
            "keys": [{
                "kty": "RSA",
                "kid": GOOGLE_KID,
                "alg": "RS256",
                "use": "sig",
                "n": URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
            }]
        });
        let app = Router::new().route(
            "/certs",
            axum::routing::get(move || {
                let jwks = jwks.clone();
                async move { axum::Json(jwks) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });
        Self {
            key,
            jwks_url: format!("http://{addr}/certs"),
            _server: server,
        }
    }

    pub fn id_token(&self, subject: &str, email: &str, email_verified: bool) -> String {
        let now = chrono::Utc::now().timestamp();
        self.sign(json!({
            "iss": "https://accounts.google.com",
            "aud": GOOGLE_CLIENT_ID,
            "sub": subject,
            "email": email,
            "email_verified": email_verified,
            "iat": now,
            "exp": now + 300,
        }))
    }

    pub fn sign(&self, claims: Value) -> String {
        let mut header = jsonwebtoken::Header::new(Algorithm::RS256);
        header.kid = Some(GOOGLE_KID.to_string());
        let pem = self.key.to_pkcs1_pem(Default::default()).expect("pem");
        jsonwebtoken::encode(
            &header,
            &claims,
            &jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes()).expect("enc"),
        )
        .expect("token")
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub google: FakeGoogle,
}

impl TestApp {
    pub async fn start(admin_token: Option<&str>) -> Self {
        let google = FakeGoogle::start().await;
        let store = Arc::new(InMemoryStore::new());
        let identity = Arc::new(GoogleIdentityBridge::new(GoogleBridgeConfig::new(
            google.jwks_url.clone(),
            60,
        )));
        let state = build_state(
            store.clone(),
            identity,
            StateSettings {
                session: SessionConfig {
                    identity_audiences: vec![GOOGLE_CLIENT_ID.to_string()],
                    allowed_audiences: vec![AUDIENCE.to_string(), "seller-portal".to_string()],
                },
                default_audience: AUDIENCE.to_string(),
                admin_token: admin_token.map(str::to_string),
            },
        );
        Self {
            router: build_router(state.clone()),
            state,
            store,
            google,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.expect("response")
    }

    /// Log in through `POST /auth/google` and return the JSON body.
    pub async fn login(&self, subject: &str, email: &str) -> Value {
        let id_token = self.google.id_token(subject, email, true);
        let response = self
            .send(json_request(
                "POST",
                "/auth/google",
                json!({ "id_token": id_token, "audience": AUDIENCE }),
            ))
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        read_json(response).await
    }
}

pub async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn bearer_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request")
}

pub fn admin_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(token) = token {
        builder = builder.header("X-Catalog-Admin-Token", token);
    }
    builder.body(Body::empty()).expect("request")
}

pub fn assert_generic_unauthorized(body: &Value) {
    assert_eq!(
        body,
        &json!({
            "code": "unauthorized",
            "message": "invalid credentials",
            "request_id": null
        })
    );
}
