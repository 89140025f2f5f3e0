//! Atlas Administration API client

use async_trait::async_trait;
use broker_core::{
    BrokerError, ClusterMetadata, ControlPlane, DatabaseAccount, ProxyConfig, ScopedAccountSpec,
    SecretString,
};
use digest_auth::{AuthContext, HttpMethod};
use reqwest::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

use crate::auth::{AdminAuth, RequestAuth, TokenSource};
use crate::error::{AdminError, AdminResult, ApiErrorKind};
use crate::types::{
    ApiErrorBody, CloudDatabaseUser, ClusterDescription, CreateDatabaseUser, LegacyDatabaseUser,
    Paginated, UserPayload,
};

/// Public Atlas endpoint
pub const DEFAULT_BASE_URL: &str = "https://cloud.mongodb.com";

/// Versioned media type pinning the API revision
const ACCEPT_VERSIONED: &str = "application/vnd.atlas.2025-03-12+json";

const API_PATH: [&str; 3] = ["api", "atlas", "v2"];
const TOKEN_PATH: [&str; 3] = ["api", "oauth", "token"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: usize = 100;

/// Client for the subset of the Admin API the broker needs
pub struct AtlasAdminClient {
    http: Client,
    base_url: Url,
    tokens: TokenSource,
}

impl AtlasAdminClient {
    /// Create a client for `base_url`. When `proxy` is enabled, all API
    /// traffic, token requests included, goes through it.
    pub fn new(base_url: &str, auth: AdminAuth, proxy: &ProxyConfig) -> AdminResult<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| AdminError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let mut builder = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("atlas-broker/", env!("CARGO_PKG_VERSION")));

        let proxy_url = proxy
            .proxy_url()
            .map_err(|e| AdminError::Proxy(e.to_string()))?;
        if let Some(proxy_url) = proxy_url {
            info!("Routing Atlas API traffic through SOCKS5 proxy {}", proxy.address());
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| AdminError::Proxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build()?;
        let token_url = join(&base_url, &TOKEN_PATH, &[])?;

        Ok(Self {
            http,
            base_url,
            tokens: TokenSource::new(auth, token_url),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> AdminResult<Url> {
        join(&self.base_url, &API_PATH, segments)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> AdminResult<T> {
        let request = request.header("Accept", ACCEPT_VERSIONED);

        let response = match self.tokens.credentials(&self.http).await? {
            RequestAuth::Bearer(token) => request.bearer_auth(token.expose()).send().await?,
            RequestAuth::Digest { username, password } => {
                self.send_with_digest(request.build()?, &username, &password)
                    .await?
            }
        };

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(AdminError::from);
        }

        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }

        Err(api_error(status, &text))
    }

    /// Send once without credentials, then answer the 401 digest challenge
    async fn send_with_digest(
        &self,
        request: Request,
        username: &str,
        password: &SecretString,
    ) -> AdminResult<Response> {
        let mut answer = request.try_clone().ok_or_else(|| {
            AdminError::AuthError("streaming bodies cannot be replayed for digest auth".to_string())
        })?;

        let challenged = self.http.execute(request).await?;
        if challenged.status() != StatusCode::UNAUTHORIZED {
            return Ok(challenged);
        }

        let challenge = challenged
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AdminError::AuthError("401 without a digest challenge".to_string()))?;
        let authorization = digest_authorization(challenge, username, password, &answer)?;
        answer.headers_mut().insert(AUTHORIZATION, authorization);

        debug!("Answering digest challenge for {} {}", answer.method(), answer.url().path());
        Ok(self.http.execute(answer).await?)
    }

    /// `POST /groups/{groupId}/databaseUsers`
    pub async fn create_database_user(
        &self,
        project_id: &str,
        spec: &ScopedAccountSpec,
    ) -> AdminResult<DatabaseAccount> {
        let url = self.endpoint(&["groups", project_id, "databaseUsers"])?;
        debug!("Creating database user {} in project {}", spec.username, project_id);

        let body = CreateDatabaseUser::from_spec(project_id, spec);
        let user: CloudDatabaseUser = self
            .send(self.http.post(url).json(&body))
            .await
            .map_err(|e| {
                error!(
                    "Failed to create database user {} in project {}: {}",
                    spec.username, project_id, e
                );
                e
            })?;

        Ok(UserPayload::Current(user).into_account(project_id))
    }

    /// `GET /groups/{groupId}/clusters/{clusterName}`
    pub async fn get_cluster(
        &self,
        project_id: &str,
        cluster_name: &str,
    ) -> AdminResult<ClusterMetadata> {
        let url = self.endpoint(&["groups", project_id, "clusters", cluster_name])?;
        let cluster: ClusterDescription = self.send(self.http.get(url)).await?;

        debug!(
            "Cluster {} in project {} is {}",
            cluster.name,
            project_id,
            cluster.state_name.as_deref().unwrap_or("in an unknown state")
        );

        Ok(cluster.into_metadata(project_id))
    }

    /// All database users of a project, following pagination
    pub async fn list_database_users(&self, project_id: &str) -> AdminResult<Vec<DatabaseAccount>> {
        let url = self.endpoint(&["groups", project_id, "databaseUsers"])?;
        let page_size = PAGE_SIZE.to_string();
        let mut accounts = Vec::new();
        let mut page_num = 1usize;

        loop {
            let page_param = page_num.to_string();
            let page: Paginated<LegacyDatabaseUser> = self
                .send(self.http.get(url.clone()).query(&[
                    ("pageNum", page_param.as_str()),
                    ("itemsPerPage", page_size.as_str()),
                    ("includeCount", "true"),
                ]))
                .await?;

            let received = page.results.len();
            accounts.extend(
                page.results
                    .into_iter()
                    .map(|user| UserPayload::Legacy(user).into_account(project_id)),
            );

            let reached_total = page
                .total_count
                .map_or(false, |total| accounts.len() as u64 >= total);
            if received < PAGE_SIZE || reached_total {
                break;
            }
            page_num += 1;
        }

        Ok(accounts)
    }
}

#[async_trait]
impl ControlPlane for AtlasAdminClient {
    async fn create_scoped_account(
        &self,
        project_id: &str,
        spec: &ScopedAccountSpec,
    ) -> broker_core::Result<DatabaseAccount> {
        self.create_database_user(project_id, spec)
            .await
            .map_err(BrokerError::from)
    }

    async fn cluster_metadata(
        &self,
        project_id: &str,
        cluster_name: &str,
    ) -> broker_core::Result<ClusterMetadata> {
        self.get_cluster(project_id, cluster_name)
            .await
            .map_err(BrokerError::from)
    }
}

/// Append percent-encoded path segments to `base`
fn join(base: &Url, prefix: &[&str], segments: &[&str]) -> AdminResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AdminError::InvalidUrl(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(prefix)
        .extend(segments);
    Ok(url)
}

fn digest_authorization(
    challenge: &str,
    username: &str,
    password: &SecretString,
    request: &Request,
) -> AdminResult<HeaderValue> {
    let mut prompt = digest_auth::parse(challenge)
        .map_err(|e| AdminError::AuthError(format!("unusable digest challenge: {}", e)))?;

    let url = request.url();
    let uri = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    let body = request.body().and_then(|b| b.as_bytes());
    let context = AuthContext::new_with_method(
        username,
        password.expose(),
        uri,
        body,
        HttpMethod::from(request.method().as_str()),
    );

    let answer = prompt
        .respond(&context)
        .map_err(|e| AdminError::AuthError(format!("cannot answer digest challenge: {}", e)))?;
    let mut value = HeaderValue::from_str(&answer.to_header_string())
        .map_err(|e| AdminError::AuthError(e.to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

fn api_error(status: StatusCode, text: &str) -> AdminError {
    let body: ApiErrorBody = serde_json::from_str(text).unwrap_or_default();

    let detail = body
        .detail
        .or(body.reason)
        .filter(|d| !d.is_empty())
        .or_else(|| Some(text.trim().to_string()).filter(|t| !t.is_empty()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no details").to_string());

    AdminError::Api {
        status: status.as_u16(),
        kind: ApiErrorKind::from_status(status.as_u16()),
        error_code: body.error_code,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, Method, StatusCode as HttpStatus, Uri};
    use axum::response::{IntoResponse, Response as HttpResponse};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use broker_core::RoleAssignment;
    use md5::{Digest, Md5};
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeAtlas {
        token_requests: AtomicU32,
        created: Mutex<Vec<Value>>,
        headers: Mutex<Vec<(String, String)>>,
        /// Public and private API key; when set, every API call needs digest auth
        digest: Option<(&'static str, &'static str)>,
        challenges: AtomicU32,
    }

    const REALM: &str = "MMS Public API";
    const NONCE: &str = "abc123";

    fn md5_hex(input: &str) -> String {
        format!("{:x}", Md5::digest(input.as_bytes()))
    }

    /// Checks the digest answer the way the server computes it for
    /// `qop=auth`, or issues a fresh challenge
    fn check_digest(
        state: &FakeAtlas,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Option<HttpResponse> {
        let (public_key, private_key) = state.digest?;

        let answer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Digest "))
            .map(|v| {
                v.split(',')
                    .filter_map(|pair| pair.trim().split_once('='))
                    .map(|(k, v)| (k.to_string(), v.trim_matches('"').to_string()))
                    .collect::<HashMap<_, _>>()
            });

        let verified = answer.map_or(false, |fields| {
            let field = |name: &str| fields.get(name).cloned().unwrap_or_default();
            let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
            let ha1 = md5_hex(&format!("{}:{}:{}", public_key, REALM, private_key));
            let ha2 = md5_hex(&format!("{}:{}", method.as_str(), path));
            let expected = md5_hex(&format!(
                "{}:{}:{}:{}:{}:{}",
                ha1,
                NONCE,
                field("nc"),
                field("cnonce"),
                field("qop"),
                ha2
            ));
            field("username") == public_key && field("uri") == path && field("response") == expected
        });
        if verified {
            return None;
        }

        state.challenges.fetch_add(1, Ordering::SeqCst);
        Some(
            (
                HttpStatus::UNAUTHORIZED,
                [(
                    "www-authenticate",
                    format!(
                        "Digest realm=\"{}\", nonce=\"{}\", algorithm=MD5, qop=\"auth\"",
                        REALM, NONCE
                    ),
                )],
                Json(json!({"error": 401, "reason": "Unauthorized"})),
            )
                .into_response(),
        )
    }

    fn record(state: &FakeAtlas, headers: &HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        state
            .headers
            .lock()
            .unwrap()
            .push((header("authorization"), header("accept")));
    }

    async fn issue_token(State(state): State<Arc<FakeAtlas>>, headers: HeaderMap) -> impl IntoResponse {
        let n = state.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let basic = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !basic.starts_with("Basic ") {
            return (HttpStatus::UNAUTHORIZED, Json(json!({}))).into_response();
        }
        Json(json!({
            "access_token": format!("token-{}", n),
            "expires_in": 3600,
            "token_type": "Bearer"
        }))
        .into_response()
    }

    async fn create_user(
        State(state): State<Arc<FakeAtlas>>,
        Path(group_id): Path<String>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        if let Some(challenge) = check_digest(&state, &method, &uri, &headers) {
            return challenge;
        }
        record(&state, &headers);
        state.created.lock().unwrap().push(body.clone());

        let mut user = body;
        if let Some(fields) = user.as_object_mut() {
            fields.remove("password");
            fields.insert("groupId".to_string(), json!(group_id));
        }
        (HttpStatus::CREATED, Json(user)).into_response()
    }

    async fn list_users(
        State(state): State<Arc<FakeAtlas>>,
        Path(group_id): Path<String>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        record(&state, &headers);
        let page: usize = query.get("pageNum").and_then(|p| p.parse().ok()).unwrap_or(1);
        let total = PAGE_SIZE + 2;
        let start = (page - 1) * PAGE_SIZE;
        let results: Vec<Value> = (start..total.min(start + PAGE_SIZE))
            .map(|i| {
                json!({
                    "username": format!("user{}", i),
                    "databaseName": "admin",
                    "groupId": group_id,
                    "roles": [{"roleName": "read", "databaseName": "admin"}]
                })
            })
            .collect();
        Json(json!({"results": results, "totalCount": total}))
    }

    async fn get_cluster(
        State(state): State<Arc<FakeAtlas>>,
        Path((group_id, name)): Path<(String, String)>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        if let Some(challenge) = check_digest(&state, &method, &uri, &headers) {
            return challenge;
        }
        record(&state, &headers);
        if name != "Cluster0" {
            return (
                HttpStatus::NOT_FOUND,
                Json(json!({
                    "detail": format!("No cluster named {} exists in group {}.", name, group_id),
                    "error": 404,
                    "errorCode": "CLUSTER_NOT_FOUND",
                    "reason": "Not Found"
                })),
            )
                .into_response();
        }
        Json(json!({
            "name": name,
            "groupId": group_id,
            "stateName": "IDLE",
            "connectionStrings": {
                "standard": "mongodb://c0-00.example.net:27017,c0-01.example.net:27017/?ssl=true",
                "standardSrv": "mongodb+srv://c0.example.net"
            }
        }))
        .into_response()
    }

    async fn spawn_fake() -> (String, Arc<FakeAtlas>) {
        spawn_fake_with(FakeAtlas::default()).await
    }

    async fn spawn_fake_with(fake: FakeAtlas) -> (String, Arc<FakeAtlas>) {
        let state = Arc::new(fake);
        let app = Router::new()
            .route("/api/oauth/token", post(issue_token))
            .route(
                "/api/atlas/v2/groups/:group_id/databaseUsers",
                post(create_user).get(list_users),
            )
            .route("/api/atlas/v2/groups/:group_id/clusters/:name", get(get_cluster))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), state)
    }

    fn spec() -> ScopedAccountSpec {
        ScopedAccountSpec {
            username: "atlas_broker_Q7W2E9R4T1".to_string(),
            password: SecretString::from("s3cret/value"),
            database_name: "admin".to_string(),
            roles: vec![RoleAssignment::new("readAnyDatabase", "admin")],
            description: "Created by atlas-broker, automatically deleted after 2026-01-01T00:30:00Z"
                .to_string(),
            delete_after: Utc::now(),
        }
    }

    fn service_account() -> AdminAuth {
        AdminAuth::ServiceAccount {
            client_id: "mdb_sa_id_test".to_string(),
            client_secret: SecretString::from("mdb_sa_sk_test"),
        }
    }

    #[tokio::test]
    async fn test_create_scoped_account() {
        let (base, state) = spawn_fake().await;
        let client = AtlasAdminClient::new(
            &base,
            AdminAuth::Bearer(SecretString::from("static-token")),
            &ProxyConfig::default(),
        )
        .unwrap();

        let account = client.create_scoped_account("p1", &spec()).await.unwrap();

        assert_eq!(account.username, "atlas_broker_Q7W2E9R4T1");
        assert_eq!(account.project_id, "p1");
        assert_eq!(account.roles, vec![RoleAssignment::new("readAnyDatabase", "admin")]);
        assert!(account.delete_after.is_some());

        let created = state.created.lock().unwrap();
        assert_eq!(created[0]["password"], "s3cret/value");
        assert_eq!(created[0]["groupId"], "p1");

        let headers = state.headers.lock().unwrap();
        assert_eq!(headers[0].0, "Bearer static-token");
        assert_eq!(headers[0].1, ACCEPT_VERSIONED);
        assert_eq!(state.token_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_service_account_token_is_cached() {
        let (base, state) = spawn_fake().await;
        let client = AtlasAdminClient::new(&base, service_account(), &ProxyConfig::default()).unwrap();

        client.get_cluster("p1", "Cluster0").await.unwrap();
        client.get_cluster("p1", "Cluster0").await.unwrap();

        assert_eq!(state.token_requests.load(Ordering::SeqCst), 1);
        let headers = state.headers.lock().unwrap();
        assert!(headers.iter().all(|(auth, _)| auth == "Bearer token-1"));
    }

    #[tokio::test]
    async fn test_cluster_metadata() {
        let (base, _) = spawn_fake().await;
        let client = AtlasAdminClient::new(&base, service_account(), &ProxyConfig::default()).unwrap();

        let metadata = client.cluster_metadata("p1", "Cluster0").await.unwrap();

        assert_eq!(metadata.name, "Cluster0");
        assert_eq!(
            metadata.connection_strings.standard.as_deref(),
            Some("mongodb://c0-00.example.net:27017,c0-01.example.net:27017/?ssl=true")
        );
        assert_eq!(
            metadata.connection_strings.standard_srv.as_deref(),
            Some("mongodb+srv://c0.example.net")
        );
    }

    #[tokio::test]
    async fn test_missing_cluster_is_classified() {
        let (base, _) = spawn_fake().await;
        let client = AtlasAdminClient::new(&base, service_account(), &ProxyConfig::default()).unwrap();

        let err = client.get_cluster("p1", "Nope").await.unwrap_err();
        match &err {
            AdminError::Api {
                status,
                kind,
                error_code,
                detail,
            } => {
                assert_eq!(*status, 404);
                assert_eq!(*kind, ApiErrorKind::NotFound);
                assert_eq!(error_code.as_deref(), Some("CLUSTER_NOT_FOUND"));
                assert!(detail.contains("No cluster named Nope"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let broker: BrokerError = err.into();
        assert!(matches!(
            broker,
            BrokerError::ControlPlane {
                status: Some(404),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_list_follows_pages() {
        let (base, _) = spawn_fake().await;
        let client = AtlasAdminClient::new(&base, service_account(), &ProxyConfig::default()).unwrap();

        let users = client.list_database_users("p1").await.unwrap();

        assert_eq!(users.len(), PAGE_SIZE + 2);
        assert_eq!(users[PAGE_SIZE + 1].username, format!("user{}", PAGE_SIZE + 1));
        assert!(users.iter().all(|u| u.project_id == "p1"));
    }

    #[tokio::test]
    async fn test_api_key_answers_digest_challenge() {
        let (base, state) = spawn_fake_with(FakeAtlas {
            digest: Some(("abcdefgh", "0f1e2d3c-private")),
            ..Default::default()
        })
        .await;
        let auth = AdminAuth::ApiKey {
            public_key: "abcdefgh".to_string(),
            private_key: SecretString::from("0f1e2d3c-private"),
        };
        let client = AtlasAdminClient::new(&base, auth, &ProxyConfig::default()).unwrap();

        let metadata = client.get_cluster("p1", "Cluster0").await.unwrap();
        assert_eq!(metadata.name, "Cluster0");

        // The JSON body is replayed on the answering request
        let account = client.create_scoped_account("p1", &spec()).await.unwrap();
        assert_eq!(account.username, "atlas_broker_Q7W2E9R4T1");
        assert_eq!(state.created.lock().unwrap()[0]["password"], "s3cret/value");

        assert_eq!(state.challenges.load(Ordering::SeqCst), 2);
        assert_eq!(state.token_requests.load(Ordering::SeqCst), 0);
        let headers = state.headers.lock().unwrap();
        assert_eq!(headers.len(), 2);
        assert!(headers.iter().all(|(auth, _)| auth.starts_with("Digest ")));
        assert!(headers.iter().all(|(_, accept)| accept == ACCEPT_VERSIONED));
    }

    #[tokio::test]
    async fn test_wrong_api_key_is_rejected() {
        let (base, state) = spawn_fake_with(FakeAtlas {
            digest: Some(("abcdefgh", "0f1e2d3c-private")),
            ..Default::default()
        })
        .await;
        let auth = AdminAuth::ApiKey {
            public_key: "abcdefgh".to_string(),
            private_key: SecretString::from("wrong"),
        };
        let client = AtlasAdminClient::new(&base, auth, &ProxyConfig::default()).unwrap();

        let err = client.get_cluster("p1", "Cluster0").await.unwrap_err();

        assert_eq!(err.kind(), ApiErrorKind::Unauthenticated);
        assert_eq!(state.challenges.load(Ordering::SeqCst), 2);
        assert!(state.headers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_path_segments_are_escaped() {
        let base = Url::parse("https://cloud.mongodb.com").unwrap();
        let url = join(&base, &API_PATH, &["groups", "p1", "clusters", "a/b c"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.mongodb.com/api/atlas/v2/groups/p1/clusters/a%2Fb%20c"
        );
    }

    #[test]
    fn test_proxy_is_accepted() {
        let proxy = ProxyConfig::new("127.0.0.1", 1080).with_auth("svc", SecretString::from("pw"));
        assert!(AtlasAdminClient::new(DEFAULT_BASE_URL, service_account(), &proxy).is_ok());
    }

    #[test]
    fn test_error_detail_falls_back_to_body_text() {
        let err = api_error(StatusCode::BAD_GATEWAY, "upstream unavailable");
        assert_eq!(err.kind(), ApiErrorKind::Unavailable);
        assert!(err.to_string().contains("upstream unavailable"));

        let err = api_error(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(err.to_string().contains("Too Many Requests"));
    }
}
