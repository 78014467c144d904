/// HTTP server and request routing
use crate::auth::AuthManager;
use crate::config::DaemonConfig;
use crate::errors::{DaemonError, DaemonResult};
use crate::handlers::ApiHandlers;
use atelier_core::WorkflowCoordinator;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::Value;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Resolved endpoint of a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Template,
    Assigned,
    UpdateWorkflow,
    Assign(String),
    ProjectWorkflows(String),
    CriticalPath(String),
    TimelineAnalytics(String),
    TimelineReport(String),
}

impl Route {
    /// Match a path, ignoring a trailing slash
    pub fn parse(path: &str) -> Option<Route> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        let route = match segments.as_slice() {
            ["health"] => Route::Health,
            ["workflows", "template"] => Route::Template,
            ["workflows", "assigned"] => Route::Assigned,
            ["workflows", "update"] => Route::UpdateWorkflow,
            ["workflows", id, "assign"] if !id.is_empty() => Route::Assign(id.to_string()),
            ["projects", id, endpoint] if !id.is_empty() => {
                let id = id.to_string();
                match *endpoint {
                    "workflows" => Route::ProjectWorkflows(id),
                    "critical-path" => Route::CriticalPath(id),
                    "timeline-analytics" => Route::TimelineAnalytics(id),
                    "timeline-report" => Route::TimelineReport(id),
                    _ => return None,
                }
            }
            _ => return None,
        };
        Some(route)
    }

    /// Whether the route accepts this method
    pub fn allows(&self, method: &Method) -> bool {
        match self {
            Route::ProjectWorkflows(_) => method == Method::GET || method == Method::POST,
            Route::UpdateWorkflow => method == Method::PUT,
            Route::Assign(_) => method == Method::POST,
            _ => method == Method::GET,
        }
    }

    /// Health and the static catalog are public
    pub fn requires_identity(&self) -> bool {
        !matches!(self, Route::Health | Route::Template)
    }
}

/// HTTP API server
#[derive(Clone)]
pub struct ApiServer {
    config: DaemonConfig,
    handlers: Arc<ApiHandlers>,
    auth: Arc<AuthManager>,
}

impl ApiServer {
    /// Create a server over an already connected coordinator
    pub fn new(config: DaemonConfig, coordinator: Arc<WorkflowCoordinator>) -> DaemonResult<Self> {
        config.validate()?;

        let auth = Arc::new(AuthManager::new(config.auth.clone()));
        let handlers = Arc::new(ApiHandlers::new(coordinator));

        Ok(ApiServer {
            config,
            handlers,
            auth,
        })
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    /// Serve until `shutdown` resolves
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> DaemonResult<()> {
        let addr = format!(
            "{}:{}",
            self.config.server.http_addr, self.config.server.http_port
        );
        let addr: std::net::SocketAddr = addr
            .parse()
            .map_err(|e| DaemonError::ServerError(format!("Invalid address: {}", e)))?;

        let server = self.clone();
        let make_svc = make_service_fn(move |_conn| {
            let server = server.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle_request(req).await) }
                }))
            }
        });

        let http = Server::try_bind(&addr)
            .map_err(|e| DaemonError::ServerError(format!("Failed to bind {}: {}", addr, e)))?
            .serve(make_svc);

        info!("HTTP server listening on http://{}", addr);

        http.with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| DaemonError::ServerError(format!("HTTP server error: {}", e)))
    }

    /// Route one request to its handler and render the JSON response
    pub async fn handle_request(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let timeout = Duration::from_secs(self.config.server.request_timeout_secs);
        let result = match tokio::time::timeout(timeout, self.dispatch(req)).await {
            Ok(result) => result,
            Err(_) => Err(DaemonError::Timeout),
        };

        match result {
            Ok((status, body)) => {
                debug!(%method, %path, status = status.as_u16(), "request handled");
                json_response(status, &body)
            }
            Err(e) => {
                let status = e.status_code();
                if status.is_server_error() {
                    error!(%method, %path, error = %e, "request failed");
                } else {
                    warn!(%method, %path, status = status.as_u16(), error = %e, "request rejected");
                }
                json_response(status, &e.to_json())
            }
        }
    }

    async fn dispatch(&self, req: Request<Body>) -> DaemonResult<(StatusCode, Value)> {
        let path = req.uri().path().to_string();
        let route = Route::parse(&path).ok_or_else(|| DaemonError::RouteNotFound(path.clone()))?;

        if !route.allows(req.method()) {
            return Err(DaemonError::MethodNotAllowed {
                method: req.method().to_string(),
                path,
            });
        }

        let identity = if route.requires_identity() {
            Some(self.auth.authenticate(req.headers())?)
        } else {
            None
        };

        let method = req.method().clone();
        let query = req.uri().query().map(String::from);
        let body = hyper::body::to_bytes(req.into_body())
            .await
            .map_err(|e| DaemonError::InvalidRequest(format!("Failed to read body: {}", e)))?;

        let handlers = &self.handlers;
        let actor = || {
            identity
                .as_ref()
                .ok_or_else(|| DaemonError::AuthError("missing caller identity".to_string()))
        };

        let (status, value) = match route {
            Route::Health => (StatusCode::OK, handlers.handle_health()?),
            Route::Template => (StatusCode::OK, handlers.handle_template()?),
            Route::ProjectWorkflows(id) if method == Method::POST => (
                StatusCode::CREATED,
                handlers.handle_instantiate(&id, actor()?).await?,
            ),
            Route::ProjectWorkflows(id) => (
                StatusCode::OK,
                handlers.handle_list_workflows(&id, actor()?).await?,
            ),
            Route::UpdateWorkflow => (StatusCode::OK, handlers.handle_update(&body, actor()?).await?),
            Route::Assign(id) => (
                StatusCode::OK,
                handlers.handle_assign(&id, &body, actor()?).await?,
            ),
            Route::Assigned => (
                StatusCode::OK,
                handlers.handle_assigned(query.as_deref(), actor()?).await?,
            ),
            Route::CriticalPath(id) => (
                StatusCode::OK,
                handlers.handle_critical_path(&id, actor()?).await?,
            ),
            Route::TimelineAnalytics(id) => (
                StatusCode::OK,
                handlers.handle_timeline_analytics(&id, actor()?).await?,
            ),
            Route::TimelineReport(id) => (
                StatusCode::OK,
                handlers.handle_timeline_report(&id, actor()?).await?,
            ),
        };

        Ok((status, value))
    }
}

fn json_response(status: StatusCode, body: &Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parsing() {
        assert_eq!(Route::parse("/health"), Some(Route::Health));
        assert_eq!(Route::parse("/workflows/template/"), Some(Route::Template));
        assert_eq!(
            Route::parse("/workflows/wf-1/assign"),
            Some(Route::Assign("wf-1".to_string()))
        );
        assert_eq!(
            Route::parse("/projects/p-1/timeline-report"),
            Some(Route::TimelineReport("p-1".to_string()))
        );
        assert_eq!(Route::parse("/projects/p-1/invoices"), None);
        assert_eq!(Route::parse("/"), None);
    }

    #[test]
    fn test_route_methods() {
        let route = Route::ProjectWorkflows("p-1".to_string());
        assert!(route.allows(&Method::GET));
        assert!(route.allows(&Method::POST));
        assert!(!route.allows(&Method::DELETE));
        assert!(Route::UpdateWorkflow.allows(&Method::PUT));
        assert!(!Route::UpdateWorkflow.allows(&Method::POST));
        assert!(!Route::Health.requires_identity());
        assert!(Route::Assigned.requires_identity());
    }
}
