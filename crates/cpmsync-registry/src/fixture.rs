//! In-process flat-container registry for tests.
//!
//! [`FixtureServer`] binds `127.0.0.1:0` and serves
//! `GET /{lowercase-id}/index.json` from an in-memory table. Dropping it
//! stops the server thread.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tiny_http::{Header, Method, Response, Server, StatusCode};

#[derive(Default)]
struct Routes {
    bodies: BTreeMap<String, String>,
    failures: BTreeMap<String, u16>,
    token: Option<String>,
}

pub struct FixtureServer {
    pub url: String,
    pub port: u16,
    routes: Arc<RwLock<Routes>>,
    hits: Arc<AtomicUsize>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl FixtureServer {
    pub fn start() -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind fixture registry"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let routes = Arc::new(RwLock::new(Routes::default()));
        let hits = Arc::new(AtomicUsize::new(0));
        let srv = Arc::clone(&server);
        let shared = Arc::clone(&routes);
        let counter = Arc::clone(&hits);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                counter.fetch_add(1, Ordering::SeqCst);
                handle_request(&shared, request);
            }
        });

        Self {
            url,
            port,
            routes,
            hits,
            server,
            _handle: handle,
        }
    }

    /// Reject requests lacking `Authorization: Bearer {token}` with 401.
    #[must_use]
    pub fn require_token(self, token: &str) -> Self {
        self.routes.write().expect("fixture lock").token = Some(token.to_owned());
        self
    }

    /// Publish `versions` for `id`, in the given order.
    pub fn publish(&self, id: &str, versions: &[&str]) {
        let body = serde_json::json!({ "versions": versions }).to_string();
        self.serve_raw(id, &body);
    }

    /// Serve `body` verbatim as the listing for `id`.
    pub fn serve_raw(&self, id: &str, body: &str) {
        self.routes
            .write()
            .expect("fixture lock")
            .bodies
            .insert(id.to_lowercase(), body.to_owned());
    }

    /// Answer requests for `id` with `status`.
    pub fn fail_with(&self, id: &str, status: u16) {
        self.routes
            .write()
            .expect("fixture lock")
            .failures
            .insert(id.to_lowercase(), status);
    }

    /// Requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

fn respond_status(req: tiny_http::Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn respond_json(req: tiny_http::Request, body: &str) {
    let header = Header::from_bytes("Content-Type", "application/json").expect("valid header");
    let _ = req.respond(Response::from_string(body).with_header(header));
}

fn bearer(req: &tiny_http::Request) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .and_then(|h| h.value.as_str().strip_prefix("Bearer ").map(str::to_owned))
}

fn handle_request(routes: &RwLock<Routes>, req: tiny_http::Request) {
    if *req.method() != Method::Get {
        respond_status(req, 405, "method not allowed");
        return;
    }
    let Some(key) = req
        .url()
        .trim_start_matches('/')
        .strip_suffix("/index.json")
        .map(str::to_lowercase)
    else {
        respond_status(req, 404, "not found");
        return;
    };

    let Ok(routes) = routes.read() else {
        respond_status(req, 500, "fixture state poisoned");
        return;
    };
    if let Some(ref expected) = routes.token {
        if bearer(&req).as_deref() != Some(expected.as_str()) {
            respond_status(req, 401, "unauthorized");
            return;
        }
    }
    if let Some(&code) = routes.failures.get(&key) {
        respond_status(req, code, "fixture failure");
        return;
    }
    match routes.bodies.get(&key) {
        Some(body) => respond_json(req, body),
        None => respond_status(req, 404, "not found"),
    }
}
