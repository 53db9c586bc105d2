//! Default route: files under a document root.
//!
//! The route prefix is stripped before lookup, so with prefix `/assets` a
//! request for `/assets/app.js` reads `<document_root>/app.js`. Paths ending
//! in `/` serve the configured index file.

use axum::body::Body;
use axum::http::{Request, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::routing::matcher::{AndMatcher, Matcher, RouteMatch};
use crate::routing::route::{Handler, HandlerContext, Route};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DefaultRouteSettings {
    pub path_prefix: String,
    pub document_root: PathBuf,
    pub index_file: String,
    pub methods: Vec<String>,
}

impl Default for DefaultRouteSettings {
    fn default() -> Self {
        Self {
            path_prefix: "/".to_string(),
            document_root: PathBuf::from("public"),
            index_file: "index.html".to_string(),
            methods: vec!["GET".to_string(), "HEAD".to_string()],
        }
    }
}

pub struct DefaultRoute {
    settings: DefaultRouteSettings,
    matcher: AndMatcher,
    files: ServeDir,
}

impl DefaultRoute {
    pub fn new(settings: DefaultRouteSettings) -> Self {
        let matcher = RouteMatch {
            path_prefix: settings.path_prefix.clone(),
            methods: settings.methods.clone(),
            ..RouteMatch::default()
        }
        .compile();
        let files = ServeDir::new(&settings.document_root).append_index_html_on_directories(false);

        if !settings.document_root.is_dir() {
            tracing::warn!(
                document_root = %settings.document_root.display(),
                "Document root does not exist; every request will be 404"
            );
        }

        Self {
            settings,
            matcher,
            files,
        }
    }

    pub fn settings(&self) -> &DefaultRouteSettings {
        &self.settings
    }

    /// Map a request URI onto the document root's namespace.
    fn local_uri(&self, uri: &Uri) -> Uri {
        let rest = uri
            .path()
            .strip_prefix(self.settings.path_prefix.as_str())
            .unwrap_or(uri.path());

        let mut path = String::with_capacity(rest.len() + self.settings.index_file.len() + 1);
        if !rest.starts_with('/') {
            path.push('/');
        }
        path.push_str(rest);
        if path.ends_with('/') {
            path.push_str(&self.settings.index_file);
        }
        if let Some(query) = uri.query() {
            path.push('?');
            path.push_str(query);
        }

        Uri::builder()
            .path_and_query(path)
            .build()
            .unwrap_or_else(|_| uri.clone())
    }
}

impl Route for DefaultRoute {
    fn can_handle(&self, request: &Request<Body>, is_secure: bool) -> bool {
        self.matcher.matches(request, is_secure)
    }

    fn create_handler(&self, request: &Request<Body>) -> Box<dyn Handler> {
        Box::new(StaticFileHandler {
            files: self.files.clone(),
            uri: self.local_uri(request.uri()),
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}

struct StaticFileHandler {
    files: ServeDir,
    uri: Uri,
}

impl Handler for StaticFileHandler {
    fn handle(self: Box<Self>, mut request: Request<Body>, _ctx: HandlerContext) -> BoxFuture<'static, Response> {
        let StaticFileHandler { files, uri } = *self;
        Box::pin(async move {
            *request.uri_mut() = uri;
            let response = match files.oneshot(request).await {
                Ok(response) => response.map(Body::new),
                Err(never) => match never {},
            };
            response.into_response()
        })
    }
}
