//! Content-Security-Policy stage.
//!
//! Directive reference: <https://content-security-policy.com/>.

use std::sync::{Arc, OnceLock};

use http::header::{CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY_REPORT_ONLY};
use http::{HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::warn;

use super::Middleware;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::response::ResponseSink;

/// Source lists for each CSP directive.
///
/// Empty lists are left out of the header. Sources are written verbatim, so
/// keywords keep their quotes: `"'self'"`, `"'none'"`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CspOptions {
    /// Fallback for every fetch directive that is not set.
    pub default_src: Vec<String>,
    pub script_src: Vec<String>,
    pub style_src: Vec<String>,
    pub img_src: Vec<String>,
    /// XHR, WebSocket and EventSource targets.
    pub connect_src: Vec<String>,
    pub font_src: Vec<String>,
    /// `<object>`, `<embed>`, `<applet>`.
    pub object_src: Vec<String>,
    pub media_src: Vec<String>,
    /// Workers and nested browsing contexts.
    pub child_src: Vec<String>,
    pub form_action: Vec<String>,
    pub frame_ancestors: Vec<String>,
    pub plugin_types: Vec<String>,
    /// Sandbox flags such as `allow-forms`; only emitted when non-empty.
    pub sandbox: Vec<String>,
    /// Where browsers POST violation reports.
    pub report_uri: String,
    /// Send `Content-Security-Policy-Report-Only`. Needs `report_uri`.
    pub is_report_only: bool,
}

impl CspOptions {
    fn directives(&self) -> [(&'static str, &[String]); 13] {
        [
            ("default-src", self.default_src.as_slice()),
            ("script-src", self.script_src.as_slice()),
            ("style-src", self.style_src.as_slice()),
            ("img-src", self.img_src.as_slice()),
            ("connect-src", self.connect_src.as_slice()),
            ("font-src", self.font_src.as_slice()),
            ("object-src", self.object_src.as_slice()),
            ("media-src", self.media_src.as_slice()),
            ("child-src", self.child_src.as_slice()),
            ("form-action", self.form_action.as_slice()),
            ("frame-ancestors", self.frame_ancestors.as_slice()),
            ("plugin-types", self.plugin_types.as_slice()),
            ("sandbox", self.sandbox.as_slice()),
        ]
    }

    /// Renders the policy, or `None` when there is nothing to send.
    pub fn policy(&self) -> Option<String> {
        let mut segments: Vec<String> = self
            .directives()
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| format!("{name} {}", values.join(" ")))
            .collect();
        if !self.report_uri.is_empty() {
            segments.push(format!("report-uri {}", self.report_uri));
        }
        (!segments.is_empty()).then(|| segments.join("; "))
    }

    fn header_name(&self) -> HeaderName {
        if self.is_report_only && !self.report_uri.is_empty() {
            CONTENT_SECURITY_POLICY_REPORT_ONLY
        } else {
            CONTENT_SECURITY_POLICY
        }
    }
}

/// A CSP stage. The header is rendered on the first request and reused
/// verbatim afterwards; the options cannot change once the stage exists.
#[derive(Debug)]
pub struct Csp {
    options: CspOptions,
    header: OnceLock<Option<(HeaderName, HeaderValue)>>,
}

impl Csp {
    pub fn new(options: CspOptions) -> Arc<Self> {
        Arc::new(Self { options, header: OnceLock::new() })
    }

    /// The header this stage sets, building it on first call.
    pub fn header(&self) -> Option<&(HeaderName, HeaderValue)> {
        self.header
            .get_or_init(|| {
                let policy = self.options.policy()?;
                match HeaderValue::from_str(&policy) {
                    Ok(value) => Some((self.options.header_name(), value)),
                    Err(_) => {
                        warn!(%policy, "CSP policy is not a valid header value, not sending it");
                        None
                    }
                }
            })
            .as_ref()
    }

    pub fn middleware(self: &Arc<Self>) -> Middleware {
        let csp = Arc::clone(self);
        Middleware::new(move |next| CspHandler { csp: Arc::clone(&csp), next }.boxed())
    }
}

struct CspHandler {
    csp: Arc<Csp>,
    next: BoxedHandler,
}

impl Handler for CspHandler {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        if let Some((name, value)) = self.csp.header() {
            res.headers_mut().insert(name.clone(), value.clone());
        }
        self.next.serve(req, res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::not_found;
    use crate::response::Response;
    use http::Method;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_owned()).collect()
    }

    async fn headers_for(options: CspOptions) -> http::HeaderMap {
        let handler = Csp::new(options).middleware().wrap(not_found());
        let mut req = Request::new(Method::GET, "/");
        let mut res = Response::new();
        handler.serve(&mut req, &mut res).await.unwrap();
        res.into_inner().headers().clone()
    }

    #[tokio::test]
    async fn joins_directives_in_order() {
        let headers = headers_for(CspOptions {
            default_src: strings(&["'self'", "s1.rdbuz.com"]),
            script_src: strings(&["'self'"]),
            ..CspOptions::default()
        })
        .await;
        assert_eq!(
            headers[CONTENT_SECURITY_POLICY],
            "default-src 'self' s1.rdbuz.com; script-src 'self'"
        );
    }

    #[tokio::test]
    async fn report_only_needs_report_uri() {
        let headers = headers_for(CspOptions {
            default_src: strings(&["'self'"]),
            report_uri: "/x".to_owned(),
            is_report_only: true,
            ..CspOptions::default()
        })
        .await;
        let value = headers[CONTENT_SECURITY_POLICY_REPORT_ONLY].to_str().unwrap();
        assert!(value.contains("report-uri /x"));
        assert!(headers.get(CONTENT_SECURITY_POLICY).is_none());

        let headers = headers_for(CspOptions {
            default_src: strings(&["'self'"]),
            is_report_only: true,
            ..CspOptions::default()
        })
        .await;
        assert_eq!(headers[CONTENT_SECURITY_POLICY], "default-src 'self'");
    }

    #[tokio::test]
    async fn nothing_configured_sends_nothing() {
        let headers = headers_for(CspOptions::default()).await;
        assert!(headers.get(CONTENT_SECURITY_POLICY).is_none());
        assert!(headers.get(CONTENT_SECURITY_POLICY_REPORT_ONLY).is_none());
    }

    #[test]
    fn header_is_built_once() {
        let csp = Csp::new(CspOptions { img_src: strings(&["*"]), ..CspOptions::default() });
        let first = csp.header().unwrap() as *const _;
        let second = csp.header().unwrap() as *const _;
        assert_eq!(first, second);
    }

    #[test]
    fn deserializes_from_toml() {
        let options: CspOptions = toml::from_str(
            r#"
            default-src = ["'self'"]
            report-uri = "/csp"
            is-report-only = true
            "#,
        )
        .unwrap();
        assert_eq!(options.policy().unwrap(), "default-src 'self'; report-uri /csp");
        assert_eq!(options.header_name(), CONTENT_SECURITY_POLICY_REPORT_ONLY);
    }
}
