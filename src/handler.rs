use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use hyper::StatusCode;
use tracing::warn;

use crate::{BoxError, MockRequest, MockResponse, Parameters};

/// A value-returning handler. `Ok(Some(body))` is appended to the response
/// body; `Ok(None)` means the handler already wrote everything itself.
pub type RespondFn = dyn Fn(&mut MockRequest, &mut MockResponse, &Parameters) -> Result<Option<String>, BoxError>
    + Send
    + Sync;

/// A side-effecting handler that writes the response itself.
pub type WriteFn =
    dyn Fn(&mut MockRequest, &mut MockResponse, &Parameters) -> Result<(), BoxError> + Send + Sync;

/// The code run for a matched route. Handlers are plain synchronous closures
/// and are executed on Tokio's blocking pool, so they may block.
///
/// If a handler returns an error or panics, the response status becomes 500
/// and the body becomes `Exception in handler: {message}`.
#[derive(Clone)]
pub enum Handler {
    Respond(Arc<RespondFn>),
    Write(Arc<WriteFn>),
}

impl Handler {
    /// Wraps a value-returning closure. The closure may return a `String`, a
    /// `&'static str` or an `Option` of either.
    pub fn respond<F, B>(f: F) -> Self
    where
        F: Fn(&mut MockRequest, &mut MockResponse, &Parameters) -> Result<B, BoxError>
            + Send
            + Sync
            + 'static,
        B: IntoBody,
    {
        Handler::Respond(Arc::new(
            move |req: &mut MockRequest, rsp: &mut MockResponse, params: &Parameters| {
                f(req, rsp, params).map(IntoBody::into_body)
            },
        ))
    }

    /// Wraps a closure that produces the response output on its own.
    pub fn write<F>(f: F) -> Self
    where
        F: Fn(&mut MockRequest, &mut MockResponse, &Parameters) -> Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        Handler::Write(Arc::new(f))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Respond(_) => f.write_str("Handler::Respond"),
            Handler::Write(_) => f.write_str("Handler::Write"),
        }
    }
}

/// Conversion for the values a [Handler::respond] closure may return.
pub trait IntoBody {
    fn into_body(self) -> Option<String>;
}

impl IntoBody for String {
    fn into_body(self) -> Option<String> {
        Some(self)
    }
}

impl IntoBody for &'static str {
    fn into_body(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl<T: IntoBody> IntoBody for Option<T> {
    fn into_body(self) -> Option<String> {
        self.and_then(IntoBody::into_body)
    }
}

/// Runs `handler` and applies its output to `rsp`. Errors and panics raised by
/// the handler are turned into a 500 response and never escape.
pub(crate) fn run_handler(
    handler: &Handler,
    req: &mut MockRequest,
    rsp: &mut MockResponse,
    params: &Parameters,
) {
    let res = panic::catch_unwind(AssertUnwindSafe(|| match handler {
        Handler::Respond(f) => f(req, rsp, params),
        Handler::Write(f) => f(req, rsp, params).map(|()| None),
    }));

    let message = match res {
        Ok(Ok(Some(body))) => {
            rsp.write_str(&body);
            return;
        }
        Ok(Ok(None)) => return,
        Ok(Err(err)) => err.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };

    warn!(uri = %req.uri(), error = %message, "handler failed");
    rsp.clear_body();
    rsp.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    rsp.write_str(&format!("Exception in handler: {message}"));
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod test {
    use hyper::{body::Bytes, Request};

    use super::*;

    fn request() -> MockRequest {
        let (parts, _) = Request::builder()
            .uri("/api")
            .body(())
            .expect("valid request")
            .into_parts();
        MockRequest::new(parts, Bytes::from_static(b"123"))
    }

    fn run(handler: &Handler, rsp: &mut MockResponse) {
        let params = Parameters::from([("id".to_string(), "7".to_string())]);
        run_handler(handler, &mut request(), rsp, &params);
    }

    fn body(rsp: &MockResponse) -> String {
        String::from_utf8_lossy(rsp.body()).into_owned()
    }

    #[test]
    fn respond_appends_body() {
        let handler = Handler::respond(|req, rsp, params| {
            rsp.write_str("pre-");
            Ok(format!("{}-{}", req.content(), params["id"]))
        });
        let mut rsp = MockResponse::default();
        run(&handler, &mut rsp);
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(body(&rsp), "pre-123-7");
    }

    #[test]
    fn respond_none_writes_nothing_more() {
        let handler = Handler::respond(|_, rsp, _| {
            rsp.write(b"Result");
            Ok(None::<String>)
        });
        let mut rsp = MockResponse::default();
        run(&handler, &mut rsp);
        assert_eq!(body(&rsp), "Result");
    }

    #[test]
    fn write_handler_owns_output() {
        let handler = Handler::write(|_, rsp, _| {
            rsp.set_status(StatusCode::ACCEPTED).write_str("done");
            Ok(())
        });
        let mut rsp = MockResponse::default();
        run(&handler, &mut rsp);
        assert_eq!(rsp.status(), StatusCode::ACCEPTED);
        assert_eq!(body(&rsp), "done");
    }

    #[test]
    fn error_becomes_500() {
        let handler = Handler::respond(|_, rsp, _| -> Result<String, BoxError> {
            rsp.header("x-kept", "1")?.write_str("partial");
            Err("Something was null!!!".into())
        });
        let mut rsp = MockResponse::default();
        run(&handler, &mut rsp);
        assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(rsp.headers()["x-kept"], "1");
        assert_eq!(body(&rsp), "Exception in handler: Something was null!!!");
    }

    #[test]
    fn panic_becomes_500() {
        let handler = Handler::write(|_, _, params| {
            if params["id"] == "7" {
                panic!("unexpected id {}", params["id"]);
            }
            Ok(())
        });
        let mut rsp = MockResponse::default();
        run(&handler, &mut rsp);
        assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(&rsp), "Exception in handler: unexpected id 7");
    }

    #[test]
    fn into_body_conversions() {
        assert_eq!("a".into_body(), Some("a".to_string()));
        assert_eq!("b".to_string().into_body(), Some("b".to_string()));
        assert_eq!(Some("c").into_body(), Some("c".to_string()));
        assert_eq!(None::<String>.into_body(), None);
    }
}
