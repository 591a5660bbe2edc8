use std::sync::{Arc, Mutex};

use http_body_util::{BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    header::{self, HeaderValue},
    Request, Response, StatusCode,
};
use tracing::{debug, error};

use crate::{
    handler::{panic_message, run_handler},
    pattern::merge_query,
    table::{Route, RouteTable},
    Error, MockRequest, MockResponse, Parameters, WriteFn,
};

/// State shared by every connection of one server: the route table, the
/// optional pre-handler and the request counter.
pub(crate) struct Dispatcher {
    pub(crate) routes: RouteTable,
    pre_handler: Option<Arc<WriteFn>>,
    req_count: Mutex<u64>,
}

impl Dispatcher {
    pub(crate) fn new(routes: Vec<Route>, pre_handler: Option<Arc<WriteFn>>) -> Self {
        Self {
            routes: RouteTable::new(routes),
            pre_handler,
            req_count: Mutex::new(0),
        }
    }

    pub(crate) fn req_count(&self) -> u64 {
        *self.req_count.lock().expect("lock poisoned")
    }

    /// Serves one request. An `Err` is only returned when the pre-handler
    /// fails or the body cannot be read; hyper then drops the connection
    /// without a response.
    pub(crate) async fn dispatch(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, Error> {
        let res = self.route(req).await;
        *self.req_count.lock().expect("lock poisoned") += 1;
        res
    }

    async fn route(self: &Arc<Self>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Error> {
        let (parts, body) = req.into_parts();
        let target = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();

        let Some((route, mut params)) = self.routes.find(&target, &parts.method) else {
            debug!(method = %parts.method, uri = %target, "no route matched");
            return Ok(not_found(&target));
        };
        merge_query(&mut params, &target);

        let body = body.collect().await.map_err(Error::ReadBody)?.to_bytes();
        let req = MockRequest::new(parts, body);

        let dispatcher = self.clone();
        match tokio::task::spawn_blocking(move || dispatcher.handle(&route, req, &params)).await {
            Ok(res) => res,
            // Handler panics are caught by run_handler, so this came from the
            // pre-handler.
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic().as_ref());
                error!(uri = %target, error = %message, "pre-handler panicked");
                Err(Error::PreHandler(message))
            }
            Err(err) => Err(Error::Task(err)),
        }
    }

    fn handle(
        &self,
        route: &Route,
        mut req: MockRequest,
        params: &Parameters,
    ) -> Result<Response<Full<Bytes>>, Error> {
        let mut rsp = MockResponse::default();

        if let Some(pre_handler) = &self.pre_handler {
            pre_handler(&mut req, &mut rsp, params).map_err(|err| {
                error!(uri = %req.uri(), error = %err, "pre-handler failed");
                Error::PreHandler(err.to_string())
            })?;
        }

        run_handler(route.handler(), &mut req, &mut rsp, params);
        Ok(rsp.into_response())
    }
}

fn not_found(target: &str) -> Response<Full<Bytes>> {
    let mut rsp = MockResponse::default();
    rsp.set_status(StatusCode::NOT_FOUND)
        .write_str(&format!("No handler provided for URL: {target}"))
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    rsp.into_response()
}
