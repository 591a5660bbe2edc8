//! An embeddable mock HTTP server for tests. Register URL patterns with
//! handlers, point the code under test at the server, and assert on what the
//! handlers saw or returned.
//!
//! Route templates may contain `{name}` placeholders and a literal query
//! string constraint (`/person?active=true`). Leading and trailing slashes are
//! ignored on both sides, query string pairs are merged into the handler's
//! parameters, and routes are tried in registration order. Unmatched requests
//! get a 404 and handler errors (or panics) become a 500 whose body carries
//! the message.
//!
//! Currently only supports HTTP/1.1 and does not support TLS. Only supports the
//! Tokio async runtime.
//!
//! ## Example
//!
//! ```
//! use mock_http_server::{MockServer, Route};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let server = MockServer::new(
//!     0,
//!     vec![
//!         Route::respond("/person/{id}/", |_, _, params| Ok(params["id"].clone()))
//!             .expect("valid route"),
//!         Route::respond_to("POST,PUT", "/data", |req, _, _| Ok(req.content().to_string()))
//!             .expect("valid route"),
//!     ],
//! )
//! .await
//! .expect("create server");
//!
//! let client = reqwest::Client::new();
//! let res = client
//!     .get(server.url("/person/123").to_string())
//!     .send()
//!     .await
//!     .expect("send request");
//! assert_eq!(res.text().await.expect("read response"), "123");
//!
//! let res = client
//!     .delete(server.url("/data").to_string())
//!     .send()
//!     .await
//!     .expect("send request");
//! assert_eq!(res.status(), 404);
//! assert_eq!(
//!     res.text().await.expect("read response"),
//!     "No handler provided for URL: /data"
//! );
//! # });
//! ```

mod context;
mod dispatch;
mod error;
mod handler;
mod pattern;
mod server;
mod table;

pub use context::{MockRequest, MockResponse};
pub use error::{BoxError, Error};
pub use handler::{Handler, IntoBody, RespondFn, WriteFn};
pub use pattern::{Parameters, RoutePattern};
pub use server::{Host, MockServer, ServerBuilder, ServerConfig};
pub use table::Route;

pub use hyper;
