use std::sync::{Arc, Mutex};

use hyper::Method;

use crate::{
    BoxError, Error, Handler, IntoBody, MockRequest, MockResponse, Parameters, RoutePattern,
};

/// A route pattern bound to the handler that serves it.
#[derive(Debug, Clone)]
pub struct Route {
    pattern: RoutePattern,
    handler: Handler,
}

impl Route {
    pub fn new(pattern: RoutePattern, handler: Handler) -> Self {
        Self { pattern, handler }
    }

    /// Creates a route for any method whose handler returns the response body.
    pub fn respond<F, B>(template: &str, f: F) -> Result<Self, Error>
    where
        F: Fn(&mut MockRequest, &mut MockResponse, &Parameters) -> Result<B, BoxError>
            + Send
            + Sync
            + 'static,
        B: IntoBody,
    {
        Ok(Self::new(RoutePattern::new(template)?, Handler::respond(f)))
    }

    /// Like [respond](Route::respond), restricted to a comma separated list
    /// of methods such as `"POST,PUT"`.
    pub fn respond_to<F, B>(methods: &str, template: &str, f: F) -> Result<Self, Error>
    where
        F: Fn(&mut MockRequest, &mut MockResponse, &Parameters) -> Result<B, BoxError>
            + Send
            + Sync
            + 'static,
        B: IntoBody,
    {
        Ok(Self::new(
            RoutePattern::with_methods(template, methods)?,
            Handler::respond(f),
        ))
    }

    /// Creates a route for any method whose handler writes the response
    /// itself.
    pub fn write<F>(template: &str, f: F) -> Result<Self, Error>
    where
        F: Fn(&mut MockRequest, &mut MockResponse, &Parameters) -> Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        Ok(Self::new(RoutePattern::new(template)?, Handler::write(f)))
    }

    /// Like [write](Route::write), restricted to a comma separated list of
    /// methods.
    pub fn write_to<F>(methods: &str, template: &str, f: F) -> Result<Self, Error>
    where
        F: Fn(&mut MockRequest, &mut MockResponse, &Parameters) -> Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        Ok(Self::new(
            RoutePattern::with_methods(template, methods)?,
            Handler::write(f),
        ))
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

/// The ordered set of routes a server dispatches to. Registration order is
/// match priority: the first matching route wins.
///
/// The lock is held only while scanning or mutating, never while a handler
/// runs, so a handler may itself change the table.
#[derive(Debug, Default)]
pub(crate) struct RouteTable {
    routes: Mutex<Vec<Arc<Route>>>,
}

impl RouteTable {
    pub(crate) fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: Mutex::new(routes.into_iter().map(Arc::new).collect()),
        }
    }

    pub(crate) fn push(&self, route: Route) {
        self.routes
            .lock()
            .expect("lock poisoned")
            .push(Arc::new(route));
    }

    pub(crate) fn replace(&self, routes: Vec<Route>) {
        let routes = routes.into_iter().map(Arc::new).collect();
        *self.routes.lock().expect("lock poisoned") = routes;
    }

    pub(crate) fn clear(&self) {
        self.routes.lock().expect("lock poisoned").clear();
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Route>> {
        self.routes.lock().expect("lock poisoned").clone()
    }

    /// Returns the first route matching the request target and method, along
    /// with its path parameters.
    pub(crate) fn find(
        &self,
        path_and_query: &str,
        method: &Method,
    ) -> Option<(Arc<Route>, Parameters)> {
        let routes = self.routes.lock().expect("lock poisoned");
        routes.iter().find_map(|route| {
            route
                .pattern
                .matches(path_and_query, method)
                .map(|params| (route.clone(), params))
        })
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    fn route(template: &str, body: &'static str) -> Route {
        Route::respond(template, move |_, _, _| Ok(body)).expect("valid route")
    }

    fn template_of(found: Option<(Arc<Route>, Parameters)>) -> Option<String> {
        found.map(|(route, _)| route.pattern().template().to_string())
    }

    #[test]
    fn first_match_wins() {
        let table = RouteTable::new(vec![
            route("/person/{id}", "first"),
            route("/person/{name}", "second"),
        ]);

        let (route, params) = table.find("/person/1", &Method::GET).expect("match");
        assert_eq!(route.pattern().template(), "/person/{id}");
        assert_eq!(params["id"], "1");
        assert!(!params.contains_key("name"));
    }

    #[test]
    fn method_mismatch_falls_through() {
        let table = RouteTable::new(vec![
            Route::respond_to("GET", "/data", |_, _, _| Ok("Get")).expect("valid route"),
            Route::respond_to("POST,PUT", "/data/", |_, _, _| Ok("Post/Put"))
                .expect("valid route"),
        ]);

        assert_eq!(
            template_of(table.find("/data", &Method::GET)),
            Some("/data".to_string())
        );
        assert_eq!(
            template_of(table.find("/data", &Method::PUT)),
            Some("/data/".to_string())
        );
        assert_eq!(template_of(table.find("/data", &Method::DELETE)), None);
    }

    #[test]
    fn unrestricted_route_shadows_later_routes() {
        let table = RouteTable::new(vec![
            route("/data", "any"),
            Route::respond_to("GET", "/data", |_, _, _| Ok("Get")).expect("valid route"),
        ]);
        assert_eq!(
            table.find("/data", &Method::GET).map(|(route, _)| route.pattern().methods().is_none()),
            Some(true)
        );
    }

    #[test]
    fn mutation() {
        let table = RouteTable::default();
        assert!(table.find("/a", &Method::GET).is_none());

        table.push(route("/a", "a"));
        assert_eq!(template_of(table.find("/a", &Method::GET)), Some("/a".to_string()));

        table.replace(vec![route("/b", "b")]);
        assert!(table.find("/a", &Method::GET).is_none());
        assert_eq!(table.snapshot().len(), 1);

        table.clear();
        assert!(table.snapshot().is_empty());
        assert!(table.find("/b", &Method::GET).is_none());
    }

    #[test]
    fn concurrent_mutation_and_lookup() {
        let table = Arc::new(RouteTable::new(vec![route("/stable", "stable")]));

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let table = table.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        table.push(route("/extra", "extra"));
                        if i % 2 == 0 {
                            table.replace(vec![route("/stable", "stable")]);
                        }
                    }
                })
            })
            .collect();

        for _ in 0..1000 {
            assert!(table.find("/stable", &Method::GET).is_some());
        }

        for writer in writers {
            writer.join().unwrap();
        }
        assert!(table.find("/stable", &Method::GET).is_some());
    }
}
