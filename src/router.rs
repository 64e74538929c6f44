use std::fmt;

use crate::error::{Result, ServerError};
use crate::http::{Method, Request, Response};
use crate::net::ConnectionInfo;

/// Most routes a server accepts.
pub const MAX_ROUTES: usize = 24;

/// A route handler.
///
/// Handlers run synchronously inside [`Server::process_once`](crate::Server::process_once),
/// so a slow handler stalls every other connection. Any
/// `Fn(&ConnectionInfo, &Request) -> Response` closure is a handler.
pub trait Handler {
    fn call(&self, connection: &ConnectionInfo, request: &Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&ConnectionInfo, &Request) -> Response,
{
    fn call(&self, connection: &ConnectionInfo, request: &Request) -> Response {
        (self)(connection, request)
    }
}

/// A method and exact path bound to a handler.
pub struct Route {
    method: Method,
    path: String,
    handler: Box<dyn Handler>,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>, handler: impl Handler + 'static) -> Route {
        Route {
            method,
            path: path.into(),
            handler: Box::new(handler),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Exact match on both method and path; no prefixes, no wildcards.
    pub fn matches(&self, request: &Request) -> bool {
        self.method == request.method() && self.path == request.path()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// The bounded, ordered route table.
///
/// Insertion order is match order. The table is handed to the server at
/// construction and cannot change afterwards.
///
/// ```
/// use ptth::{ConnectionInfo, Request, Response, Routes};
///
/// let mut routes = Routes::new();
/// routes
///     .get("/callback", |_: &ConnectionInfo, _: &Request| {
///         Response::ok("<h1>callback success!</h1>")
///     })?
///     .post("/form", |_: &ConnectionInfo, _: &Request| Response::ok("thanks"))?;
/// assert_eq!(routes.len(), 2);
/// # Ok::<(), ptth::ServerError>(())
/// ```
#[derive(Debug, Default)]
pub struct Routes {
    routes: Vec<Route>,
}

impl Routes {
    pub fn new() -> Routes {
        Routes {
            routes: Vec::with_capacity(MAX_ROUTES),
        }
    }

    /// Appends a route.
    ///
    /// # Errors
    /// Returns `ServerError::RouteTableFull` once [`MAX_ROUTES`] are registered.
    pub fn add(&mut self, route: Route) -> Result<&mut Routes> {
        if self.routes.len() >= MAX_ROUTES {
            return Err(ServerError::RouteTableFull {
                capacity: MAX_ROUTES,
            });
        }
        self.routes.push(route);
        Ok(self)
    }

    pub fn get(&mut self, path: &str, handler: impl Handler + 'static) -> Result<&mut Routes> {
        self.add(Route::new(Method::Get, path, handler))
    }

    pub fn post(&mut self, path: &str, handler: impl Handler + 'static) -> Result<&mut Routes> {
        self.add(Route::new(Method::Post, path, handler))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Invokes every matching route in registration order.
    ///
    /// Each handler's response is passed to `respond` before the next
    /// handler runs, so a request matching two routes is answered twice.
    /// Returns how many routes matched.
    pub fn dispatch<F>(&self, connection: &ConnectionInfo, request: &Request, mut respond: F) -> usize
    where
        F: FnMut(Response),
    {
        let mut matched = 0;
        for route in self.routes.iter().filter(|route| route.matches(request)) {
            log::debug!("Routing request {} {}", route.method, route.path);
            respond(route.handler.call(connection, request));
            matched += 1;
        }
        matched
    }
}
