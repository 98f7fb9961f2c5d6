use std::collections::HashMap;
use anyhow::{bail, Result};
use tracing::debug;
use crate::http_object::{HttpRequest, HttpResponse};
use crate::http_status::HttpStatus;
use crate::http_type::Method;

pub type Handler = fn(HttpRequest, HttpResponse) -> Result<HttpResponse>;

pub struct Dispatcher {
    router: Router
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher { router : Router::new() }
    }

    pub fn add(&mut self, method: Method, path: &str, handler: Handler) -> Result<()> {
        self.router.add(method, path, handler)
    }

    /// Unknown routes answer 404; handler errors answer 500. Neither is fatal to the connection.
    pub fn dispatch(&self, req: HttpRequest) -> HttpResponse {
        let path = req.path.split('?').next().unwrap_or("/").to_string();
        match self.router.find(req.method, &path) {
            Some(handler) => match handler(req, HttpResponse::new()) {
                Ok(res) => res,
                Err(e) => {
                    debug!("handler for {} failed: {:#}", path, e);
                    HttpResponse::with_status_code(HttpStatus::InternalServerError)
                }
            },
            None => HttpResponse::with_status_code(HttpStatus::NotFound),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}


struct Router {
    // key : path, value : handler
    get_routes: HashMap<String, Handler>,
    post_routes: HashMap<String, Handler>,
    put_routes: HashMap<String, Handler>,
    delete_routes: HashMap<String, Handler>,
}

impl Router {

    pub fn new() -> Router {
        Router {
            get_routes: HashMap::new(),
            post_routes: HashMap::new(),
            put_routes: HashMap::new(),
            delete_routes: HashMap::new(),
        }
    }

    pub fn find(&self, method: Method, path: &str) -> Option<&Handler> {
        self.routes(method).and_then(|routes| routes.get(path))
    }

    pub fn add(&mut self, method: Method, path: &str, handler: Handler) -> Result<()> {
        if !path.starts_with('/') {
            // Callers register routes at startup, so a Result lets them decide how to fail.
            bail!("Invalid path: {}. path should starts with '/'", path);
        }

        match self.routes_mut(method) {
            Some(routes) => Self::add_(routes, path, handler),
            None => bail!("{} routes are not supported", method),
        }
    }

    fn routes(&self, method: Method) -> Option<&HashMap<String, Handler>> {
        match method {
            Method::GET    => Some(&self.get_routes),
            Method::POST   => Some(&self.post_routes),
            Method::PUT    => Some(&self.put_routes),
            Method::DELETE => Some(&self.delete_routes),
            Method::HEAD   => None,
        }
    }

    fn routes_mut(&mut self, method: Method) -> Option<&mut HashMap<String, Handler>> {
        match method {
            Method::GET    => Some(&mut self.get_routes),
            Method::POST   => Some(&mut self.post_routes),
            Method::PUT    => Some(&mut self.put_routes),
            Method::DELETE => Some(&mut self.delete_routes),
            Method::HEAD   => None,
        }
    }

    fn add_(routes: &mut HashMap<String, Handler>, path: &str, handler: Handler) -> Result<()>{
        if routes.contains_key(path) {
            bail!("{} already exists", path)
        }
        routes.insert(path.to_string(), handler);
        Ok(())
    }

}
