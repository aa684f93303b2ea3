//! Router for matching request paths to logical services

use crate::config::{RouteConfig, RoutingConfig};
use tracing::debug;

/// A request path matched to its service
#[derive(Clone, Debug, PartialEq)]
pub struct RouteMatch {
    pub service: String,
    /// Path and query to forward, after any rewrite
    pub upstream: String,
}

/// Router for matching HTTP requests to services by path prefix
pub struct Router {
    routes: Vec<RouteConfig>,
    public_paths: Vec<String>,
}

impl Router {
    pub fn new(config: RoutingConfig) -> Self {
        let mut routes = config.routes;
        // Longest prefix wins
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            routes,
            public_paths: config.public_paths,
        }
    }

    /// Match a request path against a route pattern
    pub fn match_path(path: &str, pattern: &str) -> bool {
        // Exact match
        if pattern == path {
            return true;
        }

        // Prefix match (pattern ends with /)
        if pattern.ends_with('/') {
            return path.starts_with(pattern);
        }

        // Prefix match with wildcard
        let prefix = pattern.strip_suffix("/*").unwrap_or(pattern);
        path == prefix || path.starts_with(&format!("{}/", prefix))
    }

    /// Whether `path` may be served without authentication
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| Self::match_path(path, p))
    }

    /// Service and upstream path for a request
    pub fn route(&self, path: &str, query: Option<&str>) -> Option<RouteMatch> {
        let route = self.routes.iter().find(|r| Self::match_path(path, &r.prefix))?;

        let mut upstream = match &route.rewrite {
            Some(rewrite) => {
                let base = route.prefix.strip_suffix("/*").unwrap_or(&route.prefix);
                let base = base.strip_suffix('/').unwrap_or(base);
                format!("{}{}", rewrite, path.get(base.len()..).unwrap_or(""))
            }
            None => path.to_string(),
        };
        if let Some(query) = query {
            upstream.push('?');
            upstream.push_str(query);
        }

        debug!(path = %path, service = %route.service, upstream = %upstream, "Matched route");
        Some(RouteMatch {
            service: route.service.clone(),
            upstream,
        })
    }

    pub fn services(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.service.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(RoutingConfig::default())
    }

    #[test]
    fn test_exact_path_match() {
        assert!(Router::match_path("/users", "/users"));
        assert!(!Router::match_path("/user", "/users"));
    }

    #[test]
    fn test_prefix_path_match_respects_segments() {
        assert!(Router::match_path("/users/42", "/users"));
        assert!(!Router::match_path("/usersettings", "/users"));
        assert!(Router::match_path("/api/v1/users", "/api/v1/"));
        assert!(!Router::match_path("/api/v2/users", "/api/v1/"));
    }

    #[test]
    fn test_wildcard_path_match() {
        assert!(Router::match_path("/api/v1/users", "/api/v1/*"));
        assert!(Router::match_path("/api/v1", "/api/v1/*"));
        assert!(!Router::match_path("/api/v2/users", "/api/v1/*"));
    }

    #[test]
    fn test_routes_to_services() {
        let router = router();
        assert_eq!(router.route("/users/42", None).unwrap().service, "user-service");
        assert_eq!(router.route("/products", None).unwrap().service, "product-service");
        assert_eq!(router.route("/orders/1", None).unwrap().service, "order-service");
        assert!(router.route("/inventory", None).is_none());
        assert!(router.route("/", None).is_none());
    }

    #[test]
    fn test_lists_prefix_is_rewritten() {
        let router = router();
        let matched = router.route("/lists", None).unwrap();
        assert_eq!(matched.service, "list-service");
        assert_eq!(matched.upstream, "/list");

        let matched = router.route("/lists/7/checkout", Some("dry=1")).unwrap();
        assert_eq!(matched.upstream, "/list/7/checkout?dry=1");
    }

    #[test]
    fn test_query_is_kept() {
        let matched = router().route("/products", Some("page=2")).unwrap();
        assert_eq!(matched.upstream, "/products?page=2");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let router = Router::new(RoutingConfig {
            routes: vec![
                RouteConfig::new("/users", "user-service"),
                RouteConfig::new("/users/admin", "admin-service"),
            ],
            public_paths: vec![],
        });
        assert_eq!(router.route("/users/admin/1", None).unwrap().service, "admin-service");
        assert_eq!(router.route("/users/1", None).unwrap().service, "user-service");
    }

    #[test]
    fn test_public_paths() {
        let router = router();
        assert!(router.is_public("/users/login"));
        assert!(router.is_public("/users/register/confirm"));
        assert!(router.is_public("/health"));
        assert!(!router.is_public("/users/loginx"));
        assert!(!router.is_public("/users"));
        assert!(!router.is_public("/lists"));
    }

    #[test]
    fn test_lists_can_be_opened_up() {
        let mut config = RoutingConfig::default();
        assert!(!Router::new(config.clone()).is_public("/lists/7"));

        config.public_paths.push("/lists".to_string());
        let router = Router::new(config);
        assert!(router.is_public("/lists/7"));
        assert!(!router.is_public("/listsx"));
    }
}
