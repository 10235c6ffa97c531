//! Path and host based routing
//!
//! Resolves an inbound request to a logical service name using an ordered
//! rule table built at startup. Rules scoped to a host substring are
//! consulted before host-agnostic ones; within a rule list the first prefix
//! match wins.

/// Service name returned when no rule matches
pub const DEFAULT_SERVICE: &str = "default-service";

/// A single routing rule
#[derive(Debug, Clone)]
pub struct RoutingRule {
    /// Substring the lower-cased Host header must contain, if any
    pub host: Option<String>,

    /// Path prefix, always ending with '/'
    pub prefix: String,

    /// Logical service the rule routes to
    pub service: String,
}

impl RoutingRule {
    /// Host-scoped rule
    pub fn for_host(host: &str, prefix: &str, service: &str) -> Self {
        Self {
            host: Some(host.to_ascii_lowercase()),
            prefix: prefix.to_string(),
            service: service.to_string(),
        }
    }

    /// Host-agnostic rule
    pub fn for_prefix(prefix: &str, service: &str) -> Self {
        Self {
            host: None,
            prefix: prefix.to_string(),
            service: service.to_string(),
        }
    }
}

/// Ordered rule table; rule order is significant, more specific prefixes
/// must precede less specific ones
pub struct Router {
    rules: Vec<RoutingRule>,
}

impl Router {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// The rule set installed when no routing configuration is supplied
    pub fn with_default_rules() -> Self {
        Self::new(vec![
            RoutingRule::for_host("dushu.com", "/user-orch/", "user-orch"),
            RoutingRule::for_host("dushu.com", "/order-orch/", "order-orch"),
            RoutingRule::for_prefix("/springboot-grpc-server/", "springboot-grpc-server"),
            RoutingRule::for_prefix("/order/", "order-service"),
            RoutingRule::for_prefix("/product/", "product-service"),
            RoutingRule::for_prefix("/payment/", "payment-service"),
        ])
    }

    /// Resolve a request path (and optional Host header) to a service name.
    ///
    /// Host-scoped rules whose host substring occurs in the lower-cased Host
    /// header are tried first, then host-agnostic rules, both in table order.
    pub fn resolve(&self, path: &str, host: Option<&str>) -> String {
        let host = host.map(|h| h.to_ascii_lowercase());

        if let Some(host) = &host {
            for rule in &self.rules {
                let Some(rule_host) = &rule.host else { continue };
                if host.contains(rule_host.as_str()) && path.starts_with(&rule.prefix) {
                    return rule.service.clone();
                }
            }
        }

        for rule in &self.rules {
            if rule.host.is_none() && path.starts_with(&rule.prefix) {
                return rule.service.clone();
            }
        }

        DEFAULT_SERVICE.to_string()
    }
}
