//! # URL discovery
//!
//! Derives the externally and internally reachable URLs of a service from a
//! concrete HTTPRoute, its parent Gateways and their backing Services. The
//! cluster lookups sit behind [`GatewayResolver`] so the algorithm itself is
//! a pure function over snapshots.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::debug;
use url::{Host, Url};

use crate::gateway::{Gateway, GatewayClass, HTTPRoute, Listener, GATEWAY_NAME_LABEL};

use super::lifecycle::{is_kind_unregistered, is_not_found};
use super::ReconcileError;

/// Cluster lookups needed during discovery.
#[async_trait]
pub trait GatewayResolver {
    async fn gateway(&self, namespace: &str, name: &str)
        -> Result<Option<Gateway>, kube::Error>;
    async fn gateway_class(&self, name: &str) -> Result<Option<GatewayClass>, kube::Error>;
    async fn backing_service(
        &self,
        namespace: &str,
        gateway_name: &str,
    ) -> Result<Option<Service>, kube::Error>;
}

/// Live-cluster resolver.
#[derive(Clone)]
pub struct ClusterResolver {
    pub client: Client,
}

impl std::fmt::Debug for ClusterResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl GatewayResolver for ClusterResolver {
    async fn gateway(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Gateway>, kube::Error> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(gw) => Ok(Some(gw)),
            Err(err) if is_not_found(&err) || is_kind_unregistered(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn gateway_class(&self, name: &str) -> Result<Option<GatewayClass>, kube::Error> {
        let api: Api<GatewayClass> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(class) => Ok(Some(class)),
            Err(err) if is_not_found(&err) || is_kind_unregistered(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The Service carrying the gateway's data plane: by the well-known
    /// gateway-name label first, then a service named like the gateway.
    async fn backing_service(
        &self,
        namespace: &str,
        gateway_name: &str,
    ) -> Result<Option<Service>, kube::Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{GATEWAY_NAME_LABEL}={gateway_name}");
        let labelled = api
            .list(&ListParams::default().labels(&selector))
            .await?;
        if let Some(service) = labelled.items.into_iter().next() {
            return Ok(Some(service));
        }
        match api.get(gateway_name).await {
            Ok(service) => Ok(Some(service)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Discover all reachable URLs for `route`. Returns them sorted by URL
/// string; a typed error when nothing at all was discovered.
pub async fn discover_urls<R: GatewayResolver + Sync>(
    route: &HTTPRoute,
    resolver: &R,
    preferred_scheme: &str,
    wildcard_label: &str,
) -> Result<Vec<Url>, ReconcileError> {
    let route_namespace = route.namespace().unwrap_or_else(|| "default".to_string());
    let mut urls: Vec<Url> = Vec::new();

    for parent in route.spec.parent_refs.as_deref().unwrap_or_default() {
        if parent.kind.as_deref().is_some_and(|k| k != "Gateway") {
            continue;
        }
        let gateway_namespace = parent.namespace.as_deref().unwrap_or(&route_namespace);
        let Some(gateway) = resolver.gateway(gateway_namespace, &parent.name).await? else {
            debug!(
                gateway.namespace = %gateway_namespace,
                gateway.name = %parent.name,
                "parent gateway not found, skipping"
            );
            continue;
        };
        if resolver
            .gateway_class(&gateway.spec.gateway_class_name)
            .await?
            .is_none()
        {
            debug!(
                class = %gateway.spec.gateway_class_name,
                "gateway class not found; synthesizing URLs anyway"
            );
        }

        let listeners =
            select_listeners(&gateway, parent.section_name.as_deref(), preferred_scheme);
        let backing = resolver
            .backing_service(gateway_namespace, &parent.name)
            .await?;
        let path = route_path(route);

        for listener in listeners {
            let Some(scheme) = scheme_for(&listener.protocol) else {
                continue;
            };
            for host in resolve_hosts(route, listener, wildcard_label, &gateway) {
                if let Some(url) = build_url(scheme, &host, listener.port, &path) {
                    urls.push(url);
                }
            }
            if let Some(service) = backing.as_ref() {
                let host = format!(
                    "{}.{}.svc.cluster.local",
                    service.name_any(),
                    gateway_namespace
                );
                if let Some(url) = build_url(scheme, &host, listener.port, &path) {
                    urls.push(url);
                }
            }
        }
    }

    urls.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    urls.dedup();
    if urls.is_empty() {
        return Err(ReconcileError::NoUrlsDiscovered {
            route: route.name_any(),
        });
    }
    Ok(urls)
}

/// Listener selection: an exact `sectionName` match when the parent names
/// one, otherwise every HTTP-mappable listener with the caller's preferred
/// scheme first, then https, then http.
fn select_listeners<'a>(
    gateway: &'a Gateway,
    section_name: Option<&str>,
    preferred_scheme: &str,
) -> Vec<&'a Listener> {
    if let Some(section) = section_name {
        return gateway
            .spec
            .listeners
            .iter()
            .filter(|l| l.name == section)
            .collect();
    }
    let mut listeners: Vec<&Listener> = gateway
        .spec
        .listeners
        .iter()
        .filter(|l| scheme_for(&l.protocol).is_some())
        .collect();
    let rank = |l: &Listener| -> u8 {
        match scheme_for(&l.protocol) {
            Some(s) if s == preferred_scheme => 0,
            Some("https") => 1,
            Some("http") => 2,
            _ => 3,
        }
    };
    listeners.sort_by_key(|l| rank(l));
    listeners
}

fn scheme_for(protocol: &str) -> Option<&'static str> {
    match protocol {
        "HTTP" => Some("http"),
        "HTTPS" | "TLS" => Some("https"),
        _ => None,
    }
}

/// Hostname resolution order: route hostnames (dropping empty and bare
/// wildcards), listener hostname (expanding a `*.` prefix with the
/// configured label), gateway status addresses.
fn resolve_hosts(
    route: &HTTPRoute,
    listener: &Listener,
    wildcard_label: &str,
    gateway: &Gateway,
) -> Vec<String> {
    let route_hosts: Vec<String> = route
        .spec
        .hostnames
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|h| !h.is_empty() && h.as_str() != "*")
        .cloned()
        .collect();
    if !route_hosts.is_empty() {
        return route_hosts;
    }
    if let Some(hostname) = listener.hostname.as_deref() {
        if !hostname.is_empty() {
            if let Some(rest) = hostname.strip_prefix("*.") {
                return vec![format!("{wildcard_label}.{rest}")];
            }
            return vec![hostname.to_string()];
        }
    }
    gateway
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .map(|addresses| addresses.iter().map(|a| a.value.clone()).collect())
        .unwrap_or_default()
}

/// Path synthesis: the shortest prefix among the route's path rules, rules
/// with a Service backend taking priority. Regex rules are acknowledged but
/// never used for URL synthesis.
fn route_path(route: &HTTPRoute) -> String {
    let mut service_paths: Vec<&str> = Vec::new();
    let mut other_paths: Vec<&str> = Vec::new();
    for rule in route.spec.rules.as_deref().unwrap_or_default() {
        let has_service_backend = rule
            .backend_refs
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|b| b.kind.as_deref().is_none_or(|k| k == "Service"));
        for m in rule.matches.as_deref().unwrap_or_default() {
            let Some(path) = m.path.as_ref() else { continue };
            if path.r#type.as_deref() == Some("RegularExpression") {
                continue;
            }
            if let Some(value) = path.value.as_deref() {
                if has_service_backend {
                    service_paths.push(value);
                } else {
                    other_paths.push(value);
                }
            }
        }
    }
    let candidates = if service_paths.is_empty() {
        other_paths
    } else {
        service_paths
    };
    candidates
        .into_iter()
        .min_by_key(|p| p.len())
        .unwrap_or("/")
        .to_string()
}

fn build_url(scheme: &str, host: &str, port: i32, path: &str) -> Option<Url> {
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let rendered = if port == default_port {
        format!("{scheme}://{host}{path}")
    } else {
        format!("{scheme}://{host}:{port}{path}")
    };
    Url::parse(&rendered).ok()
}

/// Whether a URL points inside the cluster or another private network.
/// For any parseable URL exactly one of [`is_internal_url`] and
/// [`is_external_url`] holds.
#[must_use]
pub fn is_internal_url(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.');
            domain == "localhost"
                || domain.ends_with(".local")
                || domain.ends_with(".localhost")
                || domain.ends_with(".internal")
                || domain.ends_with(".svc.cluster.local")
                || domain == "cluster.local"
        }
        Some(Host::Ipv4(ip)) => ip.is_private() || ip.is_loopback() || ip.is_link_local(),
        Some(Host::Ipv6(ip)) => {
            ip.is_loopback()
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                || (ip.segments()[0] & 0xffc0) == 0xfe80
        }
        None => false,
    }
}

#[must_use]
pub fn is_external_url(url: &Url) -> bool {
    url.has_host() && !is_internal_url(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        GatewayAddress, GatewaySpec, GatewayStatus, HTTPBackendRef, HTTPPathMatch, HTTPRouteMatch,
        HTTPRouteRule, HTTPRouteSpec, ParentReference,
    };
    use k8s_openapi::api::core::v1::ServiceSpec;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeResolver {
        gateways: HashMap<(String, String), Gateway>,
        services: HashMap<(String, String), Service>,
    }

    #[async_trait]
    impl GatewayResolver for FakeResolver {
        async fn gateway(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<Gateway>, kube::Error> {
            Ok(self
                .gateways
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn gateway_class(&self, _name: &str) -> Result<Option<GatewayClass>, kube::Error> {
            Ok(None)
        }

        async fn backing_service(
            &self,
            namespace: &str,
            gateway_name: &str,
        ) -> Result<Option<Service>, kube::Error> {
            Ok(self
                .services
                .get(&(namespace.to_string(), gateway_name.to_string()))
                .cloned())
        }
    }

    fn listener(name: &str, protocol: &str, port: i32, hostname: Option<&str>) -> Listener {
        Listener {
            name: name.to_string(),
            hostname: hostname.map(str::to_string),
            port,
            protocol: protocol.to_string(),
        }
    }

    fn gateway(listeners: Vec<Listener>) -> Gateway {
        let mut gw = Gateway::new(
            "kserve-ingress-gateway",
            GatewaySpec {
                gateway_class_name: "istio".into(),
                listeners,
                addresses: None,
            },
        );
        gw.metadata.namespace = Some("kserve".into());
        gw
    }

    fn route(section: Option<&str>) -> HTTPRoute {
        let mut route = HTTPRoute::new(
            "test-llm-kserve-route",
            HTTPRouteSpec {
                parent_refs: Some(vec![ParentReference {
                    name: "kserve-ingress-gateway".into(),
                    namespace: Some("kserve".into()),
                    section_name: section.map(str::to_string),
                    ..Default::default()
                }]),
                ..Default::default()
            },
        );
        route.metadata.namespace = Some("nn".into());
        route
    }

    #[tokio::test]
    async fn section_name_selects_exactly_one_listener() {
        let mut resolver = FakeResolver::default();
        resolver.gateways.insert(
            ("kserve".into(), "kserve-ingress-gateway".into()),
            gateway(vec![
                listener("http", "HTTP", 80, Some("plain.example.com")),
                listener("https", "HTTPS", 443, Some("secure.example.com")),
            ]),
        );
        let urls = discover_urls(&route(Some("http")), &resolver, "https", "inference")
            .await
            .unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "http://plain.example.com/");
        assert!(!urls.iter().any(|u| u.as_str().contains("secure")));
    }

    #[tokio::test]
    async fn wildcard_listener_hostname_expands_label() {
        let mut resolver = FakeResolver::default();
        resolver.gateways.insert(
            ("kserve".into(), "kserve-ingress-gateway".into()),
            gateway(vec![listener("https", "HTTPS", 443, Some("*.example.com"))]),
        );
        let urls = discover_urls(&route(None), &resolver, "https", "inference")
            .await
            .unwrap();
        assert_eq!(urls[0].as_str(), "https://inference.example.com/");
    }

    #[tokio::test]
    async fn falls_back_to_gateway_status_addresses() {
        let mut gw = gateway(vec![listener("http", "HTTP", 8080, None)]);
        gw.status = Some(GatewayStatus {
            addresses: Some(vec![GatewayAddress {
                r#type: Some("IPAddress".into()),
                value: "203.0.113.7".into(),
            }]),
            conditions: None,
        });
        let mut resolver = FakeResolver::default();
        resolver
            .gateways
            .insert(("kserve".into(), "kserve-ingress-gateway".into()), gw);
        let urls = discover_urls(&route(None), &resolver, "http", "inference")
            .await
            .unwrap();
        assert_eq!(urls[0].as_str(), "http://203.0.113.7:8080/");
    }

    #[tokio::test]
    async fn backing_service_yields_internal_url_even_without_addresses() {
        let mut resolver = FakeResolver::default();
        resolver.gateways.insert(
            ("kserve".into(), "kserve-ingress-gateway".into()),
            gateway(vec![listener("http", "HTTP", 80, None)]),
        );
        let mut svc = Service::default();
        svc.metadata.name = Some("gateway-svc".into());
        svc.spec = Some(ServiceSpec::default());
        resolver.services.insert(
            ("kserve".into(), "kserve-ingress-gateway".into()),
            svc,
        );
        let urls = discover_urls(&route(None), &resolver, "http", "inference")
            .await
            .unwrap();
        assert_eq!(
            urls[0].as_str(),
            "http://gateway-svc.kserve.svc.cluster.local/"
        );
        assert!(is_internal_url(&urls[0]));
    }

    #[tokio::test]
    async fn no_urls_at_all_is_a_typed_error() {
        let resolver = FakeResolver::default();
        let err = discover_urls(&route(None), &resolver, "http", "inference")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::NoUrlsDiscovered { .. }));
    }

    #[test]
    fn path_prefers_service_backend_rules_and_shortest_prefix() {
        let mut r = route(None);
        r.spec.rules = Some(vec![
            HTTPRouteRule {
                matches: Some(vec![HTTPRouteMatch {
                    path: Some(HTTPPathMatch {
                        r#type: Some("PathPrefix".into()),
                        value: Some("/v1/models".into()),
                    }),
                }]),
                backend_refs: Some(vec![HTTPBackendRef {
                    kind: Some("InferencePool".into()),
                    name: "pool".into(),
                    ..Default::default()
                }]),
            },
            HTTPRouteRule {
                matches: Some(vec![HTTPRouteMatch {
                    path: Some(HTTPPathMatch {
                        r#type: Some("PathPrefix".into()),
                        value: Some("/v1".into()),
                    }),
                }]),
                backend_refs: Some(vec![HTTPBackendRef {
                    kind: Some("Service".into()),
                    name: "svc".into(),
                    ..Default::default()
                }]),
            },
        ]);
        assert_eq!(route_path(&r), "/v1");
    }

    #[test]
    fn regex_rules_are_ignored_for_path_synthesis() {
        let mut r = route(None);
        r.spec.rules = Some(vec![HTTPRouteRule {
            matches: Some(vec![HTTPRouteMatch {
                path: Some(HTTPPathMatch {
                    r#type: Some("RegularExpression".into()),
                    value: Some("/v[0-9]+".into()),
                }),
            }]),
            backend_refs: None,
        }]);
        assert_eq!(route_path(&r), "/");
    }

    #[test]
    fn default_ports_are_elided() {
        assert_eq!(
            build_url("https", "example.com", 443, "/").unwrap().as_str(),
            "https://example.com/"
        );
        assert_eq!(
            build_url("https", "example.com", 8443, "/").unwrap().as_str(),
            "https://example.com:8443/"
        );
    }

    #[test]
    fn classification_is_mutually_exclusive() {
        let samples = [
            "http://localhost/",
            "https://foo.svc.cluster.local/",
            "http://10.1.2.3/",
            "http://192.168.0.1:8080/",
            "http://172.16.9.9/",
            "http://169.254.0.1/",
            "http://127.0.0.1/",
            "https://inference.example.com/",
            "http://203.0.113.7/",
            "https://api.corp.internal/",
            "http://node.local/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[2001:db8::1]/",
        ];
        for s in samples {
            let url = Url::parse(s).unwrap();
            assert!(
                is_internal_url(&url) ^ is_external_url(&url),
                "classification must be exclusive for {s}"
            );
        }
    }

    #[tokio::test]
    async fn route_hostnames_override_listener_hostname() {
        let mut resolver = FakeResolver::default();
        resolver.gateways.insert(
            ("kserve".into(), "kserve-ingress-gateway".into()),
            gateway(vec![listener("https", "HTTPS", 443, Some("listener.example.com"))]),
        );
        let mut r = route(None);
        r.spec.hostnames = Some(vec![
            String::new(),
            "*".into(),
            "a.example.com".into(),
            "b.example.com".into(),
        ]);
        let urls = discover_urls(&r, &resolver, "https", "inference")
            .await
            .unwrap();
        let rendered: Vec<_> = urls.iter().map(Url::as_str).collect();
        assert_eq!(
            rendered,
            ["https://a.example.com/", "https://b.example.com/"]
        );
    }

    #[tokio::test]
    async fn discovered_urls_are_sorted_and_deduplicated() {
        let mut resolver = FakeResolver::default();
        resolver.gateways.insert(
            ("kserve".into(), "kserve-ingress-gateway".into()),
            gateway(vec![
                listener("https", "HTTPS", 443, Some("z.example.com")),
                listener("http", "HTTP", 80, Some("a.example.com")),
            ]),
        );
        let urls = discover_urls(&route(None), &resolver, "https", "inference")
            .await
            .unwrap();
        let rendered: Vec<_> = urls.iter().map(Url::as_str).collect();
        let mut sorted = rendered.clone();
        sorted.sort_unstable();
        assert_eq!(rendered, sorted);
        assert_eq!(
            rendered,
            ["http://a.example.com/", "https://z.example.com/"]
        );
    }

    #[test]
    fn preferred_scheme_orders_listeners() {
        let gw = gateway(vec![
            listener("http", "HTTP", 80, Some("h.example.com")),
            listener("https", "HTTPS", 443, Some("s.example.com")),
        ]);
        let selected = select_listeners(&gw, None, "http");
        assert_eq!(selected[0].name, "http");
        let selected = select_listeners(&gw, None, "https");
        assert_eq!(selected[0].name, "https");
    }
}
