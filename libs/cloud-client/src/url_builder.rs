//! Host and URL construction for tenant- and region-scoped endpoints.
//!
//! Two URL rules exist and intentionally detect the system namespace
//! differently:
//! - [`UrlBuilder::build_url_with_tenant`] routes by region when the joined
//!   path *contains* `system` anywhere;
//! - [`UrlBuilder::build_url_from_path_params`] routes by region only when the
//!   rendered path *starts with* `/system/`.
//!
//! Every function here is pure.

use std::collections::BTreeMap;

use handlebars::Handlebars;
use serde::Serialize;
use url::Url;

use crate::error::ClientError;

/// Query parameters; keys are emitted in sorted order.
pub type QueryValues = BTreeMap<String, Vec<String>>;

const SYSTEM_NAMESPACE: &str = "system";
const SYSTEM_PATH_PREFIX: &str = "/system/";

/// Compute the request host.
///
/// `override_host` wins unconditionally. Otherwise the host is
/// `[{prefix}.]{service_cluster}.{root_domain}`, with `api` standing in for an
/// empty service cluster.
#[must_use]
pub fn build_host(
    root_domain: &str,
    override_host: Option<&str>,
    service_cluster: &str,
    host_prefix: &str,
) -> String {
    if let Some(host) = override_host.filter(|h| !h.is_empty()) {
        return host.to_owned();
    }
    let prefix = if host_prefix.is_empty() {
        String::new()
    } else {
        format!("{host_prefix}.")
    };
    if service_cluster.is_empty() {
        format!("{prefix}api.{root_domain}")
    } else {
        format!("{prefix}{service_cluster}.{root_domain}")
    }
}

/// Lexically join path segments: empty and `.` segments vanish, `..` pops.
///
/// The result carries no leading or trailing slash. A `..` with nothing left
/// to pop is dropped, so the path never climbs above its first segment
/// (`["acme", "../../x"]` joins to `x`, not `../x`).
#[must_use]
pub fn join_path<S: AsRef<str>>(parts: &[S]) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for part in parts {
        for segment in part.as_ref().split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
    }
    segments.join("/")
}

/// Render a Handlebars path template (`/datasets/{{id}}`) against `params`.
///
/// Strict mode: a placeholder with no matching parameter is an error. Values
/// are inserted verbatim; the URL layer percent-encodes them.
///
/// # Errors
///
/// Returns [`ClientError::PathTemplate`] if the template is malformed or
/// references a missing parameter.
pub fn render_path_template<P: Serialize>(
    template: &str,
    params: &P,
) -> Result<String, ClientError> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .render_template(template, params)
        .map_err(|e| ClientError::PathTemplate(e.to_string()))
}

/// Immutable inputs shared by every URL built for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBuilder {
    pub(crate) scheme: String,
    pub(crate) root_domain: String,
    pub(crate) override_host: Option<String>,
    pub(crate) default_tenant: String,
    pub(crate) tenant_scoped: bool,
    pub(crate) region: String,
}

impl UrlBuilder {
    #[must_use]
    pub fn new(scheme: impl Into<String>, root_domain: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            root_domain: root_domain.into(),
            override_host: None,
            default_tenant: String::new(),
            tenant_scoped: false,
            region: String::new(),
        }
    }

    #[must_use]
    pub fn override_host(mut self, host: impl Into<String>) -> Self {
        self.override_host = Some(host.into()).filter(|h: &String| !h.is_empty());
        self
    }

    #[must_use]
    pub fn default_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.default_tenant = tenant.into();
        self
    }

    #[must_use]
    pub fn tenant_scoped(mut self, scoped: bool) -> Self {
        self.tenant_scoped = scoped;
        self
    }

    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Host for `service_cluster`, prefixed with `host_prefix` when non-empty.
    #[must_use]
    pub fn build_host(&self, service_cluster: &str, host_prefix: &str) -> String {
        build_host(
            &self.root_domain,
            self.override_host.as_deref(),
            service_cluster,
            host_prefix,
        )
    }

    /// Tenant-based URL using this builder's default tenant, scoping and region.
    ///
    /// # Errors
    ///
    /// See [`build_url_with_tenant`](Self::build_url_with_tenant).
    pub fn build_url<S: AsRef<str>>(
        &self,
        query: Option<&QueryValues>,
        service_cluster: &str,
        path_parts: &[S],
    ) -> Result<Url, ClientError> {
        self.build_url_with_tenant(
            &self.default_tenant,
            self.tenant_scoped,
            &self.region,
            query,
            service_cluster,
            path_parts,
        )
    }

    /// `{scheme}://[{prefix}.]{cluster|api}.{root}/{tenant}/{parts...}`.
    ///
    /// On a tenant-scoped host the prefix is `region` when the joined path
    /// contains `system` and a region is set, and `tenant` when the path does
    /// not contain `system`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EmptyTenant`] for an empty tenant and
    /// [`ClientError::InvalidUrl`] if the result does not parse.
    pub fn build_url_with_tenant<S: AsRef<str>>(
        &self,
        tenant: &str,
        tenant_scoped: bool,
        region: &str,
        query: Option<&QueryValues>,
        service_cluster: &str,
        path_parts: &[S],
    ) -> Result<Url, ClientError> {
        if tenant.is_empty() {
            return Err(ClientError::EmptyTenant);
        }

        let mut parts: Vec<&str> = Vec::with_capacity(path_parts.len() + 1);
        parts.push(tenant);
        parts.extend(path_parts.iter().map(AsRef::as_ref));
        let path = join_path(&parts);

        let mentions_system = path.contains(SYSTEM_NAMESPACE);
        let host_prefix = if tenant_scoped && !region.is_empty() && mentions_system {
            region
        } else if tenant_scoped && !mentions_system {
            tenant
        } else {
            ""
        };

        let host = self.build_host(service_cluster, host_prefix);
        self.assemble(&host, &format!("/{path}"), query)
    }

    /// `{scheme}://[region-{region}.|{tenant}.]{cluster|api}.{root}{path}`.
    ///
    /// `template` is rendered against `params`; the default tenant is
    /// prepended unless the rendered path starts with `/system/`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::PathTemplate`] on render failure and
    /// [`ClientError::RegionRequired`] for a system-namespace path on a
    /// tenant-scoped builder without a region.
    pub fn build_url_from_path_params<P: Serialize>(
        &self,
        query: Option<&QueryValues>,
        service_cluster: &str,
        template: &str,
        params: &P,
    ) -> Result<Url, ClientError> {
        let rendered = render_path_template(template, params)?;
        let is_system = rendered.starts_with(SYSTEM_PATH_PREFIX);
        let path = if is_system {
            rendered
        } else {
            format!("/{}{rendered}", self.default_tenant)
        };

        if self.tenant_scoped && is_system && self.region.is_empty() {
            return Err(ClientError::RegionRequired);
        }

        let host_prefix = if self.tenant_scoped && is_system {
            format!("region-{}", self.region)
        } else if self.tenant_scoped {
            self.default_tenant.clone()
        } else {
            String::new()
        };

        let host = self.build_host(service_cluster, &host_prefix);
        self.assemble(&host, &path, query)
    }

    /// `{scheme}://{host}` with the tenant prefix applied on scoped hosts.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if scheme and host do not form a URL.
    pub fn base_url(&self, service_cluster: &str) -> Result<Url, ClientError> {
        let host_prefix = if self.tenant_scoped {
            self.default_tenant.as_str()
        } else {
            ""
        };
        let host = self.build_host(service_cluster, host_prefix);
        self.assemble(&host, "/", None)
    }

    fn assemble(
        &self,
        host: &str,
        path: &str,
        query: Option<&QueryValues>,
    ) -> Result<Url, ClientError> {
        let raw = format!("{}://{host}", self.scheme);
        let mut url = Url::parse(&raw).map_err(|e| ClientError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        url.set_path(path);

        if let Some(query) = query.filter(|q| q.values().any(|v| !v.is_empty())) {
            let mut pairs = url.query_pairs_mut();
            for (key, values) in query {
                for value in values {
                    pairs.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }
}
