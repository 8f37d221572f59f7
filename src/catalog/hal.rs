//! HAL+JSON client for the remote control-plane API.
//!
//! Every operation re-traverses from the API root, so links are never cached
//! across calls and a server-side URL layout change is picked up immediately.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::catalog::{ContainerHandle, ContainerState, Image, RemoteCatalog};
use crate::error::RemoteError;

const REL_IMAGES: &str = "cu:images";
const REL_CONTAINERS: &str = "cu:containers";
const REL_CONTAINER: &str = "cu:container";
const REL_START: &str = "cu:start";
const REL_STOP: &str = "cu:stop";
const REL_SELF: &str = "self";

const HAL_JSON: &str = "application/hal+json";

/// Longest error body excerpt carried into a [`RemoteError`].
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone, Deserialize)]
struct HalLink {
    href: String,
    #[serde(default)]
    templated: bool,
}

/// HAL allows a relation to map to one link or an array of links.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum HalLinks {
    One(HalLink),
    Many(Vec<HalLink>),
}

impl HalLinks {
    fn first(&self) -> Option<&HalLink> {
        match self {
            HalLinks::One(link) => Some(link),
            HalLinks::Many(links) => links.first(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct HalDocument {
    #[serde(rename = "_links", default)]
    links: HashMap<String, HalLinks>,
    #[serde(rename = "_embedded", default)]
    embedded: HashMap<String, Value>,
}

impl HalDocument {
    /// Resolve `hop` against this document, fetched from `base`.
    fn resolve(&self, base: &Url, hop: &Hop<'_>) -> Result<Url, RemoteError> {
        let link = self
            .links
            .get(hop.rel)
            .and_then(HalLinks::first)
            .ok_or_else(|| RemoteError::InvalidResponse {
                reason: format!("link relation '{}' not found at {}", hop.rel, base),
            })?;
        resolve_href(base, link, &hop.params)
    }

    /// Items embedded under any key; an empty collection has no `_embedded`.
    fn embedded_items<T: DeserializeOwned>(self) -> Result<Vec<T>, RemoteError> {
        let mut items = Vec::new();
        for (key, value) in self.embedded {
            let values = match value {
                Value::Array(values) => values,
                other => vec![other],
            };
            for value in values {
                let item = serde_json::from_value(value).map_err(|e| {
                    RemoteError::InvalidResponse {
                        reason: format!("malformed embedded '{key}' item: {e}"),
                    }
                })?;
                items.push(item);
            }
        }
        Ok(items)
    }
}

#[derive(Debug, Serialize)]
struct ContainerRequest<'a> {
    name: &'a str,
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct ContainerResource {
    name: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: ContainerState,
    #[serde(rename = "_links", default)]
    links: HashMap<String, HalLinks>,
}

impl ContainerResource {
    /// Convert to a handle. `fallback_self` is used when the representation
    /// carries no `self` link (re-reads of an already known container).
    fn into_handle(
        self,
        base: &Url,
        fallback_self: Option<&Url>,
    ) -> Result<ContainerHandle, RemoteError> {
        let self_link = match self.links.get(REL_SELF).and_then(HalLinks::first) {
            Some(link) => resolve_href(base, link, &[])?,
            None => fallback_self
                .cloned()
                .ok_or_else(|| RemoteError::InvalidResponse {
                    reason: format!("container '{}' has no self link", self.name),
                })?,
        };

        Ok(ContainerHandle {
            name: self.name,
            image: self.image,
            state: self.state,
            self_link,
        })
    }
}

/// One step of a link traversal.
#[derive(Debug, Clone)]
struct Hop<'a> {
    rel: &'a str,
    params: Vec<(&'a str, &'a str)>,
}

impl<'a> Hop<'a> {
    fn rel(rel: &'a str) -> Self {
        Self {
            rel,
            params: Vec::new(),
        }
    }

    fn with_param(mut self, key: &'a str, value: &'a str) -> Self {
        self.params.push((key, value));
        self
    }
}

impl std::fmt::Display for Hop<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.rel)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, "({})", params.join(","))?;
        }
        Ok(())
    }
}

/// Client that discovers endpoints by following HAL link relations.
pub struct HalCatalogClient {
    root: Url,
    http: reqwest::Client,
}

impl HalCatalogClient {
    /// Create a client rooted at `root`. `timeout` bounds every request.
    pub fn new(root: Url, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dockhand/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Unavailable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { root, http })
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url, resource: &str) -> Result<T, RemoteError> {
        let response = self
            .http
            .get(url.clone())
            .header(ACCEPT, HAL_JSON)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response, resource).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse {
                reason: format!("{resource}: {e}"),
            })
    }

    /// Follow `hops` from the root, one GET per hop, and return the final URL.
    async fn follow(&self, hops: &[Hop<'_>]) -> Result<Url, RemoteError> {
        let mut current = self.root.clone();
        let mut resource = "API root".to_string();
        for hop in hops {
            let document: HalDocument = self.get_json(&current, &resource).await?;
            current = document.resolve(&current, hop)?;
            resource = hop.to_string();
        }
        Ok(current)
    }

    async fn post_action(&self, name: &str, rel: &str) -> Result<(), RemoteError> {
        let url = self
            .follow(&[
                Hop::rel(REL_CONTAINERS),
                Hop::rel(REL_CONTAINER).with_param("name", name),
                Hop::rel(rel),
            ])
            .await?;

        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response, &format!("container '{name}'")).await?;

        tracing::debug!(container = %name, action = rel, "Container action acknowledged");
        Ok(())
    }
}

#[async_trait]
impl RemoteCatalog for HalCatalogClient {
    async fn list_images(&self) -> Result<HashSet<Image>, RemoteError> {
        let url = self.follow(&[Hop::rel(REL_IMAGES)]).await?;
        let document: HalDocument = self.get_json(&url, REL_IMAGES).await?;
        let images: Vec<Image> = document.embedded_items()?;
        Ok(images.into_iter().collect())
    }

    async fn create_container(
        &self,
        name: &str,
        image_ref: &str,
    ) -> Result<ContainerHandle, RemoteError> {
        let url = self.follow(&[Hop::rel(REL_CONTAINERS)]).await?;

        let response = self
            .http
            .post(url.clone())
            .header(ACCEPT, HAL_JSON)
            .json(&ContainerRequest {
                name,
                image: image_ref,
            })
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response, &format!("container '{name}'")).await?;

        let resource: ContainerResource =
            response
                .json()
                .await
                .map_err(|e| RemoteError::InvalidResponse {
                    reason: format!("container '{name}': {e}"),
                })?;
        resource.into_handle(&url, None)
    }

    async fn delete_container(&self, name: &str) -> Result<(), RemoteError> {
        let url = self
            .follow(&[
                Hop::rel(REL_CONTAINERS),
                Hop::rel(REL_CONTAINER).with_param("name", name),
            ])
            .await?;

        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response, &format!("container '{name}'")).await?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), RemoteError> {
        self.post_action(name, REL_START).await
    }

    async fn stop_container(&self, name: &str) -> Result<(), RemoteError> {
        self.post_action(name, REL_STOP).await
    }

    async fn fetch_state(&self, handle: &ContainerHandle) -> Result<ContainerHandle, RemoteError> {
        let resource: ContainerResource = self
            .get_json(&handle.self_link, &format!("container '{}'", handle.name))
            .await?;
        resource.into_handle(&handle.self_link, Some(&handle.self_link))
    }
}

fn resolve_href(base: &Url, link: &HalLink, params: &[(&str, &str)]) -> Result<Url, RemoteError> {
    let href = if link.templated || !params.is_empty() {
        expand_template(&link.href, params)
    } else {
        link.href.clone()
    };
    base.join(&href).map_err(|e| RemoteError::InvalidResponse {
        reason: format!("invalid href '{href}': {e}"),
    })
}

/// Expand the URI template subset HAL servers emit: `{var}`, `{?a,b}` and `{&a}`.
/// Variables without a value expand to nothing.
fn expand_template(template: &str, params: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(&expand_expression(&rest[start + 1..start + len], params));
        rest = &rest[start + len + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_expression(expr: &str, params: &[(&str, &str)]) -> String {
    let (operator, names) = match expr.chars().next() {
        Some(op @ ('?' | '&')) => (Some(op), &expr[1..]),
        _ => (None, expr),
    };

    let values: Vec<(&str, &str)> = names
        .split(',')
        .map(str::trim)
        .filter_map(|name| params.iter().find(|(k, _)| *k == name).copied())
        .collect();

    match operator {
        None => values
            .iter()
            .map(|(_, v)| urlencoding::encode(v).into_owned())
            .collect::<Vec<_>>()
            .join(","),
        Some(_) if values.is_empty() => String::new(),
        Some(op) => {
            let pairs: Vec<String> = values
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect();
            format!("{op}{}", pairs.join("&"))
        }
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Unavailable {
            reason: format!("request timed out: {e}"),
        }
    } else {
        RemoteError::Unavailable {
            reason: e.to_string(),
        }
    }
}

/// Map non-success statuses onto the remote error taxonomy.
///
/// 408 and 429 are transient and count as unavailable, not rejected.
async fn check_status(
    response: reqwest::Response,
    resource: &str,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(RemoteError::NotFound {
            resource: resource.to_string(),
        });
    }

    let body = response.text().await.unwrap_or_default();
    let mut reason: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if reason.is_empty() {
        reason = status.canonical_reason().unwrap_or("no reason").to_string();
    }

    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            reason,
        })
    } else {
        Err(RemoteError::Unavailable {
            reason: format!("HTTP {} for {resource}: {reason}", status.as_u16()),
        })
    }
}
