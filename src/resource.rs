//! Named resources and the registry that locates them.
//!
//! A resource is one external instrument service (the robot arm, the
//! microscope, ...). Each service is reachable at a base URL exposing a
//! `/status` route and an action route. The registry is built once from
//! configuration and never changes afterwards.

use crate::config::Settings;
use crate::error::{AppResult, SchedulerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a contended physical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(String);

impl Resource {
    /// Resource name of the PreciseFlex robot arm.
    pub const ARM: &'static str = "arm";
    /// Resource name of the IMX microscope.
    pub const INSTRUMENT: &'static str = "instrument";

    /// Resource called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The robot arm.
    pub fn arm() -> Self {
        Self::new(Self::ARM)
    }

    /// The imaging instrument.
    pub fn instrument() -> Self {
        Self::new(Self::INSTRUMENT)
    }

    /// Resource name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last observed availability of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Availability {
    /// Idle and accepting actions
    Ready,
    /// Working on an action
    Busy,
    /// Any other reported value, or not polled yet
    #[default]
    Unknown,
}

impl Availability {
    /// Interpret the `value` field of a status reply.
    ///
    /// Anything other than `ready` or `busy` is `Unknown`, which the prober
    /// treats as not ready.
    pub fn from_status_value(value: &str) -> Self {
        match value {
            "ready" => Availability::Ready,
            "busy" => Availability::Busy,
            _ => Availability::Unknown,
        }
    }

    /// Whether an action may be dispatched.
    pub fn is_ready(self) -> bool {
        self == Availability::Ready
    }
}

/// Immutable mapping from resource to base URL.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    urls: BTreeMap<Resource, String>,
}

impl ResourceRegistry {
    /// Build a registry from `{resource_name -> base_url}` pairs.
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let urls = entries
            .into_iter()
            .map(|(name, url)| (Resource::new(name), normalize_url(url.as_ref())))
            .collect();
        Self { urls }
    }

    /// Registry for `arm` and `instrument` from settings, plus any extra
    /// `resources` entries (which win over the two defaults).
    pub fn from_settings(settings: &Settings) -> Self {
        let mut entries: BTreeMap<String, String> = BTreeMap::new();
        entries.insert(Resource::INSTRUMENT.to_string(), settings.imx_url.clone());
        entries.insert(Resource::ARM.to_string(), settings.pf_url.clone());
        for (name, url) in &settings.resources {
            entries.insert(name.clone(), url.clone());
        }
        Self::new(entries)
    }

    /// Base URL of `resource`.
    pub fn url_for(&self, resource: &Resource) -> AppResult<&str> {
        self.urls
            .get(resource)
            .map(String::as_str)
            .ok_or_else(|| SchedulerError::UnknownResource(resource.clone()))
    }

    /// Whether `resource` is registered.
    pub fn contains(&self, resource: &Resource) -> bool {
        self.urls.contains_key(resource)
    }

    /// Registered resources in name order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.urls.keys()
    }
}

/// Prepend `http://` when no scheme is given and drop trailing slashes.
fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}
