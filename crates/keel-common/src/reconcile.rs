//! Create-or-update reconciliation of declarative resources
//!
//! Every kind keel manages (Namespaces, Secrets, AppProjects, Applications)
//! goes through the same two entry points:
//!
//! - [`apply`]: create when absent, otherwise update carrying the live
//!   object's `resourceVersion`.
//! - [`create_if_absent`]: create when absent, otherwise leave the live object
//!   alone. Used for credential Secrets, where the stored value wins.
//!
//! `apply` is read-modify-write. It is only safe with a single writer per
//! object; a concurrent writer makes the update fail with 409 or wins.

use std::fmt;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::kube_utils::{build_api_resource, is_conflict};
use crate::status::StatusEvent;
use crate::{Context, Error, Result};

/// Address of one object: resource type, namespace, name
#[derive(Debug, Clone)]
pub struct ResourceRef {
    /// Resource type descriptor
    pub api_resource: ApiResource,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.api_resource.kind, ns, self.name),
            None => write!(f, "{}/{}", self.api_resource.kind, self.name),
        }
    }
}

/// Narrow view of the Kubernetes API used by the reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch an object, `Ok(None)` if it does not exist
    async fn get(&self, target: &ResourceRef) -> std::result::Result<Option<DynamicObject>, kube::Error>;

    /// Create an object
    async fn create(
        &self,
        target: &ResourceRef,
        object: &DynamicObject,
    ) -> std::result::Result<DynamicObject, kube::Error>;

    /// Replace an object; `object.metadata.resourceVersion` must be set
    async fn replace(
        &self,
        target: &ResourceRef,
        object: &DynamicObject,
    ) -> std::result::Result<DynamicObject, kube::Error>;
}

/// [`ResourceClient`] backed by a real cluster
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, target: &ResourceRef) -> Api<DynamicObject> {
        match &target.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &target.api_resource),
            None => Api::all_with(self.client.clone(), &target.api_resource),
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(&self, target: &ResourceRef) -> std::result::Result<Option<DynamicObject>, kube::Error> {
        self.api(target).get_opt(&target.name).await
    }

    async fn create(
        &self,
        target: &ResourceRef,
        object: &DynamicObject,
    ) -> std::result::Result<DynamicObject, kube::Error> {
        self.api(target).create(&PostParams::default(), object).await
    }

    async fn replace(
        &self,
        target: &ResourceRef,
        object: &DynamicObject,
    ) -> std::result::Result<DynamicObject, kube::Error> {
        self.api(target)
            .replace(&target.name, &PostParams::default(), object)
            .await
    }
}

/// An opaque declarative document plus the type descriptor used to address it
#[derive(Debug, Clone)]
pub struct DeclarativeResource {
    api_resource: ApiResource,
    namespace: Option<String>,
    name: String,
    body: serde_json::Value,
}

impl DeclarativeResource {
    /// Build from a JSON document, deriving the type from apiVersion/kind
    pub fn from_value(body: serde_json::Value) -> Result<Self> {
        let field = |pointer: &str| {
            body.pointer(pointer)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::reconcile("<unknown>", "document missing apiVersion"))?;
        let kind =
            field("/kind").ok_or_else(|| Error::reconcile("<unknown>", "document missing kind"))?;
        let name = field("/metadata/name").ok_or_else(|| {
            Error::reconcile(kind.as_str(), "document missing metadata.name")
        })?;
        let namespace = field("/metadata/namespace");

        Ok(Self {
            api_resource: build_api_resource(&api_version, &kind),
            namespace,
            name,
            body,
        })
    }

    /// Build from a single YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let body: serde_json::Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::reconcile("<unknown>", format!("invalid YAML: {}", e)))?;
        Self::from_value(body)
    }

    /// Resource kind
    pub fn kind(&self) -> &str {
        &self.api_resource.kind
    }

    /// Object name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object namespace
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The raw document
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Address of this object
    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            api_resource: self.api_resource.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    fn to_dynamic_object(&self) -> Result<DynamicObject> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            Error::reconcile(
                self.reference().to_string(),
                format!("document is not a valid object: {}", e),
            )
        })
    }
}

/// What a reconcile call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    /// The object did not exist and was created
    Created,
    /// The object existed and was replaced
    Updated,
    /// The object existed and was left untouched
    Kept,
}

impl ApplyAction {
    /// Lowercase verb for events and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyAction::Created => "create",
            ApplyAction::Updated => "update",
            ApplyAction::Kept => "keep",
        }
    }
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyAction::Created => "created",
            ApplyAction::Updated => "updated",
            ApplyAction::Kept => "already exists, kept",
        };
        f.write_str(s)
    }
}

/// Create the resource, or update it carrying the live resourceVersion
pub async fn apply(
    ctx: &Context,
    client: &dyn ResourceClient,
    resource: &DeclarativeResource,
) -> Result<ApplyAction> {
    reconcile(ctx, client, resource, Mode::CreateOrUpdate).await
}

/// Create the resource unless it already exists; an existing object wins
pub async fn create_if_absent(
    ctx: &Context,
    client: &dyn ResourceClient,
    resource: &DeclarativeResource,
) -> Result<ApplyAction> {
    reconcile(ctx, client, resource, Mode::CreateOnly).await
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    CreateOrUpdate,
    CreateOnly,
}

impl Mode {
    fn verb(&self) -> &'static str {
        match self {
            Mode::CreateOrUpdate => "apply",
            Mode::CreateOnly => "create",
        }
    }
}

async fn reconcile(
    ctx: &Context,
    client: &dyn ResourceClient,
    resource: &DeclarativeResource,
    mode: Mode,
) -> Result<ApplyAction> {
    let target = resource.reference();
    let shown = target.to_string();
    let verb = mode.verb();

    ctx.send(
        StatusEvent::progress(format!("{} {}", verb, shown))
            .with_resource(&shown)
            .with_action(verb),
    );

    let result = write(ctx, client, resource, &target, mode).await;

    match &result {
        Ok(action) => {
            debug!(resource = %shown, action = action.as_str(), "reconciled");
            let event = match action {
                ApplyAction::Kept => StatusEvent::info(format!("{} {}", shown, action)),
                _ => StatusEvent::success(format!("{} {}", shown, action)),
            };
            ctx.send(
                event
                    .with_resource(&shown)
                    .with_action(action.as_str()),
            );
        }
        Err(e) => {
            ctx.send(
                StatusEvent::warning(format!("failed to {} {}: {}", verb, shown, e))
                    .with_resource(&shown)
                    .with_action(verb),
            );
        }
    }

    result
}

async fn write(
    ctx: &Context,
    client: &dyn ResourceClient,
    resource: &DeclarativeResource,
    target: &ResourceRef,
    mode: Mode,
) -> Result<ApplyAction> {
    let shown = target.to_string();
    ctx.check_cancelled(&format!("reconciling {}", shown))?;

    let mut desired = resource.to_dynamic_object()?;
    let existing = client
        .get(target)
        .await
        .map_err(|e| Error::reconcile(&shown, format!("lookup failed: {}", e)))?;

    match (mode, existing) {
        (Mode::CreateOnly, Some(_)) => Ok(ApplyAction::Kept),
        (Mode::CreateOrUpdate, Some(existing)) => {
            desired.metadata.resource_version = existing.metadata.resource_version;
            client
                .replace(target, &desired)
                .await
                .map_err(|e| Error::reconcile(&shown, format!("update failed: {}", e)))?;
            Ok(ApplyAction::Updated)
        }
        (mode, None) => match client.create(target, &desired).await {
            Ok(_) => Ok(ApplyAction::Created),
            // Lost a creation race; for create-only the other writer wins.
            Err(e) if matches!(mode, Mode::CreateOnly) && is_conflict(&e) => Ok(ApplyAction::Kept),
            Err(e) => Err(Error::reconcile(&shown, format!("create failed: {}", e))),
        },
    }
}
