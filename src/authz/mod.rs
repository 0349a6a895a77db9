//! OU-scoped authorization engine
//!
//! Every admin-surface request passes through two gates after bearer-token
//! validation: a scope check against the permission tree, then a policy
//! chain that evaluates organization-unit ownership. Permissions are
//! colon-joined paths under the `system` resource server and imply their
//! whole subtree; policies answer Allowed / Denied / NotApplicable, and a
//! request on a resource that is not OU-scoped at all is decided by the
//! scope check alone.

pub mod hierarchy;

pub use hierarchy::{OrganizationUnit, OuHierarchyResolver, OuTreeResolver};

use std::collections::HashSet;
use std::sync::Arc;

use crate::{Error, Result};

/// Root of the permission tree
pub const RESOURCE_SERVER: &str = "system";

/// Resource types the admin surface exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    OrganizationUnit,
    User,
    UserSchema,
    Theme,
    Application,
    IdentityProvider,
}

impl ResourceType {
    /// Permission-path segment for this resource type
    pub fn segment(&self) -> &'static str {
        match self {
            ResourceType::OrganizationUnit => "ou",
            ResourceType::User => "user",
            ResourceType::UserSchema => "userschema",
            ResourceType::Theme => "theme",
            ResourceType::Application => "application",
            ResourceType::IdentityProvider => "idp",
        }
    }
}

/// Action verbs bound to admin endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionVerb {
    Create,
    View,
    Update,
    Delete,
    List,
}

impl ActionVerb {
    pub fn segment(&self) -> &'static str {
        match self {
            ActionVerb::Create => "create",
            ActionVerb::View => "view",
            ActionVerb::Update => "update",
            ActionVerb::Delete => "delete",
            ActionVerb::List => "list",
        }
    }

    /// View and List are the only read verbs
    pub fn is_write(&self) -> bool {
        !matches!(self, ActionVerb::View | ActionVerb::List)
    }
}

/// The (action, resource-type) pair an admin endpoint declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdminAction {
    pub verb: ActionVerb,
    pub resource: ResourceType,
}

impl AdminAction {
    pub const fn new(verb: ActionVerb, resource: ResourceType) -> Self {
        Self { verb, resource }
    }

    /// Full permission path required to perform this action
    pub fn required_permission(&self) -> String {
        format!(
            "{}:{}:{}",
            RESOURCE_SERVER,
            self.resource.segment(),
            self.verb.segment()
        )
    }

    pub fn is_write(&self) -> bool {
        self.verb.is_write()
    }
}

/// True when the held permission covers the required one.
///
/// A permission implies itself and every permission in its subtree; the
/// extra segment-boundary check keeps `system:u` from matching
/// `system:user`.
pub fn permission_implies(held: &str, required: &str) -> bool {
    if held == required {
        return true;
    }
    required.len() > held.len()
        && required.starts_with(held)
        && required.as_bytes()[held.len()] == b':'
}

/// True when any granted scope implies the required permission.
pub fn scopes_satisfy(granted: &[String], required: &str) -> bool {
    granted.iter().any(|scope| permission_implies(scope, required))
}

/// Per-request principal context, populated by the bearer-auth middleware
/// and read-only afterwards.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for logs
    pub trace_id: String,

    /// Authenticated subject
    pub subject: String,

    /// Scopes granted to the bearer token
    pub scopes: Vec<String>,

    /// The caller's organization unit, when the principal belongs to one
    pub ou_id: Option<String>,
}

/// The OU the target resource belongs to; `None` means the resource is
/// not OU-scoped.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    pub ou_id: Option<String>,
}

impl ActionContext {
    pub fn unscoped() -> Self {
        Self { ou_id: None }
    }

    pub fn in_ou(ou_id: impl Into<String>) -> Self {
        Self {
            ou_id: Some(ou_id.into()),
        }
    }
}

/// Outcome of a single policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Denied,
    NotApplicable,
}

/// Id filter for list endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceFilter {
    /// Every resource of the type is visible
    All,
    /// Only the listed ids are visible
    Ids(Vec<String>),
}

/// Two-method policy contract. New policies (relationship-based,
/// attribute-based, ...) implement this and get wired into the engine's
/// selector.
pub trait AccessPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide the action for one concrete resource.
    fn evaluate(
        &self,
        ctx: &RequestContext,
        action: AdminAction,
        action_ctx: &ActionContext,
    ) -> Result<PolicyDecision>;

    /// Compute the id filter for list endpoints; `None` means the policy
    /// has no opinion for this resource type.
    fn accessible_resources(
        &self,
        ctx: &RequestContext,
        action: AdminAction,
        resource: ResourceType,
    ) -> Result<Option<ResourceFilter>>;
}

/// Grants an action only when the caller's OU exactly matches the
/// resource's OU. Not applicable to resources without an OU.
pub struct OuMembershipPolicy;

impl AccessPolicy for OuMembershipPolicy {
    fn name(&self) -> &'static str {
        "ou_membership"
    }

    fn evaluate(
        &self,
        ctx: &RequestContext,
        _action: AdminAction,
        action_ctx: &ActionContext,
    ) -> Result<PolicyDecision> {
        let resource_ou = match action_ctx.ou_id.as_deref() {
            Some(ou) if !ou.is_empty() => ou,
            _ => return Ok(PolicyDecision::NotApplicable),
        };

        match ctx.ou_id.as_deref() {
            Some(caller_ou) if caller_ou == resource_ou => Ok(PolicyDecision::Allowed),
            _ => Ok(PolicyDecision::Denied),
        }
    }

    fn accessible_resources(
        &self,
        ctx: &RequestContext,
        _action: AdminAction,
        resource: ResourceType,
    ) -> Result<Option<ResourceFilter>> {
        match resource {
            ResourceType::OrganizationUnit => {
                let ids = ctx.ou_id.iter().cloned().collect();
                Ok(Some(ResourceFilter::Ids(ids)))
            }
            // Other types are filtered at the store by the caller's OU
            _ => Ok(None),
        }
    }
}

/// Grants a closed set of read-only actions when the resource's OU is the
/// caller's OU or any ancestor thereof.
pub struct OuInheritancePolicy {
    resolver: Arc<dyn OuHierarchyResolver>,
    eligible: HashSet<AdminAction>,
}

impl OuInheritancePolicy {
    /// Build the policy over an explicit eligibility set. Write actions
    /// are never inheritance-eligible and are discarded with a warning.
    pub fn new(resolver: Arc<dyn OuHierarchyResolver>, actions: HashSet<AdminAction>) -> Self {
        let eligible = actions
            .into_iter()
            .filter(|action| {
                if action.is_write() {
                    tracing::warn!(
                        permission = %action.required_permission(),
                        "ignoring write action in inheritance eligibility set"
                    );
                    false
                } else {
                    true
                }
            })
            .collect();

        Self { resolver, eligible }
    }

    /// Default eligibility: reading and listing user schemas and themes.
    pub fn with_default_actions(resolver: Arc<dyn OuHierarchyResolver>) -> Self {
        let actions = HashSet::from([
            AdminAction::new(ActionVerb::View, ResourceType::UserSchema),
            AdminAction::new(ActionVerb::List, ResourceType::UserSchema),
            AdminAction::new(ActionVerb::View, ResourceType::Theme),
            AdminAction::new(ActionVerb::List, ResourceType::Theme),
        ]);
        Self::new(resolver, actions)
    }

    pub fn is_eligible(&self, action: AdminAction) -> bool {
        self.eligible.contains(&action)
    }

    fn hierarchy_err(e: Error) -> Error {
        Error::Internal(format!("hierarchy resolution failed: {e}"))
    }
}

impl AccessPolicy for OuInheritancePolicy {
    fn name(&self) -> &'static str {
        "ou_inheritance"
    }

    fn evaluate(
        &self,
        ctx: &RequestContext,
        action: AdminAction,
        action_ctx: &ActionContext,
    ) -> Result<PolicyDecision> {
        let resource_ou = match action_ctx.ou_id.as_deref() {
            Some(ou) if !ou.is_empty() => ou,
            _ => return Ok(PolicyDecision::NotApplicable),
        };

        if !self.is_eligible(action) {
            return Ok(PolicyDecision::NotApplicable);
        }

        let caller_ou = match ctx.ou_id.as_deref() {
            Some(ou) if !ou.is_empty() => ou,
            _ => return Ok(PolicyDecision::Denied),
        };

        let allowed = self
            .resolver
            .is_ancestor_or_self(resource_ou, caller_ou)
            .map_err(Self::hierarchy_err)?;

        Ok(if allowed {
            PolicyDecision::Allowed
        } else {
            PolicyDecision::Denied
        })
    }

    fn accessible_resources(
        &self,
        ctx: &RequestContext,
        action: AdminAction,
        _resource: ResourceType,
    ) -> Result<Option<ResourceFilter>> {
        if !self.is_eligible(action) {
            return Ok(None);
        }

        let caller_ou = match ctx.ou_id.as_deref() {
            Some(ou) if !ou.is_empty() => ou,
            _ => return Ok(Some(ResourceFilter::Ids(Vec::new()))),
        };

        let ids = self
            .resolver
            .ancestor_ids(caller_ou)
            .map_err(Self::hierarchy_err)?;

        Ok(Some(ResourceFilter::Ids(ids)))
    }
}

/// The policy chain: scope check first, then the single applicable policy.
pub struct AuthorizationEngine {
    membership: OuMembershipPolicy,
    inheritance: Option<OuInheritancePolicy>,
}

impl AuthorizationEngine {
    pub fn new(inheritance: Option<OuInheritancePolicy>) -> Self {
        Self {
            membership: OuMembershipPolicy,
            inheritance,
        }
    }

    /// Select the one policy that applies to this action.
    fn select_policy(&self, action: AdminAction) -> &dyn AccessPolicy {
        match &self.inheritance {
            Some(policy) if policy.is_eligible(action) => policy,
            _ => &self.membership,
        }
    }

    /// Gate a request: scope check, then policy evaluation. `Ok(())`
    /// means the action may proceed.
    pub fn authorize(
        &self,
        ctx: &RequestContext,
        action: AdminAction,
        action_ctx: &ActionContext,
    ) -> Result<()> {
        let required = action.required_permission();
        if !scopes_satisfy(&ctx.scopes, &required) {
            return Err(Error::AccessDenied(format!(
                "token does not grant '{required}'"
            )));
        }

        let policy = self.select_policy(action);
        match policy.evaluate(ctx, action, action_ctx)? {
            PolicyDecision::Allowed => Ok(()),
            PolicyDecision::Denied => Err(Error::AccessDenied(format!(
                "denied by {} policy",
                policy.name()
            ))),
            // The resource is not OU-scoped; the scope check is
            // authoritative.
            PolicyDecision::NotApplicable => Ok(()),
        }
    }

    /// Id filter for list endpoints. A chain with no applicable policy
    /// allows everything.
    pub fn accessible_resources(
        &self,
        ctx: &RequestContext,
        action: AdminAction,
        resource: ResourceType,
    ) -> Result<ResourceFilter> {
        let policy = self.select_policy(action);
        match policy.accessible_resources(ctx, action, resource)? {
            Some(filter) => Ok(filter),
            None => Ok(ResourceFilter::All),
        }
    }
}
