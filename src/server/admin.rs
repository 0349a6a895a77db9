//! Admin-surface handlers: users, user schemas, themes, organization units
//!
//! Every handler runs behind the bearer-auth middleware and consults the
//! authorization engine with the target resource's OU before touching the
//! store.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{AppError, AppState};
use crate::authz::{
    ActionContext, ActionVerb, AdminAction, OrganizationUnit, RequestContext, ResourceFilter,
    ResourceType,
};
use crate::events::{Event, EventType};
use crate::store::{Resource, ResourceStore};
use crate::Error;

/// Pagination query parameters
#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

/// Create/update payload for generic resources
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePayload {
    #[serde(default)]
    pub id: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub ou_id: Option<String>,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl ResourcePayload {
    fn into_resource(self, id: Option<String>) -> Resource {
        Resource {
            id: id
                .or(self.id)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            display_name: self.display_name,
            ou_id: self.ou_id,
            body: self.body,
        }
    }
}

/// List response envelope
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub resources: Vec<T>,
}

fn require_context(ctx: Option<Extension<RequestContext>>) -> Result<RequestContext, AppError> {
    match ctx {
        Some(Extension(ctx)) => Ok(ctx),
        // Route wired without the bearer middleware
        None => Err(AppError(Error::Internal(
            "request context missing from extensions".to_string(),
        ))),
    }
}

/// Authorize and log denials as events.
fn authorize(
    state: &AppState,
    ctx: &RequestContext,
    action: AdminAction,
    action_ctx: &ActionContext,
) -> Result<(), AppError> {
    state.engine.authorize(ctx, action, action_ctx).map_err(|e| {
        if matches!(e, Error::AccessDenied(_)) {
            state.events.log(
                &Event::new(EventType::AuthzDenied)
                    .with_trace_id(&ctx.trace_id)
                    .with_subject(&ctx.subject)
                    .with_scope(action.required_permission())
                    .with_status_code(403),
            );
        }
        AppError(e)
    })
}

/// Keep only the rows the caller may see. `All` still applies the
/// store-level OU filter: OU-scoped rows outside the caller's OU are
/// invisible unless the caller itself has no OU.
fn apply_filter(
    resources: Vec<Resource>,
    filter: &ResourceFilter,
    caller_ou: Option<&str>,
) -> Vec<Resource> {
    resources
        .into_iter()
        .filter(|resource| match (&resource.ou_id, filter) {
            (None, _) => true,
            (Some(ou), ResourceFilter::Ids(ids)) => ids.iter().any(|id| id == ou),
            (Some(ou), ResourceFilter::All) => match caller_ou {
                Some(caller) => caller == ou.as_str(),
                None => true,
            },
        })
        .collect()
}

fn store_for(state: &AppState, resource: ResourceType) -> Arc<dyn ResourceStore> {
    match resource {
        ResourceType::User => Arc::clone(&state.users),
        ResourceType::UserSchema => Arc::clone(&state.user_schemas),
        ResourceType::Theme => Arc::clone(&state.themes),
        _ => unreachable!("no generic store for {resource:?}"),
    }
}

async fn create_resource(
    state: &AppState,
    ctx: Option<Extension<RequestContext>>,
    resource_type: ResourceType,
    payload: ResourcePayload,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;
    let action_ctx = match payload.ou_id.as_deref() {
        Some(ou) if !ou.is_empty() => ActionContext::in_ou(ou),
        _ => ActionContext::unscoped(),
    };

    authorize(
        state,
        &ctx,
        AdminAction::new(ActionVerb::Create, resource_type),
        &action_ctx,
    )?;

    let created = store_for(state, resource_type)
        .create(payload.into_resource(None))
        .await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn read_resource(
    state: &AppState,
    ctx: Option<Extension<RequestContext>>,
    resource_type: ResourceType,
    id: &str,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;
    let store = store_for(state, resource_type);
    let resource = store.get(id).await?;

    let action_ctx = resource
        .ou_id
        .as_deref()
        .map(ActionContext::in_ou)
        .unwrap_or_default();
    authorize(
        state,
        &ctx,
        AdminAction::new(ActionVerb::View, resource_type),
        &action_ctx,
    )?;

    Ok(Json(resource).into_response())
}

async fn update_resource(
    state: &AppState,
    ctx: Option<Extension<RequestContext>>,
    resource_type: ResourceType,
    id: &str,
    payload: ResourcePayload,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;
    let store = store_for(state, resource_type);
    let existing = store.get(id).await?;

    let action_ctx = existing
        .ou_id
        .as_deref()
        .map(ActionContext::in_ou)
        .unwrap_or_default();
    authorize(
        state,
        &ctx,
        AdminAction::new(ActionVerb::Update, resource_type),
        &action_ctx,
    )?;

    let updated = store
        .update(id, payload.into_resource(Some(id.to_string())))
        .await?;
    Ok(Json(updated).into_response())
}

async fn delete_resource(
    state: &AppState,
    ctx: Option<Extension<RequestContext>>,
    resource_type: ResourceType,
    id: &str,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;
    let store = store_for(state, resource_type);
    let existing = store.get(id).await?;

    let action_ctx = existing
        .ou_id
        .as_deref()
        .map(ActionContext::in_ou)
        .unwrap_or_default();
    authorize(
        state,
        &ctx,
        AdminAction::new(ActionVerb::Delete, resource_type),
        &action_ctx,
    )?;

    store.delete(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_resources(
    state: &AppState,
    ctx: Option<Extension<RequestContext>>,
    resource_type: ResourceType,
    pagination: Pagination,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;
    let action = AdminAction::new(ActionVerb::List, resource_type);

    authorize(state, &ctx, action, &ActionContext::unscoped())?;

    let filter = state
        .engine
        .accessible_resources(&ctx, action, resource_type)
        .map_err(AppError)?;

    let all = store_for(state, resource_type).list_all().await?;
    let visible = apply_filter(all, &filter, ctx.ou_id.as_deref());
    let page: Vec<Resource> = visible
        .into_iter()
        .skip(pagination.offset)
        .take(pagination.limit)
        .collect();

    Ok(Json(ListResponse {
        count: page.len(),
        resources: page,
    })
    .into_response())
}

macro_rules! resource_handlers {
    ($create:ident, $read:ident, $update:ident, $delete:ident, $list:ident, $resource_type:expr) => {
        async fn $create(
            State(state): State<Arc<AppState>>,
            ctx: Option<Extension<RequestContext>>,
            Json(payload): Json<ResourcePayload>,
        ) -> Result<Response, AppError> {
            create_resource(&state, ctx, $resource_type, payload).await
        }

        async fn $read(
            State(state): State<Arc<AppState>>,
            ctx: Option<Extension<RequestContext>>,
            Path(id): Path<String>,
        ) -> Result<Response, AppError> {
            read_resource(&state, ctx, $resource_type, &id).await
        }

        async fn $update(
            State(state): State<Arc<AppState>>,
            ctx: Option<Extension<RequestContext>>,
            Path(id): Path<String>,
            Json(payload): Json<ResourcePayload>,
        ) -> Result<Response, AppError> {
            update_resource(&state, ctx, $resource_type, &id, payload).await
        }

        async fn $delete(
            State(state): State<Arc<AppState>>,
            ctx: Option<Extension<RequestContext>>,
            Path(id): Path<String>,
        ) -> Result<Response, AppError> {
            delete_resource(&state, ctx, $resource_type, &id).await
        }

        async fn $list(
            State(state): State<Arc<AppState>>,
            ctx: Option<Extension<RequestContext>>,
            Query(pagination): Query<Pagination>,
        ) -> Result<Response, AppError> {
            list_resources(&state, ctx, $resource_type, pagination).await
        }
    };
}

resource_handlers!(
    create_user,
    read_user,
    update_user,
    delete_user,
    list_users,
    ResourceType::User
);

resource_handlers!(
    create_user_schema,
    read_user_schema,
    update_user_schema,
    delete_user_schema,
    list_user_schemas,
    ResourceType::UserSchema
);

resource_handlers!(
    create_theme,
    read_theme,
    update_theme,
    delete_theme,
    list_themes,
    ResourceType::Theme
);

/// Create/update payload for organization units
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUnitPayload {
    #[serde(default)]
    pub id: Option<String>,
    pub handle: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

async fn create_ou(
    State(state): State<Arc<AppState>>,
    ctx: Option<Extension<RequestContext>>,
    Json(payload): Json<OrganizationUnitPayload>,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;

    // Creating a child unit is an action on the parent
    let action_ctx = payload
        .parent_id
        .as_deref()
        .map(ActionContext::in_ou)
        .unwrap_or_default();
    authorize(
        &state,
        &ctx,
        AdminAction::new(ActionVerb::Create, ResourceType::OrganizationUnit),
        &action_ctx,
    )?;

    if let Some(parent_id) = payload.parent_id.as_deref() {
        if state.ou_resolver.get(parent_id).is_none() {
            return Err(AppError(Error::Validation(format!(
                "parent organization unit '{parent_id}' does not exist"
            ))));
        }
    }

    let unit = OrganizationUnit {
        id: payload
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        handle: payload.handle,
        name: payload.name,
        parent_id: payload.parent_id,
    };

    if state.ou_resolver.get(&unit.id).is_some() {
        return Err(AppError(Error::Conflict(format!(
            "organization unit '{}'",
            unit.id
        ))));
    }

    state.ou_resolver.insert(unit.clone());
    Ok((StatusCode::CREATED, Json(unit)).into_response())
}

async fn read_ou(
    State(state): State<Arc<AppState>>,
    ctx: Option<Extension<RequestContext>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;
    let unit = state
        .ou_resolver
        .get(&id)
        .ok_or_else(|| AppError(Error::NotFound(format!("organization unit '{id}'"))))?;

    authorize(
        &state,
        &ctx,
        AdminAction::new(ActionVerb::View, ResourceType::OrganizationUnit),
        &ActionContext::in_ou(&unit.id),
    )?;

    Ok(Json(unit).into_response())
}

async fn update_ou(
    State(state): State<Arc<AppState>>,
    ctx: Option<Extension<RequestContext>>,
    Path(id): Path<String>,
    Json(payload): Json<OrganizationUnitPayload>,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;
    let existing = state
        .ou_resolver
        .get(&id)
        .ok_or_else(|| AppError(Error::NotFound(format!("organization unit '{id}'"))))?;

    authorize(
        &state,
        &ctx,
        AdminAction::new(ActionVerb::Update, ResourceType::OrganizationUnit),
        &ActionContext::in_ou(&existing.id),
    )?;

    let unit = OrganizationUnit {
        id: existing.id,
        handle: payload.handle,
        name: payload.name,
        // Reparenting is a separate concern; the parent is immutable here
        parent_id: existing.parent_id,
    };
    state.ou_resolver.insert(unit.clone());
    Ok(Json(unit).into_response())
}

async fn delete_ou(
    State(state): State<Arc<AppState>>,
    ctx: Option<Extension<RequestContext>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;
    if state.ou_resolver.get(&id).is_none() {
        return Err(AppError(Error::NotFound(format!(
            "organization unit '{id}'"
        ))));
    }

    authorize(
        &state,
        &ctx,
        AdminAction::new(ActionVerb::Delete, ResourceType::OrganizationUnit),
        &ActionContext::in_ou(&id),
    )?;

    state.ou_resolver.remove(&id);
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_ous(
    State(state): State<Arc<AppState>>,
    ctx: Option<Extension<RequestContext>>,
) -> Result<Response, AppError> {
    let ctx = require_context(ctx)?;
    let action = AdminAction::new(ActionVerb::List, ResourceType::OrganizationUnit);

    authorize(&state, &ctx, action, &ActionContext::unscoped())?;

    let filter = state
        .engine
        .accessible_resources(&ctx, action, ResourceType::OrganizationUnit)
        .map_err(AppError)?;

    let units: Vec<OrganizationUnit> = match filter {
        ResourceFilter::All => state.ou_resolver.all(),
        ResourceFilter::Ids(ids) => ids
            .iter()
            .filter_map(|id| state.ou_resolver.get(id))
            .collect(),
    };

    Ok(Json(ListResponse {
        count: units.len(),
        resources: units,
    })
    .into_response())
}

/// Admin route table
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(read_user).put(update_user).delete(delete_user),
        )
        .route(
            "/user-schemas",
            get(list_user_schemas).post(create_user_schema),
        )
        .route(
            "/user-schemas/:id",
            get(read_user_schema)
                .put(update_user_schema)
                .delete(delete_user_schema),
        )
        .route("/themes", get(list_themes).post(create_theme))
        .route(
            "/themes/:id",
            get(read_theme).put(update_theme).delete(delete_theme),
        )
        .route("/organization-units", get(list_ous).post(create_ou))
        .route(
            "/organization-units/:id",
            get(read_ou).put(update_ou).delete(delete_ou),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str, ou: Option<&str>) -> Resource {
        Resource {
            id: id.to_string(),
            display_name: id.to_string(),
            ou_id: ou.map(String::from),
            body: serde_json::json!({}),
        }
    }

    #[test]
    fn test_apply_filter_all_with_caller_ou() {
        let rows = vec![
            resource("a", None),
            resource("b", Some("ou1")),
            resource("c", Some("ou2")),
        ];

        let visible = apply_filter(rows, &ResourceFilter::All, Some("ou1"));
        let ids: Vec<&str> = visible.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_apply_filter_all_without_caller_ou_sees_everything() {
        let rows = vec![resource("a", Some("ou1")), resource("b", Some("ou2"))];
        let visible = apply_filter(rows, &ResourceFilter::All, None);
        assert_eq!(visible.len(), 2);
    }

    #[test]
    fn test_apply_filter_ids() {
        let rows = vec![
            resource("a", Some("ou1")),
            resource("b", Some("ou12")),
            resource("c", Some("ou2")),
            resource("d", None),
        ];

        let filter = ResourceFilter::Ids(vec!["ou12".to_string(), "ou1".to_string()]);
        let visible = apply_filter(rows, &filter, Some("ou12"));
        let ids: Vec<&str> = visible.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
    }
}
