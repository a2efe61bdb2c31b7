use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use planboard_core::{
    effective_channel_role, ChannelRole, HierarchyRole, ScopeName, Slug, TeamspaceRole, UserId,
};

use crate::server::{
    access::{require_channel_role, require_teamspace_role},
    auth::{authenticate, now_unix},
    core::{AppState, DeploymentMode},
    errors::AuthFailure,
    repository::{Persistence, Repository},
    types::{
        ChannelDetailResponse, ChannelListResponse, ChannelResponse, CreateChannelRequest,
        CreateTeamspaceRequest, MemberResponse, SetRoleRequest, TeamspaceDetailResponse,
        TeamspaceListResponse, TeamspaceResponse,
    },
};

fn parse_user_id(raw: String) -> Result<UserId, AuthFailure> {
    UserId::try_from(raw).map_err(|_| AuthFailure::NotFound)
}

pub(crate) async fn list_teamspaces(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TeamspaceListResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let memberships = Repository::ready(&state)
        .await?
        .list_teamspaces_for_user(auth.user_id)
        .await?;
    let single_tenant = state.runtime.deployment_mode == DeploymentMode::SingleTenant;
    let teamspaces = memberships
        .iter()
        .filter(|(teamspace, _)| !single_tenant || teamspace.slug.is_reserved_teamspace())
        .map(|(teamspace, role)| TeamspaceResponse::new(teamspace, *role))
        .collect();
    Ok(Json(TeamspaceListResponse { teamspaces }))
}

pub(crate) async fn create_teamspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateTeamspaceRequest>,
) -> Result<Json<TeamspaceResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    if state.runtime.deployment_mode != DeploymentMode::MultiTenant {
        return Err(AuthFailure::NotFound);
    }
    let slug = Slug::try_from(payload.slug).map_err(|_| AuthFailure::InvalidRequest)?;
    if slug.is_reserved_teamspace() {
        return Err(AuthFailure::InvalidRequest);
    }
    let name = ScopeName::try_from(payload.name).map_err(|_| AuthFailure::InvalidRequest)?;

    let Some(teamspace) = Repository::ready(&state)
        .await?
        .create_teamspace(&slug, &name, auth.user_id, now_unix())
        .await?
    else {
        return Err(AuthFailure::Conflict);
    };
    tracing::info!(
        event = "teamspace.create",
        outcome = "created",
        teamspace_id = %teamspace.id,
        user_id = %auth.user_id
    );
    Ok(Json(TeamspaceResponse::new(&teamspace, TeamspaceRole::Owner)))
}

pub(crate) async fn get_teamspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(teamspace_slug): Path<String>,
) -> Result<Json<TeamspaceDetailResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let access =
        require_teamspace_role(&state, auth.user_id, &teamspace_slug, TeamspaceRole::Viewer)
            .await?;
    let members = Repository::ready(&state)
        .await?
        .list_teamspace_members(access.teamspace.id)
        .await?;
    Ok(Json(TeamspaceDetailResponse {
        teamspace: TeamspaceResponse::new(&access.teamspace, access.role),
        members: members.iter().map(MemberResponse::from).collect(),
    }))
}

pub(crate) async fn delete_teamspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(teamspace_slug): Path<String>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let access =
        require_teamspace_role(&state, auth.user_id, &teamspace_slug, TeamspaceRole::Owner)
            .await?;
    if access.teamspace.slug.is_reserved_teamspace() {
        return Err(AuthFailure::Conflict);
    }
    Repository::ready(&state)
        .await?
        .delete_teamspace(access.teamspace.id)
        .await?;
    tracing::info!(
        event = "teamspace.delete",
        outcome = "deleted",
        teamspace_id = %access.teamspace.id,
        user_id = %auth.user_id
    );
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_channels(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(teamspace_slug): Path<String>,
) -> Result<Json<ChannelListResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let access =
        require_teamspace_role(&state, auth.user_id, &teamspace_slug, TeamspaceRole::Viewer)
            .await?;
    let repository = Repository::ready(&state).await?;
    let records = repository.list_channels(access.teamspace.id).await?;
    let mut channels = Vec::with_capacity(records.len());
    for channel in &records {
        let direct = repository.channel_role(channel.id, auth.user_id).await?;
        channels.push(ChannelResponse::new(
            channel,
            effective_channel_role(access.role, direct),
        ));
    }
    Ok(Json(ChannelListResponse { channels }))
}

pub(crate) async fn create_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(teamspace_slug): Path<String>,
    Json(payload): Json<CreateChannelRequest>,
) -> Result<Json<ChannelResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let access =
        require_teamspace_role(&state, auth.user_id, &teamspace_slug, TeamspaceRole::Editor)
            .await?;
    let slug = Slug::try_from(payload.slug).map_err(|_| AuthFailure::InvalidRequest)?;
    let name = ScopeName::try_from(payload.name).map_err(|_| AuthFailure::InvalidRequest)?;

    let Some(channel) = Repository::ready(&state)
        .await?
        .create_channel(access.teamspace.id, &slug, &name, auth.user_id, now_unix())
        .await?
    else {
        return Err(AuthFailure::Conflict);
    };
    tracing::info!(
        event = "channel.create",
        outcome = "created",
        channel_id = %channel.id,
        teamspace_id = %access.teamspace.id,
        user_id = %auth.user_id
    );
    Ok(Json(ChannelResponse::new(&channel, ChannelRole::Owner)))
}

pub(crate) async fn get_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((teamspace_slug, channel_slug)): Path<(String, String)>,
) -> Result<Json<ChannelDetailResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let access = require_channel_role(
        &state,
        auth.user_id,
        &teamspace_slug,
        &channel_slug,
        ChannelRole::Viewer,
    )
    .await?;
    let members = Repository::ready(&state)
        .await?
        .list_channel_members(access.channel.id)
        .await?;
    Ok(Json(ChannelDetailResponse {
        channel: ChannelResponse::new(&access.channel, access.channel_role()),
        teamspace_role: access.role.teamspace_role().as_str(),
        members: members.iter().map(MemberResponse::from).collect(),
    }))
}

/// Admins manage members; granting owner or touching an existing owner takes an owner.
pub(crate) async fn set_teamspace_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((teamspace_slug, user_id)): Path<(String, String)>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let access =
        require_teamspace_role(&state, auth.user_id, &teamspace_slug, TeamspaceRole::Admin)
            .await?;
    let role =
        TeamspaceRole::try_from(payload.role.as_str()).map_err(|_| AuthFailure::InvalidRequest)?;
    let target = parse_user_id(user_id)?;

    Repository::ready(&state)
        .await?
        .set_teamspace_role(access.teamspace.id, target, role, access.role)
        .await
        .inspect_err(|failure| {
            tracing::info!(
                event = "teamspace.member.set",
                outcome = "rejected",
                reason = %failure,
                teamspace_id = %access.teamspace.id,
                user_id = %auth.user_id
            );
        })?;
    tracing::info!(
        event = "teamspace.member.set",
        outcome = "updated",
        teamspace_id = %access.teamspace.id,
        target_user_id = %target,
        role = role.as_str(),
        user_id = %auth.user_id
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Members may always leave; removing someone else follows the same rules as changing their role.
pub(crate) async fn remove_teamspace_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((teamspace_slug, user_id)): Path<(String, String)>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let target = parse_user_id(user_id)?;
    let required = if target == auth.user_id {
        TeamspaceRole::Viewer
    } else {
        TeamspaceRole::Admin
    };
    let access = require_teamspace_role(&state, auth.user_id, &teamspace_slug, required).await?;

    if !Repository::ready(&state)
        .await?
        .remove_teamspace_member(access.teamspace.id, target, access.role)
        .await?
    {
        return Err(AuthFailure::NotFound);
    }
    tracing::info!(
        event = "teamspace.member.remove",
        outcome = "removed",
        teamspace_id = %access.teamspace.id,
        target_user_id = %target,
        user_id = %auth.user_id
    );
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn set_channel_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((teamspace_slug, channel_slug, user_id)): Path<(String, String, String)>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let access = require_channel_role(
        &state,
        auth.user_id,
        &teamspace_slug,
        &channel_slug,
        ChannelRole::Owner,
    )
    .await?;
    let role =
        ChannelRole::try_from(payload.role.as_str()).map_err(|_| AuthFailure::InvalidRequest)?;
    let target = parse_user_id(user_id)?;

    let repository = Repository::ready(&state).await?;
    if repository
        .teamspace_role(access.teamspace.id, target)
        .await?
        .is_none()
    {
        return Err(AuthFailure::NotFound);
    }
    repository
        .set_channel_role(access.channel.id, target, role)
        .await?;
    tracing::info!(
        event = "channel.member.set",
        outcome = "updated",
        channel_id = %access.channel.id,
        target_user_id = %target,
        role = role.as_str(),
        user_id = %auth.user_id
    );
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn remove_channel_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((teamspace_slug, channel_slug, user_id)): Path<(String, String, String)>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let target = parse_user_id(user_id)?;
    let required = if target == auth.user_id {
        ChannelRole::Viewer
    } else {
        ChannelRole::Owner
    };
    let access = require_channel_role(
        &state,
        auth.user_id,
        &teamspace_slug,
        &channel_slug,
        required,
    )
    .await?;

    if !Repository::ready(&state)
        .await?
        .remove_channel_member(access.channel.id, target)
        .await?
    {
        return Err(AuthFailure::NotFound);
    }
    tracing::info!(
        event = "channel.member.remove",
        outcome = "removed",
        channel_id = %access.channel.id,
        target_user_id = %target,
        user_id = %auth.user_id
    );
    Ok(StatusCode::NO_CONTENT)
}
