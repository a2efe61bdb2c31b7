use planboard_core::{
    effective_channel_role, ChannelRole, EffectiveRole, HierarchyRole, Slug, TeamspaceRole,
    UserId,
};

use super::{
    core::{AppState, DeploymentMode},
    errors::AuthFailure,
    repository::{ChannelRecord, Persistence, Repository, TeamspaceRecord},
};

#[derive(Debug, Clone)]
pub(crate) struct TeamspaceAccess {
    pub(crate) teamspace: TeamspaceRecord,
    pub(crate) role: TeamspaceRole,
}

#[derive(Debug, Clone)]
pub(crate) struct ChannelAccess {
    pub(crate) teamspace: TeamspaceRecord,
    pub(crate) channel: ChannelRecord,
    pub(crate) role: EffectiveRole,
}

impl ChannelAccess {
    pub(crate) fn channel_role(&self) -> ChannelRole {
        self.role
            .channel_role()
            .unwrap_or_else(|| effective_channel_role(self.role.teamspace_role(), None))
    }
}

/// Parses a teamspace slug from a path. Single-tenant deployments only expose the reserved slug.
fn teamspace_slug(state: &AppState, raw: &str) -> Option<Slug> {
    let slug = Slug::try_from(raw).ok()?;
    match state.runtime.deployment_mode {
        DeploymentMode::SingleTenant if !slug.is_reserved_teamspace() => None,
        DeploymentMode::SingleTenant | DeploymentMode::MultiTenant => Some(slug),
    }
}

pub(crate) async fn resolve_teamspace_access(
    state: &AppState,
    user_id: UserId,
    teamspace_slug_raw: &str,
) -> Result<Option<TeamspaceAccess>, AuthFailure> {
    let Some(slug) = teamspace_slug(state, teamspace_slug_raw) else {
        return Ok(None);
    };
    let repository = Repository::ready(state).await?;
    let Some(teamspace) = repository.find_teamspace_by_slug(&slug).await? else {
        return Ok(None);
    };
    let Some(role) = repository.teamspace_role(teamspace.id, user_id).await? else {
        return Ok(None);
    };
    Ok(Some(TeamspaceAccess { teamspace, role }))
}

/// Teamspace membership gates every channel; a direct channel grant alone resolves to nothing.
pub(crate) async fn resolve_channel_access(
    state: &AppState,
    user_id: UserId,
    teamspace_slug_raw: &str,
    channel_slug_raw: &str,
) -> Result<Option<ChannelAccess>, AuthFailure> {
    let Some(TeamspaceAccess { teamspace, role }) =
        resolve_teamspace_access(state, user_id, teamspace_slug_raw).await?
    else {
        return Ok(None);
    };
    let Ok(channel_slug) = Slug::try_from(channel_slug_raw) else {
        return Ok(None);
    };
    let repository = Repository::ready(state).await?;
    let Some(channel) = repository
        .find_channel_by_slug(teamspace.id, &channel_slug)
        .await?
    else {
        return Ok(None);
    };
    let direct = repository.channel_role(channel.id, user_id).await?;
    Ok(Some(ChannelAccess {
        teamspace,
        channel,
        role: EffectiveRole::Channel {
            teamspace: role,
            channel: effective_channel_role(role, direct),
        },
    }))
}

pub(crate) async fn resolve_effective_role(
    state: &AppState,
    user_id: UserId,
    teamspace_slug_raw: &str,
    channel_slug_raw: Option<&str>,
) -> Result<Option<EffectiveRole>, AuthFailure> {
    match channel_slug_raw {
        Some(channel) => Ok(
            resolve_channel_access(state, user_id, teamspace_slug_raw, channel)
                .await?
                .map(|access| access.role),
        ),
        None => Ok(resolve_teamspace_access(state, user_id, teamspace_slug_raw)
            .await?
            .map(|access| EffectiveRole::Teamspace(access.role))),
    }
}

pub(crate) async fn require_teamspace_role(
    state: &AppState,
    user_id: UserId,
    teamspace_slug_raw: &str,
    required: TeamspaceRole,
) -> Result<TeamspaceAccess, AuthFailure> {
    match resolve_teamspace_access(state, user_id, teamspace_slug_raw).await? {
        Some(access) if access.role.satisfies(required) => Ok(access),
        resolved => {
            tracing::info!(
                event = "access.teamspace",
                outcome = "denied",
                user_id = %user_id,
                teamspace = teamspace_slug_raw,
                required = required.as_str(),
                held = resolved.map_or("none", |access| access.role.as_str())
            );
            Err(AuthFailure::NotFound)
        }
    }
}

pub(crate) async fn require_channel_role(
    state: &AppState,
    user_id: UserId,
    teamspace_slug_raw: &str,
    channel_slug_raw: &str,
    required: ChannelRole,
) -> Result<ChannelAccess, AuthFailure> {
    match resolve_channel_access(state, user_id, teamspace_slug_raw, channel_slug_raw).await? {
        Some(access) if access.channel_role().satisfies(required) => Ok(access),
        resolved => {
            tracing::info!(
                event = "access.channel",
                outcome = "denied",
                user_id = %user_id,
                teamspace = teamspace_slug_raw,
                channel = channel_slug_raw,
                required = required.as_str(),
                held = resolved.map_or("none", |access| access.channel_role().as_str())
            );
            Err(AuthFailure::NotFound)
        }
    }
}
