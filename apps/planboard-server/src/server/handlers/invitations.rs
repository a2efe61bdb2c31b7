use std::net::SocketAddr;

use axum::{
    extract::{connect_info::ConnectInfo, Extension, Path, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use planboard_core::{
    effective_channel_role, ChannelRole, Email, HierarchyRole, InvitationId, ScopedRole,
    TeamspaceRole,
};

use crate::server::{
    access::{require_channel_role, require_teamspace_role},
    auth::{
        authenticate, enforce_auth_route_rate_limit, extract_client_ip, now_unix,
        optional_authenticate,
    },
    core::AppState,
    errors::AuthFailure,
    invitations::{
        accept_invitation as accept, create_invitation as create, list_pending_invitations,
        revoke_invitation as revoke, validate_invitation, AcceptCredentials,
    },
    repository::{Persistence, Repository},
    types::{
        AcceptInvitationRequest, AcceptInvitationResponse, CreateInvitationRequest,
        CreatedInvitationResponse, InvitationListResponse, InvitationPreviewResponse,
        InvitationResponse,
    },
};

/// Teamspace invitations need an admin (an owner to hand out owner); channel invitations
/// need an effective channel owner.
pub(crate) async fn create_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(teamspace_slug): Path<String>,
    Json(payload): Json<CreateInvitationRequest>,
) -> Result<Json<CreatedInvitationResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let now = now_unix();

    let created = if let Some(channel_slug) = payload.channel.as_deref() {
        let access = require_channel_role(
            &state,
            auth.user_id,
            &teamspace_slug,
            channel_slug,
            ChannelRole::Owner,
        )
        .await?;
        let role = ChannelRole::try_from(payload.role.as_str())
            .map_err(|_| AuthFailure::InvalidRequest)?;
        let email = Email::try_from(payload.email).map_err(|_| AuthFailure::InvalidRequest)?;
        create(
            &state,
            auth.user_id,
            &access.teamspace,
            Some(&access.channel),
            email,
            ScopedRole::Channel(role),
            now,
        )
        .await?
    } else {
        let access =
            require_teamspace_role(&state, auth.user_id, &teamspace_slug, TeamspaceRole::Admin)
                .await?;
        let role = TeamspaceRole::try_from(payload.role.as_str())
            .map_err(|_| AuthFailure::InvalidRequest)?;
        if role == TeamspaceRole::Owner && access.role != TeamspaceRole::Owner {
            return Err(AuthFailure::NotFound);
        }
        let email = Email::try_from(payload.email).map_err(|_| AuthFailure::InvalidRequest)?;
        create(
            &state,
            auth.user_id,
            &access.teamspace,
            None,
            email,
            ScopedRole::Teamspace(role),
            now,
        )
        .await?
    };

    Ok(Json(CreatedInvitationResponse {
        invitation: InvitationResponse::from(&created.invitation),
        token: created.token,
    }))
}

pub(crate) async fn list_invitations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(teamspace_slug): Path<String>,
) -> Result<Json<InvitationListResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let access =
        require_teamspace_role(&state, auth.user_id, &teamspace_slug, TeamspaceRole::Admin)
            .await?;
    let invitations = list_pending_invitations(&state, &access.teamspace, now_unix()).await?;
    Ok(Json(InvitationListResponse {
        invitations: invitations.iter().map(InvitationResponse::from).collect(),
    }))
}

pub(crate) async fn revoke_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((teamspace_slug, invitation_id)): Path<(String, String)>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let access =
        require_teamspace_role(&state, auth.user_id, &teamspace_slug, TeamspaceRole::Viewer)
            .await?;
    let invitation_id =
        InvitationId::try_from(invitation_id).map_err(|_| AuthFailure::NotFound)?;
    let repository = Repository::ready(&state).await?;
    let invitation = repository
        .find_invitation(invitation_id)
        .await?
        .filter(|invitation| invitation.teamspace_id == access.teamspace.id)
        .ok_or(AuthFailure::NotFound)?;

    let allowed = if access.role.satisfies(TeamspaceRole::Admin) {
        true
    } else if let Some(channel_id) = invitation.channel_id {
        let direct = repository.channel_role(channel_id, auth.user_id).await?;
        effective_channel_role(access.role, direct).satisfies(ChannelRole::Owner)
    } else {
        false
    };
    if !allowed {
        return Err(AuthFailure::NotFound);
    }

    revoke(&state, invitation.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn preview_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    Path(token): Path<String>,
) -> Result<Json<InvitationPreviewResponse>, Response> {
    let client_ip = extract_client_ip(
        &state,
        &headers,
        connect_info.as_ref().map(|value| value.0 .0.ip()),
    );
    enforce_auth_route_rate_limit(&state, client_ip, "invitation")
        .await
        .map_err(IntoResponse::into_response)?;

    let details = validate_invitation(&state, &token, now_unix())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(InvitationPreviewResponse {
        email: details.invitation.email.as_str().to_owned(),
        scope: details.invitation.role.kind().as_str(),
        role: details.invitation.role.as_str(),
        teamspace_slug: details.teamspace.slug.as_str().to_owned(),
        teamspace_name: details.teamspace.name.as_str().to_owned(),
        channel_slug: details
            .channel
            .as_ref()
            .map(|channel| channel.slug.as_str().to_owned()),
        channel_name: details
            .channel
            .as_ref()
            .map(|channel| channel.name.as_str().to_owned()),
        expires_at_unix: details.invitation.expires_at_unix,
    }))
}

/// With a session the invitation joins that account; without one a new account is created.
pub(crate) async fn accept_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    Path(token): Path<String>,
    Json(payload): Json<AcceptInvitationRequest>,
) -> Result<Response, Response> {
    let client_ip = extract_client_ip(
        &state,
        &headers,
        connect_info.as_ref().map(|value| value.0 .0.ip()),
    );
    enforce_auth_route_rate_limit(&state, client_ip, "accept")
        .await
        .map_err(IntoResponse::into_response)?;
    let context = optional_authenticate(&state, &headers)
        .await
        .map_err(IntoResponse::into_response)?;

    let credentials = match &context {
        Some(context) => AcceptCredentials::Session(context),
        None => AcceptCredentials::NewAccount {
            display_name: payload.display_name.as_deref().unwrap_or_default(),
            password: payload.password.as_deref().unwrap_or_default(),
        },
    };
    let outcome = accept(&state, &token, credentials, now_unix())
        .await
        .map_err(IntoResponse::into_response)?;

    Ok((
        [(SET_COOKIE, outcome.session.cookie.clone())],
        Json(AcceptInvitationResponse {
            user_id: outcome.accepted.user_id.to_string(),
            teamspace_id: outcome.accepted.teamspace_id.to_string(),
            channel_id: outcome.accepted.channel_id.map(|id| id.to_string()),
            created_user: outcome.accepted.created_user,
            expires_at_unix: outcome.session.expires_at_unix,
        }),
    )
        .into_response())
}
