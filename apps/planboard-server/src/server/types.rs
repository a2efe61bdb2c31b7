use axum::{
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use planboard_core::HierarchyRole;
use serde::{Deserialize, Serialize};

use super::{
    core::{AuthContext, METRICS_TEXT_CONTENT_TYPE},
    metrics::render_metrics,
    repository::{ChannelRecord, InvitationRecord, MemberRecord, TeamspaceRecord},
};

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(crate) async fn metrics() -> Response {
    (
        [(CONTENT_TYPE, METRICS_TEXT_CONTENT_TYPE)],
        render_metrics(),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthError {
    pub(crate) error: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RegisterRequest {
    pub(crate) email: String,
    pub(crate) display_name: String,
    pub(crate) password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct LoginRequest {
    pub(crate) email: String,
    pub(crate) password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ChangePasswordRequest {
    pub(crate) current_password: String,
    pub(crate) new_password: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserResponse {
    pub(crate) user_id: String,
    pub(crate) email: String,
    pub(crate) display_name: String,
}

impl From<&AuthContext> for UserResponse {
    fn from(context: &AuthContext) -> Self {
        Self {
            user_id: context.user_id.to_string(),
            email: context.email.as_str().to_owned(),
            display_name: context.display_name.as_str().to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) user: UserResponse,
    pub(crate) expires_at_unix: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateTeamspaceRequest {
    pub(crate) slug: String,
    pub(crate) name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct TeamspaceResponse {
    pub(crate) teamspace_id: String,
    pub(crate) slug: String,
    pub(crate) name: String,
    pub(crate) role: &'static str,
}

impl TeamspaceResponse {
    pub(crate) fn new(record: &TeamspaceRecord, role: impl HierarchyRole) -> Self {
        Self {
            teamspace_id: record.id.to_string(),
            slug: record.slug.as_str().to_owned(),
            name: record.name.as_str().to_owned(),
            role: role.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TeamspaceListResponse {
    pub(crate) teamspaces: Vec<TeamspaceResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MemberResponse {
    pub(crate) user_id: String,
    pub(crate) email: String,
    pub(crate) display_name: String,
    pub(crate) role: &'static str,
}

impl<R: HierarchyRole> From<&MemberRecord<R>> for MemberResponse {
    fn from(member: &MemberRecord<R>) -> Self {
        Self {
            user_id: member.user_id.to_string(),
            email: member.email.as_str().to_owned(),
            display_name: member.display_name.as_str().to_owned(),
            role: member.role.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TeamspaceDetailResponse {
    pub(crate) teamspace: TeamspaceResponse,
    pub(crate) members: Vec<MemberResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateChannelRequest {
    pub(crate) slug: String,
    pub(crate) name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChannelResponse {
    pub(crate) channel_id: String,
    pub(crate) slug: String,
    pub(crate) name: String,
    /// Effective role of the caller, direct grant and teamspace inheritance combined.
    pub(crate) role: &'static str,
}

impl ChannelResponse {
    pub(crate) fn new(record: &ChannelRecord, role: impl HierarchyRole) -> Self {
        Self {
            channel_id: record.id.to_string(),
            slug: record.slug.as_str().to_owned(),
            name: record.name.as_str().to_owned(),
            role: role.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChannelListResponse {
    pub(crate) channels: Vec<ChannelResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChannelDetailResponse {
    pub(crate) channel: ChannelResponse,
    pub(crate) teamspace_role: &'static str,
    /// Direct channel grants only.
    pub(crate) members: Vec<MemberResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SetRoleRequest {
    pub(crate) role: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateInvitationRequest {
    pub(crate) email: String,
    pub(crate) role: String,
    /// Channel slug for a channel invitation; absent for a teamspace invitation.
    pub(crate) channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct InvitationResponse {
    pub(crate) invitation_id: String,
    pub(crate) email: String,
    pub(crate) scope: &'static str,
    pub(crate) role: &'static str,
    pub(crate) channel_id: Option<String>,
    pub(crate) expires_at_unix: i64,
    pub(crate) attempts: u32,
    pub(crate) max_attempts: u32,
}

impl From<&InvitationRecord> for InvitationResponse {
    fn from(record: &InvitationRecord) -> Self {
        Self {
            invitation_id: record.id.to_string(),
            email: record.email.as_str().to_owned(),
            scope: record.role.kind().as_str(),
            role: record.role.as_str(),
            channel_id: record.channel_id.map(|id| id.to_string()),
            expires_at_unix: record.expires_at_unix,
            attempts: record.attempts,
            max_attempts: record.max_attempts,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreatedInvitationResponse {
    pub(crate) invitation: InvitationResponse,
    pub(crate) token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct InvitationListResponse {
    pub(crate) invitations: Vec<InvitationResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct InvitationPreviewResponse {
    pub(crate) email: String,
    pub(crate) scope: &'static str,
    pub(crate) role: &'static str,
    pub(crate) teamspace_slug: String,
    pub(crate) teamspace_name: String,
    pub(crate) channel_slug: Option<String>,
    pub(crate) channel_name: Option<String>,
    pub(crate) expires_at_unix: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AcceptInvitationRequest {
    /// Required only when no session accompanies the request.
    pub(crate) display_name: Option<String>,
    pub(crate) password: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AcceptInvitationResponse {
    pub(crate) user_id: String,
    pub(crate) teamspace_id: String,
    pub(crate) channel_id: Option<String>,
    pub(crate) created_user: bool,
    pub(crate) expires_at_unix: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SetupRequest {
    pub(crate) setup_token: String,
    pub(crate) email: String,
    pub(crate) display_name: String,
    pub(crate) password: String,
    pub(crate) teamspace_slug: Option<String>,
    pub(crate) teamspace_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SetupResponse {
    pub(crate) user_id: String,
    pub(crate) teamspace_slug: String,
    pub(crate) channel_slug: String,
    pub(crate) expires_at_unix: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SetupStatusResponse {
    pub(crate) completed: bool,
    pub(crate) mode: &'static str,
}
