use std::path::Path;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use planboard_core::{DisplayName, Email, ScopeName, Slug, RESERVED_TEAMSPACE_SLUG};
use subtle::ConstantTimeEq;
use tokio::io::AsyncWriteExt;

use super::{
    auth::{hash_password, validate_password},
    core::{AppState, DeploymentMode, DEFAULT_CHANNEL_NAME, DEFAULT_CHANNEL_SLUG},
    errors::AuthFailure,
    metrics::record_setup_outcome,
    repository::{BootstrapRecord, Persistence, Repository, SetupBootstrap},
    session::{finish_session, prepare_session, IssuedSession},
    types::{AuthError, SetupRequest},
};

const DEFAULT_TEAMSPACE_NAME: &str = "Default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetupFailure {
    AlreadyCompleted,
    MissingConfiguration,
    InvalidSetupToken,
    InvalidRequest,
    UsersExist,
    /// The bootstrap transaction committed but the completion marker could not be written.
    MarkerWriteFailed,
    RateLimited,
    Internal,
}

impl SetupFailure {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyCompleted => "setup_already_completed",
            Self::MissingConfiguration => "setup_not_configured",
            Self::InvalidSetupToken => "invalid_setup_token",
            Self::InvalidRequest => "invalid_request",
            Self::UsersExist => "users_already_exist",
            Self::MarkerWriteFailed => "setup_marker_write_failed",
            Self::RateLimited => "rate_limited",
            Self::Internal => "internal_error",
        }
    }
}

impl From<AuthFailure> for SetupFailure {
    fn from(value: AuthFailure) -> Self {
        match value {
            AuthFailure::InvalidRequest => Self::InvalidRequest,
            AuthFailure::RateLimited => Self::RateLimited,
            _ => Self::Internal,
        }
    }
}

impl IntoResponse for SetupFailure {
    fn into_response(self) -> Response {
        record_setup_outcome(self.as_str());
        if self == Self::RateLimited {
            return AuthFailure::RateLimited.into_response();
        }
        let status = match self {
            Self::AlreadyCompleted | Self::UsersExist => StatusCode::CONFLICT,
            Self::MissingConfiguration => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidSetupToken => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::MarkerWriteFailed | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(AuthError {
                error: self.as_str(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SetupOutcome {
    pub(crate) record: BootstrapRecord,
    pub(crate) session: IssuedSession,
}

/// Validated setup input.
struct SetupPlan {
    email: Email,
    display_name: DisplayName,
    password_hash: String,
    teamspace_slug: Slug,
    teamspace_name: ScopeName,
}

/// An unreadable marker location counts as completed, so setup stays closed.
pub(crate) async fn is_setup_complete(state: &AppState) -> bool {
    let path = &state.runtime.setup_marker_path;
    match tokio::fs::try_exists(path).await {
        Ok(exists) => exists,
        Err(error) => {
            tracing::warn!(
                event = "setup.marker",
                outcome = "unreadable",
                path = %path.display(),
                error = %error
            );
            true
        }
    }
}

fn setup_token_matches(configured: &str, supplied: &str) -> bool {
    configured.as_bytes().ct_eq(supplied.as_bytes()).into()
}

fn plan_setup(mode: DeploymentMode, request: &SetupRequest) -> Result<SetupPlan, SetupFailure> {
    let email = Email::try_from(request.email.clone()).map_err(|_| SetupFailure::InvalidRequest)?;
    let display_name = DisplayName::try_from(request.display_name.clone())
        .map_err(|_| SetupFailure::InvalidRequest)?;
    validate_password(&request.password)?;

    let teamspace_slug = match mode {
        DeploymentMode::SingleTenant => match request.teamspace_slug.as_deref() {
            None | Some(RESERVED_TEAMSPACE_SLUG) => Slug::reserved_teamspace(),
            Some(_) => return Err(SetupFailure::InvalidRequest),
        },
        DeploymentMode::MultiTenant => {
            let slug = request
                .teamspace_slug
                .as_deref()
                .ok_or(SetupFailure::InvalidRequest)
                .and_then(|slug| Slug::try_from(slug).map_err(|_| SetupFailure::InvalidRequest))?;
            if slug.is_reserved_teamspace() {
                return Err(SetupFailure::InvalidRequest);
            }
            slug
        }
    };
    let teamspace_name = match (&request.teamspace_name, mode) {
        (Some(name), _) => name.clone(),
        (None, DeploymentMode::SingleTenant) => String::from(DEFAULT_TEAMSPACE_NAME),
        (None, DeploymentMode::MultiTenant) => teamspace_slug.as_str().to_owned(),
    };
    let teamspace_name =
        ScopeName::try_from(teamspace_name).map_err(|_| SetupFailure::InvalidRequest)?;

    let password_hash = hash_password(&request.password).map_err(|error| {
        tracing::error!(event = "setup.run", outcome = "hash_failed", error = %error);
        SetupFailure::Internal
    })?;
    Ok(SetupPlan {
        email,
        display_name,
        password_hash,
        teamspace_slug,
        teamspace_name,
    })
}

async fn write_marker(
    path: &Path,
    record: &BootstrapRecord,
    now_unix: i64,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec(&serde_json::json!({
        "completed_at_unix": now_unix,
        "user_id": record.user_id.to_string(),
        "teamspace_slug": record.teamspace.slug.as_str(),
    }))?;
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(&body).await?;
    file.sync_all().await
}

/// Creates the first user, teamspace and channel, then seals setup with the marker file.
pub(crate) async fn run_setup(
    state: &AppState,
    request: &SetupRequest,
    now_unix: i64,
) -> Result<SetupOutcome, SetupFailure> {
    if is_setup_complete(state).await {
        return Err(SetupFailure::AlreadyCompleted);
    }
    let Some(configured_token) = state.runtime.setup_token.as_deref() else {
        return Err(SetupFailure::MissingConfiguration);
    };
    if !setup_token_matches(configured_token, &request.setup_token) {
        tracing::warn!(event = "setup.run", outcome = "invalid_setup_token");
        return Err(SetupFailure::InvalidSetupToken);
    }
    let plan = plan_setup(state.runtime.deployment_mode, request)?;

    let channel_slug = Slug::try_from(DEFAULT_CHANNEL_SLUG).map_err(|_| SetupFailure::Internal)?;
    let channel_name = ScopeName::try_from(String::from(DEFAULT_CHANNEL_NAME))
        .map_err(|_| SetupFailure::Internal)?;
    let session = prepare_session(state, now_unix);
    let repository = Repository::ready(state).await?;
    let record = repository
        .bootstrap(&SetupBootstrap {
            email: &plan.email,
            display_name: &plan.display_name,
            password_hash: &plan.password_hash,
            teamspace_slug: &plan.teamspace_slug,
            teamspace_name: &plan.teamspace_name,
            channel_slug: &channel_slug,
            channel_name: &channel_name,
            session: &session,
            now_unix,
        })
        .await?;

    let marker_path = &state.runtime.setup_marker_path;
    if let Err(error) = write_marker(marker_path, &record, now_unix).await {
        tracing::error!(
            event = "setup.marker",
            outcome = "write_failed",
            path = %marker_path.display(),
            user_id = %record.user_id,
            error = %error,
            "setup committed without its completion marker; create the marker before serving traffic"
        );
        return Err(SetupFailure::MarkerWriteFailed);
    }

    record_setup_outcome("completed");
    tracing::info!(
        event = "setup.run",
        outcome = "completed",
        user_id = %record.user_id,
        teamspace = record.teamspace.slug.as_str(),
        mode = state.runtime.deployment_mode.as_str()
    );
    Ok(SetupOutcome {
        session: finish_session(state, record.user_id, &session),
        record,
    })
}
