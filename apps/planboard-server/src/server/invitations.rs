use argon2::password_hash::rand_core::{OsRng, RngCore};
use axum::response::{IntoResponse, Response};
use planboard_core::{
    is_invitation_token_format, ChannelId, DisplayName, Email, InvitationId, InvitationState,
    InvitationStatus, ScopedRole, UserId, INVITATION_TOKEN_BYTES, INVITATION_TOKEN_CHARS,
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::{
    auth::{hash_password, validate_password},
    core::{AppState, AuthContext},
    errors::AuthFailure,
    metrics::record_invitation_rejection,
    repository::{
        AcceptedInvitation, Acceptor, ChannelRecord, InvitationAcceptance, InvitationRecord,
        Persistence, Repository, TeamspaceRecord,
    },
    session::{finish_session, prepare_session, IssuedSession},
};

/// Why an invitation was refused. Callers only ever see one uniform error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InvitationRejection {
    MalformedToken,
    UnknownToken,
    Expired,
    AttemptsExceeded,
    AlreadyAccepted,
    Revoked,
    AccountMismatch,
    InvalidCredentials,
}

impl InvitationRejection {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::UnknownToken => "unknown_token",
            Self::Expired => "expired",
            Self::AttemptsExceeded => "attempts_exceeded",
            Self::AlreadyAccepted => "already_accepted",
            Self::Revoked => "revoked",
            Self::AccountMismatch => "account_mismatch",
            Self::InvalidCredentials => "invalid_credentials",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InvitationError {
    Rejected(InvitationRejection),
    /// The invitation email belongs to an existing account and the caller has no session.
    RequiresAuthentication,
    Internal,
}

impl InvitationError {
    /// Whether this outcome is charged against the invitation's attempt budget.
    pub(crate) fn counts_as_attempt(self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl From<AuthFailure> for InvitationError {
    fn from(_: AuthFailure) -> Self {
        Self::Internal
    }
}

impl IntoResponse for InvitationError {
    fn into_response(self) -> Response {
        match self {
            Self::Rejected(reason) => {
                record_invitation_rejection(reason.as_str());
                tracing::warn!(
                    event = "invitation.reject",
                    outcome = "rejected",
                    reason = reason.as_str()
                );
                AuthFailure::InvalidInvitation.into_response()
            }
            Self::RequiresAuthentication => {
                tracing::info!(event = "invitation.reject", outcome = "login_required");
                AuthFailure::Unauthorized.into_response()
            }
            Self::Internal => AuthFailure::Internal.into_response(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InvitationDetails {
    pub(crate) invitation: InvitationRecord,
    pub(crate) teamspace: TeamspaceRecord,
    pub(crate) channel: Option<ChannelRecord>,
}

#[derive(Debug, Clone)]
pub(crate) struct CreatedInvitation {
    pub(crate) invitation: InvitationRecord,
    /// Raw token. Only the hash is stored, so this is the only time it is available.
    pub(crate) token: String,
}

/// Credentials presented when accepting an invitation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AcceptCredentials<'a> {
    Session(&'a AuthContext),
    NewAccount {
        display_name: &'a str,
        password: &'a str,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct AcceptOutcome {
    pub(crate) accepted: AcceptedInvitation,
    pub(crate) session: IssuedSession,
}

pub(crate) fn generate_invitation_token() -> String {
    let mut bytes = [0_u8; INVITATION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub(crate) fn hash_invitation_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time equality over the raw bytes of two 64-character tokens.
pub(crate) fn compare_tokens_constant_time(left: &str, right: &str) -> bool {
    if left.len() != INVITATION_TOKEN_CHARS || right.len() != INVITATION_TOKEN_CHARS {
        return false;
    }
    left.as_bytes().ct_eq(right.as_bytes()).into()
}

pub(crate) fn screen_invitation(
    record: &InvitationRecord,
    now_unix: i64,
) -> Result<(), InvitationRejection> {
    match record.state(now_unix) {
        InvitationState::Pending => Ok(()),
        InvitationState::Accepted => Err(InvitationRejection::AlreadyAccepted),
        InvitationState::Revoked => Err(InvitationRejection::Revoked),
        InvitationState::Expired => Err(InvitationRejection::Expired),
        InvitationState::Locked => Err(InvitationRejection::AttemptsExceeded),
    }
}

/// Checks run inside the accepting transaction, against the locked invitation row.
pub(crate) fn check_acceptance(
    record: &InvitationRecord,
    acceptor: Acceptor<'_>,
    existing_account: Option<UserId>,
    now_unix: i64,
) -> Result<(), InvitationError> {
    screen_invitation(record, now_unix).map_err(InvitationError::Rejected)?;
    match acceptor {
        Acceptor::Existing { email, .. } if *email != record.email => Err(
            InvitationError::Rejected(InvitationRejection::AccountMismatch),
        ),
        Acceptor::New { .. } if existing_account.is_some() => {
            Err(InvitationError::RequiresAuthentication)
        }
        Acceptor::Existing { .. } | Acceptor::New { .. } => Ok(()),
    }
}

pub(crate) async fn create_invitation(
    state: &AppState,
    creator: UserId,
    teamspace: &TeamspaceRecord,
    channel: Option<&ChannelRecord>,
    email: Email,
    role: ScopedRole,
    now_unix: i64,
) -> Result<CreatedInvitation, AuthFailure> {
    let channel_id: Option<ChannelId> = channel.map(|channel| channel.id);
    if matches!(role, ScopedRole::Channel(_)) != channel_id.is_some() {
        return Err(AuthFailure::InvalidRequest);
    }
    if let Some(channel) = channel {
        if channel.teamspace_id != teamspace.id {
            return Err(AuthFailure::NotFound);
        }
    }

    let token = generate_invitation_token();
    let invitation = InvitationRecord {
        id: InvitationId::new(),
        token_hash: hash_invitation_token(&token),
        teamspace_id: teamspace.id,
        channel_id,
        email,
        role,
        status: InvitationStatus::Pending,
        expires_at_unix: now_unix.saturating_add(state.runtime.invitation_ttl_secs),
        attempts: 0,
        max_attempts: state.runtime.invitation_max_attempts,
        created_by: creator,
        accepted_by: None,
        created_at_unix: now_unix,
    };
    Repository::ready(state)
        .await?
        .insert_invitation(&invitation)
        .await?;

    tracing::info!(
        event = "invitation.create",
        outcome = "created",
        invitation_id = %invitation.id,
        teamspace_id = %teamspace.id,
        scope = role.kind().as_str(),
        role = role.as_str()
    );
    Ok(CreatedInvitation { invitation, token })
}

/// Looks the token up and screens it. A located invitation that fails screening
/// has its attempt counter bumped before the rejection is returned.
pub(crate) async fn validate_invitation(
    state: &AppState,
    token: &str,
    now_unix: i64,
) -> Result<InvitationDetails, InvitationError> {
    if !is_invitation_token_format(token) {
        return Err(InvitationError::Rejected(
            InvitationRejection::MalformedToken,
        ));
    }
    let token_hash = hash_invitation_token(token);
    let repository = Repository::ready(state).await?;
    let invitation = repository
        .find_invitation_by_token_hash(&token_hash)
        .await?
        .filter(|record| compare_tokens_constant_time(&record.token_hash, &token_hash))
        .ok_or(InvitationError::Rejected(InvitationRejection::UnknownToken))?;

    if let Err(reason) = screen_invitation(&invitation, now_unix) {
        repository.record_invitation_failure(invitation.id).await?;
        return Err(InvitationError::Rejected(reason));
    }

    let teamspace = repository
        .find_teamspace(invitation.teamspace_id)
        .await?
        .ok_or(InvitationError::Internal)?;
    let channel = match invitation.channel_id {
        Some(channel_id) => Some(
            repository
                .find_channel(channel_id)
                .await?
                .ok_or(InvitationError::Internal)?,
        ),
        None => None,
    };
    Ok(InvitationDetails {
        invitation,
        teamspace,
        channel,
    })
}

pub(crate) async fn revoke_invitation(
    state: &AppState,
    invitation_id: InvitationId,
) -> Result<(), AuthFailure> {
    let revoked = Repository::ready(state)
        .await?
        .revoke_invitation(invitation_id)
        .await?;
    if !revoked {
        return Err(AuthFailure::Conflict);
    }
    tracing::info!(
        event = "invitation.revoke",
        outcome = "revoked",
        invitation_id = %invitation_id
    );
    Ok(())
}

pub(crate) async fn list_pending_invitations(
    state: &AppState,
    teamspace: &TeamspaceRecord,
    now_unix: i64,
) -> Result<Vec<InvitationRecord>, AuthFailure> {
    Repository::ready(state)
        .await?
        .list_pending_invitations(teamspace.id, now_unix)
        .await
}

pub(crate) async fn accept_invitation(
    state: &AppState,
    token: &str,
    credentials: AcceptCredentials<'_>,
    now_unix: i64,
) -> Result<AcceptOutcome, InvitationError> {
    let details = validate_invitation(state, token, now_unix).await?;
    let repository = Repository::ready(state).await?;

    let new_account = match credentials {
        AcceptCredentials::Session(_) => None,
        AcceptCredentials::NewAccount {
            display_name,
            password,
        } => {
            if repository
                .find_user_by_email(&details.invitation.email)
                .await?
                .is_some()
            {
                return Err(InvitationError::RequiresAuthentication);
            }
            let display_name = DisplayName::try_from(display_name.to_owned()).ok();
            let (Some(display_name), Ok(())) = (display_name, validate_password(password)) else {
                repository
                    .record_invitation_failure(details.invitation.id)
                    .await?;
                return Err(InvitationError::Rejected(
                    InvitationRejection::InvalidCredentials,
                ));
            };
            let password_hash = hash_password(password).map_err(|error| {
                tracing::error!(
                    event = "invitation.accept",
                    outcome = "hash_failed",
                    error = %error
                );
                InvitationError::Internal
            })?;
            Some((display_name, password_hash))
        }
    };

    let acceptor = match (&credentials, &new_account) {
        (AcceptCredentials::Session(context), _) => Acceptor::Existing {
            user_id: context.user_id,
            email: &context.email,
        },
        (AcceptCredentials::NewAccount { .. }, Some((display_name, password_hash))) => {
            Acceptor::New {
                display_name,
                password_hash,
            }
        }
        (AcceptCredentials::NewAccount { .. }, None) => return Err(InvitationError::Internal),
    };

    let token_hash = hash_invitation_token(token);
    let session = prepare_session(state, now_unix);
    let accepted = repository
        .accept_invitation(&InvitationAcceptance {
            token_hash: &token_hash,
            acceptor,
            session: &session,
            now_unix,
        })
        .await?;

    tracing::info!(
        event = "invitation.accept",
        outcome = "accepted",
        invitation_id = %accepted.invitation_id,
        user_id = %accepted.user_id,
        created_user = accepted.created_user
    );
    Ok(AcceptOutcome {
        session: finish_session(state, accepted.user_id, &session),
        accepted,
    })
}

#[cfg(test)]
mod tests {
    use planboard_core::{
        ChannelRole, DisplayName, Email, ScopeName, ScopedRole, Slug, TeamspaceRole, UserId,
    };

    use super::{
        accept_invitation, compare_tokens_constant_time, create_invitation,
        generate_invitation_token, validate_invitation, AcceptCredentials, InvitationError,
        InvitationRejection,
    };
    use crate::server::{
        auth::hash_password,
        core::{AppConfig, AppState, AuthContext},
        repository::{Persistence, Repository, TeamspaceRecord},
    };

    const NOW: i64 = 10_000;

    fn email(value: &str) -> Email {
        Email::try_from(value.to_owned()).expect("valid email")
    }

    async fn seeded() -> (AppState, UserId, TeamspaceRecord) {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let repository = Repository::from_state(&state);
        let owner = repository
            .create_user(
                &email("owner@example.com"),
                &DisplayName::try_from(String::from("Owner")).expect("valid name"),
                &hash_password("owner password 1").expect("hash"),
                NOW,
            )
            .await
            .expect("store")
            .expect("fresh email");
        let teamspace = repository
            .create_teamspace(
                &Slug::try_from("acme").expect("valid slug"),
                &ScopeName::try_from(String::from("Acme")).expect("valid name"),
                owner,
                NOW,
            )
            .await
            .expect("store")
            .expect("fresh slug");
        (state, owner, teamspace)
    }

    #[test]
    fn constant_time_compare_requires_two_full_length_tokens() {
        let token = "a".repeat(64);
        assert!(compare_tokens_constant_time(&token, &token));
        assert!(!compare_tokens_constant_time(&token, &"b".repeat(64)));
        assert!(!compare_tokens_constant_time(&"a".repeat(63), &"a".repeat(63)));
        assert!(!compare_tokens_constant_time(&token, &"a".repeat(65)));
        assert!(!compare_tokens_constant_time("", ""));
    }

    #[test]
    fn generated_tokens_are_unique_lowercase_hex() {
        let tokens: std::collections::HashSet<String> =
            (0..32).map(|_| generate_invitation_token()).collect();
        assert_eq!(tokens.len(), 32);
        assert!(tokens
            .iter()
            .all(|token| planboard_core::is_invitation_token_format(token)));
    }

    #[tokio::test]
    async fn malformed_token_is_rejected_without_store_lookup() {
        let (state, _, _) = seeded().await;
        let error = validate_invitation(&state, "ABC", NOW).await.unwrap_err();
        assert_eq!(
            error,
            InvitationError::Rejected(InvitationRejection::MalformedToken)
        );
        let uppercase = "A".repeat(64);
        assert_eq!(
            validate_invitation(&state, &uppercase, NOW)
                .await
                .unwrap_err(),
            InvitationError::Rejected(InvitationRejection::MalformedToken)
        );
    }

    #[tokio::test]
    async fn failed_validations_increment_attempts_and_lock_after_budget() {
        let (state, owner, teamspace) = seeded().await;
        let created = create_invitation(
            &state,
            owner,
            &teamspace,
            None,
            email("new@example.com"),
            ScopedRole::Teamspace(TeamspaceRole::Editor),
            NOW,
        )
        .await
        .expect("invitation should be created");

        for attempt in 1..=3 {
            let error = accept_invitation(
                &state,
                &created.token,
                AcceptCredentials::NewAccount {
                    display_name: "New",
                    password: "short",
                },
                NOW,
            )
            .await
            .unwrap_err();
            assert_eq!(
                error,
                InvitationError::Rejected(InvitationRejection::InvalidCredentials)
            );
            let stored = Repository::from_state(&state)
                .find_invitation(created.invitation.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.attempts, attempt);
        }

        assert_eq!(
            validate_invitation(&state, &created.token, NOW)
                .await
                .unwrap_err(),
            InvitationError::Rejected(InvitationRejection::AttemptsExceeded)
        );
        let stored = Repository::from_state(&state)
            .find_invitation(created.invitation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.attempts, 4);
    }

    #[tokio::test]
    async fn expired_invitation_is_rejected() {
        let (state, owner, teamspace) = seeded().await;
        let created = create_invitation(
            &state,
            owner,
            &teamspace,
            None,
            email("late@example.com"),
            ScopedRole::Teamspace(TeamspaceRole::Viewer),
            NOW,
        )
        .await
        .unwrap();
        let later = created.invitation.expires_at_unix + 1;
        assert_eq!(
            validate_invitation(&state, &created.token, later)
                .await
                .unwrap_err(),
            InvitationError::Rejected(InvitationRejection::Expired)
        );
    }

    #[tokio::test]
    async fn accepted_invitation_cannot_be_reused() {
        let (state, owner, teamspace) = seeded().await;
        let created = create_invitation(
            &state,
            owner,
            &teamspace,
            None,
            email("new@example.com"),
            ScopedRole::Teamspace(TeamspaceRole::Editor),
            NOW,
        )
        .await
        .unwrap();
        let credentials = AcceptCredentials::NewAccount {
            display_name: "New Person",
            password: "a long enough password",
        };

        let outcome = accept_invitation(&state, &created.token, credentials, NOW)
            .await
            .expect("first acceptance succeeds");
        assert!(outcome.accepted.created_user);
        assert!(outcome.session.cookie.starts_with("session="));
        let role = Repository::from_state(&state)
            .teamspace_role(teamspace.id, outcome.accepted.user_id)
            .await
            .unwrap();
        assert_eq!(role, Some(TeamspaceRole::Editor));

        let context = AuthContext {
            user_id: outcome.accepted.user_id,
            email: email("new@example.com"),
            display_name: DisplayName::try_from(String::from("New Person")).unwrap(),
        };
        assert_eq!(
            accept_invitation(
                &state,
                &created.token,
                AcceptCredentials::Session(&context),
                NOW
            )
            .await
            .unwrap_err(),
            InvitationError::Rejected(InvitationRejection::AlreadyAccepted)
        );
    }

    #[tokio::test]
    async fn existing_account_must_log_in_and_match_email() {
        let (state, owner, teamspace) = seeded().await;
        let created = create_invitation(
            &state,
            owner,
            &teamspace,
            None,
            email("owner@example.com"),
            ScopedRole::Teamspace(TeamspaceRole::Viewer),
            NOW,
        )
        .await
        .unwrap();

        assert_eq!(
            accept_invitation(
                &state,
                &created.token,
                AcceptCredentials::NewAccount {
                    display_name: "Someone",
                    password: "a long enough password",
                },
                NOW
            )
            .await
            .unwrap_err(),
            InvitationError::RequiresAuthentication
        );

        let stranger = AuthContext {
            user_id: UserId::new(),
            email: email("stranger@example.com"),
            display_name: DisplayName::try_from(String::from("Stranger")).unwrap(),
        };
        assert_eq!(
            accept_invitation(
                &state,
                &created.token,
                AcceptCredentials::Session(&stranger),
                NOW
            )
            .await
            .unwrap_err(),
            InvitationError::Rejected(InvitationRejection::AccountMismatch)
        );
        let stored = Repository::from_state(&state)
            .find_invitation(created.invitation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn channel_invitation_grants_teamspace_viewer_and_channel_role() {
        let (state, owner, teamspace) = seeded().await;
        let repository = Repository::from_state(&state);
        let channel = repository
            .create_channel(
                teamspace.id,
                &Slug::try_from("roadmap").unwrap(),
                &ScopeName::try_from(String::from("Roadmap")).unwrap(),
                owner,
                NOW,
            )
            .await
            .unwrap()
            .unwrap();
        let created = create_invitation(
            &state,
            owner,
            &teamspace,
            Some(&channel),
            email("guest@example.com"),
            ScopedRole::Channel(ChannelRole::Editor),
            NOW,
        )
        .await
        .unwrap();

        let outcome = accept_invitation(
            &state,
            &created.token,
            AcceptCredentials::NewAccount {
                display_name: "Guest",
                password: "a long enough password",
            },
            NOW,
        )
        .await
        .unwrap();
        let user_id = outcome.accepted.user_id;
        assert_eq!(
            repository.teamspace_role(teamspace.id, user_id).await.unwrap(),
            Some(TeamspaceRole::Viewer)
        );
        assert_eq!(
            repository.channel_role(channel.id, user_id).await.unwrap(),
            Some(ChannelRole::Editor)
        );
    }
}
