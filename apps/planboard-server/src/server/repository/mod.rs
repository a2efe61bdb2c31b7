use planboard_core::{
    ChannelId, ChannelRole, DisplayName, Email, HierarchyRole, InvitationId, InvitationState,
    InvitationStatus, ScopeName, ScopedRole, Slug, TeamspaceId, TeamspaceRole, UserId,
};

use super::{
    core::AppState,
    db::ensure_db_schema,
    errors::AuthFailure,
    invitations::InvitationError,
    session::PendingSession,
    setup::SetupFailure,
};

pub(crate) mod memory;
pub(crate) mod postgres;

pub(crate) use memory::InMemoryRepository;
pub(crate) use postgres::PostgresRepository;

#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(crate) id: UserId,
    pub(crate) email: Email,
    pub(crate) display_name: DisplayName,
    pub(crate) password_hash: String,
    pub(crate) failed_logins: u8,
    pub(crate) locked_until_unix: Option<i64>,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct TeamspaceRecord {
    pub(crate) id: TeamspaceId,
    pub(crate) slug: Slug,
    pub(crate) name: ScopeName,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct ChannelRecord {
    pub(crate) id: ChannelId,
    pub(crate) teamspace_id: TeamspaceId,
    pub(crate) slug: Slug,
    pub(crate) name: ScopeName,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct MemberRecord<R> {
    pub(crate) user_id: UserId,
    pub(crate) email: Email,
    pub(crate) display_name: DisplayName,
    pub(crate) role: R,
}

#[derive(Debug, Clone)]
pub(crate) struct InvitationRecord {
    pub(crate) id: InvitationId,
    /// Lowercase hex SHA-256 of the raw token.
    pub(crate) token_hash: String,
    pub(crate) teamspace_id: TeamspaceId,
    pub(crate) channel_id: Option<ChannelId>,
    pub(crate) email: Email,
    pub(crate) role: ScopedRole,
    pub(crate) status: InvitationStatus,
    pub(crate) expires_at_unix: i64,
    pub(crate) attempts: u32,
    pub(crate) max_attempts: u32,
    pub(crate) created_by: UserId,
    pub(crate) accepted_by: Option<UserId>,
    pub(crate) created_at_unix: i64,
}

impl InvitationRecord {
    pub(crate) fn state(&self, now_unix: i64) -> InvitationState {
        InvitationState::evaluate(
            self.status,
            self.expires_at_unix,
            self.attempts,
            self.max_attempts,
            now_unix,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Acceptor<'a> {
    /// The caller holds a session; its email must match the invitation.
    Existing { user_id: UserId, email: &'a Email },
    /// No session; an account is created for the invitation email.
    New {
        display_name: &'a DisplayName,
        password_hash: &'a str,
    },
}

pub(crate) struct InvitationAcceptance<'a> {
    pub(crate) token_hash: &'a str,
    pub(crate) acceptor: Acceptor<'a>,
    pub(crate) session: &'a PendingSession,
    pub(crate) now_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct AcceptedInvitation {
    pub(crate) invitation_id: InvitationId,
    pub(crate) user_id: UserId,
    pub(crate) teamspace_id: TeamspaceId,
    pub(crate) channel_id: Option<ChannelId>,
    pub(crate) created_user: bool,
}

pub(crate) struct SetupBootstrap<'a> {
    pub(crate) email: &'a Email,
    pub(crate) display_name: &'a DisplayName,
    pub(crate) password_hash: &'a str,
    pub(crate) teamspace_slug: &'a Slug,
    pub(crate) teamspace_name: &'a ScopeName,
    pub(crate) channel_slug: &'a Slug,
    pub(crate) channel_name: &'a ScopeName,
    pub(crate) session: &'a PendingSession,
    pub(crate) now_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct BootstrapRecord {
    pub(crate) user_id: UserId,
    pub(crate) teamspace: TeamspaceRecord,
    pub(crate) channel: ChannelRecord,
}

/// Rows to write when an invitation is accepted. `None` leaves the existing row untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MembershipGrant {
    pub(crate) teamspace: Option<TeamspaceRole>,
    pub(crate) channel: Option<ChannelRole>,
}

/// Memberships only ever move up: an accepted invitation never downgrades an existing role.
pub(crate) fn membership_grant(
    offered: ScopedRole,
    current_teamspace: Option<TeamspaceRole>,
    current_channel: Option<ChannelRole>,
) -> MembershipGrant {
    match offered {
        ScopedRole::Teamspace(role) => MembershipGrant {
            teamspace: raise(current_teamspace, role),
            channel: None,
        },
        ScopedRole::Channel(role) => MembershipGrant {
            teamspace: current_teamspace
                .is_none()
                .then_some(TeamspaceRole::Viewer),
            channel: raise(current_channel, role),
        },
    }
}

fn raise<R: HierarchyRole>(current: Option<R>, offered: R) -> Option<R> {
    match current {
        Some(current) if current.satisfies(offered) => None,
        _ => Some(offered),
    }
}

/// True when moving a member from `current` to `next` would leave the scope without a
/// top-role holder.
pub(crate) fn strands_scope<R: HierarchyRole>(
    current: Option<R>,
    next: Option<R>,
    top_role_holders: usize,
) -> bool {
    current == Some(R::top()) && next != Some(R::top()) && top_role_holders <= 1
}

/// Only a top-role holder may grant the top role or change the membership of someone who
/// holds it.
pub(crate) fn may_change_membership<R: HierarchyRole>(
    actor: R,
    current: Option<R>,
    next: Option<R>,
) -> bool {
    actor == R::top() || (current != Some(R::top()) && next != Some(R::top()))
}

pub(crate) trait Persistence {
    async fn create_user(
        &self,
        email: &Email,
        display_name: &DisplayName,
        password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure>;

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, AuthFailure>;

    async fn find_user_by_email(&self, email: &Email) -> Result<Option<UserRecord>, AuthFailure>;

    async fn verify_credentials(
        &self,
        email: &Email,
        password: &str,
        dummy_password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure>;

    /// Stores a new credential and drops every session of the user.
    async fn replace_password(&self, user_id: UserId, password_hash: &str)
        -> Result<(), AuthFailure>;

    async fn insert_session(
        &self,
        token_hash: [u8; 32],
        user_id: UserId,
        expires_at_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure>;

    async fn find_session(
        &self,
        token_hash: [u8; 32],
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure>;

    async fn delete_session(&self, token_hash: [u8; 32]) -> Result<(), AuthFailure>;

    async fn prune_expired_sessions(&self, now_unix: i64) -> Result<(), AuthFailure>;

    /// Creates the teamspace with `owner` as its first owner. `None` when the slug is taken.
    async fn create_teamspace(
        &self,
        slug: &Slug,
        name: &ScopeName,
        owner: UserId,
        now_unix: i64,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure>;

    async fn find_teamspace(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure>;

    async fn find_teamspace_by_slug(
        &self,
        slug: &Slug,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure>;

    async fn list_teamspaces_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(TeamspaceRecord, TeamspaceRole)>, AuthFailure>;

    async fn delete_teamspace(&self, teamspace_id: TeamspaceId) -> Result<(), AuthFailure>;

    /// Creates the channel with `creator` as a direct owner. `None` when the slug is taken.
    async fn create_channel(
        &self,
        teamspace_id: TeamspaceId,
        slug: &Slug,
        name: &ScopeName,
        creator: UserId,
        now_unix: i64,
    ) -> Result<Option<ChannelRecord>, AuthFailure>;

    async fn find_channel_by_slug(
        &self,
        teamspace_id: TeamspaceId,
        slug: &Slug,
    ) -> Result<Option<ChannelRecord>, AuthFailure>;

    async fn find_channel(&self, channel_id: ChannelId)
        -> Result<Option<ChannelRecord>, AuthFailure>;

    async fn list_channels(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Vec<ChannelRecord>, AuthFailure>;

    async fn teamspace_role(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
    ) -> Result<Option<TeamspaceRole>, AuthFailure>;

    async fn channel_role(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<ChannelRole>, AuthFailure>;

    async fn list_teamspace_members(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Vec<MemberRecord<TeamspaceRole>>, AuthFailure>;

    async fn list_channel_members(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<MemberRecord<ChannelRole>>, AuthFailure>;

    /// Sets the role on behalf of a member holding `actor_role`. Owner changes by a
    /// non-owner are `NotFound`.
    async fn set_teamspace_role(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
        role: TeamspaceRole,
        actor_role: TeamspaceRole,
    ) -> Result<(), AuthFailure>;

    /// Removes the membership and the user's direct grants on the teamspace's channels.
    /// Refused with `LastOwner` when that would leave the teamspace or any of its channels
    /// without an owner.
    async fn remove_teamspace_member(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
        actor_role: TeamspaceRole,
    ) -> Result<bool, AuthFailure>;

    async fn set_channel_role(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        role: ChannelRole,
    ) -> Result<(), AuthFailure>;

    async fn remove_channel_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<bool, AuthFailure>;

    async fn insert_invitation(&self, invitation: &InvitationRecord) -> Result<(), AuthFailure>;

    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<InvitationRecord>, AuthFailure>;

    async fn find_invitation(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Option<InvitationRecord>, AuthFailure>;

    async fn record_invitation_failure(
        &self,
        invitation_id: InvitationId,
    ) -> Result<(), AuthFailure>;

    async fn list_pending_invitations(
        &self,
        teamspace_id: TeamspaceId,
        now_unix: i64,
    ) -> Result<Vec<InvitationRecord>, AuthFailure>;

    /// Revokes a pending invitation. `false` when it was no longer pending.
    async fn revoke_invitation(&self, invitation_id: InvitationId) -> Result<bool, AuthFailure>;

    /// Re-validates and consumes the invitation, grants membership and stores the session
    /// in one transaction.
    async fn accept_invitation(
        &self,
        acceptance: &InvitationAcceptance<'_>,
    ) -> Result<AcceptedInvitation, InvitationError>;

    /// Creates the first user, teamspace, channel and session if and only if no user exists yet.
    async fn bootstrap(&self, setup: &SetupBootstrap<'_>) -> Result<BootstrapRecord, SetupFailure>;
}

pub(crate) enum Repository<'a> {
    Postgres(PostgresRepository<'a>),
    InMemory(InMemoryRepository<'a>),
}

impl Repository<'_> {
    pub(crate) fn from_state(state: &AppState) -> Repository<'_> {
        if let Some(pool) = &state.db_pool {
            Repository::Postgres(PostgresRepository::new(pool))
        } else {
            Repository::InMemory(InMemoryRepository::new(state))
        }
    }

    /// Ensures the schema exists before handing out a repository.
    pub(crate) async fn ready(state: &AppState) -> Result<Repository<'_>, AuthFailure> {
        ensure_db_schema(state).await?;
        Ok(Self::from_state(state))
    }
}

impl Persistence for Repository<'_> {
    async fn create_user(
        &self,
        email: &Email,
        display_name: &DisplayName,
        password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.create_user(email, display_name, password_hash, now_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.create_user(email, display_name, password_hash, now_unix)
                    .await
            }
        }
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_user(user_id).await,
            Self::InMemory(repo) => repo.find_user(user_id).await,
        }
    }

    async fn find_user_by_email(&self, email: &Email) -> Result<Option<UserRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_user_by_email(email).await,
            Self::InMemory(repo) => repo.find_user_by_email(email).await,
        }
    }

    async fn verify_credentials(
        &self,
        email: &Email,
        password: &str,
        dummy_password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.verify_credentials(email, password, dummy_password_hash, now_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.verify_credentials(email, password, dummy_password_hash, now_unix)
                    .await
            }
        }
    }

    async fn replace_password(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.replace_password(user_id, password_hash).await,
            Self::InMemory(repo) => repo.replace_password(user_id, password_hash).await,
        }
    }

    async fn insert_session(
        &self,
        token_hash: [u8; 32],
        user_id: UserId,
        expires_at_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.insert_session(token_hash, user_id, expires_at_unix, now_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.insert_session(token_hash, user_id, expires_at_unix, now_unix)
                    .await
            }
        }
    }

    async fn find_session(
        &self,
        token_hash: [u8; 32],
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_session(token_hash, now_unix).await,
            Self::InMemory(repo) => repo.find_session(token_hash, now_unix).await,
        }
    }

    async fn delete_session(&self, token_hash: [u8; 32]) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.delete_session(token_hash).await,
            Self::InMemory(repo) => repo.delete_session(token_hash).await,
        }
    }

    async fn prune_expired_sessions(&self, now_unix: i64) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.prune_expired_sessions(now_unix).await,
            Self::InMemory(repo) => repo.prune_expired_sessions(now_unix).await,
        }
    }

    async fn create_teamspace(
        &self,
        slug: &Slug,
        name: &ScopeName,
        owner: UserId,
        now_unix: i64,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.create_teamspace(slug, name, owner, now_unix).await,
            Self::InMemory(repo) => repo.create_teamspace(slug, name, owner, now_unix).await,
        }
    }

    async fn find_teamspace(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_teamspace(teamspace_id).await,
            Self::InMemory(repo) => repo.find_teamspace(teamspace_id).await,
        }
    }

    async fn find_teamspace_by_slug(
        &self,
        slug: &Slug,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_teamspace_by_slug(slug).await,
            Self::InMemory(repo) => repo.find_teamspace_by_slug(slug).await,
        }
    }

    async fn list_teamspaces_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(TeamspaceRecord, TeamspaceRole)>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.list_teamspaces_for_user(user_id).await,
            Self::InMemory(repo) => repo.list_teamspaces_for_user(user_id).await,
        }
    }

    async fn delete_teamspace(&self, teamspace_id: TeamspaceId) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.delete_teamspace(teamspace_id).await,
            Self::InMemory(repo) => repo.delete_teamspace(teamspace_id).await,
        }
    }

    async fn create_channel(
        &self,
        teamspace_id: TeamspaceId,
        slug: &Slug,
        name: &ScopeName,
        creator: UserId,
        now_unix: i64,
    ) -> Result<Option<ChannelRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.create_channel(teamspace_id, slug, name, creator, now_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.create_channel(teamspace_id, slug, name, creator, now_unix)
                    .await
            }
        }
    }

    async fn find_channel_by_slug(
        &self,
        teamspace_id: TeamspaceId,
        slug: &Slug,
    ) -> Result<Option<ChannelRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_channel_by_slug(teamspace_id, slug).await,
            Self::InMemory(repo) => repo.find_channel_by_slug(teamspace_id, slug).await,
        }
    }

    async fn find_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_channel(channel_id).await,
            Self::InMemory(repo) => repo.find_channel(channel_id).await,
        }
    }

    async fn list_channels(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Vec<ChannelRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.list_channels(teamspace_id).await,
            Self::InMemory(repo) => repo.list_channels(teamspace_id).await,
        }
    }

    async fn teamspace_role(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
    ) -> Result<Option<TeamspaceRole>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.teamspace_role(teamspace_id, user_id).await,
            Self::InMemory(repo) => repo.teamspace_role(teamspace_id, user_id).await,
        }
    }

    async fn channel_role(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<ChannelRole>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.channel_role(channel_id, user_id).await,
            Self::InMemory(repo) => repo.channel_role(channel_id, user_id).await,
        }
    }

    async fn list_teamspace_members(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Vec<MemberRecord<TeamspaceRole>>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.list_teamspace_members(teamspace_id).await,
            Self::InMemory(repo) => repo.list_teamspace_members(teamspace_id).await,
        }
    }

    async fn list_channel_members(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<MemberRecord<ChannelRole>>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.list_channel_members(channel_id).await,
            Self::InMemory(repo) => repo.list_channel_members(channel_id).await,
        }
    }

    async fn set_teamspace_role(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
        role: TeamspaceRole,
        actor_role: TeamspaceRole,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.set_teamspace_role(teamspace_id, user_id, role, actor_role)
                    .await
            }
            Self::InMemory(repo) => {
                repo.set_teamspace_role(teamspace_id, user_id, role, actor_role)
                    .await
            }
        }
    }

    async fn remove_teamspace_member(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
        actor_role: TeamspaceRole,
    ) -> Result<bool, AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.remove_teamspace_member(teamspace_id, user_id, actor_role)
                    .await
            }
            Self::InMemory(repo) => {
                repo.remove_teamspace_member(teamspace_id, user_id, actor_role)
                    .await
            }
        }
    }

    async fn set_channel_role(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        role: ChannelRole,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.set_channel_role(channel_id, user_id, role).await,
            Self::InMemory(repo) => repo.set_channel_role(channel_id, user_id, role).await,
        }
    }

    async fn remove_channel_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<bool, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.remove_channel_member(channel_id, user_id).await,
            Self::InMemory(repo) => repo.remove_channel_member(channel_id, user_id).await,
        }
    }

    async fn insert_invitation(&self, invitation: &InvitationRecord) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.insert_invitation(invitation).await,
            Self::InMemory(repo) => repo.insert_invitation(invitation).await,
        }
    }

    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<InvitationRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_invitation_by_token_hash(token_hash).await,
            Self::InMemory(repo) => repo.find_invitation_by_token_hash(token_hash).await,
        }
    }

    async fn find_invitation(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Option<InvitationRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_invitation(invitation_id).await,
            Self::InMemory(repo) => repo.find_invitation(invitation_id).await,
        }
    }

    async fn record_invitation_failure(
        &self,
        invitation_id: InvitationId,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.record_invitation_failure(invitation_id).await,
            Self::InMemory(repo) => repo.record_invitation_failure(invitation_id).await,
        }
    }

    async fn list_pending_invitations(
        &self,
        teamspace_id: TeamspaceId,
        now_unix: i64,
    ) -> Result<Vec<InvitationRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.list_pending_invitations(teamspace_id, now_unix).await,
            Self::InMemory(repo) => repo.list_pending_invitations(teamspace_id, now_unix).await,
        }
    }

    async fn revoke_invitation(&self, invitation_id: InvitationId) -> Result<bool, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.revoke_invitation(invitation_id).await,
            Self::InMemory(repo) => repo.revoke_invitation(invitation_id).await,
        }
    }

    async fn accept_invitation(
        &self,
        acceptance: &InvitationAcceptance<'_>,
    ) -> Result<AcceptedInvitation, InvitationError> {
        match self {
            Self::Postgres(repo) => repo.accept_invitation(acceptance).await,
            Self::InMemory(repo) => repo.accept_invitation(acceptance).await,
        }
    }

    async fn bootstrap(&self, setup: &SetupBootstrap<'_>) -> Result<BootstrapRecord, SetupFailure> {
        match self {
            Self::Postgres(repo) => repo.bootstrap(setup).await,
            Self::InMemory(repo) => repo.bootstrap(setup).await,
        }
    }
}
