use std::collections::HashMap;

use planboard_core::{
    ChannelId, ChannelRole, DisplayName, Email, InvitationId, InvitationStatus, ScopeName,
    ScopedRole, Slug, TeamspaceId, TeamspaceRole, UserId,
};

use super::{
    may_change_membership, membership_grant, strands_scope, AcceptedInvitation, Acceptor,
    BootstrapRecord, ChannelRecord, InvitationAcceptance, InvitationRecord, MemberRecord,
    Persistence, SetupBootstrap, TeamspaceRecord, UserRecord,
};
use crate::server::{
    auth::verify_password,
    core::{AppState, LOGIN_LOCK_SECS, LOGIN_LOCK_THRESHOLD},
    errors::AuthFailure,
    invitations::{check_acceptance, InvitationError, InvitationRejection},
    setup::SetupFailure,
};

#[derive(Debug, Clone, Copy)]
struct SessionRow {
    user_id: UserId,
    expires_at_unix: i64,
}

/// Process-local tables used when no database is configured.
///
/// Every operation holds the single write lock for its whole duration, which gives
/// multi-row writes the same all-or-nothing behaviour as a database transaction.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    users: HashMap<UserId, UserRecord>,
    user_ids_by_email: HashMap<String, UserId>,
    sessions: HashMap<[u8; 32], SessionRow>,
    teamspaces: HashMap<TeamspaceId, TeamspaceRecord>,
    teamspace_ids_by_slug: HashMap<String, TeamspaceId>,
    channels: HashMap<ChannelId, ChannelRecord>,
    teamspace_members: HashMap<(TeamspaceId, UserId), TeamspaceRole>,
    channel_members: HashMap<(ChannelId, UserId), ChannelRole>,
    invitations: HashMap<InvitationId, InvitationRecord>,
    invitation_ids_by_token_hash: HashMap<String, InvitationId>,
}

impl MemoryStore {
    fn insert_user(
        &mut self,
        email: &Email,
        display_name: &DisplayName,
        password_hash: &str,
        now_unix: i64,
    ) -> Option<UserId> {
        if self.user_ids_by_email.contains_key(email.as_str()) {
            return None;
        }
        let user_id = UserId::new();
        self.users.insert(
            user_id,
            UserRecord {
                id: user_id,
                email: email.clone(),
                display_name: display_name.clone(),
                password_hash: password_hash.to_owned(),
                failed_logins: 0,
                locked_until_unix: None,
                created_at_unix: now_unix,
            },
        );
        self.user_ids_by_email
            .insert(email.as_str().to_owned(), user_id);
        Some(user_id)
    }

    fn insert_teamspace(
        &mut self,
        slug: &Slug,
        name: &ScopeName,
        owner: UserId,
        now_unix: i64,
    ) -> Option<TeamspaceRecord> {
        if self.teamspace_ids_by_slug.contains_key(slug.as_str()) {
            return None;
        }
        let record = TeamspaceRecord {
            id: TeamspaceId::new(),
            slug: slug.clone(),
            name: name.clone(),
            created_at_unix: now_unix,
        };
        self.teamspace_ids_by_slug
            .insert(slug.as_str().to_owned(), record.id);
        self.teamspaces.insert(record.id, record.clone());
        self.teamspace_members
            .insert((record.id, owner), TeamspaceRole::Owner);
        Some(record)
    }

    fn insert_channel(
        &mut self,
        teamspace_id: TeamspaceId,
        slug: &Slug,
        name: &ScopeName,
        creator: UserId,
        now_unix: i64,
    ) -> Option<ChannelRecord> {
        if self.find_channel_by_slug(teamspace_id, slug).is_some() {
            return None;
        }
        let record = ChannelRecord {
            id: ChannelId::new(),
            teamspace_id,
            slug: slug.clone(),
            name: name.clone(),
            created_at_unix: now_unix,
        };
        self.channels.insert(record.id, record.clone());
        self.channel_members
            .insert((record.id, creator), ChannelRole::Owner);
        Some(record)
    }

    fn find_channel_by_slug(
        &self,
        teamspace_id: TeamspaceId,
        slug: &Slug,
    ) -> Option<&ChannelRecord> {
        self.channels
            .values()
            .find(|channel| channel.teamspace_id == teamspace_id && channel.slug == *slug)
    }

    fn teamspace_owner_count(&self, teamspace_id: TeamspaceId) -> usize {
        self.teamspace_members
            .iter()
            .filter(|((id, _), role)| *id == teamspace_id && **role == TeamspaceRole::Owner)
            .count()
    }

    fn channel_owner_count(&self, channel_id: ChannelId) -> usize {
        self.channel_members
            .iter()
            .filter(|((id, _), role)| *id == channel_id && **role == ChannelRole::Owner)
            .count()
    }

    fn bump_invitation_attempts(&mut self, invitation_id: InvitationId) {
        if let Some(invitation) = self.invitations.get_mut(&invitation_id) {
            invitation.attempts = invitation.attempts.saturating_add(1);
        }
    }

    fn member<R: Copy>(&self, user_id: UserId, role: R) -> Option<MemberRecord<R>> {
        self.users.get(&user_id).map(|user| MemberRecord {
            user_id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role,
        })
    }
}

pub(crate) struct InMemoryRepository<'a> {
    state: &'a AppState,
}

impl<'a> InMemoryRepository<'a> {
    pub(crate) fn new(state: &'a AppState) -> Self {
        Self { state }
    }
}

impl Persistence for InMemoryRepository<'_> {
    async fn create_user(
        &self,
        email: &Email,
        display_name: &DisplayName,
        password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        let mut store = self.state.memory.write().await;
        Ok(store.insert_user(email, display_name, password_hash, now_unix))
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, AuthFailure> {
        Ok(self.state.memory.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &Email) -> Result<Option<UserRecord>, AuthFailure> {
        let store = self.state.memory.read().await;
        Ok(store
            .user_ids_by_email
            .get(email.as_str())
            .and_then(|user_id| store.users.get(user_id))
            .cloned())
    }

    async fn verify_credentials(
        &self,
        email: &Email,
        password: &str,
        dummy_password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        let candidate = {
            let store = self.state.memory.read().await;
            store
                .user_ids_by_email
                .get(email.as_str())
                .and_then(|user_id| store.users.get(user_id))
                .map(|user| (user.id, user.password_hash.clone(), user.locked_until_unix))
        };
        let Some((user_id, password_hash, locked_until_unix)) = candidate else {
            let _ = verify_password(dummy_password_hash, password);
            return Ok(None);
        };
        if locked_until_unix.is_some_and(|lock_until| lock_until > now_unix) {
            return Ok(None);
        }

        let verified = verify_password(&password_hash, password);

        let mut store = self.state.memory.write().await;
        let user = store.users.get_mut(&user_id).ok_or(AuthFailure::Internal)?;
        if user.password_hash != password_hash {
            // Password changed while verifying.
            return Ok(None);
        }
        if verified {
            user.failed_logins = 0;
            user.locked_until_unix = None;
            return Ok(Some(user.id));
        }

        user.failed_logins = user.failed_logins.saturating_add(1);
        if user.failed_logins >= LOGIN_LOCK_THRESHOLD {
            user.locked_until_unix = Some(now_unix + LOGIN_LOCK_SECS);
            user.failed_logins = 0;
        }
        Ok(None)
    }

    async fn replace_password(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), AuthFailure> {
        let mut store = self.state.memory.write().await;
        let user = store.users.get_mut(&user_id).ok_or(AuthFailure::NotFound)?;
        user.password_hash = password_hash.to_owned();
        user.failed_logins = 0;
        user.locked_until_unix = None;
        store.sessions.retain(|_, session| session.user_id != user_id);
        Ok(())
    }

    async fn insert_session(
        &self,
        token_hash: [u8; 32],
        user_id: UserId,
        expires_at_unix: i64,
        _now_unix: i64,
    ) -> Result<(), AuthFailure> {
        self.state.memory.write().await.sessions.insert(
            token_hash,
            SessionRow {
                user_id,
                expires_at_unix,
            },
        );
        Ok(())
    }

    async fn find_session(
        &self,
        token_hash: [u8; 32],
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        let store = self.state.memory.read().await;
        Ok(store
            .sessions
            .get(&token_hash)
            .filter(|session| session.expires_at_unix >= now_unix)
            .map(|session| session.user_id))
    }

    async fn delete_session(&self, token_hash: [u8; 32]) -> Result<(), AuthFailure> {
        self.state.memory.write().await.sessions.remove(&token_hash);
        Ok(())
    }

    async fn prune_expired_sessions(&self, now_unix: i64) -> Result<(), AuthFailure> {
        self.state
            .memory
            .write()
            .await
            .sessions
            .retain(|_, session| session.expires_at_unix >= now_unix);
        Ok(())
    }

    async fn create_teamspace(
        &self,
        slug: &Slug,
        name: &ScopeName,
        owner: UserId,
        now_unix: i64,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure> {
        let mut store = self.state.memory.write().await;
        Ok(store.insert_teamspace(slug, name, owner, now_unix))
    }

    async fn find_teamspace(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure> {
        Ok(self
            .state
            .memory
            .read()
            .await
            .teamspaces
            .get(&teamspace_id)
            .cloned())
    }

    async fn find_teamspace_by_slug(
        &self,
        slug: &Slug,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure> {
        let store = self.state.memory.read().await;
        Ok(store
            .teamspace_ids_by_slug
            .get(slug.as_str())
            .and_then(|id| store.teamspaces.get(id))
            .cloned())
    }

    async fn list_teamspaces_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(TeamspaceRecord, TeamspaceRole)>, AuthFailure> {
        let store = self.state.memory.read().await;
        let mut teamspaces: Vec<_> = store
            .teamspace_members
            .iter()
            .filter(|((_, member), _)| *member == user_id)
            .filter_map(|((teamspace_id, _), role)| {
                store
                    .teamspaces
                    .get(teamspace_id)
                    .map(|record| (record.clone(), *role))
            })
            .collect();
        teamspaces.sort_by(|(a, _), (b, _)| a.slug.as_str().cmp(b.slug.as_str()));
        Ok(teamspaces)
    }

    async fn delete_teamspace(&self, teamspace_id: TeamspaceId) -> Result<(), AuthFailure> {
        let mut store = self.state.memory.write().await;
        if let Some(record) = store.teamspaces.remove(&teamspace_id) {
            store.teamspace_ids_by_slug.remove(record.slug.as_str());
        }
        let channel_ids: Vec<ChannelId> = store
            .channels
            .values()
            .filter(|channel| channel.teamspace_id == teamspace_id)
            .map(|channel| channel.id)
            .collect();
        for channel_id in &channel_ids {
            store.channels.remove(channel_id);
        }
        store
            .channel_members
            .retain(|(channel_id, _), _| !channel_ids.contains(channel_id));
        store
            .teamspace_members
            .retain(|(id, _), _| *id != teamspace_id);
        let removed: Vec<InvitationRecord> = store
            .invitations
            .values()
            .filter(|invitation| invitation.teamspace_id == teamspace_id)
            .cloned()
            .collect();
        for invitation in removed {
            store.invitations.remove(&invitation.id);
            store
                .invitation_ids_by_token_hash
                .remove(&invitation.token_hash);
        }
        Ok(())
    }

    async fn create_channel(
        &self,
        teamspace_id: TeamspaceId,
        slug: &Slug,
        name: &ScopeName,
        creator: UserId,
        now_unix: i64,
    ) -> Result<Option<ChannelRecord>, AuthFailure> {
        let mut store = self.state.memory.write().await;
        if !store.teamspaces.contains_key(&teamspace_id) {
            return Err(AuthFailure::NotFound);
        }
        Ok(store.insert_channel(teamspace_id, slug, name, creator, now_unix))
    }

    async fn find_channel_by_slug(
        &self,
        teamspace_id: TeamspaceId,
        slug: &Slug,
    ) -> Result<Option<ChannelRecord>, AuthFailure> {
        let store = self.state.memory.read().await;
        Ok(store.find_channel_by_slug(teamspace_id, slug).cloned())
    }

    async fn find_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelRecord>, AuthFailure> {
        Ok(self
            .state
            .memory
            .read()
            .await
            .channels
            .get(&channel_id)
            .cloned())
    }

    async fn list_channels(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Vec<ChannelRecord>, AuthFailure> {
        let store = self.state.memory.read().await;
        let mut channels: Vec<_> = store
            .channels
            .values()
            .filter(|channel| channel.teamspace_id == teamspace_id)
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.slug.as_str().cmp(b.slug.as_str()));
        Ok(channels)
    }

    async fn teamspace_role(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
    ) -> Result<Option<TeamspaceRole>, AuthFailure> {
        Ok(self
            .state
            .memory
            .read()
            .await
            .teamspace_members
            .get(&(teamspace_id, user_id))
            .copied())
    }

    async fn channel_role(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<ChannelRole>, AuthFailure> {
        Ok(self
            .state
            .memory
            .read()
            .await
            .channel_members
            .get(&(channel_id, user_id))
            .copied())
    }

    async fn list_teamspace_members(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Vec<MemberRecord<TeamspaceRole>>, AuthFailure> {
        let store = self.state.memory.read().await;
        let mut members: Vec<_> = store
            .teamspace_members
            .iter()
            .filter(|((id, _), _)| *id == teamspace_id)
            .filter_map(|((_, user_id), role)| store.member(*user_id, *role))
            .collect();
        members.sort_by(|a, b| a.email.as_str().cmp(b.email.as_str()));
        Ok(members)
    }

    async fn list_channel_members(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<MemberRecord<ChannelRole>>, AuthFailure> {
        let store = self.state.memory.read().await;
        let mut members: Vec<_> = store
            .channel_members
            .iter()
            .filter(|((id, _), _)| *id == channel_id)
            .filter_map(|((_, user_id), role)| store.member(*user_id, *role))
            .collect();
        members.sort_by(|a, b| a.email.as_str().cmp(b.email.as_str()));
        Ok(members)
    }

    async fn set_teamspace_role(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
        role: TeamspaceRole,
        actor_role: TeamspaceRole,
    ) -> Result<(), AuthFailure> {
        let mut store = self.state.memory.write().await;
        if !store.users.contains_key(&user_id) || !store.teamspaces.contains_key(&teamspace_id) {
            return Err(AuthFailure::NotFound);
        }
        let current = store
            .teamspace_members
            .get(&(teamspace_id, user_id))
            .copied();
        if !may_change_membership(actor_role, current, Some(role)) {
            return Err(AuthFailure::NotFound);
        }
        if strands_scope(current, Some(role), store.teamspace_owner_count(teamspace_id)) {
            return Err(AuthFailure::LastOwner);
        }
        store
            .teamspace_members
            .insert((teamspace_id, user_id), role);
        Ok(())
    }

    async fn remove_teamspace_member(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
        actor_role: TeamspaceRole,
    ) -> Result<bool, AuthFailure> {
        let mut store = self.state.memory.write().await;
        let current = store
            .teamspace_members
            .get(&(teamspace_id, user_id))
            .copied();
        if current.is_none() {
            return Ok(false);
        }
        if !may_change_membership(actor_role, current, None) {
            return Err(AuthFailure::NotFound);
        }
        if strands_scope(current, None, store.teamspace_owner_count(teamspace_id)) {
            return Err(AuthFailure::LastOwner);
        }
        let channel_ids: Vec<ChannelId> = store
            .channels
            .values()
            .filter(|channel| channel.teamspace_id == teamspace_id)
            .map(|channel| channel.id)
            .collect();
        let strands_channel = channel_ids.iter().any(|channel_id| {
            let grant = store.channel_members.get(&(*channel_id, user_id)).copied();
            strands_scope(grant, None, store.channel_owner_count(*channel_id))
        });
        if strands_channel {
            return Err(AuthFailure::LastOwner);
        }
        store.teamspace_members.remove(&(teamspace_id, user_id));
        store
            .channel_members
            .retain(|(channel_id, member), _| {
                *member != user_id || !channel_ids.contains(channel_id)
            });
        Ok(true)
    }

    async fn set_channel_role(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        role: ChannelRole,
    ) -> Result<(), AuthFailure> {
        let mut store = self.state.memory.write().await;
        if !store.users.contains_key(&user_id) || !store.channels.contains_key(&channel_id) {
            return Err(AuthFailure::NotFound);
        }
        let current = store.channel_members.get(&(channel_id, user_id)).copied();
        if strands_scope(current, Some(role), store.channel_owner_count(channel_id)) {
            return Err(AuthFailure::LastOwner);
        }
        store.channel_members.insert((channel_id, user_id), role);
        Ok(())
    }

    async fn remove_channel_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<bool, AuthFailure> {
        let mut store = self.state.memory.write().await;
        let current = store.channel_members.get(&(channel_id, user_id)).copied();
        if current.is_none() {
            return Ok(false);
        }
        if strands_scope(current, None, store.channel_owner_count(channel_id)) {
            return Err(AuthFailure::LastOwner);
        }
        store.channel_members.remove(&(channel_id, user_id));
        Ok(true)
    }

    async fn insert_invitation(&self, invitation: &InvitationRecord) -> Result<(), AuthFailure> {
        let mut store = self.state.memory.write().await;
        if store
            .invitation_ids_by_token_hash
            .contains_key(&invitation.token_hash)
        {
            return Err(AuthFailure::Internal);
        }
        store
            .invitation_ids_by_token_hash
            .insert(invitation.token_hash.clone(), invitation.id);
        store.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<InvitationRecord>, AuthFailure> {
        let store = self.state.memory.read().await;
        Ok(store
            .invitation_ids_by_token_hash
            .get(token_hash)
            .and_then(|id| store.invitations.get(id))
            .cloned())
    }

    async fn find_invitation(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Option<InvitationRecord>, AuthFailure> {
        Ok(self
            .state
            .memory
            .read()
            .await
            .invitations
            .get(&invitation_id)
            .cloned())
    }

    async fn record_invitation_failure(
        &self,
        invitation_id: InvitationId,
    ) -> Result<(), AuthFailure> {
        self.state
            .memory
            .write()
            .await
            .bump_invitation_attempts(invitation_id);
        Ok(())
    }

    async fn list_pending_invitations(
        &self,
        teamspace_id: TeamspaceId,
        now_unix: i64,
    ) -> Result<Vec<InvitationRecord>, AuthFailure> {
        let store = self.state.memory.read().await;
        let mut invitations: Vec<_> = store
            .invitations
            .values()
            .filter(|invitation| {
                invitation.teamspace_id == teamspace_id
                    && invitation.status == InvitationStatus::Pending
                    && invitation.expires_at_unix >= now_unix
            })
            .cloned()
            .collect();
        invitations.sort_by_key(|invitation| (invitation.created_at_unix, invitation.id));
        Ok(invitations)
    }

    async fn revoke_invitation(&self, invitation_id: InvitationId) -> Result<bool, AuthFailure> {
        let mut store = self.state.memory.write().await;
        match store.invitations.get_mut(&invitation_id) {
            Some(invitation) if invitation.status == InvitationStatus::Pending => {
                invitation.status = InvitationStatus::Revoked;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn accept_invitation(
        &self,
        acceptance: &InvitationAcceptance<'_>,
    ) -> Result<AcceptedInvitation, InvitationError> {
        let mut store = self.state.memory.write().await;
        let record = store
            .invitation_ids_by_token_hash
            .get(acceptance.token_hash)
            .and_then(|id| store.invitations.get(id))
            .cloned()
            .ok_or(InvitationError::Rejected(InvitationRejection::UnknownToken))?;
        if matches!(record.role, ScopedRole::Channel(_)) != record.channel_id.is_some() {
            return Err(InvitationError::Internal);
        }
        let existing_account = store.user_ids_by_email.get(record.email.as_str()).copied();
        if let Err(error) = check_acceptance(
            &record,
            acceptance.acceptor,
            existing_account,
            acceptance.now_unix,
        ) {
            if error.counts_as_attempt() {
                store.bump_invitation_attempts(record.id);
            }
            return Err(error);
        }

        let (user_id, created_user) = match acceptance.acceptor {
            Acceptor::Existing { user_id, .. } => (user_id, false),
            Acceptor::New {
                display_name,
                password_hash,
            } => {
                let user_id = store
                    .insert_user(&record.email, display_name, password_hash, acceptance.now_unix)
                    .ok_or(InvitationError::RequiresAuthentication)?;
                (user_id, true)
            }
        };

        let current_teamspace = store
            .teamspace_members
            .get(&(record.teamspace_id, user_id))
            .copied();
        let current_channel = record
            .channel_id
            .and_then(|channel_id| store.channel_members.get(&(channel_id, user_id)).copied());
        let grant = membership_grant(record.role, current_teamspace, current_channel);
        if let Some(role) = grant.teamspace {
            store
                .teamspace_members
                .insert((record.teamspace_id, user_id), role);
        }
        if let (Some(role), Some(channel_id)) = (grant.channel, record.channel_id) {
            store.channel_members.insert((channel_id, user_id), role);
        }

        if let Some(invitation) = store.invitations.get_mut(&record.id) {
            invitation.status = InvitationStatus::Accepted;
            invitation.accepted_by = Some(user_id);
        }
        store.sessions.insert(
            acceptance.session.token_hash,
            SessionRow {
                user_id,
                expires_at_unix: acceptance.session.expires_at_unix,
            },
        );

        Ok(AcceptedInvitation {
            invitation_id: record.id,
            user_id,
            teamspace_id: record.teamspace_id,
            channel_id: record.channel_id,
            created_user,
        })
    }

    async fn bootstrap(&self, setup: &SetupBootstrap<'_>) -> Result<BootstrapRecord, SetupFailure> {
        let mut store = self.state.memory.write().await;
        if !store.users.is_empty() {
            return Err(SetupFailure::UsersExist);
        }
        if store
            .teamspace_ids_by_slug
            .contains_key(setup.teamspace_slug.as_str())
        {
            return Err(SetupFailure::Internal);
        }

        let user_id = store
            .insert_user(
                setup.email,
                setup.display_name,
                setup.password_hash,
                setup.now_unix,
            )
            .ok_or(SetupFailure::Internal)?;
        let teamspace = store
            .insert_teamspace(
                setup.teamspace_slug,
                setup.teamspace_name,
                user_id,
                setup.now_unix,
            )
            .ok_or(SetupFailure::Internal)?;
        let channel = store
            .insert_channel(
                teamspace.id,
                setup.channel_slug,
                setup.channel_name,
                user_id,
                setup.now_unix,
            )
            .ok_or(SetupFailure::Internal)?;
        store.sessions.insert(
            setup.session.token_hash,
            SessionRow {
                user_id,
                expires_at_unix: setup.session.expires_at_unix,
            },
        );

        Ok(BootstrapRecord {
            user_id,
            teamspace,
            channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use planboard_core::{DisplayName, Email, ScopeName, Slug, TeamspaceRole, UserId};

    use super::InMemoryRepository;
    use crate::server::{
        auth::hash_password,
        core::{AppConfig, AppState, LOGIN_LOCK_THRESHOLD},
        errors::AuthFailure,
        repository::Persistence,
    };

    const PASSWORD: &str = "correct horse battery";

    async fn user(repository: &InMemoryRepository<'_>, address: &str) -> UserId {
        repository
            .create_user(
                &Email::try_from(address.to_owned()).expect("valid email"),
                &DisplayName::try_from(String::from("Member")).expect("valid name"),
                &hash_password(PASSWORD).expect("hash"),
                1,
            )
            .await
            .expect("store")
            .expect("fresh email")
    }

    #[tokio::test]
    async fn failed_logins_lock_the_account_and_success_resets_the_counter() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let repository = InMemoryRepository::new(&state);
        let email = Email::try_from(String::from("lock@example.com")).expect("valid email");
        let user_id = user(&repository, email.as_str()).await;
        let now = 1_000;

        assert_eq!(
            repository
                .verify_credentials(&email, "wrong password!", &state.dummy_password_hash, now)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            repository
                .verify_credentials(&email, PASSWORD, &state.dummy_password_hash, now)
                .await
                .unwrap(),
            Some(user_id)
        );
        assert_eq!(
            repository.find_user(user_id).await.unwrap().unwrap().failed_logins,
            0
        );

        for _ in 0..LOGIN_LOCK_THRESHOLD {
            repository
                .verify_credentials(&email, "wrong password!", &state.dummy_password_hash, now)
                .await
                .unwrap();
        }
        assert_eq!(
            repository
                .verify_credentials(&email, PASSWORD, &state.dummy_password_hash, now)
                .await
                .unwrap(),
            None
        );
        assert!(repository
            .find_user(user_id)
            .await
            .unwrap()
            .unwrap()
            .locked_until_unix
            .is_some_and(|until| until > now));
    }

    #[tokio::test]
    async fn concurrent_logins_complete_independently() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let repository = InMemoryRepository::new(&state);
        let first = Email::try_from(String::from("first@example.com")).expect("valid email");
        let second = Email::try_from(String::from("second@example.com")).expect("valid email");
        let first_id = user(&repository, first.as_str()).await;
        let second_id = user(&repository, second.as_str()).await;

        let (a, b) = tokio::join!(
            repository.verify_credentials(&first, PASSWORD, &state.dummy_password_hash, 10),
            repository.verify_credentials(&second, PASSWORD, &state.dummy_password_hash, 10)
        );
        assert_eq!(a.unwrap(), Some(first_id));
        assert_eq!(b.unwrap(), Some(second_id));
    }

    #[tokio::test]
    async fn owner_changes_need_an_owner_actor() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let repository = InMemoryRepository::new(&state);
        let owner = user(&repository, "owner@example.com").await;
        let member = user(&repository, "member@example.com").await;
        let teamspace = repository
            .create_teamspace(
                &Slug::try_from(String::from("acme")).expect("valid slug"),
                &ScopeName::try_from(String::from("Acme")).expect("valid name"),
                owner,
                1,
            )
            .await
            .unwrap()
            .expect("fresh slug");

        repository
            .set_teamspace_role(
                teamspace.id,
                member,
                TeamspaceRole::Admin,
                TeamspaceRole::Owner,
            )
            .await
            .unwrap();
        assert_eq!(
            repository
                .set_teamspace_role(
                    teamspace.id,
                    member,
                    TeamspaceRole::Owner,
                    TeamspaceRole::Admin
                )
                .await,
            Err(AuthFailure::NotFound)
        );
        assert_eq!(
            repository
                .set_teamspace_role(
                    teamspace.id,
                    owner,
                    TeamspaceRole::Viewer,
                    TeamspaceRole::Admin
                )
                .await,
            Err(AuthFailure::NotFound)
        );
        assert_eq!(
            repository
                .remove_teamspace_member(teamspace.id, owner, TeamspaceRole::Admin)
                .await,
            Err(AuthFailure::NotFound)
        );
        assert_eq!(
            repository.teamspace_role(teamspace.id, owner).await.unwrap(),
            Some(TeamspaceRole::Owner)
        );
    }
}
