use planboard_core::{
    ChannelId, ChannelRole, DisplayName, Email, HierarchyRole, InvitationId, InvitationStatus,
    ScopeKind, ScopeName, ScopedRole, Slug, TeamspaceId, TeamspaceRole, UserId,
};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use super::{
    may_change_membership, membership_grant, strands_scope, AcceptedInvitation, Acceptor, BootstrapRecord,
    ChannelRecord, InvitationAcceptance, InvitationRecord, MemberRecord, Persistence,
    SetupBootstrap, TeamspaceRecord, UserRecord,
};
use crate::server::{
    auth::verify_password,
    core::{LOGIN_LOCK_SECS, LOGIN_LOCK_THRESHOLD},
    errors::AuthFailure,
    invitations::{check_acceptance, InvitationError, InvitationRejection},
    setup::SetupFailure,
};

const SETUP_LOCK_ID: i64 = 0x504c_414e_5345_5455;
const USER_COLUMNS: &str =
    "user_id, email, display_name, password_hash, failed_logins, locked_until_unix, created_at_unix";
const TEAMSPACE_COLUMNS: &str = "teamspace_id, slug, name, created_at_unix";
const CHANNEL_COLUMNS: &str = "channel_id, teamspace_id, slug, name, created_at_unix";
const INVITATION_COLUMNS: &str = "invitation_id, token_hash, teamspace_id, channel_id, email,
     scope_kind, role, status, expires_at_unix, attempts, max_attempts, created_by_user_id,
     accepted_by_user_id, created_at_unix";

fn user_from_row(row: &PgRow) -> Result<UserRecord, AuthFailure> {
    let id: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
    let email: String = row.try_get("email").map_err(|_| AuthFailure::Internal)?;
    let display_name: String = row
        .try_get("display_name")
        .map_err(|_| AuthFailure::Internal)?;
    let failed_logins: i16 = row
        .try_get("failed_logins")
        .map_err(|_| AuthFailure::Internal)?;
    Ok(UserRecord {
        id: UserId::try_from(id).map_err(|_| AuthFailure::Internal)?,
        email: Email::try_from(email).map_err(|_| AuthFailure::Internal)?,
        display_name: DisplayName::try_from(display_name).map_err(|_| AuthFailure::Internal)?,
        password_hash: row
            .try_get("password_hash")
            .map_err(|_| AuthFailure::Internal)?,
        failed_logins: u8::try_from(failed_logins).unwrap_or(u8::MAX),
        locked_until_unix: row
            .try_get("locked_until_unix")
            .map_err(|_| AuthFailure::Internal)?,
        created_at_unix: row
            .try_get("created_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
    })
}

fn teamspace_from_row(row: &PgRow) -> Result<TeamspaceRecord, AuthFailure> {
    let id: String = row
        .try_get("teamspace_id")
        .map_err(|_| AuthFailure::Internal)?;
    let slug: String = row.try_get("slug").map_err(|_| AuthFailure::Internal)?;
    let name: String = row.try_get("name").map_err(|_| AuthFailure::Internal)?;
    Ok(TeamspaceRecord {
        id: TeamspaceId::try_from(id).map_err(|_| AuthFailure::Internal)?,
        slug: Slug::try_from(slug).map_err(|_| AuthFailure::Internal)?,
        name: ScopeName::try_from(name).map_err(|_| AuthFailure::Internal)?,
        created_at_unix: row
            .try_get("created_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
    })
}

fn channel_from_row(row: &PgRow) -> Result<ChannelRecord, AuthFailure> {
    let id: String = row.try_get("channel_id").map_err(|_| AuthFailure::Internal)?;
    let teamspace_id: String = row
        .try_get("teamspace_id")
        .map_err(|_| AuthFailure::Internal)?;
    let slug: String = row.try_get("slug").map_err(|_| AuthFailure::Internal)?;
    let name: String = row.try_get("name").map_err(|_| AuthFailure::Internal)?;
    Ok(ChannelRecord {
        id: ChannelId::try_from(id).map_err(|_| AuthFailure::Internal)?,
        teamspace_id: TeamspaceId::try_from(teamspace_id).map_err(|_| AuthFailure::Internal)?,
        slug: Slug::try_from(slug).map_err(|_| AuthFailure::Internal)?,
        name: ScopeName::try_from(name).map_err(|_| AuthFailure::Internal)?,
        created_at_unix: row
            .try_get("created_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
    })
}

fn invitation_from_row(row: &PgRow) -> Result<InvitationRecord, AuthFailure> {
    let id: String = row
        .try_get("invitation_id")
        .map_err(|_| AuthFailure::Internal)?;
    let teamspace_id: String = row
        .try_get("teamspace_id")
        .map_err(|_| AuthFailure::Internal)?;
    let channel_id: Option<String> = row
        .try_get("channel_id")
        .map_err(|_| AuthFailure::Internal)?;
    let email: String = row.try_get("email").map_err(|_| AuthFailure::Internal)?;
    let scope_kind: String = row
        .try_get("scope_kind")
        .map_err(|_| AuthFailure::Internal)?;
    let role: String = row.try_get("role").map_err(|_| AuthFailure::Internal)?;
    let status: String = row.try_get("status").map_err(|_| AuthFailure::Internal)?;
    let attempts: i32 = row.try_get("attempts").map_err(|_| AuthFailure::Internal)?;
    let max_attempts: i32 = row
        .try_get("max_attempts")
        .map_err(|_| AuthFailure::Internal)?;
    let created_by: String = row
        .try_get("created_by_user_id")
        .map_err(|_| AuthFailure::Internal)?;
    let accepted_by: Option<String> = row
        .try_get("accepted_by_user_id")
        .map_err(|_| AuthFailure::Internal)?;

    let scope_kind = match scope_kind.as_str() {
        "teamspace" => ScopeKind::Teamspace,
        "channel" => ScopeKind::Channel,
        _ => return Err(AuthFailure::Internal),
    };
    Ok(InvitationRecord {
        id: InvitationId::try_from(id).map_err(|_| AuthFailure::Internal)?,
        token_hash: row.try_get("token_hash").map_err(|_| AuthFailure::Internal)?,
        teamspace_id: TeamspaceId::try_from(teamspace_id).map_err(|_| AuthFailure::Internal)?,
        channel_id: channel_id
            .map(ChannelId::try_from)
            .transpose()
            .map_err(|_| AuthFailure::Internal)?,
        email: Email::try_from(email).map_err(|_| AuthFailure::Internal)?,
        role: ScopedRole::parse(scope_kind, &role).map_err(|_| AuthFailure::Internal)?,
        status: InvitationStatus::try_from(status.as_str()).map_err(|_| AuthFailure::Internal)?,
        expires_at_unix: row
            .try_get("expires_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
        attempts: attempt_count(attempts)?,
        max_attempts: attempt_count(max_attempts)?,
        created_by: UserId::try_from(created_by).map_err(|_| AuthFailure::Internal)?,
        accepted_by: accepted_by
            .map(UserId::try_from)
            .transpose()
            .map_err(|_| AuthFailure::Internal)?,
        created_at_unix: row
            .try_get("created_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
    })
}

/// Attempt counters are never negative; a row that says otherwise is corrupt.
fn attempt_count(value: i32) -> Result<u32, AuthFailure> {
    u32::try_from(value).map_err(|_| AuthFailure::Internal)
}

fn member_from_row<R>(
    row: &PgRow,
    parse_role: impl Fn(&str) -> Option<R>,
) -> Result<MemberRecord<R>, AuthFailure> {
    let user_id: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
    let email: String = row.try_get("email").map_err(|_| AuthFailure::Internal)?;
    let display_name: String = row
        .try_get("display_name")
        .map_err(|_| AuthFailure::Internal)?;
    let role: String = row.try_get("role").map_err(|_| AuthFailure::Internal)?;
    Ok(MemberRecord {
        user_id: UserId::try_from(user_id).map_err(|_| AuthFailure::Internal)?,
        email: Email::try_from(email).map_err(|_| AuthFailure::Internal)?,
        display_name: DisplayName::try_from(display_name).map_err(|_| AuthFailure::Internal)?,
        role: parse_role(&role).ok_or(AuthFailure::Internal)?,
    })
}

fn parse_teamspace_role(value: &str) -> Option<TeamspaceRole> {
    TeamspaceRole::try_from(value).ok()
}

fn parse_channel_role(value: &str) -> Option<ChannelRole> {
    ChannelRole::try_from(value).ok()
}

/// Locks the teamspace row and returns `(user_id, role)` for each member.
async fn lock_teamspace_members(
    tx: &mut Transaction<'_, Postgres>,
    teamspace_id: TeamspaceId,
) -> Result<Vec<(UserId, TeamspaceRole)>, AuthFailure> {
    let locked =
        sqlx::query("SELECT teamspace_id FROM teamspaces WHERE teamspace_id = $1 FOR UPDATE")
            .bind(teamspace_id.to_string())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|_| AuthFailure::Internal)?;
    if locked.is_none() {
        return Err(AuthFailure::NotFound);
    }
    let rows = sqlx::query("SELECT user_id, role FROM teamspace_members WHERE teamspace_id = $1")
        .bind(teamspace_id.to_string())
        .fetch_all(&mut **tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
    rows.iter()
        .map(|row| {
            let user_id: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
            let role: String = row.try_get("role").map_err(|_| AuthFailure::Internal)?;
            Ok((
                UserId::try_from(user_id).map_err(|_| AuthFailure::Internal)?,
                parse_teamspace_role(&role).ok_or(AuthFailure::Internal)?,
            ))
        })
        .collect()
}

async fn lock_channel_members(
    tx: &mut Transaction<'_, Postgres>,
    channel_id: ChannelId,
) -> Result<Vec<(UserId, ChannelRole)>, AuthFailure> {
    let locked = sqlx::query("SELECT channel_id FROM channels WHERE channel_id = $1 FOR UPDATE")
        .bind(channel_id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
    if locked.is_none() {
        return Err(AuthFailure::NotFound);
    }
    let rows = sqlx::query("SELECT user_id, role FROM channel_members WHERE channel_id = $1")
        .bind(channel_id.to_string())
        .fetch_all(&mut **tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
    rows.iter()
        .map(|row| {
            let user_id: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
            let role: String = row.try_get("role").map_err(|_| AuthFailure::Internal)?;
            Ok((
                UserId::try_from(user_id).map_err(|_| AuthFailure::Internal)?,
                parse_channel_role(&role).ok_or(AuthFailure::Internal)?,
            ))
        })
        .collect()
}

/// Channels of the teamspace where the user holds a direct owner grant, in lock order.
async fn owned_channels(
    tx: &mut Transaction<'_, Postgres>,
    teamspace_id: TeamspaceId,
    user_id: UserId,
) -> Result<Vec<ChannelId>, AuthFailure> {
    let rows = sqlx::query(
        "SELECT m.channel_id
         FROM channel_members m
         JOIN channels c ON c.channel_id = m.channel_id
         WHERE c.teamspace_id = $1 AND m.user_id = $2 AND m.role = 'owner'
         ORDER BY m.channel_id",
    )
    .bind(teamspace_id.to_string())
    .bind(user_id.to_string())
    .fetch_all(&mut **tx)
    .await
    .map_err(|_| AuthFailure::Internal)?;
    rows.iter()
        .map(|row| {
            let channel_id: String = row
                .try_get("channel_id")
                .map_err(|_| AuthFailure::Internal)?;
            ChannelId::try_from(channel_id).map_err(|_| AuthFailure::Internal)
        })
        .collect()
}

fn current_role<R: Copy>(members: &[(UserId, R)], user_id: UserId) -> Option<R> {
    members
        .iter()
        .find(|(member, _)| *member == user_id)
        .map(|(_, role)| *role)
}

fn count_role<R: Copy + Eq>(members: &[(UserId, R)], role: R) -> usize {
    members.iter().filter(|(_, held)| *held == role).count()
}

async fn user_exists(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
) -> Result<bool, AuthFailure> {
    let row = sqlx::query("SELECT 1 FROM users WHERE user_id = $1")
        .bind(user_id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
    Ok(row.is_some())
}

async fn insert_user_row(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
    email: &Email,
    display_name: &DisplayName,
    password_hash: &str,
    now_unix: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO users (user_id, email, display_name, password_hash, failed_logins, locked_until_unix, created_at_unix)
         VALUES ($1, $2, $3, $4, 0, NULL, $5)
         ON CONFLICT (email) DO NOTHING",
    )
    .bind(user_id.to_string())
    .bind(email.as_str())
    .bind(display_name.as_str())
    .bind(password_hash)
    .bind(now_unix)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn upsert_teamspace_member(
    tx: &mut Transaction<'_, Postgres>,
    teamspace_id: TeamspaceId,
    user_id: UserId,
    role: TeamspaceRole,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO teamspace_members (teamspace_id, user_id, role)
         VALUES ($1, $2, $3)
         ON CONFLICT (teamspace_id, user_id) DO UPDATE SET role = EXCLUDED.role",
    )
    .bind(teamspace_id.to_string())
    .bind(user_id.to_string())
    .bind(role.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_channel_member(
    tx: &mut Transaction<'_, Postgres>,
    channel_id: ChannelId,
    user_id: UserId,
    role: ChannelRole,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO channel_members (channel_id, user_id, role)
         VALUES ($1, $2, $3)
         ON CONFLICT (channel_id, user_id) DO UPDATE SET role = EXCLUDED.role",
    )
    .bind(channel_id.to_string())
    .bind(user_id.to_string())
    .bind(role.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_session_row(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: [u8; 32],
    user_id: UserId,
    expires_at_unix: i64,
    now_unix: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sessions (token_hash, user_id, expires_at_unix, created_at_unix)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(token_hash.as_slice())
    .bind(user_id.to_string())
    .bind(expires_at_unix)
    .bind(now_unix)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_teamspace_row(
    tx: &mut Transaction<'_, Postgres>,
    record: &TeamspaceRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO teamspaces (teamspace_id, slug, name, created_at_unix)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (slug) DO NOTHING",
    )
    .bind(record.id.to_string())
    .bind(record.slug.as_str())
    .bind(record.name.as_str())
    .bind(record.created_at_unix)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn insert_channel_row(
    tx: &mut Transaction<'_, Postgres>,
    record: &ChannelRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO channels (channel_id, teamspace_id, slug, name, created_at_unix)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (teamspace_id, slug) DO NOTHING",
    )
    .bind(record.id.to_string())
    .bind(record.teamspace_id.to_string())
    .bind(record.slug.as_str())
    .bind(record.name.as_str())
    .bind(record.created_at_unix)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) struct PostgresRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> PostgresRepository<'a> {
    pub(crate) fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    async fn bump_attempts(
        tx: &mut Transaction<'_, Postgres>,
        invitation_id: InvitationId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE invitations SET attempts = attempts + 1 WHERE invitation_id = $1")
            .bind(invitation_id.to_string())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

impl Persistence for PostgresRepository<'_> {
    async fn create_user(
        &self,
        email: &Email,
        display_name: &DisplayName,
        password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        let user_id = UserId::new();
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        let created = insert_user_row(
            &mut tx,
            user_id,
            email,
            display_name,
            password_hash,
            now_unix,
        )
        .await
        .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)?;
        Ok(created.then_some(user_id))
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, AuthFailure> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"))
            .bind(user_id.to_string())
            .fetch_optional(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &Email) -> Result<Option<UserRecord>, AuthFailure> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email.as_str())
            .fetch_optional(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn verify_credentials(
        &self,
        email: &Email,
        password: &str,
        dummy_password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        let Some(user) = self.find_user_by_email(email).await? else {
            let _ = verify_password(dummy_password_hash, password);
            return Ok(None);
        };

        if user
            .locked_until_unix
            .is_some_and(|lock_until| lock_until > now_unix)
        {
            return Ok(None);
        }

        if verify_password(&user.password_hash, password) {
            sqlx::query(
                "UPDATE users SET failed_logins = 0, locked_until_unix = NULL WHERE user_id = $1",
            )
            .bind(user.id.to_string())
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
            return Ok(Some(user.id));
        }

        let mut updated_failed = i32::from(user.failed_logins) + 1;
        let mut lock_until = None;
        if updated_failed >= i32::from(LOGIN_LOCK_THRESHOLD) {
            updated_failed = 0;
            lock_until = Some(now_unix + LOGIN_LOCK_SECS);
        }
        sqlx::query(
            "UPDATE users SET failed_logins = $2, locked_until_unix = $3 WHERE user_id = $1",
        )
        .bind(user.id.to_string())
        .bind(i16::try_from(updated_failed).unwrap_or(i16::MAX))
        .bind(lock_until)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(None)
    }

    async fn replace_password(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), AuthFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        let updated = sqlx::query(
            "UPDATE users SET password_hash = $2, failed_logins = 0, locked_until_unix = NULL
             WHERE user_id = $1",
        )
        .bind(user_id.to_string())
        .bind(password_hash)
        .execute(&mut *tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        if updated.rows_affected() == 0 {
            return Err(AuthFailure::NotFound);
        }
        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)
    }

    async fn insert_session(
        &self,
        token_hash: [u8; 32],
        user_id: UserId,
        expires_at_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        insert_session_row(&mut tx, token_hash, user_id, expires_at_unix, now_unix)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)
    }

    async fn find_session(
        &self,
        token_hash: [u8; 32],
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        let row = sqlx::query(
            "SELECT user_id FROM sessions WHERE token_hash = $1 AND expires_at_unix >= $2",
        )
        .bind(token_hash.as_slice())
        .bind(now_unix)
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let user_id: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
        UserId::try_from(user_id)
            .map(Some)
            .map_err(|_| AuthFailure::Internal)
    }

    async fn delete_session(&self, token_hash: [u8; 32]) -> Result<(), AuthFailure> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash.as_slice())
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn prune_expired_sessions(&self, now_unix: i64) -> Result<(), AuthFailure> {
        sqlx::query("DELETE FROM sessions WHERE expires_at_unix < $1")
            .bind(now_unix)
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn create_teamspace(
        &self,
        slug: &Slug,
        name: &ScopeName,
        owner: UserId,
        now_unix: i64,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure> {
        let record = TeamspaceRecord {
            id: TeamspaceId::new(),
            slug: slug.clone(),
            name: name.clone(),
            created_at_unix: now_unix,
        };
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        if !insert_teamspace_row(&mut tx, &record)
            .await
            .map_err(|_| AuthFailure::Internal)?
        {
            return Ok(None);
        }
        upsert_teamspace_member(&mut tx, record.id, owner, TeamspaceRole::Owner)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)?;
        Ok(Some(record))
    }

    async fn find_teamspace(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure> {
        let row = sqlx::query(&format!(
            "SELECT {TEAMSPACE_COLUMNS} FROM teamspaces WHERE teamspace_id = $1"
        ))
        .bind(teamspace_id.to_string())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(teamspace_from_row).transpose()
    }

    async fn find_teamspace_by_slug(
        &self,
        slug: &Slug,
    ) -> Result<Option<TeamspaceRecord>, AuthFailure> {
        let row = sqlx::query(&format!(
            "SELECT {TEAMSPACE_COLUMNS} FROM teamspaces WHERE slug = $1"
        ))
        .bind(slug.as_str())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(teamspace_from_row).transpose()
    }

    async fn list_teamspaces_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(TeamspaceRecord, TeamspaceRole)>, AuthFailure> {
        let rows = sqlx::query(
            "SELECT t.teamspace_id, t.slug, t.name, t.created_at_unix, m.role
             FROM teamspace_members m
             JOIN teamspaces t ON t.teamspace_id = m.teamspace_id
             WHERE m.user_id = $1
             ORDER BY t.slug",
        )
        .bind(user_id.to_string())
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        rows.iter()
            .map(|row| {
                let role: String = row.try_get("role").map_err(|_| AuthFailure::Internal)?;
                Ok((
                    teamspace_from_row(row)?,
                    parse_teamspace_role(&role).ok_or(AuthFailure::Internal)?,
                ))
            })
            .collect()
    }

    async fn delete_teamspace(&self, teamspace_id: TeamspaceId) -> Result<(), AuthFailure> {
        sqlx::query("DELETE FROM teamspaces WHERE teamspace_id = $1")
            .bind(teamspace_id.to_string())
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
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
        let record = ChannelRecord {
            id: ChannelId::new(),
            teamspace_id,
            slug: slug.clone(),
            name: name.clone(),
            created_at_unix: now_unix,
        };
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        if !insert_channel_row(&mut tx, &record)
            .await
            .map_err(|_| AuthFailure::Internal)?
        {
            return Ok(None);
        }
        upsert_channel_member(&mut tx, record.id, creator, ChannelRole::Owner)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)?;
        Ok(Some(record))
    }

    async fn find_channel_by_slug(
        &self,
        teamspace_id: TeamspaceId,
        slug: &Slug,
    ) -> Result<Option<ChannelRecord>, AuthFailure> {
        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE teamspace_id = $1 AND slug = $2"
        ))
        .bind(teamspace_id.to_string())
        .bind(slug.as_str())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(channel_from_row).transpose()
    }

    async fn find_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelRecord>, AuthFailure> {
        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE channel_id = $1"
        ))
        .bind(channel_id.to_string())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(channel_from_row).transpose()
    }

    async fn list_channels(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Vec<ChannelRecord>, AuthFailure> {
        let rows = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE teamspace_id = $1 ORDER BY slug"
        ))
        .bind(teamspace_id.to_string())
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        rows.iter().map(channel_from_row).collect()
    }

    async fn teamspace_role(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
    ) -> Result<Option<TeamspaceRole>, AuthFailure> {
        let row = sqlx::query(
            "SELECT role FROM teamspace_members WHERE teamspace_id = $1 AND user_id = $2",
        )
        .bind(teamspace_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.try_get("role").map_err(|_| AuthFailure::Internal)?;
        parse_teamspace_role(&role)
            .map(Some)
            .ok_or(AuthFailure::Internal)
    }

    async fn channel_role(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<ChannelRole>, AuthFailure> {
        let row =
            sqlx::query("SELECT role FROM channel_members WHERE channel_id = $1 AND user_id = $2")
                .bind(channel_id.to_string())
                .bind(user_id.to_string())
                .fetch_optional(self.pool)
                .await
                .map_err(|_| AuthFailure::Internal)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.try_get("role").map_err(|_| AuthFailure::Internal)?;
        parse_channel_role(&role)
            .map(Some)
            .ok_or(AuthFailure::Internal)
    }

    async fn list_teamspace_members(
        &self,
        teamspace_id: TeamspaceId,
    ) -> Result<Vec<MemberRecord<TeamspaceRole>>, AuthFailure> {
        let rows = sqlx::query(
            "SELECT u.user_id, u.email, u.display_name, m.role
             FROM teamspace_members m
             JOIN users u ON u.user_id = m.user_id
             WHERE m.teamspace_id = $1
             ORDER BY u.email",
        )
        .bind(teamspace_id.to_string())
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        rows.iter()
            .map(|row| member_from_row(row, parse_teamspace_role))
            .collect()
    }

    async fn list_channel_members(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<MemberRecord<ChannelRole>>, AuthFailure> {
        let rows = sqlx::query(
            "SELECT u.user_id, u.email, u.display_name, m.role
             FROM channel_members m
             JOIN users u ON u.user_id = m.user_id
             WHERE m.channel_id = $1
             ORDER BY u.email",
        )
        .bind(channel_id.to_string())
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        rows.iter()
            .map(|row| member_from_row(row, parse_channel_role))
            .collect()
    }

    async fn set_teamspace_role(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
        role: TeamspaceRole,
        actor_role: TeamspaceRole,
    ) -> Result<(), AuthFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        let members = lock_teamspace_members(&mut tx, teamspace_id).await?;
        if !user_exists(&mut tx, user_id).await? {
            return Err(AuthFailure::NotFound);
        }
        let current = current_role(&members, user_id);
        if !may_change_membership(actor_role, current, Some(role)) {
            return Err(AuthFailure::NotFound);
        }
        if strands_scope(
            current,
            Some(role),
            count_role(&members, TeamspaceRole::Owner),
        ) {
            return Err(AuthFailure::LastOwner);
        }
        upsert_teamspace_member(&mut tx, teamspace_id, user_id, role)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)
    }

    async fn remove_teamspace_member(
        &self,
        teamspace_id: TeamspaceId,
        user_id: UserId,
        actor_role: TeamspaceRole,
    ) -> Result<bool, AuthFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        let members = lock_teamspace_members(&mut tx, teamspace_id).await?;
        let current = current_role(&members, user_id);
        if current.is_none() {
            return Ok(false);
        }
        if !may_change_membership(actor_role, current, None) {
            return Err(AuthFailure::NotFound);
        }
        if strands_scope(current, None, count_role(&members, TeamspaceRole::Owner)) {
            return Err(AuthFailure::LastOwner);
        }
        for channel_id in owned_channels(&mut tx, teamspace_id, user_id).await? {
            let channel_members = lock_channel_members(&mut tx, channel_id).await?;
            if strands_scope(
                Some(ChannelRole::Owner),
                None,
                count_role(&channel_members, ChannelRole::Owner),
            ) {
                return Err(AuthFailure::LastOwner);
            }
        }
        sqlx::query("DELETE FROM teamspace_members WHERE teamspace_id = $1 AND user_id = $2")
            .bind(teamspace_id.to_string())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        sqlx::query(
            "DELETE FROM channel_members
             WHERE user_id = $2
               AND channel_id IN (SELECT channel_id FROM channels WHERE teamspace_id = $1)",
        )
        .bind(teamspace_id.to_string())
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)?;
        Ok(true)
    }

    async fn set_channel_role(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        role: ChannelRole,
    ) -> Result<(), AuthFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        let members = lock_channel_members(&mut tx, channel_id).await?;
        if !user_exists(&mut tx, user_id).await? {
            return Err(AuthFailure::NotFound);
        }
        let current = current_role(&members, user_id);
        if strands_scope(current, Some(role), count_role(&members, ChannelRole::Owner)) {
            return Err(AuthFailure::LastOwner);
        }
        upsert_channel_member(&mut tx, channel_id, user_id, role)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)
    }

    async fn remove_channel_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<bool, AuthFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        let members = lock_channel_members(&mut tx, channel_id).await?;
        let current = current_role(&members, user_id);
        if current.is_none() {
            return Ok(false);
        }
        if strands_scope(current, None, count_role(&members, ChannelRole::Owner)) {
            return Err(AuthFailure::LastOwner);
        }
        sqlx::query("DELETE FROM channel_members WHERE channel_id = $1 AND user_id = $2")
            .bind(channel_id.to_string())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)?;
        Ok(true)
    }

    async fn insert_invitation(&self, invitation: &InvitationRecord) -> Result<(), AuthFailure> {
        sqlx::query(
            "INSERT INTO invitations (invitation_id, token_hash, teamspace_id, channel_id, email,
                 scope_kind, role, status, expires_at_unix, attempts, max_attempts,
                 created_by_user_id, accepted_by_user_id, created_at_unix)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NULL, $13)",
        )
        .bind(invitation.id.to_string())
        .bind(&invitation.token_hash)
        .bind(invitation.teamspace_id.to_string())
        .bind(invitation.channel_id.map(|id| id.to_string()))
        .bind(invitation.email.as_str())
        .bind(invitation.role.kind().as_str())
        .bind(invitation.role.as_str())
        .bind(invitation.status.as_str())
        .bind(invitation.expires_at_unix)
        .bind(i32::try_from(invitation.attempts).unwrap_or(i32::MAX))
        .bind(i32::try_from(invitation.max_attempts).unwrap_or(i32::MAX))
        .bind(invitation.created_by.to_string())
        .bind(invitation.created_at_unix)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<InvitationRecord>, AuthFailure> {
        let row = sqlx::query(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn find_invitation(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Option<InvitationRecord>, AuthFailure> {
        let row = sqlx::query(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE invitation_id = $1"
        ))
        .bind(invitation_id.to_string())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn record_invitation_failure(
        &self,
        invitation_id: InvitationId,
    ) -> Result<(), AuthFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        Self::bump_attempts(&mut tx, invitation_id)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)
    }

    async fn list_pending_invitations(
        &self,
        teamspace_id: TeamspaceId,
        now_unix: i64,
    ) -> Result<Vec<InvitationRecord>, AuthFailure> {
        let rows = sqlx::query(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations
             WHERE teamspace_id = $1 AND status = 'pending' AND expires_at_unix >= $2
             ORDER BY created_at_unix, invitation_id"
        ))
        .bind(teamspace_id.to_string())
        .bind(now_unix)
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        rows.iter().map(invitation_from_row).collect()
    }

    async fn revoke_invitation(&self, invitation_id: InvitationId) -> Result<bool, AuthFailure> {
        let result = sqlx::query(
            "UPDATE invitations SET status = 'revoked'
             WHERE invitation_id = $1 AND status = 'pending'",
        )
        .bind(invitation_id.to_string())
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(result.rows_affected() > 0)
    }

    #[allow(clippy::too_many_lines)]
    async fn accept_invitation(
        &self,
        acceptance: &InvitationAcceptance<'_>,
    ) -> Result<AcceptedInvitation, InvitationError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|_| InvitationError::Internal)?;
        let row = sqlx::query(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token_hash = $1 FOR UPDATE"
        ))
        .bind(acceptance.token_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| InvitationError::Internal)?;
        let Some(row) = row else {
            return Err(InvitationError::Rejected(InvitationRejection::UnknownToken));
        };
        let record = invitation_from_row(&row).map_err(|_| InvitationError::Internal)?;
        if matches!(record.role, ScopedRole::Channel(_)) != record.channel_id.is_some() {
            return Err(InvitationError::Internal);
        }

        let existing_account = sqlx::query("SELECT user_id FROM users WHERE email = $1")
            .bind(record.email.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|_| InvitationError::Internal)?
            .map(|row| row.try_get::<String, _>("user_id"))
            .transpose()
            .map_err(|_| InvitationError::Internal)?
            .map(UserId::try_from)
            .transpose()
            .map_err(|_| InvitationError::Internal)?;

        if let Err(error) = check_acceptance(
            &record,
            acceptance.acceptor,
            existing_account,
            acceptance.now_unix,
        ) {
            if error.counts_as_attempt() {
                Self::bump_attempts(&mut tx, record.id)
                    .await
                    .map_err(|_| InvitationError::Internal)?;
                tx.commit().await.map_err(|_| InvitationError::Internal)?;
            }
            return Err(error);
        }

        let (user_id, created_user) = match acceptance.acceptor {
            Acceptor::Existing { user_id, .. } => (user_id, false),
            Acceptor::New {
                display_name,
                password_hash,
            } => {
                let user_id = UserId::new();
                let created = insert_user_row(
                    &mut tx,
                    user_id,
                    &record.email,
                    display_name,
                    password_hash,
                    acceptance.now_unix,
                )
                .await
                .map_err(|_| InvitationError::Internal)?;
                if !created {
                    return Err(InvitationError::RequiresAuthentication);
                }
                (user_id, true)
            }
        };

        let current_teamspace = sqlx::query(
            "SELECT role FROM teamspace_members WHERE teamspace_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(record.teamspace_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| InvitationError::Internal)?
        .map(|row| row.try_get::<String, _>("role"))
        .transpose()
        .map_err(|_| InvitationError::Internal)?
        .map(|role| parse_teamspace_role(&role).ok_or(InvitationError::Internal))
        .transpose()?;
        let current_channel = match record.channel_id {
            Some(channel_id) => sqlx::query(
                "SELECT role FROM channel_members WHERE channel_id = $1 AND user_id = $2 FOR UPDATE",
            )
            .bind(channel_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|_| InvitationError::Internal)?
            .map(|row| row.try_get::<String, _>("role"))
            .transpose()
            .map_err(|_| InvitationError::Internal)?
            .map(|role| parse_channel_role(&role).ok_or(InvitationError::Internal))
            .transpose()?,
            None => None,
        };

        let grant = membership_grant(record.role, current_teamspace, current_channel);
        if let Some(role) = grant.teamspace {
            upsert_teamspace_member(&mut tx, record.teamspace_id, user_id, role)
                .await
                .map_err(|_| InvitationError::Internal)?;
        }
        if let (Some(role), Some(channel_id)) = (grant.channel, record.channel_id) {
            upsert_channel_member(&mut tx, channel_id, user_id, role)
                .await
                .map_err(|_| InvitationError::Internal)?;
        }

        let consumed = sqlx::query(
            "UPDATE invitations
             SET status = 'accepted', accepted_by_user_id = $2, accepted_at_unix = $3
             WHERE invitation_id = $1 AND status = 'pending'",
        )
        .bind(record.id.to_string())
        .bind(user_id.to_string())
        .bind(acceptance.now_unix)
        .execute(&mut *tx)
        .await
        .map_err(|_| InvitationError::Internal)?;
        if consumed.rows_affected() == 0 {
            return Err(InvitationError::Rejected(
                InvitationRejection::AlreadyAccepted,
            ));
        }

        insert_session_row(
            &mut tx,
            acceptance.session.token_hash,
            user_id,
            acceptance.session.expires_at_unix,
            acceptance.now_unix,
        )
        .await
        .map_err(|_| InvitationError::Internal)?;
        tx.commit().await.map_err(|_| InvitationError::Internal)?;

        Ok(AcceptedInvitation {
            invitation_id: record.id,
            user_id,
            teamspace_id: record.teamspace_id,
            channel_id: record.channel_id,
            created_user,
        })
    }

    async fn bootstrap(&self, setup: &SetupBootstrap<'_>) -> Result<BootstrapRecord, SetupFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| SetupFailure::Internal)?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SETUP_LOCK_ID)
            .execute(&mut *tx)
            .await
            .map_err(|_| SetupFailure::Internal)?;

        let row = sqlx::query("SELECT COUNT(*) AS user_count FROM users")
            .fetch_one(&mut *tx)
            .await
            .map_err(|_| SetupFailure::Internal)?;
        let user_count: i64 = row
            .try_get("user_count")
            .map_err(|_| SetupFailure::Internal)?;
        if user_count > 0 {
            return Err(SetupFailure::UsersExist);
        }

        let user_id = UserId::new();
        let teamspace = TeamspaceRecord {
            id: TeamspaceId::new(),
            slug: setup.teamspace_slug.clone(),
            name: setup.teamspace_name.clone(),
            created_at_unix: setup.now_unix,
        };
        let channel = ChannelRecord {
            id: ChannelId::new(),
            teamspace_id: teamspace.id,
            slug: setup.channel_slug.clone(),
            name: setup.channel_name.clone(),
            created_at_unix: setup.now_unix,
        };

        let result: Result<bool, sqlx::Error> = async {
            let created = insert_user_row(
                &mut tx,
                user_id,
                setup.email,
                setup.display_name,
                setup.password_hash,
                setup.now_unix,
            )
            .await?
                && insert_teamspace_row(&mut tx, &teamspace).await?;
            if !created {
                return Ok(false);
            }
            upsert_teamspace_member(&mut tx, teamspace.id, user_id, TeamspaceRole::Owner).await?;
            if !insert_channel_row(&mut tx, &channel).await? {
                return Ok(false);
            }
            upsert_channel_member(&mut tx, channel.id, user_id, ChannelRole::Owner).await?;
            insert_session_row(
                &mut tx,
                setup.session.token_hash,
                user_id,
                setup.session.expires_at_unix,
                setup.now_unix,
            )
            .await?;
            Ok(true)
        }
        .await;
        match result {
            Ok(true) => {}
            Ok(false) | Err(_) => return Err(SetupFailure::Internal),
        }
        tx.commit().await.map_err(|_| SetupFailure::Internal)?;

        Ok(BootstrapRecord {
            user_id,
            teamspace,
            channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::attempt_count;
    use crate::server::errors::AuthFailure;

    #[test]
    fn negative_attempt_counters_are_decode_errors() {
        assert_eq!(attempt_count(0).ok(), Some(0));
        assert_eq!(attempt_count(3).ok(), Some(3));
        assert!(matches!(attempt_count(-1), Err(AuthFailure::Internal)));
    }
}
