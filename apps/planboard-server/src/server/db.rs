use super::{core::AppState, errors::AuthFailure};

const CREATE_USERS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS users (
                    user_id TEXT PRIMARY KEY,
                    email TEXT UNIQUE NOT NULL,
                    display_name TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    failed_logins SMALLINT NOT NULL DEFAULT 0,
                    locked_until_unix BIGINT NULL,
                    created_at_unix BIGINT NOT NULL
                )";
const CREATE_SESSIONS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS sessions (
                    token_hash BYTEA PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    expires_at_unix BIGINT NOT NULL,
                    created_at_unix BIGINT NOT NULL
                )";
const CREATE_TEAMSPACES_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS teamspaces (
                    teamspace_id TEXT PRIMARY KEY,
                    slug TEXT UNIQUE NOT NULL,
                    name TEXT NOT NULL,
                    created_at_unix BIGINT NOT NULL
                )";
const CREATE_TEAMSPACE_MEMBERS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS teamspace_members (
                    teamspace_id TEXT NOT NULL REFERENCES teamspaces(teamspace_id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    role TEXT NOT NULL CHECK (role IN ('viewer', 'editor', 'admin', 'owner')),
                    PRIMARY KEY(teamspace_id, user_id)
                )";
const CREATE_CHANNELS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS channels (
                    channel_id TEXT PRIMARY KEY,
                    teamspace_id TEXT NOT NULL REFERENCES teamspaces(teamspace_id) ON DELETE CASCADE,
                    slug TEXT NOT NULL,
                    name TEXT NOT NULL,
                    created_at_unix BIGINT NOT NULL,
                    UNIQUE(teamspace_id, slug)
                )";
const CREATE_CHANNEL_MEMBERS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS channel_members (
                    channel_id TEXT NOT NULL REFERENCES channels(channel_id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    role TEXT NOT NULL CHECK (role IN ('viewer', 'editor', 'owner')),
                    PRIMARY KEY(channel_id, user_id)
                )";
const CREATE_INVITATIONS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS invitations (
                    invitation_id TEXT PRIMARY KEY,
                    token_hash TEXT UNIQUE NOT NULL,
                    teamspace_id TEXT NOT NULL REFERENCES teamspaces(teamspace_id) ON DELETE CASCADE,
                    channel_id TEXT NULL REFERENCES channels(channel_id) ON DELETE CASCADE,
                    email TEXT NOT NULL,
                    scope_kind TEXT NOT NULL CHECK (scope_kind IN ('teamspace', 'channel')),
                    role TEXT NOT NULL,
                    status TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'revoked')),
                    expires_at_unix BIGINT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    max_attempts INTEGER NOT NULL CHECK (max_attempts >= 1),
                    created_by_user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    accepted_by_user_id TEXT NULL REFERENCES users(user_id) ON DELETE SET NULL,
                    accepted_at_unix BIGINT NULL,
                    created_at_unix BIGINT NOT NULL,
                    CHECK ((scope_kind = 'channel') = (channel_id IS NOT NULL))
                )";
const CREATE_SESSIONS_USER_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_sessions_user
                    ON sessions(user_id)";
const CREATE_SESSIONS_EXPIRY_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_sessions_expires
                    ON sessions(expires_at_unix)";
const CREATE_TEAMSPACE_MEMBERS_USER_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_teamspace_members_user
                    ON teamspace_members(user_id)";
const CREATE_INVITATIONS_PENDING_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_invitations_teamspace_status
                    ON invitations(teamspace_id, status, created_at_unix)";

/// Applied in order; referenced tables come first.
const SCHEMA_STATEMENTS: [&str; 11] = [
    CREATE_USERS_TABLE_SQL,
    CREATE_SESSIONS_TABLE_SQL,
    CREATE_TEAMSPACES_TABLE_SQL,
    CREATE_TEAMSPACE_MEMBERS_TABLE_SQL,
    CREATE_CHANNELS_TABLE_SQL,
    CREATE_CHANNEL_MEMBERS_TABLE_SQL,
    CREATE_INVITATIONS_TABLE_SQL,
    CREATE_SESSIONS_USER_INDEX_SQL,
    CREATE_SESSIONS_EXPIRY_INDEX_SQL,
    CREATE_TEAMSPACE_MEMBERS_USER_INDEX_SQL,
    CREATE_INVITATIONS_PENDING_INDEX_SQL,
];

pub(crate) async fn ensure_db_schema(state: &AppState) -> Result<(), AuthFailure> {
    const SCHEMA_INIT_LOCK_ID: i64 = 0x504c_414e_424f_4152;
    let Some(pool) = &state.db_pool else {
        return Ok(());
    };

    state
        .db_init
        .get_or_try_init(|| async move {
            let mut tx = pool.begin().await?;
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(SCHEMA_INIT_LOCK_ID)
                .execute(&mut *tx)
                .await?;

            for statement in SCHEMA_STATEMENTS {
                sqlx::query(statement).execute(&mut *tx).await?;
            }

            tx.commit().await?;

            Ok::<(), sqlx::Error>(())
        })
        .await
        .map_err(|e| {
            tracing::error!(event = "db.init", error = %e);
            AuthFailure::Internal
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        ensure_db_schema, CREATE_CHANNEL_MEMBERS_TABLE_SQL, CREATE_INVITATIONS_TABLE_SQL,
        CREATE_TEAMSPACE_MEMBERS_TABLE_SQL, SCHEMA_STATEMENTS,
    };
    use crate::server::core::{AppConfig, AppState};

    #[tokio::test]
    async fn schema_init_is_noop_and_idempotent_without_database_pool() {
        let state = AppState::new(&AppConfig::default()).expect("app state should initialize");
        ensure_db_schema(&state)
            .await
            .expect("schema init without database should succeed");
        ensure_db_schema(&state)
            .await
            .expect("schema init should be idempotent");
    }

    #[test]
    fn role_columns_are_constrained_to_the_closed_enumerations() {
        assert!(CREATE_TEAMSPACE_MEMBERS_TABLE_SQL
            .contains("CHECK (role IN ('viewer', 'editor', 'admin', 'owner'))"));
        assert!(CREATE_CHANNEL_MEMBERS_TABLE_SQL
            .contains("CHECK (role IN ('viewer', 'editor', 'owner'))"));
        assert!(CREATE_INVITATIONS_TABLE_SQL.contains("token_hash TEXT UNIQUE NOT NULL"));
    }

    #[test]
    fn tables_are_created_before_the_tables_that_reference_them() {
        let position = |table: &str| {
            SCHEMA_STATEMENTS
                .iter()
                .position(|sql| sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")))
                .expect("table should be declared")
        };
        assert!(position("users") < position("sessions"));
        assert!(position("teamspaces") < position("channels"));
        assert!(position("channels") < position("invitations"));
    }
}
