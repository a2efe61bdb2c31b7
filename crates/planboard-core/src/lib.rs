#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Slug of the implicit teamspace used by single-tenant deployments.
pub const RESERVED_TEAMSPACE_SLUG: &str = "default";
pub const INVITATION_TOKEN_BYTES: usize = 32;
pub const INVITATION_TOKEN_CHARS: usize = INVITATION_TOKEN_BYTES * 2;
pub const DEFAULT_INVITATION_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INVITATION_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("name is invalid")]
    InvalidName,
    #[error("slug is invalid")]
    InvalidSlug,
    #[error("slug is reserved")]
    ReservedSlug,
    #[error("email is invalid")]
    InvalidEmail,
    #[error("display name is invalid")]
    InvalidDisplayName,
    #[error("identifier is invalid")]
    InvalidId,
    #[error("role is invalid for this scope")]
    InvalidRole,
    #[error("scope kind is invalid")]
    InvalidScopeKind,
    #[error("invitation status is invalid")]
    InvalidInvitationStatus,
}

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::try_from(value.as_str())
            }
        }

        impl TryFrom<&str> for $name {
            type Error = DomainError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                let parsed = Ulid::from_string(value).map_err(|_| DomainError::InvalidId)?;
                Ok(Self(parsed))
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(UserId);
ulid_id!(TeamspaceId);
ulid_id!(
    /// Identifier of a channel. "Project" in older parts of the product refers to the same entity.
    ChannelId
);
ulid_id!(InvitationId);

/// Lowercased, trimmed email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Email(String);

impl Email {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        validate_email(&normalized)?;
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DisplayName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if !(1..=64).contains(&trimmed.chars().count()) || trimmed.chars().any(char::is_control) {
            return Err(DomainError::InvalidDisplayName);
        }
        Ok(Self(trimmed.to_owned()))
    }
}

/// Human readable name of a teamspace or channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeName(String);

impl ScopeName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ScopeName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 64)?;
        Ok(Self(value))
    }
}

/// URL-safe identifier of a teamspace (globally unique) or channel (unique per teamspace).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slug(String);

impl Slug {
    #[must_use]
    pub fn reserved_teamspace() -> Self {
        Self(String::from(RESERVED_TEAMSPACE_SLUG))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_reserved_teamspace(&self) -> bool {
        self.0 == RESERVED_TEAMSPACE_SLUG
    }
}

impl TryFrom<String> for Slug {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_slug(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for Slug {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Teamspace,
    Channel,
}

impl ScopeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Teamspace => "teamspace",
            Self::Channel => "channel",
        }
    }
}

/// A role drawn from the closed, ranked enumeration of one scope kind.
pub trait HierarchyRole: Copy + Eq + 'static {
    const SCOPE: ScopeKind;
    const ALL: &'static [Self];

    fn rank(self) -> u8;

    fn as_str(self) -> &'static str;

    /// The role that must always be held by at least one member of a scope.
    fn top() -> Self;

    #[must_use]
    fn satisfies(self, required: Self) -> bool {
        self.rank() >= required.rank()
    }

    #[must_use]
    fn max_by_rank(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamspaceRole {
    Viewer,
    Editor,
    Admin,
    Owner,
}

impl HierarchyRole for TeamspaceRole {
    const SCOPE: ScopeKind = ScopeKind::Teamspace;
    const ALL: &'static [Self] = &[Self::Viewer, Self::Editor, Self::Admin, Self::Owner];

    fn rank(self) -> u8 {
        match self {
            Self::Viewer => 1,
            Self::Editor => 2,
            Self::Admin => 3,
            Self::Owner => 4,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    fn top() -> Self {
        Self::Owner
    }
}

impl TryFrom<&str> for TeamspaceRole {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            _ => Err(DomainError::InvalidRole),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Viewer,
    Editor,
    Owner,
}

impl HierarchyRole for ChannelRole {
    const SCOPE: ScopeKind = ScopeKind::Channel;
    const ALL: &'static [Self] = &[Self::Viewer, Self::Editor, Self::Owner];

    fn rank(self) -> u8 {
        match self {
            Self::Viewer => 1,
            Self::Editor => 2,
            Self::Owner => 3,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Owner => "owner",
        }
    }

    fn top() -> Self {
        Self::Owner
    }
}

impl TryFrom<&str> for ChannelRole {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "owner" => Ok(Self::Owner),
            _ => Err(DomainError::InvalidRole),
        }
    }
}

/// A role tagged with the scope kind it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopedRole {
    Teamspace(TeamspaceRole),
    Channel(ChannelRole),
}

impl ScopedRole {
    /// Parses `role` within `kind`. Unknown values are rejected, never coerced.
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidRole`] when `role` is not a member of the scope's enumeration.
    pub fn parse(kind: ScopeKind, role: &str) -> Result<Self, DomainError> {
        match kind {
            ScopeKind::Teamspace => TeamspaceRole::try_from(role).map(Self::Teamspace),
            ScopeKind::Channel => ChannelRole::try_from(role).map(Self::Channel),
        }
    }

    #[must_use]
    pub const fn kind(self) -> ScopeKind {
        match self {
            Self::Teamspace(_) => ScopeKind::Teamspace,
            Self::Channel(_) => ScopeKind::Channel,
        }
    }

    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Teamspace(role) => role.rank(),
            Self::Channel(role) => role.rank(),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teamspace(role) => role.as_str(),
            Self::Channel(role) => role.as_str(),
        }
    }
}

/// Rank of a role identifier within a scope kind.
///
/// # Errors
/// Returns [`DomainError::InvalidRole`] for identifiers outside the scope's enumeration.
pub fn rank(kind: ScopeKind, role: &str) -> Result<u8, DomainError> {
    ScopedRole::parse(kind, role).map(ScopedRole::rank)
}

/// Channel role every member of a teamspace holds in each of its channels.
#[must_use]
pub const fn implied_channel_role(teamspace_role: TeamspaceRole) -> ChannelRole {
    match teamspace_role {
        TeamspaceRole::Owner | TeamspaceRole::Admin => ChannelRole::Owner,
        TeamspaceRole::Editor => ChannelRole::Editor,
        TeamspaceRole::Viewer => ChannelRole::Viewer,
    }
}

/// Higher of the direct channel grant and the role implied by the teamspace membership.
#[must_use]
pub fn effective_channel_role(
    teamspace_role: TeamspaceRole,
    direct: Option<ChannelRole>,
) -> ChannelRole {
    let implied = implied_channel_role(teamspace_role);
    direct.map_or(implied, |direct| implied.max_by_rank(direct))
}

/// Single role granted to a user at the most specific scope that was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveRole {
    Teamspace(TeamspaceRole),
    Channel {
        teamspace: TeamspaceRole,
        channel: ChannelRole,
    },
}

impl EffectiveRole {
    #[must_use]
    pub const fn teamspace_role(self) -> TeamspaceRole {
        match self {
            Self::Teamspace(role) | Self::Channel { teamspace: role, .. } => role,
        }
    }

    #[must_use]
    pub const fn channel_role(self) -> Option<ChannelRole> {
        match self {
            Self::Teamspace(_) => None,
            Self::Channel { channel, .. } => Some(channel),
        }
    }

    #[must_use]
    pub fn as_scoped(self) -> ScopedRole {
        match self {
            Self::Teamspace(role) => ScopedRole::Teamspace(role),
            Self::Channel { channel, .. } => ScopedRole::Channel(channel),
        }
    }
}

/// Stored invitation status. Expiry and lockout are derived, see [`InvitationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
}

impl InvitationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Revoked => "revoked",
        }
    }
}

impl TryFrom<&str> for InvitationStatus {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "revoked" => Ok(Self::Revoked),
            _ => Err(DomainError::InvalidInvitationStatus),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationState {
    Pending,
    Accepted,
    Revoked,
    Expired,
    Locked,
}

impl InvitationState {
    #[must_use]
    pub fn evaluate(
        status: InvitationStatus,
        expires_at_unix: i64,
        attempts: u32,
        max_attempts: u32,
        now_unix: i64,
    ) -> Self {
        match status {
            InvitationStatus::Accepted => Self::Accepted,
            InvitationStatus::Revoked => Self::Revoked,
            InvitationStatus::Pending if now_unix > expires_at_unix => Self::Expired,
            InvitationStatus::Pending if attempts >= max_attempts => Self::Locked,
            InvitationStatus::Pending => Self::Pending,
        }
    }

    #[must_use]
    pub const fn is_acceptable(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// True when `value` is exactly 64 lowercase hexadecimal characters.
#[must_use]
pub fn is_invitation_token_format(value: &str) -> bool {
    value.len() == INVITATION_TOKEN_CHARS
        && value
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

fn validate_email(value: &str) -> Result<(), DomainError> {
    if !(3..=254).contains(&value.len()) {
        return Err(DomainError::InvalidEmail);
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(DomainError::InvalidEmail);
    }
    let Some((local, domain)) = value.split_once('@') else {
        return Err(DomainError::InvalidEmail);
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(DomainError::InvalidEmail);
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(DomainError::InvalidEmail);
    }
    Ok(())
}

fn validate_name(value: &str, min: usize, max: usize) -> Result<(), DomainError> {
    if !(min..=max).contains(&value.len()) {
        return Err(DomainError::InvalidName);
    }

    if value.trim().is_empty() {
        return Err(DomainError::InvalidName);
    }

    if value.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Ok(());
    }

    Err(DomainError::InvalidName)
}

fn validate_slug(value: &str) -> Result<(), DomainError> {
    if !(1..=48).contains(&value.len()) {
        return Err(DomainError::InvalidSlug);
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(DomainError::InvalidSlug);
    }
    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Ok(());
    }
    Err(DomainError::InvalidSlug)
}

#[cfg(test)]
mod tests {
    use super::{
        effective_channel_role, implied_channel_role, is_invitation_token_format, rank,
        ChannelRole, DisplayName, DomainError, Email, EffectiveRole, HierarchyRole,
        InvitationState, InvitationStatus, ScopeKind, ScopeName, ScopedRole, Slug,
        TeamspaceRole, UserId,
    };

    #[test]
    fn rank_tables_match_documented_ordinals() {
        assert_eq!(rank(ScopeKind::Channel, "viewer"), Ok(1));
        assert_eq!(rank(ScopeKind::Channel, "editor"), Ok(2));
        assert_eq!(rank(ScopeKind::Channel, "owner"), Ok(3));
        assert_eq!(rank(ScopeKind::Teamspace, "viewer"), Ok(1));
        assert_eq!(rank(ScopeKind::Teamspace, "editor"), Ok(2));
        assert_eq!(rank(ScopeKind::Teamspace, "admin"), Ok(3));
        assert_eq!(rank(ScopeKind::Teamspace, "owner"), Ok(4));
    }

    #[test]
    fn unknown_roles_are_rejected_not_coerced() {
        assert_eq!(rank(ScopeKind::Channel, "admin"), Err(DomainError::InvalidRole));
        assert_eq!(rank(ScopeKind::Teamspace, "Owner"), Err(DomainError::InvalidRole));
        assert_eq!(
            ScopedRole::parse(ScopeKind::Teamspace, ""),
            Err(DomainError::InvalidRole)
        );
    }

    #[test]
    fn satisfies_agrees_with_rank_for_every_teamspace_pair() {
        for actual in TeamspaceRole::ALL {
            for required in TeamspaceRole::ALL {
                assert_eq!(
                    actual.satisfies(*required),
                    actual.rank() >= required.rank(),
                    "{actual:?} vs {required:?}"
                );
            }
        }
    }

    #[test]
    fn satisfies_agrees_with_rank_for_every_channel_pair() {
        for actual in ChannelRole::ALL {
            for required in ChannelRole::ALL {
                assert_eq!(
                    actual.satisfies(*required),
                    actual.rank() >= required.rank(),
                    "{actual:?} vs {required:?}"
                );
            }
        }
    }

    #[test]
    fn role_strings_round_trip_through_scoped_parse() {
        for role in TeamspaceRole::ALL {
            assert_eq!(
                ScopedRole::parse(ScopeKind::Teamspace, role.as_str()),
                Ok(ScopedRole::Teamspace(*role))
            );
        }
        for role in ChannelRole::ALL {
            let parsed = ScopedRole::parse(ScopeKind::Channel, role.as_str()).unwrap();
            assert_eq!(parsed.kind(), ScopeKind::Channel);
            assert_eq!(parsed.rank(), role.rank());
        }
    }

    #[test]
    fn teamspace_admins_and_owners_imply_channel_owner() {
        assert_eq!(implied_channel_role(TeamspaceRole::Owner), ChannelRole::Owner);
        assert_eq!(implied_channel_role(TeamspaceRole::Admin), ChannelRole::Owner);
        assert_eq!(implied_channel_role(TeamspaceRole::Editor), ChannelRole::Editor);
        assert_eq!(implied_channel_role(TeamspaceRole::Viewer), ChannelRole::Viewer);

        for direct in [None, Some(ChannelRole::Viewer), Some(ChannelRole::Editor)] {
            assert_eq!(
                effective_channel_role(TeamspaceRole::Admin, direct),
                ChannelRole::Owner
            );
            assert_eq!(
                effective_channel_role(TeamspaceRole::Owner, direct),
                ChannelRole::Owner
            );
        }
    }

    #[test]
    fn direct_channel_grant_can_promote_teamspace_viewer() {
        assert_eq!(
            effective_channel_role(TeamspaceRole::Viewer, Some(ChannelRole::Owner)),
            ChannelRole::Owner
        );
        assert_eq!(
            effective_channel_role(TeamspaceRole::Viewer, Some(ChannelRole::Editor)),
            ChannelRole::Editor
        );
        assert_eq!(
            effective_channel_role(TeamspaceRole::Editor, Some(ChannelRole::Viewer)),
            ChannelRole::Editor
        );
        assert_eq!(
            effective_channel_role(TeamspaceRole::Viewer, None),
            ChannelRole::Viewer
        );
    }

    #[test]
    fn effective_role_exposes_both_levels() {
        let role = EffectiveRole::Channel {
            teamspace: TeamspaceRole::Viewer,
            channel: ChannelRole::Editor,
        };
        assert_eq!(role.teamspace_role(), TeamspaceRole::Viewer);
        assert_eq!(role.channel_role(), Some(ChannelRole::Editor));
        assert_eq!(role.as_scoped(), ScopedRole::Channel(ChannelRole::Editor));
        assert_eq!(
            EffectiveRole::Teamspace(TeamspaceRole::Admin).channel_role(),
            None
        );
    }

    #[test]
    fn invitation_state_machine_orders_checks() {
        let now = 1_000;
        assert_eq!(
            InvitationState::evaluate(InvitationStatus::Pending, now + 10, 0, 3, now),
            InvitationState::Pending
        );
        assert_eq!(
            InvitationState::evaluate(InvitationStatus::Pending, now, 0, 3, now),
            InvitationState::Pending
        );
        assert_eq!(
            InvitationState::evaluate(InvitationStatus::Pending, now - 1, 0, 3, now),
            InvitationState::Expired
        );
        assert_eq!(
            InvitationState::evaluate(InvitationStatus::Pending, now + 10, 3, 3, now),
            InvitationState::Locked
        );
        assert_eq!(
            InvitationState::evaluate(InvitationStatus::Accepted, now + 10, 0, 3, now),
            InvitationState::Accepted
        );
        assert_eq!(
            InvitationState::evaluate(InvitationStatus::Revoked, now + 10, 0, 3, now),
            InvitationState::Revoked
        );
        assert!(!InvitationState::Locked.is_acceptable());
    }

    #[test]
    fn invitation_token_format_requires_64_lowercase_hex() {
        assert!(is_invitation_token_format(&"a1".repeat(32)));
        assert!(!is_invitation_token_format(&"A1".repeat(32)));
        assert!(!is_invitation_token_format(&"a1".repeat(31)));
        assert!(!is_invitation_token_format(&"g1".repeat(32)));
        assert!(!is_invitation_token_format(""));
    }

    #[test]
    fn email_is_normalized_and_validated() {
        let email = Email::try_from(String::from("  Alice@Example.COM ")).unwrap();
        assert_eq!(email.as_str(), "alice@example.com");
        for bad in ["alice", "@example.com", "alice@", "a@b@c.com", "al ice@x.com", "a@localhost"] {
            assert_eq!(
                Email::try_from(bad.to_owned()).unwrap_err(),
                DomainError::InvalidEmail,
                "{bad}"
            );
        }
    }

    #[test]
    fn slugs_and_names_enforce_bounds() {
        assert_eq!(Slug::try_from("video-team-2").unwrap().as_str(), "video-team-2");
        assert!(Slug::try_from("Video").is_err());
        assert!(Slug::try_from("-lead").is_err());
        assert!(Slug::try_from("a".repeat(49).as_str()).is_err());
        assert!(Slug::reserved_teamspace().is_reserved_teamspace());
        assert!(!Slug::try_from("studio").unwrap().is_reserved_teamspace());

        assert!(ScopeName::try_from(String::from("Launch Videos")).is_ok());
        assert!(ScopeName::try_from(String::from("   ")).is_err());
        assert!(DisplayName::try_from(String::from(" Ada ")).unwrap().as_str() == "Ada");
        assert!(DisplayName::try_from(String::from("bad\u{7}")).is_err());
    }

    #[test]
    fn user_id_round_trip_and_parse_validation() {
        let id = UserId::new();
        let parsed = UserId::try_from(id.to_string()).unwrap();
        assert_eq!(id, parsed);

        let invalid = UserId::try_from(String::from("not-a-ulid")).unwrap_err();
        assert_eq!(invalid, DomainError::InvalidId);
    }

    fn assert_ladder<R: HierarchyRole + std::fmt::Debug>() {
        let ranks: Vec<u8> = R::ALL.iter().map(|role| role.rank()).collect();
        assert!(ranks.windows(2).all(|pair| pair[0] < pair[1]), "{ranks:?}");
        assert_eq!(R::ALL.last().copied(), Some(R::top()));
    }

    #[test]
    fn every_ladder_ascends_to_its_top_role() {
        assert_ladder::<TeamspaceRole>();
        assert_ladder::<ChannelRole>();
    }
}
