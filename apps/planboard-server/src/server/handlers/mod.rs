pub(crate) mod auth;
pub(crate) mod invitations;
pub(crate) mod setup;
pub(crate) mod teamspaces;

pub(crate) use auth::*;
pub(crate) use invitations::*;
pub(crate) use setup::*;
pub(crate) use teamspaces::*;
