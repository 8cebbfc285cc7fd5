//! User registration.

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::domains::newsletter::alias::{email_alias, is_valid_user_id};
use crate::kernel::ServerDeps;

#[derive(Debug, Error)]
#[error("invalid user id {0:?}: expected lowercase hex digits and hyphens")]
pub struct InvalidUserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub user_id: String,
    pub email_alias: String,
    #[serde(skip)]
    pub created: bool,
}

/// Register a user and return their inbound alias.
///
/// Registering an existing user returns the stored alias unchanged.
pub async fn register_user(user_id: &str, deps: &ServerDeps) -> Result<Registration> {
    let user_id = user_id.trim().to_lowercase();
    if !is_valid_user_id(&user_id) {
        return Err(InvalidUserId(user_id).into());
    }

    let alias = email_alias(&user_id, &deps.alias_domain);
    let (user, created) = deps.users.register_user(&user_id, &alias).await?;

    if created {
        info!(user_id = %user.user_id, email_alias = %user.email_alias, "user registered");
    } else {
        info!(user_id = %user.user_id, "user already registered");
    }

    Ok(Registration {
        user_id: user.user_id,
        email_alias: user.email_alias,
        created,
    })
}
