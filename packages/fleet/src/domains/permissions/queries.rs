use anyhow::Result;
use reactor::{Filter, Identity};

use crate::domains::permissions::{SubjectKind, ADMIN};
use crate::kernel::FleetDeps;

/// Permissions granted directly to one subject.
pub async fn granted(deps: &FleetDeps, kind: SubjectKind, id: i64) -> Result<Vec<String>> {
    let filter = Filter::eq("subject_kind", kind.as_str()).and_eq("subject_id", id);
    let mut names = Vec::new();
    for grant in deps.permissions.load_all(&filter).await? {
        names.push(grant.with(|p| p.permission.clone())?);
    }
    Ok(names)
}

async fn holds(deps: &FleetDeps, kind: SubjectKind, id: i64, permission: &str) -> Result<bool> {
    Ok(granted(deps, kind, id)
        .await?
        .iter()
        .any(|p| p == permission || p == ADMIN))
}

/// True if `identity` holds `permission`, directly, through one of its
/// groups, or by being an administrator.
pub async fn has_permission(deps: &FleetDeps, identity: Identity, permission: &str) -> Result<bool> {
    let user_id = match identity {
        Identity::System => return Ok(true),
        Identity::Anonymous => return Ok(false),
        Identity::Group(id) => return holds(deps, SubjectKind::Group, id, permission).await,
        Identity::Service(id) => return holds(deps, SubjectKind::Service, id, permission).await,
        Identity::User(id) => id,
    };

    if is_admin(deps, identity).await? {
        return Ok(true);
    }
    if holds(deps, SubjectKind::User, user_id, permission).await? {
        return Ok(true);
    }
    for membership in deps.members.load_all(&Filter::eq("user_id", user_id)).await? {
        let group_id = membership.with(|m| m.group_id)?;
        if holds(deps, SubjectKind::Group, group_id, permission).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// True for users flagged as administrators. Holders of the `admin`
/// permission are covered by [`has_permission`].
pub async fn is_admin(deps: &FleetDeps, identity: Identity) -> Result<bool> {
    let Some(user_id) = identity.user_id() else {
        return Ok(false);
    };
    match deps.users.get_or_null(user_id).await? {
        Some(user) => Ok(user.with(|u| u.admin)?),
        None => Ok(false),
    }
}
