use anyhow::Result;
use async_trait::async_trait;
use reactor::{Filter, ReactionContext, Reactor, ReactorError};
use tracing::info;

use crate::domains::permissions::{Permission, PermissionGrant, SubjectKind};
use crate::kernel::FleetDeps;

pub struct PermissionGrantReactor;

#[async_trait]
impl Reactor<PermissionGrant, FleetDeps> for PermissionGrantReactor {
    async fn react(&self, event: &PermissionGrant, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let subject = format!("{} #{}", event.subject_kind.as_str(), event.subject_id);
        let filter = Filter::eq("subject_kind", event.subject_kind.as_str())
            .and_eq("subject_id", event.subject_id)
            .and_eq("permission", event.permission.as_str());
        let existing = deps.permissions.find_one(&filter).await?;

        if event.direction.is_forward() {
            if existing.is_some() {
                return Err(ReactorError::already_exists(format!(
                    "permission {} of {}",
                    event.permission, subject
                ))
                .into());
            }
            let known = match event.subject_kind {
                SubjectKind::User => deps.users.get_or_null(event.subject_id).await?.is_some(),
                SubjectKind::Group => deps.groups.get_or_null(event.subject_id).await?.is_some(),
                SubjectKind::Service => deps.services.get_or_null(event.subject_id).await?.is_some(),
            };
            if !known {
                return Err(ReactorError::not_exists(subject).into());
            }
            deps.permissions
                .insert(
                    ctx.context(),
                    &Permission {
                        subject_kind: event.subject_kind,
                        subject_id: event.subject_id,
                        permission: event.permission.clone(),
                    },
                )
                .await?;
            info!(%subject, permission = %event.permission, "permission granted");
        } else {
            let Some(grant) = existing else {
                return Err(ReactorError::not_exists(format!(
                    "permission {} of {}",
                    event.permission, subject
                ))
                .into());
            };
            deps.permissions.delete(ctx.context(), &grant).await?;
            info!(%subject, permission = %event.permission, "permission revoked");
        }
        Ok(())
    }
}
