use anyhow::Result;
use async_trait::async_trait;
use reactor::{Context, Corrector};

use crate::domains::servers::ChangeServerImage;
use crate::kernel::FleetDeps;

/// Records the current image in `was` so the change can be undone.
pub struct FillPreviousImage;

#[async_trait]
impl Corrector<ChangeServerImage, FleetDeps> for FillPreviousImage {
    async fn correct(&self, mut event: ChangeServerImage, deps: &FleetDeps, _ctx: &Context) -> Result<ChangeServerImage> {
        if event.was.is_none() {
            let server = deps.servers.get(event.server_id).await?;
            event.was = Some(server.with(|s| s.image.clone())?);
        }
        Ok(event)
    }
}
