use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{CentralService, validation};
use crate::error::Result;
use crate::model::{Blacklist, BlacklistUpdate, NewBlacklist, RequestContext};

impl CentralService {
    pub async fn create_blacklist(
        &self,
        ctx: &RequestContext,
        new: NewBlacklist,
    ) -> Result<Blacklist> {
        self.require_admin(ctx, "create_blacklist")?;
        validation::blacklist_pattern(&new.pattern)?;

        let blacklist = self
            .storage
            .create_blacklist(Blacklist {
                id: Uuid::new_v4(),
                pattern: new.pattern,
                description: new.description,
                created_at: Utc::now(),
                updated_at: None,
            })
            .await?;
        info!("Added blacklist {} ({})", blacklist.pattern, blacklist.id);
        Ok(blacklist)
    }

    pub async fn get_blacklist(&self, ctx: &RequestContext, id: Uuid) -> Result<Blacklist> {
        self.require_admin(ctx, "get_blacklist")?;
        Ok(self.storage.get_blacklist(id).await?)
    }

    pub async fn find_blacklists(&self, ctx: &RequestContext) -> Result<Vec<Blacklist>> {
        self.require_admin(ctx, "find_blacklists")?;
        Ok(self.storage.find_blacklists().await?)
    }

    pub async fn update_blacklist(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: BlacklistUpdate,
    ) -> Result<Blacklist> {
        self.require_admin(ctx, "update_blacklist")?;
        if let Some(pattern) = &update.pattern {
            validation::blacklist_pattern(pattern)?;
        }

        let mut blacklist = self.storage.get_blacklist(id).await?;
        if let Some(pattern) = update.pattern {
            blacklist.pattern = pattern;
        }
        if let Some(description) = update.description {
            blacklist.description = Some(description);
        }
        blacklist.updated_at = Some(Utc::now());

        Ok(self.storage.update_blacklist(blacklist).await?)
    }

    pub async fn delete_blacklist(&self, ctx: &RequestContext, id: Uuid) -> Result<Blacklist> {
        self.require_admin(ctx, "delete_blacklist")?;
        let blacklist = self.storage.delete_blacklist(id).await?;
        info!("Removed blacklist {} ({})", blacklist.pattern, blacklist.id);
        Ok(blacklist)
    }
}
