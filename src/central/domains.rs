use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{CentralService, validation};
use crate::error::{CentralError, Result};
use crate::model::{
    Domain, DomainAction, DomainFilter, DomainStatus, DomainStatusReport, DomainUpdate,
    NewDomain, RequestContext,
};
use crate::serial::INITIAL_SERIAL;
use crate::storage::ZoneOp;

impl CentralService {
    pub async fn create_domain(&self, ctx: &RequestContext, new: NewDomain) -> Result<Domain> {
        let name = validation::zone_name(&new.name)?;
        validation::email(&new.email)?;
        let ttl = new.ttl.unwrap_or(self.options.default_ttl);
        validation::ttl(ttl, self.options.min_ttl)?;

        if !ctx.is_admin {
            self.check_blacklist(&name).await?;
        }
        self.check_parent_ownership(ctx, &name).await?;

        let domain = Domain {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id.clone(),
            name,
            email: new.email,
            ttl,
            serial: INITIAL_SERIAL,
            status: DomainStatus::Pending,
            action: DomainAction::Create,
            description: new.description,
            pool_id: self.options.default_pool_id,
            created_at: Utc::now(),
            updated_at: None,
        };

        let domain = self
            .storage
            .create_domain(domain, self.options.max_domains_per_tenant)
            .await?;
        info!(
            "Created domain {} ({}) for tenant {}",
            domain.name, domain.id, domain.tenant_id
        );

        self.propagation.schedule(&domain);
        Ok(domain)
    }

    pub async fn get_domain(&self, ctx: &RequestContext, id: Uuid) -> Result<Domain> {
        self.visible_domain(ctx, id).await
    }

    pub async fn find_domains(
        &self,
        ctx: &RequestContext,
        mut filter: DomainFilter,
    ) -> Result<Vec<Domain>> {
        if !(ctx.is_admin && ctx.all_tenants) {
            filter.tenant_id = Some(ctx.tenant_id.clone());
        }
        if let Some(name) = &filter.name {
            filter.name = Some(name.to_lowercase());
        }
        Ok(self.storage.find_domains(&filter).await?)
    }

    pub async fn count_domains(&self, ctx: &RequestContext) -> Result<usize> {
        let tenant = (!(ctx.is_admin && ctx.all_tenants)).then_some(ctx.tenant_id.as_str());
        Ok(self.storage.count_domains(tenant).await?)
    }

    pub async fn update_domain(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: DomainUpdate,
    ) -> Result<Domain> {
        if let Some(email) = &update.email {
            validation::email(email)?;
        }
        if let Some(ttl) = update.ttl {
            validation::ttl(ttl, self.options.min_ttl)?;
        }

        let (domain, ()) = self
            .mutate_zone(ctx, id, DomainAction::Update, |domain| {
                if let Some(email) = &update.email {
                    domain.email = email.clone();
                }
                if let Some(ttl) = update.ttl {
                    domain.ttl = ttl;
                }
                if let Some(description) = &update.description {
                    domain.description = Some(description.clone());
                }
                Ok((ZoneOp::None, ()))
            })
            .await?;

        info!("Updated domain {} at serial {}", domain.name, domain.serial);
        Ok(domain)
    }

    /// Logically delete a domain. The row disappears once enough name
    /// servers have dropped the zone.
    pub async fn delete_domain(&self, ctx: &RequestContext, id: Uuid) -> Result<Domain> {
        let (domain, ()) = self
            .mutate_zone(ctx, id, DomainAction::Delete, |_| Ok((ZoneOp::None, ())))
            .await?;

        info!(
            "Domain {} marked for deletion at serial {}",
            domain.name, domain.serial
        );
        Ok(domain)
    }

    pub async fn get_domain_status(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<DomainStatusReport> {
        let domain = self.visible_domain(ctx, id).await?;
        let targets = self.storage.get_target_statuses(id).await?;
        Ok(DomainStatusReport {
            domain_id: domain.id,
            serial: domain.serial,
            status: domain.status,
            action: domain.action,
            targets,
        })
    }

    async fn check_blacklist(&self, name: &str) -> Result<()> {
        for entry in self.storage.find_blacklists().await? {
            match validation::blacklist_pattern(&entry.pattern) {
                Ok(re) if re.is_match(name) => {
                    info!("Domain {} rejected by blacklist {}", name, entry.pattern);
                    return Err(CentralError::Blacklisted(name.to_string()));
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unusable blacklist {}: {}", entry.id, e),
            }
        }
        Ok(())
    }

    /// A zone may not be created below a zone another tenant owns
    async fn check_parent_ownership(&self, ctx: &RequestContext, name: &str) -> Result<()> {
        for parent in validation::parent_zones(name) {
            if let Some(owner) = self.storage.find_domain_by_name(parent).await? {
                if owner.tenant_id != ctx.tenant_id && !ctx.is_admin {
                    return Err(CentralError::Forbidden(format!(
                        "{} is a subdomain of a zone owned by another tenant",
                        name
                    )));
                }
                break;
            }
        }
        Ok(())
    }
}
