use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{CentralService, validation};
use crate::error::{CentralError, Result};
use crate::model::{
    DomainAction, NewRecord, NewRecordSet, Record, RecordFilter, RecordSet, RecordSetFilter,
    RecordSetUpdate, RecordType, RecordUpdate, RequestContext,
};
use crate::storage::ZoneOp;

impl CentralService {
    pub async fn create_recordset(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        new: NewRecordSet,
    ) -> Result<RecordSet> {
        let name = validation::recordset_name(&new.name)?;
        if new.rtype == RecordType::SOA {
            return Err(CentralError::InvalidRecordData(
                "SOA record sets are managed by the zone".to_string(),
            ));
        }
        if let Some(ttl) = new.ttl {
            validation::ttl(ttl, self.options.min_ttl)?;
        }

        let (domain, recordset) = self
            .mutate_zone(ctx, domain_id, DomainAction::Update, |domain| {
                if !domain.contains(&name) {
                    return Err(CentralError::InvalidRecordSetLocation {
                        name: name.clone(),
                        domain: domain.name.clone(),
                    });
                }
                if new.rtype == RecordType::CNAME && name == domain.name {
                    return Err(CentralError::CnameConflict(name.clone()));
                }

                let recordset = RecordSet {
                    id: Uuid::new_v4(),
                    domain_id: domain.id,
                    tenant_id: domain.tenant_id.clone(),
                    name: name.clone(),
                    rtype: new.rtype,
                    ttl: new.ttl,
                    description: new.description.clone(),
                    created_at: Utc::now(),
                    updated_at: None,
                };
                Ok((ZoneOp::CreateRecordSet(recordset.clone()), recordset))
            })
            .await?;

        info!(
            "Created record set {} {} in {} (serial {})",
            recordset.name, recordset.rtype, domain.name, domain.serial
        );
        Ok(recordset)
    }

    pub async fn get_recordset(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        id: Uuid,
    ) -> Result<RecordSet> {
        self.visible_domain(ctx, domain_id).await?;
        self.recordset_in(domain_id, id).await
    }

    pub async fn find_recordsets(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        mut filter: RecordSetFilter,
    ) -> Result<Vec<RecordSet>> {
        self.visible_domain(ctx, domain_id).await?;
        if let Some(name) = &filter.name {
            filter.name = Some(name.to_lowercase());
        }
        Ok(self.storage.find_recordsets(domain_id, &filter).await?)
    }

    pub async fn update_recordset(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        id: Uuid,
        update: RecordSetUpdate,
    ) -> Result<RecordSet> {
        if let Some(ttl) = update.ttl {
            validation::ttl(ttl, self.options.min_ttl)?;
        }
        let (_, recordset) = self
            .mutate_zone_with(
                ctx,
                domain_id,
                DomainAction::Update,
                || self.recordset_in(domain_id, id),
                |_, mut recordset| {
                    if update.ttl.is_some() {
                        recordset.ttl = update.ttl;
                    }
                    if let Some(description) = &update.description {
                        recordset.description = Some(description.clone());
                    }
                    recordset.updated_at = Some(Utc::now());
                    Ok((ZoneOp::UpdateRecordSet(recordset.clone()), recordset))
                },
            )
            .await?;
        Ok(recordset)
    }

    pub async fn delete_recordset(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        id: Uuid,
    ) -> Result<RecordSet> {
        self.writable_domain(ctx, domain_id).await?;
        let recordset = self.recordset_in(domain_id, id).await?;

        let (domain, ()) = self
            .mutate_zone(ctx, domain_id, DomainAction::Update, |_| {
                Ok((ZoneOp::DeleteRecordSet(id), ()))
            })
            .await?;

        info!(
            "Deleted record set {} {} from {} (serial {})",
            recordset.name, recordset.rtype, domain.name, domain.serial
        );
        Ok(recordset)
    }

    pub async fn create_record(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        new: NewRecord,
    ) -> Result<Record> {
        self.writable_domain(ctx, domain_id).await?;
        let recordset = self.recordset_in(domain_id, recordset_id).await?;
        let data = validation::record_data(recordset.rtype, &new.data)?;

        let (_, record) = self
            .mutate_zone(ctx, domain_id, DomainAction::Update, |_| {
                let record = Record {
                    id: Uuid::new_v4(),
                    domain_id,
                    recordset_id,
                    data: data.clone(),
                    description: new.description.clone(),
                    created_at: Utc::now(),
                    updated_at: None,
                };
                Ok((ZoneOp::CreateRecord(record.clone()), record))
            })
            .await?;
        Ok(record)
    }

    pub async fn get_record(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        id: Uuid,
    ) -> Result<Record> {
        self.visible_domain(ctx, domain_id).await?;
        self.record_in(recordset_id, id).await
    }

    pub async fn find_records(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        filter: RecordFilter,
    ) -> Result<Vec<Record>> {
        self.visible_domain(ctx, domain_id).await?;
        self.recordset_in(domain_id, recordset_id).await?;
        Ok(self.storage.find_records(recordset_id, &filter).await?)
    }

    pub async fn update_record(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        id: Uuid,
        update: RecordUpdate,
    ) -> Result<Record> {
        self.writable_domain(ctx, domain_id).await?;
        let recordset = self.recordset_in(domain_id, recordset_id).await?;
        let data = update
            .data
            .as_deref()
            .map(|d| validation::record_data(recordset.rtype, d))
            .transpose()?;

        let (_, record) = self
            .mutate_zone_with(
                ctx,
                domain_id,
                DomainAction::Update,
                || self.record_in(recordset_id, id),
                |_, mut record| {
                    if let Some(data) = &data {
                        record.data = data.clone();
                    }
                    if let Some(description) = &update.description {
                        record.description = Some(description.clone());
                    }
                    record.updated_at = Some(Utc::now());
                    Ok((ZoneOp::UpdateRecord(record.clone()), record))
                },
            )
            .await?;
        Ok(record)
    }

    pub async fn delete_record(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        id: Uuid,
    ) -> Result<Record> {
        self.writable_domain(ctx, domain_id).await?;
        self.recordset_in(domain_id, recordset_id).await?;
        let record = self.record_in(recordset_id, id).await?;

        self.mutate_zone(ctx, domain_id, DomainAction::Update, |_| {
            Ok((ZoneOp::DeleteRecord(id), ()))
        })
        .await?;
        Ok(record)
    }

    async fn recordset_in(&self, domain_id: Uuid, id: Uuid) -> Result<RecordSet> {
        match self.storage.get_recordset(id).await {
            Ok(rs) if rs.domain_id == domain_id => Ok(rs),
            Ok(_) => Err(CentralError::RecordSetNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_in(&self, recordset_id: Uuid, id: Uuid) -> Result<Record> {
        match self.storage.get_record(id).await {
            Ok(record) if record.recordset_id == recordset_id => Ok(record),
            Ok(_) => Err(CentralError::RecordNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
