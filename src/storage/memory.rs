use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Entity, Storage, StorageError, StorageResult, ZoneChange, ZoneOp};
use crate::model::{
    Blacklist, Domain, DomainFilter, DomainStatus, Page, Record, RecordFilter, RecordSet,
    RecordSetFilter, RecordType, TargetStatus,
};

#[derive(Default)]
struct Tables {
    domains: HashMap<Uuid, Domain>,
    /// Lowercase FQDN -> domain id
    domain_names: HashMap<String, Uuid>,
    recordsets: HashMap<Uuid, RecordSet>,
    records: HashMap<Uuid, Record>,
    blacklists: HashMap<Uuid, Blacklist>,
    target_statuses: HashMap<(Uuid, Uuid), TargetStatus>,
}

/// In-process transactional store.
///
/// A single lock covers every table so a commit is all-or-nothing and
/// readers never observe a half-applied change.
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(entity: Entity, id: Uuid) -> StorageError {
    StorageError::NotFound {
        entity,
        key: id.to_string(),
    }
}

/// Order by creation then id and apply marker paging
fn paginate<T>(
    mut items: Vec<T>,
    page: &Page,
    entity: Entity,
    key: impl Fn(&T) -> (DateTime<Utc>, Uuid),
) -> StorageResult<Vec<T>> {
    items.sort_by_key(|item| key(item));

    let start = match page.marker {
        Some(marker) => {
            let pos = items
                .iter()
                .position(|item| key(item).1 == marker)
                .ok_or_else(|| not_found(entity, marker))?;
            pos + 1
        }
        None => 0,
    };

    let limit = page.limit.unwrap_or(usize::MAX);
    Ok(items.into_iter().skip(start).take(limit).collect())
}

impl Tables {
    fn recordset_in_domain(&self, domain_id: Uuid, id: Uuid) -> StorageResult<&RecordSet> {
        self.recordsets
            .get(&id)
            .filter(|rs| rs.domain_id == domain_id)
            .ok_or_else(|| not_found(Entity::RecordSet, id))
    }

    fn record_in_domain(&self, domain_id: Uuid, id: Uuid) -> StorageResult<&Record> {
        self.records
            .get(&id)
            .filter(|r| r.domain_id == domain_id)
            .ok_or_else(|| not_found(Entity::Record, id))
    }

    fn check_recordset_constraints(&self, candidate: &RecordSet) -> StorageResult<()> {
        for existing in self.recordsets.values() {
            if existing.id == candidate.id
                || existing.domain_id != candidate.domain_id
                || existing.name != candidate.name
            {
                continue;
            }
            if existing.rtype == candidate.rtype {
                return Err(StorageError::Duplicate {
                    entity: Entity::RecordSet,
                    key: format!("{} {}", candidate.name, candidate.rtype),
                });
            }
            if existing.rtype == RecordType::CNAME || candidate.rtype == RecordType::CNAME {
                return Err(StorageError::CnameConflict(candidate.name.clone()));
            }
        }
        Ok(())
    }

    fn check_record_constraints(&self, rtype: RecordType, candidate: &Record) -> StorageResult<()> {
        // A CNAME set holds exactly one target
        if rtype == RecordType::CNAME
            && self
                .records
                .values()
                .any(|r| r.id != candidate.id && r.recordset_id == candidate.recordset_id)
        {
            return Err(StorageError::CnameConflict(candidate.data.clone()));
        }

        let duplicate = self.records.values().any(|r| {
            r.id != candidate.id
                && r.recordset_id == candidate.recordset_id
                && r.data == candidate.data
        });
        if duplicate {
            return Err(StorageError::Duplicate {
                entity: Entity::Record,
                key: candidate.data.clone(),
            });
        }
        Ok(())
    }

    /// Validate `op` against current state without modifying anything
    fn validate_op(&self, domain_id: Uuid, op: &ZoneOp) -> StorageResult<()> {
        match op {
            ZoneOp::None => Ok(()),
            ZoneOp::CreateRecordSet(rs) => {
                if self.recordsets.contains_key(&rs.id) {
                    return Err(StorageError::Duplicate {
                        entity: Entity::RecordSet,
                        key: rs.id.to_string(),
                    });
                }
                self.check_recordset_constraints(rs)
            }
            ZoneOp::UpdateRecordSet(rs) => {
                self.recordset_in_domain(domain_id, rs.id)?;
                self.check_recordset_constraints(rs)
            }
            ZoneOp::DeleteRecordSet(id) => self.recordset_in_domain(domain_id, *id).map(|_| ()),
            ZoneOp::CreateRecord(record) => {
                let rs = self.recordset_in_domain(domain_id, record.recordset_id)?;
                self.check_record_constraints(rs.rtype, record)
            }
            ZoneOp::UpdateRecord(record) => {
                let existing = self.record_in_domain(domain_id, record.id)?;
                let rs = self.recordset_in_domain(domain_id, existing.recordset_id)?;
                self.check_record_constraints(rs.rtype, record)
            }
            ZoneOp::DeleteRecord(id) => self.record_in_domain(domain_id, *id).map(|_| ()),
        }
    }

    fn apply_op(&mut self, op: ZoneOp) {
        match op {
            ZoneOp::None => {}
            ZoneOp::CreateRecordSet(rs) | ZoneOp::UpdateRecordSet(rs) => {
                self.recordsets.insert(rs.id, rs);
            }
            ZoneOp::DeleteRecordSet(id) => {
                self.recordsets.remove(&id);
                self.records.retain(|_, r| r.recordset_id != id);
            }
            ZoneOp::CreateRecord(record) | ZoneOp::UpdateRecord(record) => {
                self.records.insert(record.id, record);
            }
            ZoneOp::DeleteRecord(id) => {
                self.records.remove(&id);
            }
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_domain(&self, domain: Domain, quota: Option<usize>) -> StorageResult<Domain> {
        let mut tables = self.tables.write();
        let key = domain.name.to_lowercase();

        if tables.domain_names.contains_key(&key) {
            return Err(StorageError::Duplicate {
                entity: Entity::Domain,
                key: domain.name.clone(),
            });
        }

        if let Some(max) = quota {
            let owned = tables
                .domains
                .values()
                .filter(|d| d.tenant_id == domain.tenant_id && !d.is_deleting())
                .count();
            if owned >= max {
                return Err(StorageError::QuotaExceeded {
                    tenant: domain.tenant_id.clone(),
                    max,
                });
            }
        }

        tables.domain_names.insert(key, domain.id);
        tables.domains.insert(domain.id, domain.clone());
        info!("Stored domain {} ({})", domain.name, domain.id);
        Ok(domain)
    }

    async fn get_domain(&self, id: Uuid) -> StorageResult<Domain> {
        self.tables
            .read()
            .domains
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(Entity::Domain, id))
    }

    async fn find_domain_by_name(&self, name: &str) -> StorageResult<Option<Domain>> {
        let tables = self.tables.read();
        Ok(tables
            .domain_names
            .get(&name.to_lowercase())
            .and_then(|id| tables.domains.get(id))
            .cloned())
    }

    async fn find_domains(&self, filter: &DomainFilter) -> StorageResult<Vec<Domain>> {
        let matching: Vec<Domain> = {
            let tables = self.tables.read();
            tables
                .domains
                .values()
                .filter(|d| {
                    filter.tenant_id.as_ref().is_none_or(|t| &d.tenant_id == t)
                        && filter
                            .name
                            .as_ref()
                            .is_none_or(|n| d.name.eq_ignore_ascii_case(n))
                        && filter.status.is_none_or(|s| d.status == s)
                })
                .cloned()
                .collect()
        };
        paginate(matching, &filter.page, Entity::Domain, |d| (d.created_at, d.id))
    }

    async fn count_domains(&self, tenant_id: Option<&str>) -> StorageResult<usize> {
        let tables = self.tables.read();
        Ok(tables
            .domains
            .values()
            .filter(|d| tenant_id.is_none_or(|t| d.tenant_id == t))
            .count())
    }

    async fn domain_counts_by_status(&self) -> StorageResult<HashMap<DomainStatus, usize>> {
        let tables = self.tables.read();
        let mut counts = HashMap::new();
        for domain in tables.domains.values() {
            *counts.entry(domain.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn commit(&self, change: ZoneChange) -> StorageResult<Domain> {
        let mut tables = self.tables.write();
        let domain_id = change.domain.id;

        let current = tables
            .domains
            .get(&domain_id)
            .ok_or_else(|| not_found(Entity::Domain, domain_id))?;

        if current.serial != change.expected_serial {
            debug!(
                "Rejecting commit for {}: serial {} != expected {}",
                domain_id, current.serial, change.expected_serial
            );
            return Err(StorageError::StaleSerial {
                domain_id,
                expected: change.expected_serial,
                actual: current.serial,
            });
        }

        // Validate everything before the first write
        tables.validate_op(domain_id, &change.op)?;

        tables.apply_op(change.op);
        tables.domains.insert(domain_id, change.domain.clone());

        debug!(
            "Committed change to domain {} at serial {}",
            domain_id, change.domain.serial
        );
        Ok(change.domain)
    }

    async fn set_domain_status(
        &self,
        id: Uuid,
        serial: u32,
        status: DomainStatus,
    ) -> StorageResult<bool> {
        let mut tables = self.tables.write();
        let domain = tables
            .domains
            .get_mut(&id)
            .ok_or_else(|| not_found(Entity::Domain, id))?;

        if domain.serial != serial {
            return Ok(false);
        }
        domain.status = status;
        Ok(true)
    }

    async fn purge_domain(&self, id: Uuid, serial: u32) -> StorageResult<bool> {
        let mut tables = self.tables.write();
        let name = match tables.domains.get(&id) {
            Some(domain) if domain.serial == serial => domain.name.to_lowercase(),
            Some(_) => return Ok(false),
            None => return Err(not_found(Entity::Domain, id)),
        };

        tables.domains.remove(&id);
        tables.domain_names.remove(&name);
        tables.recordsets.retain(|_, rs| rs.domain_id != id);
        tables.records.retain(|_, r| r.domain_id != id);
        tables.target_statuses.retain(|(domain_id, _), _| *domain_id != id);

        info!("Purged domain {} ({})", name, id);
        Ok(true)
    }

    async fn get_recordset(&self, id: Uuid) -> StorageResult<RecordSet> {
        self.tables
            .read()
            .recordsets
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(Entity::RecordSet, id))
    }

    async fn find_recordsets(
        &self,
        domain_id: Uuid,
        filter: &RecordSetFilter,
    ) -> StorageResult<Vec<RecordSet>> {
        let matching: Vec<RecordSet> = {
            let tables = self.tables.read();
            tables
                .recordsets
                .values()
                .filter(|rs| {
                    rs.domain_id == domain_id
                        && filter
                            .name
                            .as_ref()
                            .is_none_or(|n| rs.name.eq_ignore_ascii_case(n))
                        && filter.rtype.is_none_or(|t| rs.rtype == t)
                })
                .cloned()
                .collect()
        };
        paginate(matching, &filter.page, Entity::RecordSet, |rs| {
            (rs.created_at, rs.id)
        })
    }

    async fn get_record(&self, id: Uuid) -> StorageResult<Record> {
        self.tables
            .read()
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(Entity::Record, id))
    }

    async fn find_records(
        &self,
        recordset_id: Uuid,
        filter: &RecordFilter,
    ) -> StorageResult<Vec<Record>> {
        let matching: Vec<Record> = {
            let tables = self.tables.read();
            tables
                .records
                .values()
                .filter(|r| {
                    r.recordset_id == recordset_id
                        && filter.data.as_ref().is_none_or(|d| &r.data == d)
                })
                .cloned()
                .collect()
        };
        paginate(matching, &filter.page, Entity::Record, |r| (r.created_at, r.id))
    }

    async fn create_blacklist(&self, blacklist: Blacklist) -> StorageResult<Blacklist> {
        let mut tables = self.tables.write();
        if tables
            .blacklists
            .values()
            .any(|b| b.pattern == blacklist.pattern)
        {
            return Err(StorageError::Duplicate {
                entity: Entity::Blacklist,
                key: blacklist.pattern.clone(),
            });
        }
        tables.blacklists.insert(blacklist.id, blacklist.clone());
        Ok(blacklist)
    }

    async fn get_blacklist(&self, id: Uuid) -> StorageResult<Blacklist> {
        self.tables
            .read()
            .blacklists
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(Entity::Blacklist, id))
    }

    async fn find_blacklists(&self) -> StorageResult<Vec<Blacklist>> {
        let mut blacklists: Vec<Blacklist> =
            self.tables.read().blacklists.values().cloned().collect();
        blacklists.sort_by_key(|b| (b.created_at, b.id));
        Ok(blacklists)
    }

    async fn update_blacklist(&self, blacklist: Blacklist) -> StorageResult<Blacklist> {
        let mut tables = self.tables.write();
        if !tables.blacklists.contains_key(&blacklist.id) {
            return Err(not_found(Entity::Blacklist, blacklist.id));
        }
        if tables
            .blacklists
            .values()
            .any(|b| b.id != blacklist.id && b.pattern == blacklist.pattern)
        {
            return Err(StorageError::Duplicate {
                entity: Entity::Blacklist,
                key: blacklist.pattern.clone(),
            });
        }
        tables.blacklists.insert(blacklist.id, blacklist.clone());
        Ok(blacklist)
    }

    async fn delete_blacklist(&self, id: Uuid) -> StorageResult<Blacklist> {
        self.tables
            .write()
            .blacklists
            .remove(&id)
            .ok_or_else(|| not_found(Entity::Blacklist, id))
    }

    async fn upsert_target_status(&self, status: TargetStatus) -> StorageResult<()> {
        let mut tables = self.tables.write();
        // Statuses of purged domains are dropped
        if !tables.domains.contains_key(&status.domain_id) {
            return Ok(());
        }
        let key = (status.domain_id, status.target_id);
        if let Some(stored) = tables.target_statuses.get(&key) {
            if stored.serial > status.serial {
                debug!(
                    "Ignoring status of {} serial {}, target already at {}",
                    status.domain_id, status.serial, stored.serial
                );
                return Ok(());
            }
        }
        tables.target_statuses.insert(key, status);
        Ok(())
    }

    async fn get_target_statuses(&self, domain_id: Uuid) -> StorageResult<Vec<TargetStatus>> {
        let tables = self.tables.read();
        let mut statuses: Vec<TargetStatus> = tables
            .target_statuses
            .values()
            .filter(|s| s.domain_id == domain_id)
            .cloned()
            .collect();
        statuses.sort_by_key(|s| s.target_id);
        Ok(statuses)
    }
}
