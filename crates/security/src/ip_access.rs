//! IP allow/deny lists with exact-match and CIDR matching, whitelist
//! always winning over a blacklist hit.

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ipnet::IpNet;
use tunnox_core::{
    now_unix, IpRecord, Storage, IP_BLACKLIST_INDEX, IP_BLACKLIST_PREFIX, IP_WHITELIST_INDEX,
    IP_WHITELIST_PREFIX,
};

#[derive(Default)]
struct Lists {
    blacklist: HashMap<String, IpRecord>,
    whitelist: HashMap<String, IpRecord>,
}

/// Single `RW` lock over both lists: whitelist and blacklist are
/// checked together under one read, so a concurrent write can never
/// land between the two lookups.
pub struct IpAccessManager {
    storage: Arc<dyn Storage>,
    lists: RwLock<Lists>,
}

impl IpAccessManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lists: RwLock::new(Lists::default()),
        }
    }

    /// Whitelist hits always allow, regardless of any blacklist entry.
    /// An unexpired blacklist hit denies, carrying its recorded reason.
    /// Anything else is allowed with an empty reason.
    pub fn is_allowed(&self, ip: IpAddr) -> (bool, String) {
        let now = now_unix();
        let lists = self.lists.read().unwrap();

        if lists
            .whitelist
            .values()
            .any(|record| Self::matches(&record.ip_or_cidr, ip))
        {
            return (true, String::new());
        }

        match lists
            .blacklist
            .values()
            .find(|record| !record.is_expired(now) && Self::matches(&record.ip_or_cidr, ip))
        {
            Some(record) => (false, record.reason.clone()),
            None => (true, String::new()),
        }
    }

    fn matches(ip_or_cidr: &str, ip: IpAddr) -> bool {
        if let Ok(exact) = IpAddr::from_str(ip_or_cidr) {
            return exact == ip;
        }
        if let Ok(net) = IpNet::from_str(ip_or_cidr) {
            return net.contains(&ip);
        }
        false
    }

    pub async fn add_to_blacklist(
        &self,
        ip_or_cidr: &str,
        reason: &str,
        added_by: &str,
        ttl: Option<Duration>,
    ) -> tunnox_core::Result<()> {
        let now = now_unix();
        let record = IpRecord {
            ip_or_cidr: ip_or_cidr.to_string(),
            added_at: now,
            expires_at: ttl.map(|d| now + d.as_secs() as i64).unwrap_or(0),
            reason: reason.to_string(),
            added_by: added_by.to_string(),
        };

        self.persist(IP_BLACKLIST_PREFIX, IP_BLACKLIST_INDEX, &record, ttl)
            .await?;
        self.lists
            .write()
            .unwrap()
            .blacklist
            .insert(ip_or_cidr.to_string(), record);
        Ok(())
    }

    pub async fn add_to_whitelist(
        &self,
        ip_or_cidr: &str,
        reason: &str,
        added_by: &str,
    ) -> tunnox_core::Result<()> {
        let record = IpRecord {
            ip_or_cidr: ip_or_cidr.to_string(),
            added_at: now_unix(),
            expires_at: 0,
            reason: reason.to_string(),
            added_by: added_by.to_string(),
        };

        self.persist(IP_WHITELIST_PREFIX, IP_WHITELIST_INDEX, &record, None)
            .await?;
        self.lists
            .write()
            .unwrap()
            .whitelist
            .insert(ip_or_cidr.to_string(), record);
        Ok(())
    }

    async fn persist(
        &self,
        key_prefix: &str,
        index_key: &str,
        record: &IpRecord,
        ttl: Option<Duration>,
    ) -> tunnox_core::Result<()> {
        let key = format!("{key_prefix}{}", record.ip_or_cidr);
        let json = serde_json::to_string(record)
            .map_err(|e| tunnox_core::TunnoxError::Internal(e.to_string()))?;
        self.storage.set(&key, &json, ttl).await?;
        if let Some(list_store) = self.storage.as_list_store() {
            list_store.append_to_list(index_key, &record.ip_or_cidr).await?;
        }
        Ok(())
    }

    pub async fn remove_from_blacklist(&self, ip_or_cidr: &str) -> tunnox_core::Result<()> {
        self.remove(IP_BLACKLIST_PREFIX, IP_BLACKLIST_INDEX, ip_or_cidr)
            .await?;
        self.lists.write().unwrap().blacklist.remove(ip_or_cidr);
        Ok(())
    }

    pub async fn remove_from_whitelist(&self, ip_or_cidr: &str) -> tunnox_core::Result<()> {
        self.remove(IP_WHITELIST_PREFIX, IP_WHITELIST_INDEX, ip_or_cidr)
            .await?;
        self.lists.write().unwrap().whitelist.remove(ip_or_cidr);
        Ok(())
    }

    async fn remove(&self, key_prefix: &str, index_key: &str, ip_or_cidr: &str) -> tunnox_core::Result<()> {
        let key = format!("{key_prefix}{ip_or_cidr}");
        self.storage.delete(&key).await?;
        if let Some(list_store) = self.storage.as_list_store() {
            list_store.remove_from_list(index_key, ip_or_cidr).await?;
        }
        Ok(())
    }

    /// Rebuilds the in-memory lists from storage. A malformed entry is
    /// skipped rather than failing the whole load.
    pub async fn load_from_storage(&self) -> tunnox_core::Result<()> {
        let blacklist = self
            .load_list(IP_BLACKLIST_PREFIX, IP_BLACKLIST_INDEX)
            .await?;
        let whitelist = self
            .load_list(IP_WHITELIST_PREFIX, IP_WHITELIST_INDEX)
            .await?;

        let mut lists = self.lists.write().unwrap();
        lists.blacklist = blacklist;
        lists.whitelist = whitelist;
        Ok(())
    }

    async fn load_list(
        &self,
        key_prefix: &str,
        index_key: &str,
    ) -> tunnox_core::Result<HashMap<String, IpRecord>> {
        let mut out = HashMap::new();
        let Some(list_store) = self.storage.as_list_store() else {
            return Ok(out);
        };

        let Some(entries) = list_store.get_list(index_key).await? else {
            return Ok(out);
        };

        for ip_or_cidr in entries {
            let key = format!("{key_prefix}{ip_or_cidr}");
            match self.storage.get(&key).await {
                Ok(Some(json)) => match serde_json::from_str::<IpRecord>(&json) {
                    Ok(record) => {
                        out.insert(ip_or_cidr, record);
                    }
                    Err(e) => {
                        tracing::warn!(ip_or_cidr, error = %e, "skipping malformed ip access record");
                    }
                },
                Ok(None) => {
                    tracing::warn!(ip_or_cidr, "ip access index entry has no backing record");
                }
                Err(e) => {
                    tracing::warn!(ip_or_cidr, error = %e, "failed to load ip access record");
                }
            }
        }

        Ok(out)
    }

    /// Drops expired blacklist entries from the in-memory cache. Does
    /// not touch storage entries, which carry their own TTL.
    pub fn cleanup_expired(&self) {
        let now = now_unix();
        self.lists
            .write()
            .unwrap()
            .blacklist
            .retain(|_, record| !record.is_expired(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnox_storage_memory::MemoryStorage;

    fn manager() -> IpAccessManager {
        IpAccessManager::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn exact_match_blacklist_denies() {
        let mgr = manager();
        mgr.add_to_blacklist("1.2.3.4", "abuse", "admin", None)
            .await
            .unwrap();
        assert_eq!(mgr.is_allowed("1.2.3.4".parse().unwrap()), (false, "abuse".to_string()));
        assert_eq!(mgr.is_allowed("1.2.3.5".parse().unwrap()), (true, String::new()));
    }

    #[tokio::test]
    async fn cidr_match_blacklist_denies_whole_range() {
        let mgr = manager();
        mgr.add_to_blacklist("10.0.0.0/24", "range ban", "admin", None)
            .await
            .unwrap();
        assert_eq!(
            mgr.is_allowed("10.0.0.42".parse().unwrap()),
            (false, "range ban".to_string())
        );
        assert_eq!(mgr.is_allowed("10.0.1.1".parse().unwrap()), (true, String::new()));
    }

    #[tokio::test]
    async fn whitelist_wins_over_blacklist() {
        let mgr = manager();
        mgr.add_to_blacklist("10.0.0.0/24", "range ban", "admin", None)
            .await
            .unwrap();
        mgr.add_to_whitelist("10.0.0.42", "trusted", "admin")
            .await
            .unwrap();
        assert_eq!(mgr.is_allowed("10.0.0.42".parse().unwrap()), (true, String::new()));
        assert_eq!(
            mgr.is_allowed("10.0.0.43".parse().unwrap()),
            (false, "range ban".to_string())
        );
    }

    #[tokio::test]
    async fn remove_from_blacklist_restores_access() {
        let mgr = manager();
        mgr.add_to_blacklist("1.2.3.4", "abuse", "admin", None)
            .await
            .unwrap();
        mgr.remove_from_blacklist("1.2.3.4").await.unwrap();
        assert_eq!(mgr.is_allowed("1.2.3.4".parse().unwrap()), (true, String::new()));
    }

    #[tokio::test]
    async fn load_from_storage_rebuilds_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let mgr = IpAccessManager::new(storage.clone());
        mgr.add_to_blacklist("1.2.3.4", "abuse", "admin", None)
            .await
            .unwrap();

        let reloaded = IpAccessManager::new(storage);
        reloaded.load_from_storage().await.unwrap();
        assert_eq!(
            reloaded.is_allowed("1.2.3.4".parse().unwrap()),
            (false, "abuse".to_string())
        );
    }

    #[test]
    fn cleanup_expired_drops_stale_entries() {
        let mgr = manager();
        mgr.lists.write().unwrap().blacklist.insert(
            "1.2.3.4".to_string(),
            IpRecord {
                ip_or_cidr: "1.2.3.4".to_string(),
                added_at: now_unix() - 100,
                expires_at: now_unix() - 1,
                reason: "old".to_string(),
                added_by: "admin".to_string(),
            },
        );
        mgr.cleanup_expired();
        assert!(mgr.lists.read().unwrap().blacklist.is_empty());
    }
}
