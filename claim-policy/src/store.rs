//! Policy persistence
//!
//! Two JSON documents back the file store:
//!
//! - community file: `{ "<communityId>": { "faucet": {...}, ...other keys } }`
//! - global file: `{ "faucet": { "whitelist": [...], "blacklist": [...] } }`
//!
//! Only the `faucet` key is read. Documents written before the rename keep
//! their settings under `giveaway` and name caps `base`/`sepolia`; such a
//! document is refused with [`Error::LegacyUnmigrated`] until
//! [`JsonPolicyStore::migrate_legacy`] has moved it over.

use crate::{
    error::{Error, Result},
    types::{CommunityPolicy, GlobalLists, ListKind, Scope, MAX_COOLDOWN_HOURS},
};
use claim_ledger::{ChannelId, CommunityId, ParticipantId};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const FAUCET_KEY: &str = "faucet";
const LEGACY_KEY: &str = "giveaway";

/// Cap keys used by legacy documents, with the channel they refer to
const LEGACY_CAP_ALIASES: &[(&str, &str)] = &[("base", "base-usdt"), ("sepolia", "sepolia-eth")];

/// Source of claim policy
pub trait PolicyStore: Send + Sync {
    /// Settings of one community (defaults when never configured)
    fn community(&self, id: &CommunityId) -> Result<CommunityPolicy>;

    /// Global allow/deny lists
    fn global(&self) -> Result<GlobalLists>;

    /// Set the cap of a channel in a community. `cap` must be at least 1.
    fn set_cap(&self, community: &CommunityId, channel: &ChannelId, cap: u64) -> Result<()>;

    /// Set the cooldown of a community, in hours (1..=168)
    fn set_cooldown_hours(&self, community: &CommunityId, hours: u64) -> Result<()>;

    /// Add or remove a participant. Returns whether the list changed.
    fn update_list(
        &self,
        scope: &Scope,
        kind: ListKind,
        participant: &ParticipantId,
        add: bool,
    ) -> Result<bool>;
}

fn validate_cap(cap: u64) -> Result<()> {
    if cap == 0 {
        return Err(Error::InvalidValue("cap must be at least 1".to_string()));
    }
    Ok(())
}

fn validate_cooldown(hours: u64) -> Result<()> {
    if !(1..=MAX_COOLDOWN_HOURS).contains(&hours) {
        return Err(Error::InvalidValue(format!(
            "cooldown must be between 1 and {} hours, got {}",
            MAX_COOLDOWN_HOURS, hours
        )));
    }
    Ok(())
}

fn apply_list(
    list: &mut std::collections::BTreeSet<ParticipantId>,
    participant: &ParticipantId,
    add: bool,
) -> bool {
    if add {
        list.insert(participant.clone())
    } else {
        list.remove(participant)
    }
}

/// Outcome of [`JsonPolicyStore::migrate_legacy`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Communities whose legacy settings were moved
    pub communities: Vec<CommunityId>,

    /// Whether the global document was migrated
    pub global: bool,
}

impl MigrationReport {
    /// Whether anything was rewritten
    pub fn is_empty(&self) -> bool {
        self.communities.is_empty() && !self.global
    }
}

/// File-backed policy store
#[derive(Debug)]
pub struct JsonPolicyStore {
    community_path: PathBuf,
    global_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonPolicyStore {
    /// Store over a community file and a global file
    pub fn new(community_path: impl Into<PathBuf>, global_path: impl Into<PathBuf>) -> Self {
        Self {
            community_path: community_path.into(),
            global_path: global_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Community document path
    pub fn community_path(&self) -> &Path {
        &self.community_path
    }

    /// Global document path
    pub fn global_path(&self) -> &Path {
        &self.global_path
    }

    /// Move `giveaway` settings under `faucet` in both documents.
    ///
    /// Where both keys exist, `faucet` values win field by field. Legacy
    /// cap keys (`base`, `sepolia`) are renamed to channel ids. Running
    /// it again is a no-op.
    pub fn migrate_legacy(&self) -> Result<MigrationReport> {
        let _guard = self.write_lock.lock();
        let mut report = MigrationReport::default();

        let mut doc = read_document(&self.community_path)?;
        for (id, entry) in doc.iter_mut() {
            let Some(entry) = entry.as_object_mut() else {
                continue;
            };
            if migrate_entry(entry) {
                report.communities.push(CommunityId::new(id.clone()));
            }
        }
        if !report.communities.is_empty() {
            write_document(&self.community_path, &doc)?;
        }

        let mut global = read_document(&self.global_path)?;
        if migrate_entry(&mut global) {
            write_document(&self.global_path, &global)?;
            report.global = true;
        }

        tracing::info!(
            communities = report.communities.len(),
            global = report.global,
            "Legacy policy migration finished"
        );

        Ok(report)
    }

    fn modify_community<T>(
        &self,
        id: &CommunityId,
        f: impl FnOnce(&mut CommunityPolicy) -> T,
    ) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut doc = read_document(&self.community_path)?;
        let entry = doc
            .entry(id.as_str().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }

        if let Some(entry) = entry.as_object() {
            ensure_migrated(&self.community_path, entry)?;
        }

        let mut policy = match entry.get(FAUCET_KEY) {
            Some(value) => parse_section(&self.community_path, value)?,
            None => CommunityPolicy::default(),
        };
        let out = f(&mut policy);

        if let Some(entry) = entry.as_object_mut() {
            entry.insert(FAUCET_KEY.to_string(), serde_json::to_value(&policy)?);
        }
        write_document(&self.community_path, &doc)?;
        Ok(out)
    }

    fn modify_global<T>(&self, f: impl FnOnce(&mut GlobalLists) -> T) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut doc = read_document(&self.global_path)?;
        ensure_migrated(&self.global_path, &doc)?;
        let mut lists = match doc.get(FAUCET_KEY) {
            Some(value) => parse_section(&self.global_path, value)?,
            None => GlobalLists::default(),
        };
        let out = f(&mut lists);

        doc.insert(FAUCET_KEY.to_string(), serde_json::to_value(&lists)?);
        write_document(&self.global_path, &doc)?;
        Ok(out)
    }
}

impl PolicyStore for JsonPolicyStore {
    fn community(&self, id: &CommunityId) -> Result<CommunityPolicy> {
        let doc = read_document(&self.community_path)?;
        let Some(entry) = doc.get(id.as_str()) else {
            return Ok(CommunityPolicy::default());
        };
        if let Some(entry) = entry.as_object() {
            ensure_migrated(&self.community_path, entry).map_err(|e| {
                tracing::error!(community = %id, "Community policy holds unmigrated legacy settings");
                e
            })?;
        }

        match entry.get(FAUCET_KEY) {
            Some(value) => parse_section(&self.community_path, value),
            None => Ok(CommunityPolicy::default()),
        }
    }

    fn global(&self) -> Result<GlobalLists> {
        let doc = read_document(&self.global_path)?;
        ensure_migrated(&self.global_path, &doc).map_err(|e| {
            tracing::error!("Global policy holds unmigrated legacy lists");
            e
        })?;

        match doc.get(FAUCET_KEY) {
            Some(value) => parse_section(&self.global_path, value),
            None => Ok(GlobalLists::default()),
        }
    }

    fn set_cap(&self, community: &CommunityId, channel: &ChannelId, cap: u64) -> Result<()> {
        validate_cap(cap)?;
        self.modify_community(community, |policy| {
            policy.caps.insert(channel.clone(), cap);
        })?;
        tracing::info!(community = %community, channel = %channel, cap, "Cap updated");
        Ok(())
    }

    fn set_cooldown_hours(&self, community: &CommunityId, hours: u64) -> Result<()> {
        validate_cooldown(hours)?;
        self.modify_community(community, |policy| {
            policy.cooldown_hours = Some(hours);
        })?;
        tracing::info!(community = %community, hours, "Cooldown updated");
        Ok(())
    }

    fn update_list(
        &self,
        scope: &Scope,
        kind: ListKind,
        participant: &ParticipantId,
        add: bool,
    ) -> Result<bool> {
        let changed = match scope {
            Scope::Community(id) => self.modify_community(id, |policy| {
                apply_list(policy.list_mut(kind), participant, add)
            })?,
            Scope::Global => {
                self.modify_global(|lists| apply_list(lists.list_mut(kind), participant, add))?
            }
        };

        tracing::info!(
            scope = %scope,
            list = %kind,
            participant = %participant,
            add,
            changed,
            "List updated"
        );
        Ok(changed)
    }
}

fn read_document(path: &Path) -> Result<Map<String, Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::Corrupt {
            path: path.display().to_string(),
            reason: "top level is not an object".to_string(),
        }),
        Err(e) => Err(Error::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

fn write_document(path: &Path, doc: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let write = || -> Result<()> {
        let mut file = File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut file, doc)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

fn parse_section<T: serde::de::DeserializeOwned>(path: &Path, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| Error::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Refuse an object that still carries legacy settings
fn ensure_migrated(path: &Path, entry: &Map<String, Value>) -> Result<()> {
    let legacy_caps = entry
        .get(FAUCET_KEY)
        .and_then(|section| section.get("caps"))
        .and_then(Value::as_object)
        .is_some_and(|caps| {
            LEGACY_CAP_ALIASES
                .iter()
                .any(|(legacy_key, _)| caps.contains_key(*legacy_key))
        });

    if entry.contains_key(LEGACY_KEY) || legacy_caps {
        return Err(Error::LegacyUnmigrated {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

/// Fold a legacy `giveaway` object into `faucet`. Returns whether the
/// object changed.
fn migrate_entry(entry: &mut Map<String, Value>) -> bool {
    let legacy = entry.remove(LEGACY_KEY);
    let mut changed = legacy.is_some();

    let mut merged = match legacy {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    if let Some(Value::Object(current)) = entry.remove(FAUCET_KEY) {
        for (key, value) in current {
            if key == "caps" {
                if let (Some(Value::Object(old)), Value::Object(new)) =
                    (merged.get_mut("caps"), &value)
                {
                    for (channel, cap) in new {
                        old.insert(channel.clone(), cap.clone());
                    }
                    continue;
                }
            }
            merged.insert(key, value);
        }
    }

    if let Some(Value::Object(caps)) = merged.get_mut("caps") {
        for (legacy_key, channel) in LEGACY_CAP_ALIASES {
            if let Some(cap) = caps.remove(*legacy_key) {
                changed = true;
                caps.entry(channel.to_string()).or_insert(cap);
            }
        }
    }

    if changed || !merged.is_empty() {
        entry.insert(FAUCET_KEY.to_string(), Value::Object(merged));
    }
    changed
}

/// In-memory policy store
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    communities: Mutex<HashMap<CommunityId, CommunityPolicy>>,
    global: Mutex<GlobalLists>,
}

impl MemoryPolicyStore {
    /// Empty store: every community uses defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the settings of a community
    pub fn insert(&self, id: CommunityId, policy: CommunityPolicy) {
        self.communities.lock().insert(id, policy);
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn community(&self, id: &CommunityId) -> Result<CommunityPolicy> {
        Ok(self.communities.lock().get(id).cloned().unwrap_or_default())
    }

    fn global(&self) -> Result<GlobalLists> {
        Ok(self.global.lock().clone())
    }

    fn set_cap(&self, community: &CommunityId, channel: &ChannelId, cap: u64) -> Result<()> {
        validate_cap(cap)?;
        self.communities
            .lock()
            .entry(community.clone())
            .or_default()
            .caps
            .insert(channel.clone(), cap);
        Ok(())
    }

    fn set_cooldown_hours(&self, community: &CommunityId, hours: u64) -> Result<()> {
        validate_cooldown(hours)?;
        self.communities
            .lock()
            .entry(community.clone())
            .or_default()
            .cooldown_hours = Some(hours);
        Ok(())
    }

    fn update_list(
        &self,
        scope: &Scope,
        kind: ListKind,
        participant: &ParticipantId,
        add: bool,
    ) -> Result<bool> {
        Ok(match scope {
            Scope::Community(id) => {
                let mut communities = self.communities.lock();
                let policy = communities.entry(id.clone()).or_default();
                apply_list(policy.list_mut(kind), participant, add)
            }
            Scope::Global => apply_list(self.global.lock().list_mut(kind), participant, add),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> (tempfile::TempDir, JsonPolicyStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPolicyStore::new(
            dir.path().join("guild_config.json"),
            dir.path().join("global_config.json"),
        );
        (dir, store)
    }

    #[test]
    fn test_unconfigured_community_uses_defaults() {
        let (_dir, store) = create_test_store();
        let policy = store.community(&CommunityId::new("g1")).unwrap();
        assert_eq!(policy, CommunityPolicy::default());
        assert_eq!(store.global().unwrap(), GlobalLists::default());
    }

    #[test]
    fn test_mutations_persist_and_keep_other_keys() {
        let (_dir, store) = create_test_store();
        fs::write(
            store.community_path(),
            br#"{ "g1": { "prefix": "!", "faucetChannelId": "123" } }"#,
        )
        .unwrap();

        let g1 = CommunityId::new("g1");
        store.set_cap(&g1, &ChannelId::new("base-usdt"), 25).unwrap();
        store.set_cooldown_hours(&g1, 12).unwrap();

        let policy = store.community(&g1).unwrap();
        assert_eq!(policy.caps[&ChannelId::new("base-usdt")], 25);
        assert_eq!(policy.cooldown_hours, Some(12));

        let raw: Value = serde_json::from_slice(&fs::read(store.community_path()).unwrap()).unwrap();
        assert_eq!(raw["g1"]["prefix"], "!");
        assert_eq!(raw["g1"]["faucet"]["cooldownHours"], 12);
    }

    #[test]
    fn test_range_checks() {
        let (_dir, store) = create_test_store();
        let g1 = CommunityId::new("g1");
        assert!(matches!(
            store.set_cap(&g1, &ChannelId::new("base-usdt"), 0),
            Err(Error::InvalidValue(_))
        ));
        assert!(store.set_cooldown_hours(&g1, 0).is_err());
        assert!(store.set_cooldown_hours(&g1, 169).is_err());
        assert!(store.set_cooldown_hours(&g1, 168).is_ok());
    }

    #[test]
    fn test_update_list_reports_change() {
        let (_dir, store) = create_test_store();
        let alice = ParticipantId::new("alice");
        let scope = Scope::Community(CommunityId::new("g1"));

        assert!(store.update_list(&scope, ListKind::Blacklist, &alice, true).unwrap());
        assert!(!store.update_list(&scope, ListKind::Blacklist, &alice, true).unwrap());
        assert!(store.update_list(&Scope::Global, ListKind::Whitelist, &alice, true).unwrap());

        assert!(store.global().unwrap().whitelist.contains(&alice));
        assert!(store.update_list(&scope, ListKind::Blacklist, &alice, false).unwrap());
        assert!(store
            .community(&CommunityId::new("g1"))
            .unwrap()
            .blacklist
            .is_empty());
    }

    #[test]
    fn test_corrupt_file_fails_closed() {
        let (_dir, store) = create_test_store();
        fs::write(store.community_path(), b"{ broken").unwrap();

        assert!(matches!(
            store.community(&CommunityId::new("g1")),
            Err(Error::Corrupt { .. })
        ));
        assert!(store
            .set_cap(&CommunityId::new("g1"), &ChannelId::new("base-usdt"), 5)
            .is_err());
        assert_eq!(fs::read(store.community_path()).unwrap(), b"{ broken");
    }

    #[test]
    fn test_migrate_legacy() {
        let (_dir, store) = create_test_store();
        fs::write(
            store.community_path(),
            br#"{
                "g1": { "giveaway": { "caps": { "base": 3, "sepolia": 4 }, "cooldownHours": 6 } },
                "g2": { "giveaway": { "cooldownHours": 6 }, "faucet": { "cooldownHours": 48 } },
                "g3": { "faucet": { "cooldownHours": 2 } }
            }"#,
        )
        .unwrap();
        fs::write(store.global_path(), br#"{ "giveaway": { "blacklist": ["bad"] } }"#).unwrap();

        // Unmigrated documents are refused, for reads and writes alike
        assert!(matches!(
            store.community(&CommunityId::new("g1")),
            Err(Error::LegacyUnmigrated { .. })
        ));
        assert!(matches!(store.global(), Err(Error::LegacyUnmigrated { .. })));
        assert!(store
            .update_list(&Scope::Global, ListKind::Blacklist, &ParticipantId::new("x"), true)
            .is_err());
        assert_eq!(
            store.community(&CommunityId::new("g3")).unwrap().cooldown_hours,
            Some(2)
        );

        let report = store.migrate_legacy().unwrap();
        assert_eq!(
            report.communities,
            vec![CommunityId::new("g1"), CommunityId::new("g2")]
        );
        assert!(report.global);

        let g1 = store.community(&CommunityId::new("g1")).unwrap();
        assert_eq!(g1.caps[&ChannelId::new("base-usdt")], 3);
        assert_eq!(g1.caps[&ChannelId::new("sepolia-eth")], 4);
        assert_eq!(g1.cooldown_hours, Some(6));

        let g2 = store.community(&CommunityId::new("g2")).unwrap();
        assert_eq!(g2.cooldown_hours, Some(48));

        assert!(store
            .global()
            .unwrap()
            .blacklist
            .contains(&ParticipantId::new("bad")));

        assert!(store.migrate_legacy().unwrap().is_empty());
    }

    #[test]
    fn test_legacy_cap_keys_under_faucet_are_refused() {
        let (_dir, store) = create_test_store();
        fs::write(
            store.community_path(),
            br#"{ "g1": { "faucet": { "caps": { "base": 3 } } } }"#,
        )
        .unwrap();

        assert!(matches!(
            store.community(&CommunityId::new("g1")),
            Err(Error::LegacyUnmigrated { .. })
        ));

        store.migrate_legacy().unwrap();
        let g1 = store.community(&CommunityId::new("g1")).unwrap();
        assert_eq!(g1.caps[&ChannelId::new("base-usdt")], 3);
        assert!(!g1.caps.contains_key(&ChannelId::new("base")));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryPolicyStore::new();
        let g1 = CommunityId::new("g1");
        store.set_cap(&g1, &ChannelId::new("sepolia-eth"), 2).unwrap();
        assert_eq!(store.community(&g1).unwrap().caps.len(), 1);
        assert!(store.set_cooldown_hours(&g1, 500).is_err());
        assert!(store
            .update_list(&Scope::Global, ListKind::Blacklist, &ParticipantId::new("x"), true)
            .unwrap());
    }
}
