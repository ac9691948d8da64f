//! JSON file-backed target registry
//!
//! Stored at /var/lib/voe-iscsi/discovery.json by default. All mutations stay
//! in memory until `sync`, which replaces the file atomically.
//!
//! Processes sharing the file serialize through an advisory `flock` on
//! `<path>.lock`. The discovery daemon holds it for a whole pass and the
//! admin CLI for each load, mutate and sync.

use super::{
    RegistryEntry, RegistryError, RegistryResult, TargetConfigType, TargetRegistry,
};
use crate::portal::{DiscoveryPortal, Portal, TargetName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Default registry path
pub const DEFAULT_REGISTRY_PATH: &str = "/var/lib/voe-iscsi/discovery.json";

/// Exclusive lock on a registry file, released on drop
#[derive(Debug)]
pub struct RegistryLock {
    _file: File,
}

impl RegistryLock {
    /// Block until the registry at `registry_path` is ours
    pub fn acquire<P: AsRef<Path>>(registry_path: P) -> RegistryResult<Self> {
        let (file, path) = open_lock_file(registry_path.as_ref())?;
        loop {
            match flock(&file, libc::LOCK_EX) {
                Ok(()) => return Ok(Self { _file: file }),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(RegistryError::Io { path, source }),
            }
        }
    }

    /// Take the lock only if no other holder has it
    pub fn try_acquire<P: AsRef<Path>>(registry_path: P) -> RegistryResult<Option<Self>> {
        let (file, path) = open_lock_file(registry_path.as_ref())?;
        match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(source) => Err(RegistryError::Io { path, source }),
        }
    }
}

fn open_lock_file(registry_path: &Path) -> RegistryResult<(File, PathBuf)> {
    let mut name = registry_path.as_os_str().to_owned();
    name.push(".lock");
    let path = PathBuf::from(name);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;
    Ok((file, path))
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    // SAFETY: the descriptor stays open for the lifetime of `file`
    if unsafe { libc::flock(file.as_raw_fd(), operation) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Serialized registry contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryFile {
    /// Target name to entry
    #[serde(default)]
    targets: BTreeMap<TargetName, RegistryEntry>,

    /// SendTargets discovery portals in configuration order
    #[serde(default)]
    send_targets: Vec<SendTargetsPortal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SendTargetsPortal {
    name: DiscoveryPortal,
    portal: Portal,
}

/// Registry persisted as a JSON document
#[derive(Debug, Clone)]
pub struct FileTargetRegistry {
    path: PathBuf,
    contents: RegistryFile,
}

impl FileTargetRegistry {
    /// Load the registry, or create an empty one if the file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> RegistryResult<Self> {
        let path = path.as_ref();

        if path.exists() {
            return Self::load(path);
        }

        log::info!("Creating new registry at {:?}", path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut registry = Self {
            path: path.to_path_buf(),
            contents: RegistryFile::default(),
        };
        registry.sync()?;
        Ok(registry)
    }

    /// Load the registry from disk
    pub fn load<P: AsRef<Path>>(path: P) -> RegistryResult<Self> {
        let path = path.as_ref();
        let contents = read_registry_file(path)?;

        log::debug!(
            "Loaded registry with {} target(s) and {} discovery portal(s)",
            contents.targets.len(),
            contents.send_targets.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            contents,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a SendTargets discovery portal; its name is the portal's `addr:port`
    pub fn add_send_targets_portal(&mut self, portal: Portal) -> RegistryResult<DiscoveryPortal> {
        let name = DiscoveryPortal::from(&portal);
        if self.contents.send_targets.iter().any(|p| p.name == name) {
            return Err(RegistryError::PortalExists(name));
        }

        log::info!(discovery_portal = name.as_str(); "Adding SendTargets discovery portal");
        self.contents.send_targets.push(SendTargetsPortal {
            name: name.clone(),
            portal,
        });
        Ok(name)
    }

    /// Remove a SendTargets discovery portal. The dynamic targets it owns
    /// stay until the next discovery pass logs them out and removes them;
    /// their names are returned.
    pub fn remove_send_targets_portal(
        &mut self,
        name: &DiscoveryPortal,
    ) -> RegistryResult<BTreeSet<TargetName>> {
        let before = self.contents.send_targets.len();
        self.contents.send_targets.retain(|p| &p.name != name);
        if self.contents.send_targets.len() == before {
            return Err(RegistryError::PortalNotFound(name.clone()));
        }

        let orphans = self.entries_owned_by(name);
        log::info!(
            discovery_portal = name.as_str(), orphans = orphans.len();
            "Removed SendTargets discovery portal"
        );
        Ok(orphans)
    }

    /// Mark `target` for removal by the next discovery pass, which logs out
    /// any active session first
    pub fn retire_target(&mut self, target: &TargetName) -> RegistryResult<()> {
        let entry = self
            .contents
            .targets
            .get_mut(target)
            .ok_or_else(|| RegistryError::TargetNotFound(target.clone()))?;
        entry.retired = true;
        log::info!(iqn = target.as_str(); "Target marked for removal");
        Ok(())
    }

    /// Add an operator-configured target. An existing dynamic entry is
    /// converted to static; an existing static entry is an error.
    pub fn add_static_target(
        &mut self,
        target: TargetName,
        portals: Vec<Portal>,
    ) -> RegistryResult<()> {
        match self.contents.targets.get(&target).map(|e| e.config_type) {
            Some(TargetConfigType::DynamicSendTargets) => {
                log::info!(iqn = target.as_str(); "Converting dynamic target to static configuration");
            }
            Some(_) => return Err(RegistryError::TargetExists(target)),
            None => {}
        }

        log::info!(iqn = target.as_str(); "Adding static target");
        self.contents
            .targets
            .insert(target, RegistryEntry::static_target(portals));
        Ok(())
    }

    /// Get an entry by target name
    pub fn get(&self, target: &TargetName) -> Option<&RegistryEntry> {
        self.contents.targets.get(target)
    }

    /// All entries, sorted by target name
    pub fn entries(&self) -> impl Iterator<Item = (&TargetName, &RegistryEntry)> {
        self.contents.targets.iter()
    }
}

impl TargetRegistry for FileTargetRegistry {
    type Lock = RegistryLock;

    fn lock(&self) -> RegistryResult<RegistryLock> {
        RegistryLock::acquire(&self.path)
    }

    fn contains(&self, target: &TargetName) -> bool {
        self.contents.targets.contains_key(target)
    }

    fn config_type(&self, target: &TargetName) -> Option<TargetConfigType> {
        self.contents.targets.get(target).map(|e| e.config_type)
    }

    fn owner_of(&self, target: &TargetName) -> Option<DiscoveryPortal> {
        self.contents
            .targets
            .get(target)
            .and_then(|e| e.discovery_portal.clone())
    }

    fn merge_portal(
        &mut self,
        target: &TargetName,
        portal: &Portal,
        _owner: &DiscoveryPortal,
    ) -> RegistryResult<bool> {
        let entry = self
            .contents
            .targets
            .get_mut(target)
            .ok_or_else(|| RegistryError::TargetNotFound(target.clone()))?;
        Ok(entry.set_portal(portal.clone()))
    }

    fn create_dynamic(
        &mut self,
        target: &TargetName,
        portal: &Portal,
        owner: &DiscoveryPortal,
    ) -> RegistryResult<()> {
        if self.contents.targets.contains_key(target) {
            return Err(RegistryError::TargetExists(target.clone()));
        }
        self.contents.targets.insert(
            target.clone(),
            RegistryEntry::dynamic(portal.clone(), owner.clone()),
        );
        Ok(())
    }

    fn entries_owned_by(&self, owner: &DiscoveryPortal) -> BTreeSet<TargetName> {
        self.contents
            .targets
            .iter()
            .filter(|(_, e)| e.discovery_portal.as_ref() == Some(owner))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn remove(&mut self, target: &TargetName) -> RegistryResult<()> {
        self.contents
            .targets
            .remove(target)
            .map(|_| ())
            .ok_or_else(|| RegistryError::TargetNotFound(target.clone()))
    }

    fn retired(&self) -> BTreeSet<TargetName> {
        self.contents
            .targets
            .iter()
            .filter(|(_, e)| {
                e.retired
                    || e.discovery_portal.as_ref().is_some_and(|owner| {
                        !self.contents.send_targets.iter().any(|p| &p.name == owner)
                    })
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn send_targets_portals(&self) -> Vec<DiscoveryPortal> {
        self.contents
            .send_targets
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    fn send_targets_portal(&self, name: &DiscoveryPortal) -> Option<Portal> {
        self.contents
            .send_targets
            .iter()
            .find(|p| &p.name == name)
            .map(|p| p.portal.clone())
    }

    fn refresh(&mut self) -> RegistryResult<()> {
        if self.path.exists() {
            self.contents = read_registry_file(&self.path)?;
        }
        Ok(())
    }

    fn sync(&mut self) -> RegistryResult<()> {
        let json = serde_json::to_string_pretty(&self.contents).map_err(|source| {
            RegistryError::Format {
                path: self.path.clone(),
                source,
            }
        })?;

        // Write beside the target and rename so readers never see a torn file
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, json).map_err(|source| RegistryError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })?;

        log::debug!("Saved registry with {} target(s)", self.contents.targets.len());
        Ok(())
    }
}

fn read_registry_file(path: &Path) -> RegistryResult<RegistryFile> {
    let content = fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| RegistryError::Format {
        path: path.to_path_buf(),
        source,
    })
}
