use std::fs;
use std::io;
use std::path::Path;

use dashmap::DashMap;
use tracing::info;
use ulid::Ulid;

use crate::model::Resource;

/// Read-only view of the bookable rooms.
pub trait ResourceRegistry: Send + Sync {
    fn get_resource(&self, id: &Ulid) -> Option<Resource>;

    /// All resources, ordered by name.
    fn resources(&self) -> Vec<Resource>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("resources file: {0}")]
    Io(#[from] io::Error),
    #[error("resources file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("resource {id}: {reason}")]
    Invalid { id: Ulid, reason: &'static str },
    #[error("duplicate resource id {0}")]
    Duplicate(Ulid),
}

/// Registry held in memory, loaded from and saved to a JSON array of resources.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    resources: DashMap<Ulid, Resource>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_resources(resources: Vec<Resource>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for r in resources {
            registry.register(r)?;
        }
        Ok(registry)
    }

    pub fn register(&self, resource: Resource) -> Result<(), RegistryError> {
        resource
            .check()
            .map_err(|reason| RegistryError::Invalid { id: resource.id, reason })?;
        if self.resources.contains_key(&resource.id) {
            return Err(RegistryError::Duplicate(resource.id));
        }
        self.resources.insert(resource.id, resource);
        Ok(())
    }

    /// Administrative block/unblock. Returns false for an unknown id.
    pub fn set_blocked(&self, id: &Ulid, blocked: bool) -> bool {
        match self.resources.get_mut(id) {
            Some(mut r) => {
                r.blocked = blocked;
                true
            }
            None => false,
        }
    }

    /// Load the registry file, or seed it with the default rooms if it does not exist yet.
    /// Seeding writes the file so resource ids stay stable across restarts.
    pub fn load_or_seed(path: &Path) -> Result<Self, RegistryError> {
        match fs::read(path) {
            Ok(bytes) => {
                let resources: Vec<Resource> = serde_json::from_slice(&bytes)?;
                info!("loaded {} resources from {}", resources.len(), path.display());
                Self::from_resources(resources)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let registry = Self::from_resources(default_rooms())?;
                registry.save(path)?;
                info!("seeded default resources into {}", path.display());
                Ok(registry)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let json = serde_json::to_vec_pretty(&self.resources())?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl ResourceRegistry for InMemoryRegistry {
    fn get_resource(&self, id: &Ulid) -> Option<Resource> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    fn resources(&self) -> Vec<Resource> {
        let mut all: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        all
    }
}

pub fn default_rooms() -> Vec<Resource> {
    let room = |name: &str, capacity: u32, max_duration: u16, floor: &str, amenities: &[&str]| Resource {
        id: Ulid::new(),
        name: name.to_string(),
        capacity,
        blocked: false,
        max_duration,
        floor: floor.to_string(),
        amenities: amenities.iter().map(|a| a.to_string()).collect(),
    };
    vec![
        room("Conference Room", 20, 480, "2nd Floor", &["Projector", "Video Call", "Whiteboard"]),
        room("Meeting Room 1", 10, 240, "1st Floor", &["TV Screen", "Whiteboard"]),
        room("Meeting Room 2", 8, 240, "1st Floor", &["TV Screen"]),
        room("Board Room", 15, 480, "3rd Floor", &["Projector", "Video Call", "Catering"]),
    ]
}
