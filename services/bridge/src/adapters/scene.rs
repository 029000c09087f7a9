//! services/bridge/src/adapters/scene.rs
//!
//! An in-memory implementation of the `Scene` port. Stands in for the 3D
//! visualization host: it stores poses, landmarks and spherical regions and
//! answers collision queries, with no rendering.

use neuro_surgery_core::{PortError, PortResult, Pose, Scene, Vec3};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Region {
    name: String,
    center: Vec3,
    radius: f64,
}

#[derive(Debug, Default)]
pub struct InMemoryScene {
    tools: HashMap<String, Pose>,
    landmarks: HashMap<String, Vec3>,
    regions: Vec<Region>,
}

impl InMemoryScene {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scene for InMemoryScene {
    fn pose(&self, tool: &str) -> PortResult<Pose> {
        self.tools
            .get(tool)
            .copied()
            .ok_or_else(|| PortError::NotFound(format!("tool '{}'", tool)))
    }

    fn set_pose(&mut self, tool: &str, pose: Pose) {
        self.tools.insert(tool.to_string(), pose);
    }

    fn landmark(&self, name: &str) -> Option<Vec3> {
        self.landmarks.get(name).copied()
    }

    fn set_landmark(&mut self, name: &str, position: Vec3) {
        self.landmarks.insert(name.to_string(), position);
    }

    fn add_region(&mut self, name: &str, center: Vec3, radius: f64) {
        self.regions.push(Region {
            name: name.to_string(),
            center,
            radius,
        });
    }

    fn collisions(&self, tool: &str) -> PortResult<Vec<String>> {
        let tip = self.pose(tool)?.position;
        Ok(self
            .regions
            .iter()
            .filter(|region| region.center.distance(tip) <= region.radius)
            .map(|region| region.name.clone())
            .collect())
    }

    fn clear(&mut self) {
        self.tools.clear();
        self.landmarks.clear();
        self.regions.clear();
    }
}
