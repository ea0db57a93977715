//! Engine and device creation settings.
//!
//! These are plain data: the application fills one in (or deserializes it
//! from a settings file) and hands it to device creation. Nothing in here
//! touches the GPU.

use serde::{Deserialize, Serialize};

use crate::rhi::{ApiMismatchError, GraphicsApi};

/// Per-resource-kind binding offsets used to emulate independent register
/// spaces on top of a single Vulkan binding space.
///
/// The offsets are consulted everywhere a shader binding number is turned
/// into a descriptor binding: layout creation, descriptor writes and
/// bindless allocation. They are fixed at device creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingOffsets {
    pub srv: u32,
    pub uav: u32,
    pub cbv: u32,
    pub sampler: u32,
    pub acceleration_structure: u32,
}

impl Default for BindingOffsets {
    fn default() -> Self {
        // Non-overlapping thousand-wide ranges per register space.
        BindingOffsets {
            srv: 0,
            uav: 1000,
            cbv: 2000,
            sampler: 3000,
            acceleration_structure: 4000,
        }
    }
}

/// Semantic version triple reported to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version { major, minor, patch }
    }
}

/// API-specific configuration carried inside a [`DeviceCreationDescription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiSpecificConfig {
    Vulkan(VulkanConfig),
}

impl ApiSpecificConfig {
    pub fn api(&self) -> GraphicsApi {
        match self {
            ApiSpecificConfig::Vulkan(_) => GraphicsApi::Vulkan,
        }
    }
}

/// Vulkan-only knobs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VulkanConfig {
    /// Additional instance extensions requested by the host (surface
    /// extensions, typically).
    pub instance_extensions: Vec<String>,
}

/// Everything device creation needs to know, API-independent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCreationDescription {
    pub application_name: String,
    pub application_version: Version,
    pub engine_name: String,
    pub engine_version: Version,
    pub graphics_api: GraphicsApi,
    pub specific_config: ApiSpecificConfig,
    pub binding_offsets: BindingOffsets,
}

impl DeviceCreationDescription {
    /// Checks that the API-specific configuration matches the requested API.
    pub fn validate(&self) -> Result<(), ApiMismatchError> {
        if self.specific_config.api() != self.graphics_api {
            return Err(ApiMismatchError {
                requested: self.graphics_api,
                configured: self.specific_config.api(),
            });
        }

        Ok(())
    }
}

impl Default for DeviceCreationDescription {
    fn default() -> Self {
        DeviceCreationDescription {
            application_name: "veil-application".to_owned(),
            application_version: Version::new(0, 1, 0),
            engine_name: "veil".to_owned(),
            engine_version: Version::new(0, 1, 0),
            graphics_api: GraphicsApi::Vulkan,
            specific_config: ApiSpecificConfig::Vulkan(VulkanConfig::default()),
            binding_offsets: BindingOffsets::default(),
        }
    }
}

/// Parses a [`DeviceCreationDescription`] from its JSON form.
pub fn device_description_from_json(json: &str) -> Result<DeviceCreationDescription, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_description_validates() {
        assert!(DeviceCreationDescription::default().validate().is_ok());
    }

    #[test]
    fn json_round_trip() {
        let description = DeviceCreationDescription::default();
        let json = serde_json::to_string(&description).unwrap();
        let parsed = device_description_from_json(&json).unwrap();

        assert_eq!(description, parsed);
    }
}
