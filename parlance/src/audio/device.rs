use crate::audio::error::{AudioError, AudioResult};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Name fragments that mark a software loopback / virtual device
const VIRTUAL_DEVICE_KEYWORDS: &[&str] = &[
    "blackhole",
    "vb-audio",
    "cable",
    "soundflower",
    "loopback",
    "virtual",
    "aggregate",
    "multi-output",
];

/// What a device is wanted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Physical capture device (microphone)
    Input,
    /// Playback device (speaker or virtual output)
    Output,
    /// Virtual device carrying another application's audio back as input
    Loopback,
}

/// Coarse classification of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Input,
    Output,
    Loopback,
    Unknown,
}

/// Lookup request handed to a [`DeviceDirectory`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceQuery {
    pub role: Option<DeviceRole>,
    /// Case-insensitive name fragment
    pub name: Option<String>,
    /// Explicit host index; wins over `name`
    pub index: Option<usize>,
    /// Prefer a virtual device over the default one
    pub prefer_virtual: bool,
}

impl DeviceQuery {
    pub fn role(role: DeviceRole) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: Option<usize>) -> Self {
        self.index = index;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn virtual_device(mut self) -> Self {
        self.prefer_virtual = true;
        self
    }
}

/// Resolved device and what it can do
///
/// Opaque to the ports: they pass it back to the backend, which reopens the
/// device by `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub index: usize,
    pub name: String,
    pub host_api: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
    pub is_default_input: bool,
    pub is_default_output: bool,
    pub is_virtual: bool,
}

impl DeviceHandle {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    pub fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }

    pub fn device_type(&self) -> DeviceType {
        if self.is_virtual && self.is_input() {
            DeviceType::Loopback
        } else if self.is_input() {
            DeviceType::Input
        } else if self.is_output() {
            DeviceType::Output
        } else {
            DeviceType::Unknown
        }
    }

    /// Whether this device can serve `role`
    pub fn supports(&self, role: DeviceRole) -> bool {
        match role {
            DeviceRole::Input | DeviceRole::Loopback => self.is_input(),
            DeviceRole::Output => self.is_output(),
        }
    }
}

/// Resolves device queries to handles
///
/// Implementations are plain objects owned by their caller; several may
/// exist at once.
pub trait DeviceDirectory: Send + Sync {
    /// Every device the directory knows about
    fn list(&self) -> AudioResult<Vec<DeviceHandle>>;

    /// Resolve a query; `None` when nothing matches
    fn resolve(&self, query: &DeviceQuery) -> Option<DeviceHandle> {
        let devices = match self.list() {
            Ok(devices) => devices,
            Err(e) => {
                debug!(error = %e, "Device listing failed");
                return None;
            }
        };
        select_device(&devices, query)
    }
}

/// Apply a query to a device list
///
/// Explicit index first, then name fragment, then the role's default: the
/// first virtual device for loopback or `prefer_virtual`, the host default
/// otherwise.
pub fn select_device(devices: &[DeviceHandle], query: &DeviceQuery) -> Option<DeviceHandle> {
    let fits = |d: &&DeviceHandle| query.role.map_or(true, |role| d.supports(role));

    if let Some(index) = query.index {
        return devices.iter().find(|d| d.index == index).filter(fits).cloned();
    }

    if let Some(name) = &query.name {
        let needle = name.to_lowercase();
        return devices
            .iter()
            .filter(fits)
            .find(|d| d.name.to_lowercase().contains(&needle))
            .cloned();
    }

    let role = query.role?;
    let wants_virtual = query.prefer_virtual || role == DeviceRole::Loopback;
    if wants_virtual {
        return devices
            .iter()
            .filter(fits)
            .find(|d| d.is_virtual)
            .cloned();
    }

    devices
        .iter()
        .filter(fits)
        .find(|d| match role {
            DeviceRole::Input | DeviceRole::Loopback => d.is_default_input,
            DeviceRole::Output => d.is_default_output,
        })
        .cloned()
}

/// Whether a device name looks like a virtual/loopback device
pub fn is_virtual_device_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    VIRTUAL_DEVICE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Directory over the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDeviceDirectory;

impl CpalDeviceDirectory {
    pub fn new() -> Self {
        Self
    }

    fn describe(host: &Host, index: usize, device: &Device) -> AudioResult<DeviceHandle> {
        let name = device.name()?;

        let max_input_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        let max_output_channels = device
            .supported_output_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);

        let default_sample_rate = device
            .default_input_config()
            .or_else(|_| device.default_output_config())
            .map(|c| c.sample_rate().0)
            .unwrap_or(0);

        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        Ok(DeviceHandle {
            index,
            is_default_input: default_input.as_deref() == Some(name.as_str()),
            is_default_output: default_output.as_deref() == Some(name.as_str()),
            is_virtual: is_virtual_device_name(&name),
            host_api: host.id().name().to_string(),
            name,
            max_input_channels,
            max_output_channels,
            default_sample_rate,
        })
    }
}

impl DeviceDirectory for CpalDeviceDirectory {
    /// List all devices on the default host
    ///
    /// # Example
    /// ```no_run
    /// use parlance_lib::audio::device::{CpalDeviceDirectory, DeviceDirectory};
    ///
    /// let directory = CpalDeviceDirectory::new();
    /// for device in directory.list().unwrap() {
    ///     println!("[{}] {} ({:?})", device.index, device.name, device.device_type());
    /// }
    /// ```
    fn list(&self) -> AudioResult<Vec<DeviceHandle>> {
        let host = cpal::default_host();
        let mut handles = Vec::new();

        for (index, device) in host.devices()?.enumerate() {
            match Self::describe(&host, index, &device) {
                Ok(handle) => handles.push(handle),
                Err(e) => debug!(index, error = %e, "Skipping unreadable device"),
            }
        }

        info!(count = handles.len(), host = host.id().name(), "Enumerated audio devices");
        Ok(handles)
    }
}

/// List every device on the default host
pub fn list_devices() -> AudioResult<Vec<DeviceHandle>> {
    CpalDeviceDirectory::new().list()
}

/// Reopen the device at `index` on `host`
///
/// # Errors
/// Returns `AudioError::InvalidDeviceIndex` when the host has no such device.
pub(crate) fn device_at(host: &Host, index: usize) -> AudioResult<Device> {
    host.devices()?
        .nth(index)
        .ok_or(AudioError::InvalidDeviceIndex(index))
}
