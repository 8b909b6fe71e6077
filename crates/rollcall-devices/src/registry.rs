//! The registry itself.

use rollcall_protocol::{
    DeviceId, DeviceMeta, DeviceRegistration, DeviceStatus, RegistrationId, StudentId,
};
use rollcall_tick::SharedClock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::DeviceError;

/// Registry limits.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum concurrently active devices per student. Default: 2.
    pub max_active_devices: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_active_devices: 2,
        }
    }
}

/// Device allow-list.
///
/// All registrations live behind one async mutex, so each operation's
/// check-then-write (the device cap in particular) is atomic.
pub struct DeviceRegistry {
    config: RegistryConfig,
    clock: SharedClock,
    /// Registrations in the order they were created.
    devices: Mutex<Vec<DeviceRegistration>>,
}

impl DeviceRegistry {
    pub fn new(config: RegistryConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Registers `device_id` for `student_id`.
    ///
    /// Re-registering a device the student already owns returns the
    /// existing registration unchanged, whatever its status.
    ///
    /// # Errors
    /// - [`DeviceError::BoundToAnotherStudent`] if another student owns it.
    /// - [`DeviceError::LimitReached`] if the student is at the cap.
    pub async fn register(
        &self,
        student_id: &StudentId,
        device_id: DeviceId,
        meta: DeviceMeta,
    ) -> Result<DeviceRegistration, DeviceError> {
        let mut devices = self.devices.lock().await;

        if let Some(existing) = devices.iter().find(|d| d.device_id == device_id) {
            if &existing.student_id != student_id {
                return Err(DeviceError::BoundToAnotherStudent(device_id));
            }
            return Ok(existing.clone());
        }

        if active_count(&devices, student_id) >= self.config.max_active_devices {
            return Err(DeviceError::LimitReached {
                student_id: student_id.clone(),
                max: self.config.max_active_devices,
            });
        }

        let registration = DeviceRegistration {
            id: RegistrationId::new(),
            student_id: student_id.clone(),
            device_id,
            meta,
            status: DeviceStatus::Active,
            registered_at: self.clock.now(),
        };
        devices.push(registration.clone());

        info!(%student_id, device_id = %registration.device_id, "device registered");
        Ok(registration)
    }

    /// `true` iff `device_id` is registered to `student_id` and active.
    pub async fn is_valid(&self, student_id: &StudentId, device_id: &DeviceId) -> bool {
        self.devices
            .lock()
            .await
            .iter()
            .any(|d| &d.device_id == device_id && &d.student_id == student_id && d.is_active())
    }

    /// The student's devices, newest first.
    pub async fn list(&self, student_id: &StudentId) -> Vec<DeviceRegistration> {
        self.devices
            .lock()
            .await
            .iter()
            .rev()
            .filter(|d| &d.student_id == student_id)
            .cloned()
            .collect()
    }

    /// Marks a device blocked. Blocking a blocked device is a no-op.
    pub async fn block(&self, device_id: &DeviceId) -> Result<DeviceRegistration, DeviceError> {
        let mut devices = self.devices.lock().await;
        let device = devices
            .iter_mut()
            .find(|d| &d.device_id == device_id)
            .ok_or_else(|| DeviceError::NotFound(device_id.clone()))?;
        device.status = DeviceStatus::Blocked;
        info!(%device_id, student_id = %device.student_id, "device blocked");
        Ok(device.clone())
    }

    /// Marks a device active again.
    ///
    /// # Errors
    /// - [`DeviceError::NotFound`] if the device is unknown.
    /// - [`DeviceError::LimitReached`] if the owner filled the freed slot.
    pub async fn unblock(&self, device_id: &DeviceId) -> Result<DeviceRegistration, DeviceError> {
        let mut devices = self.devices.lock().await;
        let idx = devices
            .iter()
            .position(|d| &d.device_id == device_id)
            .ok_or_else(|| DeviceError::NotFound(device_id.clone()))?;

        if devices[idx].is_active() {
            return Ok(devices[idx].clone());
        }
        let student_id = devices[idx].student_id.clone();
        if active_count(&devices, &student_id) >= self.config.max_active_devices {
            return Err(DeviceError::LimitReached {
                student_id,
                max: self.config.max_active_devices,
            });
        }

        devices[idx].status = DeviceStatus::Active;
        info!(%device_id, %student_id, "device unblocked");
        Ok(devices[idx].clone())
    }

    /// Deletes the registration of `device_id` owned by `student_id`.
    ///
    /// Scoped to the owner: naming someone else's device reports
    /// `NotFound`, the same as an unknown device.
    pub async fn remove(&self, student_id: &StudentId, device_id: &DeviceId) -> Result<(), DeviceError> {
        let mut devices = self.devices.lock().await;
        let before = devices.len();
        devices.retain(|d| !(&d.device_id == device_id && &d.student_id == student_id));
        if devices.len() == before {
            return Err(DeviceError::NotFound(device_id.clone()));
        }
        debug!(%student_id, %device_id, "device removed");
        Ok(())
    }
}

fn active_count(devices: &[DeviceRegistration], student_id: &StudentId) -> usize {
    devices
        .iter()
        .filter(|d| &d.student_id == student_id && d.is_active())
        .count()
}
