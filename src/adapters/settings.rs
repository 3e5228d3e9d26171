//! Persisted settings: system configuration and bonded peers.
//!
//! Implements [`SettingsPort`]. Both records are postcard blobs in the
//! `lbskit` namespace:
//!
//! | Key      | Contents                         |
//! |----------|----------------------------------|
//! | `syscfg` | [`SystemConfig`]                 |
//! | `bonds`  | [`BondTable`], oldest bond first |
//!
//! On the device the blobs live in NVS (commits are atomic per
//! `nvs_commit()`); on host an in-memory map stands in.

use log::{info, warn};

use crate::app::ports::{BondRecord, BondTable, MAX_BONDS, SettingsError, SettingsPort};
use crate::config::SystemConfig;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const NAMESPACE: &str = "lbskit";
const CONFIG_KEY: &str = "syscfg";
const BONDS_KEY: &str = "bonds";

#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 1024;

pub struct SettingsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl SettingsAdapter {
    /// Open the settings backend.
    ///
    /// On first boot or after a layout version change the NVS partition is
    /// erased and re-initialised.
    pub fn new() -> Result<Self, SettingsError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the startup context before any other
            // NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES as i32 || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as i32 {
                warn!("settings: erasing and re-initialising NVS partition");
                let ret = unsafe { nvs_flash_erase() };
                if ret != ESP_OK as i32 {
                    return Err(SettingsError::Backend(ret));
                }
                let ret = unsafe { nvs_flash_init() };
                if ret != ESP_OK as i32 {
                    return Err(SettingsError::Backend(ret));
                }
            } else if ret != ESP_OK as i32 {
                return Err(SettingsError::Backend(ret));
            }
            info!("settings: NVS backend ready");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("settings: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    // ── Blob primitives ───────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(key: &str) -> String {
        format!("{}::{}", NAMESPACE, key)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_blob(&self, key: &str) -> Result<Vec<u8>, SettingsError> {
        self.store
            .borrow()
            .get(&Self::composite_key(key))
            .cloned()
            .ok_or(SettingsError::NotFound)
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_blob(&mut self, key: &str, data: &[u8]) -> Result<(), SettingsError> {
        self.store
            .borrow_mut()
            .insert(Self::composite_key(key), data.to_vec());
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn erase_blob(&mut self, key: &str) -> Result<(), SettingsError> {
        self.store.borrow_mut().remove(&Self::composite_key(key));
        Ok(())
    }

    /// NUL-terminated copy of an NVS name (at most 15 characters).
    #[cfg(target_os = "espidf")]
    fn nvs_name(name: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let len = name.len().min(15);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        buf
    }

    /// Open the namespace, run `f` with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = Self::nvs_name(NAMESPACE);
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let mut handle: nvs_handle_t = 0;
        // SAFETY: `ns` is NUL-terminated and outlives the call.
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK as i32 {
            return Err(ret);
        }
        let result = f(handle);
        // SAFETY: handle was opened above and is not used after this.
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(target_os = "espidf")]
    fn map_nvs_err(rc: i32) -> SettingsError {
        if rc == ESP_ERR_NVS_NOT_FOUND as i32 {
            SettingsError::NotFound
        } else {
            SettingsError::Backend(rc)
        }
    }

    #[cfg(target_os = "espidf")]
    fn read_blob(&self, key: &str) -> Result<Vec<u8>, SettingsError> {
        let key = Self::nvs_name(key);
        Self::with_nvs_handle(false, |handle| {
            let mut size: usize = 0;
            // SAFETY: size query; `key` is NUL-terminated.
            let ret = unsafe { nvs_get_blob(handle, key.as_ptr().cast(), core::ptr::null_mut(), &mut size) };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            if size == 0 || size > MAX_BLOB_SIZE {
                return Err(ESP_ERR_NVS_INVALID_LENGTH as i32);
            }
            let mut buf = vec![0u8; size];
            // SAFETY: `buf` holds exactly `size` bytes.
            let ret = unsafe { nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size) };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            Ok(buf)
        })
        .map_err(Self::map_nvs_err)
    }

    #[cfg(target_os = "espidf")]
    fn write_blob(&mut self, key: &str, data: &[u8]) -> Result<(), SettingsError> {
        let key = Self::nvs_name(key);
        Self::with_nvs_handle(true, |handle| {
            // SAFETY: `data` is valid for `data.len()` bytes.
            let ret = unsafe { nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len()) };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            // SAFETY: handle is open read-write.
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            Ok(())
        })
        .map_err(SettingsError::Backend)
    }

    #[cfg(target_os = "espidf")]
    fn erase_blob(&mut self, key: &str) -> Result<(), SettingsError> {
        let key = Self::nvs_name(key);
        Self::with_nvs_handle(true, |handle| {
            // SAFETY: `key` is NUL-terminated; handle is open read-write.
            let ret = unsafe { nvs_erase_key(handle, key.as_ptr().cast()) };
            if ret != ESP_OK as i32 && ret != ESP_ERR_NVS_NOT_FOUND as i32 {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            Ok(())
        })
        .map_err(SettingsError::Backend)
    }
}

impl SettingsPort for SettingsAdapter {
    fn load_config(&self) -> Result<SystemConfig, SettingsError> {
        let bytes = match self.read_blob(CONFIG_KEY) {
            Ok(bytes) => bytes,
            Err(SettingsError::NotFound) => {
                info!("settings: no stored config, using defaults");
                return Ok(SystemConfig::default());
            }
            Err(e) => return Err(e),
        };
        let cfg: SystemConfig =
            postcard::from_bytes(&bytes).map_err(|_| SettingsError::Serialization)?;
        cfg.validate()?;
        info!("settings: loaded config ({} bytes)", bytes.len());
        Ok(cfg)
    }

    fn save_config(&mut self, config: &SystemConfig) -> Result<(), SettingsError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| SettingsError::Serialization)?;
        self.write_blob(CONFIG_KEY, &bytes)?;
        info!("settings: config saved ({} bytes)", bytes.len());
        Ok(())
    }

    fn load_bonds(&self) -> Result<BondTable, SettingsError> {
        match self.read_blob(BONDS_KEY) {
            Ok(bytes) => postcard::from_bytes(&bytes).map_err(|_| SettingsError::Serialization),
            Err(SettingsError::NotFound) => Ok(BondTable::new()),
            Err(e) => Err(e),
        }
    }

    fn store_bond(&mut self, bond: &BondRecord) -> Result<(), SettingsError> {
        let mut bonds = match self.load_bonds() {
            Ok(bonds) => bonds,
            Err(SettingsError::Serialization) => {
                warn!("settings: bond table unreadable, starting over");
                BondTable::new()
            }
            Err(e) => return Err(e),
        };

        bonds.retain(|b| b.peer != bond.peer);
        if bonds.len() == MAX_BONDS {
            let evicted = bonds.remove(0);
            info!("settings: bond table full, evicting {}", evicted.peer);
        }
        // Cannot fail: at least one slot was freed above.
        let _ = bonds.push(*bond);

        let bytes = postcard::to_allocvec(&bonds).map_err(|_| SettingsError::Serialization)?;
        self.write_blob(BONDS_KEY, &bytes)?;
        info!("settings: bond stored for {} (level {})", bond.peer, bond.level);
        Ok(())
    }

    fn clear_bonds(&mut self) -> Result<(), SettingsError> {
        self.erase_blob(BONDS_KEY)?;
        info!("settings: all bonds cleared");
        Ok(())
    }
}
