//! Radio stack adapter for the LED-Button peripheral.
//!
//! Implements [`RadioStack`]: stack bring-up, service registration,
//! advertising, attribute values and notifications.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GAP/GATTS through `esp_idf_svc::sys`.
//!   Stack callbacks are C function pointers; they answer the peer
//!   synchronously where the protocol requires it and post a
//!   [`StackEvent`](super::stack_events::StackEvent) for everything else.
//! - **all other targets**: an in-memory radio that records what the domain
//!   asked of it, with per-step failure injection for tests.

use log::info;

use crate::app::ports::{BondRecord, RadioStack};
use crate::error::BleError;
use crate::gatt::LbsAttribute;

/// Zephyr-style "try again" code returned by the simulated stack when a
/// step runs before the stack is enabled.
#[cfg(not(target_os = "espidf"))]
const EAGAIN: i32 = -11;

/// Device name as advertised. Longer names are truncated.
fn device_name(name: &str) -> heapless::String<24> {
    let mut out = heapless::String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Steps of the stack lifecycle, in startup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioStep {
    AuthRegister,
    AuthInfoRegister,
    Enable,
    ServiceInit,
    Advertising,
    Notify,
}

// ───────────────────────────────────────────────────────────────
// Host simulation
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use super::RadioStep;
    use crate::app::ports::BondRecord;
    use crate::gatt::LbsAttribute;

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[derive(Debug, Default)]
    pub struct SimRadio {
        failures: Mutex<HashMap<RadioStep, i32>>,
        steps: Mutex<Vec<RadioStep>>,
        pub(super) enabled: AtomicBool,
        pub(super) service_registered: AtomicBool,
        pub(super) advertising_starts: AtomicU32,
        values: Mutex<HashMap<LbsAttribute, Vec<u8>>>,
        notifications: Mutex<Vec<(u16, Vec<u8>)>>,
        replies: Mutex<Vec<bool>>,
        bonds: Mutex<Vec<BondRecord>>,
    }

    impl SimRadio {
        pub fn fail(&self, step: RadioStep, rc: i32) {
            lock(&self.failures).insert(step, rc);
        }

        /// Record the step; return the injected error code, if any.
        pub fn enter(&self, step: RadioStep) -> Option<i32> {
            lock(&self.steps).push(step);
            lock(&self.failures).get(&step).copied()
        }

        pub fn steps(&self) -> Vec<RadioStep> {
            lock(&self.steps).clone()
        }

        pub fn set_value(&self, attr: LbsAttribute, value: &[u8]) {
            lock(&self.values).insert(attr, value.to_vec());
        }

        pub fn value(&self, attr: LbsAttribute) -> Option<Vec<u8>> {
            lock(&self.values).get(&attr).cloned()
        }

        pub fn record_notification(&self, handle: u16, value: &[u8]) {
            lock(&self.notifications).push((handle, value.to_vec()));
        }

        pub fn notifications(&self) -> Vec<(u16, Vec<u8>)> {
            lock(&self.notifications).clone()
        }

        pub fn advertising_starts(&self) -> u32 {
            self.advertising_starts.load(Ordering::Relaxed)
        }

        pub fn record_reply(&self, accept: bool) {
            lock(&self.replies).push(accept);
        }

        /// Answers given to confirmation requests, oldest first.
        pub fn replies(&self) -> Vec<bool> {
            lock(&self.replies).clone()
        }

        pub fn set_bonds(&self, bonds: &[BondRecord]) {
            *lock(&self.bonds) = bonds.to_vec();
        }

        pub fn bonds(&self) -> Vec<BondRecord> {
            lock(&self.bonds).clone()
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub use sim::SimRadio;

/// The peripheral's radio. Clones share one stack.
#[derive(Debug, Clone)]
pub struct BleStack {
    device_name: heapless::String<24>,
    #[cfg(not(target_os = "espidf"))]
    sim: std::sync::Arc<SimRadio>,
}

impl BleStack {
    pub fn new(name: &str) -> Self {
        Self {
            device_name: device_name(name),
            #[cfg(not(target_os = "espidf"))]
            sim: std::sync::Arc::new(SimRadio::default()),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

#[cfg(not(target_os = "espidf"))]
impl BleStack {
    /// Make `step` fail with `rc` from now on.
    pub fn with_failure(self, step: RadioStep, rc: i32) -> Self {
        self.sim.fail(step, rc);
        self
    }

    pub fn sim(&self) -> &SimRadio {
        &self.sim
    }

    fn step(&self, step: RadioStep, err: fn(i32) -> BleError) -> Result<(), BleError> {
        match self.sim.enter(step) {
            Some(rc) => Err(err(rc)),
            None => Ok(()),
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl RadioStack for BleStack {
    fn register_auth_callbacks(&self) -> Result<(), BleError> {
        self.step(RadioStep::AuthRegister, BleError::AuthRegister)?;
        info!("BLE(sim): authorization callbacks registered");
        Ok(())
    }

    fn register_auth_info_callbacks(&self) -> Result<(), BleError> {
        self.step(RadioStep::AuthInfoRegister, BleError::AuthInfoRegister)?;
        info!("BLE(sim): authorization info callbacks registered");
        Ok(())
    }

    fn enable(&self) -> Result<(), BleError> {
        use std::sync::atomic::Ordering;
        self.step(RadioStep::Enable, BleError::StackEnable)?;
        self.sim.enabled.store(true, Ordering::Release);
        info!("BLE(sim): stack enabled");
        Ok(())
    }

    fn init_service(&self) -> Result<(), BleError> {
        use std::sync::atomic::Ordering;
        self.step(RadioStep::ServiceInit, BleError::ServiceInit)?;
        if !self.sim.enabled.load(Ordering::Acquire) {
            return Err(BleError::ServiceInit(EAGAIN));
        }
        self.sim.service_registered.store(true, Ordering::Release);
        info!(
            "BLE(sim): service {:032x} registered",
            crate::gatt::LBS_SERVICE_UUID
        );
        Ok(())
    }

    fn start_advertising(&self) -> Result<(), BleError> {
        use std::sync::atomic::Ordering;
        self.step(RadioStep::Advertising, BleError::AdvertisingStart)?;
        if !self.sim.enabled.load(Ordering::Acquire) {
            return Err(BleError::AdvertisingStart(EAGAIN));
        }
        self.sim.advertising_starts.fetch_add(1, Ordering::Relaxed);
        info!("BLE(sim): advertising '{}'", self.device_name);
        Ok(())
    }

    fn set_value(&self, attr: LbsAttribute, value: &[u8]) {
        self.sim.set_value(attr, value);
    }

    fn notify(&self, conn_handle: u16, attr: LbsAttribute, value: &[u8]) -> Result<(), BleError> {
        self.step(RadioStep::Notify, BleError::Notify)?;
        log::debug!("BLE(sim): notify {:?} on conn {}: {:02x?}", attr, conn_handle, value);
        self.sim.record_notification(conn_handle, value);
        Ok(())
    }

    fn pairing_reply(&self, accept: bool) -> Result<(), BleError> {
        info!("BLE(sim): pairing {}", if accept { "confirmed" } else { "rejected" });
        self.sim.record_reply(accept);
        Ok(())
    }

    fn restore_bonds(&self, bonds: &[BondRecord]) -> usize {
        self.sim.set_bonds(bonds);
        bonds.len()
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF Bluedroid
// ───────────────────────────────────────────────────────────────

// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These atomics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
mod esp {
    use core::cell::Cell;
    use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU32, Ordering};

    use embassy_sync::blocking_mutex::Mutex;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use esp_idf_svc::sys::*;
    use log::{debug, info, warn};

    use crate::adapters::stack_events::{StackEvent, post};
    use crate::gatt::{self, AttError, CCC_NOTIFY, LbsAttribute};
    use crate::link::{DisconnectReason, PeerAddr, SecurityLevel};

    /// GATT handles: service + button char/value + CCC + LED char/value.
    const SERVICE_HANDLES: u16 = 8;
    const CCC_UUID: u16 = 0x2902;

    pub static GATTS_IF: AtomicU32 = AtomicU32::new(ESP_GATT_IF_NONE);
    pub static CONN_ID: AtomicU16 = AtomicU16::new(0);
    static SVC_HANDLE: AtomicU16 = AtomicU16::new(0);
    static BUTTON_HANDLE: AtomicU16 = AtomicU16::new(0);
    static BUTTON_CCC_HANDLE: AtomicU16 = AtomicU16::new(0);
    static LED_HANDLE: AtomicU16 = AtomicU16::new(0);
    static CHAR_STEP: AtomicU32 = AtomicU32::new(0);

    // Values served to peer reads.
    static BUTTON_VALUE: AtomicU8 = AtomicU8::new(0);
    static LED_VALUE: AtomicU8 = AtomicU8::new(0);
    static CCC_VALUE: AtomicU16 = AtomicU16::new(0);

    /// Peer of the numeric comparison waiting for the operator.
    static PENDING_CONFIRM: Mutex<CriticalSectionRawMutex, Cell<Option<esp_bd_addr_t>>> =
        Mutex::new(Cell::new(None));

    pub fn take_pending_confirm() -> Option<esp_bd_addr_t> {
        PENDING_CONFIRM.lock(Cell::take)
    }

    fn hold_pending_confirm(addr: esp_bd_addr_t) {
        PENDING_CONFIRM.lock(|p| p.set(Some(addr)));
    }

    /// Whether pairing callbacks are forwarded.
    pub static AUTH_ENABLED: AtomicBool = AtomicBool::new(false);
    pub static AUTH_INFO_ENABLED: AtomicBool = AtomicBool::new(false);

    pub fn handle_of(attr: LbsAttribute) -> u16 {
        match attr {
            LbsAttribute::Button => BUTTON_HANDLE.load(Ordering::Acquire),
            LbsAttribute::ButtonCcc => BUTTON_CCC_HANDLE.load(Ordering::Acquire),
            LbsAttribute::Led => LED_HANDLE.load(Ordering::Acquire),
        }
    }

    fn attr_of(handle: u16) -> Option<LbsAttribute> {
        [LbsAttribute::Button, LbsAttribute::ButtonCcc, LbsAttribute::Led]
            .into_iter()
            .find(|a| handle != 0 && handle_of(*a) == handle)
    }

    pub fn mirror(attr: LbsAttribute, value: &[u8]) {
        match attr {
            LbsAttribute::Button => BUTTON_VALUE.store(value.first().copied().unwrap_or(0), Ordering::Release),
            LbsAttribute::Led => LED_VALUE.store(value.first().copied().unwrap_or(0), Ordering::Release),
            LbsAttribute::ButtonCcc => {
                let raw = match value {
                    [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
                    [lo] => u16::from(*lo),
                    [] => 0,
                };
                CCC_VALUE.store(raw, Ordering::Release);
            }
        }
    }

    fn mirrored(attr: LbsAttribute, out: &mut [u8; 2]) -> usize {
        match attr {
            LbsAttribute::Button => {
                out[0] = BUTTON_VALUE.load(Ordering::Acquire);
                1
            }
            LbsAttribute::Led => {
                out[0] = LED_VALUE.load(Ordering::Acquire);
                1
            }
            LbsAttribute::ButtonCcc => {
                *out = CCC_VALUE.load(Ordering::Acquire).to_le_bytes();
                2
            }
        }
    }

    fn uuid128_to_esp(uuid: u128) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 16;
        t.uuid.uuid128 = uuid.to_le_bytes();
        t
    }

    fn uuid16_to_esp(uuid: u16) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 2;
        t.uuid.uuid16 = uuid;
        t
    }

    unsafe fn add_gatt_char(svc_handle: u16, uuid: u128, perm: u32, prop: u32) {
        let mut char_uuid = uuid128_to_esp(uuid);
        unsafe {
            esp_ble_gatts_add_char(
                svc_handle,
                &mut char_uuid,
                perm as esp_gatt_perm_t,
                prop as esp_gatt_char_prop_t,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        }
    }

    unsafe fn send_response(gatts_if: esp_gatt_if_t, conn_id: u16, trans_id: u32, handle: u16, status: esp_gatt_status_t, value: &[u8]) {
        let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
        unsafe {
            rsp.attr_value.handle = handle;
            rsp.attr_value.len = value.len() as u16;
            rsp.attr_value.value[..value.len()].copy_from_slice(value);
            esp_ble_gatts_send_response(gatts_if, conn_id, trans_id, status, &mut rsp);
        }
    }

    pub fn adv_params() -> esp_ble_adv_params_t {
        esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..unsafe { core::mem::zeroed() }
        }
    }

    fn level_of(auth_mode: u8) -> SecurityLevel {
        let mode = u32::from(auth_mode);
        if mode & ESP_LE_AUTH_REQ_MITM == 0 {
            SecurityLevel::L2
        } else if mode & ESP_LE_AUTH_REQ_SC_ONLY != 0 {
            SecurityLevel::L4
        } else {
            SecurityLevel::L3
        }
    }

    pub unsafe extern "C" fn gap_event_handler(event: esp_gap_ble_cb_event_t, param: *mut esp_ble_gap_cb_param_t) {
        let auth = AUTH_ENABLED.load(Ordering::Acquire);
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                debug!("BLE GAP: advertising started");
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => unsafe {
                if auth {
                    post(StackEvent::SecurityRequest);
                }
                esp_ble_gap_security_rsp((*param).ble_security.ble_req.bd_addr.as_mut_ptr(), auth);
            },
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_PASSKEY_NOTIF_EVT => unsafe {
                if auth {
                    post(StackEvent::PasskeyDisplay((*param).ble_security.key_notif.passkey));
                }
            },
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_NC_REQ_EVT => unsafe {
                let notif = &mut (*param).ble_security.key_notif;
                if auth {
                    // Answered later through `RadioStack::pairing_reply`.
                    hold_pending_confirm(notif.bd_addr);
                    post(StackEvent::PasskeyConfirmRequest(notif.passkey));
                } else {
                    esp_ble_confirm_reply(notif.bd_addr.as_mut_ptr(), false);
                }
            },
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => unsafe {
                let p = &(*param).ble_security.auth_cmpl;
                let info = AUTH_INFO_ENABLED.load(Ordering::Acquire);
                // Still holding the request means the peer gave up first.
                if take_pending_confirm().is_some() && !p.success {
                    post(StackEvent::PairingCancel);
                }
                if p.success {
                    post(StackEvent::SecurityChanged {
                        level: level_of(p.auth_mode),
                        err: None,
                    });
                    if info {
                        let bonded = u32::from(p.auth_mode) & ESP_LE_AUTH_BOND != 0;
                        post(StackEvent::PairingComplete { bonded });
                    }
                } else {
                    post(StackEvent::SecurityChanged {
                        level: SecurityLevel::L1,
                        err: Some(p.fail_reason as u8),
                    });
                    if info {
                        post(StackEvent::PairingFailed {
                            reason: p.fail_reason as u8,
                        });
                    }
                }
            },
            _ => {}
        }
    }

    pub unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => unsafe {
                GATTS_IF.store(u32::from(gatts_if), Ordering::Release);
                info!("BLE GATTS: app registered (if={})", gatts_if);
                let mut svc_id = esp_gatt_srvc_id_t {
                    id: esp_gatt_id_t {
                        uuid: uuid128_to_esp(gatt::LBS_SERVICE_UUID),
                        inst_id: 0,
                    },
                    is_primary: true,
                };
                esp_ble_gatts_create_service(gatts_if, &mut svc_id, SERVICE_HANDLES);
            },
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => unsafe {
                let svc_handle = (*param).create.service_handle;
                SVC_HANDLE.store(svc_handle, Ordering::Release);
                info!("BLE GATTS: service created (handle={})", svc_handle);
                esp_ble_gatts_start_service(svc_handle);
                CHAR_STEP.store(1, Ordering::Release);
                add_gatt_char(
                    svc_handle,
                    gatt::LBS_BUTTON_UUID,
                    ESP_GATT_PERM_READ,
                    ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                );
            },
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => unsafe {
                let handle = (*param).add_char.attr_handle;
                let svc_handle = SVC_HANDLE.load(Ordering::Acquire);
                match CHAR_STEP.load(Ordering::Acquire) {
                    1 => {
                        BUTTON_HANDLE.store(handle, Ordering::Release);
                        info!("BLE GATTS: button char (handle={})", handle);
                        CHAR_STEP.store(2, Ordering::Release);
                        let mut ccc = uuid16_to_esp(CCC_UUID);
                        esp_ble_gatts_add_char_descr(
                            svc_handle,
                            &mut ccc,
                            (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                            core::ptr::null_mut(),
                            core::ptr::null_mut(),
                        );
                    }
                    3 => {
                        LED_HANDLE.store(handle, Ordering::Release);
                        CHAR_STEP.store(4, Ordering::Release);
                        info!("BLE GATTS: LED char (handle={}), service ready", handle);
                    }
                    _ => {}
                }
            },
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => unsafe {
                if CHAR_STEP.load(Ordering::Acquire) == 2 {
                    let handle = (*param).add_char_descr.attr_handle;
                    BUTTON_CCC_HANDLE.store(handle, Ordering::Release);
                    CHAR_STEP.store(3, Ordering::Release);
                    add_gatt_char(
                        SVC_HANDLE.load(Ordering::Acquire),
                        gatt::LBS_LED_UUID,
                        ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE,
                        ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_WRITE,
                    );
                }
            },
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => unsafe {
                let p = &(*param).connect;
                CONN_ID.store(p.conn_id, Ordering::Release);
                CCC_VALUE.store(0, Ordering::Release);
                post(StackEvent::Connected {
                    handle: p.conn_id,
                    peer: PeerAddr(p.remote_bda),
                    err: None,
                });
            },
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => unsafe {
                let p = &(*param).disconnect;
                PENDING_CONFIRM.lock(|pending| {
                    if pending.get() == Some(p.remote_bda) {
                        pending.set(None);
                    }
                });
                post(StackEvent::Disconnected {
                    handle: p.conn_id,
                    reason: DisconnectReason(p.reason as u8),
                });
            },
            esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => unsafe {
                let p = &(*param).read;
                let mut value = [0u8; 2];
                let (status, body) = match attr_of(p.handle) {
                    Some(attr) => {
                        let len = mirrored(attr, &mut value);
                        let offset = usize::from(p.offset);
                        if offset > len {
                            (AttError::InvalidOffset as esp_gatt_status_t, &value[..0])
                        } else {
                            (esp_gatt_status_t_ESP_GATT_OK, &value[offset..len])
                        }
                    }
                    None => (AttError::ReadNotPermitted as esp_gatt_status_t, &value[..0]),
                };
                if p.need_rsp {
                    send_response(gatts_if, p.conn_id, p.trans_id, p.handle, status, body);
                }
            },
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => unsafe {
                let p = &(*param).write;
                let data = core::slice::from_raw_parts(p.value, usize::from(p.len));
                let Some(attr) = attr_of(p.handle) else {
                    if p.need_rsp {
                        send_response(gatts_if, p.conn_id, p.trans_id, p.handle, AttError::WriteNotPermitted as esp_gatt_status_t, &[]);
                    }
                    return;
                };
                let verdict = gatt::decode_write(attr, p.offset, data);
                if p.need_rsp {
                    let status = match verdict {
                        Ok(_) => esp_gatt_status_t_ESP_GATT_OK,
                        Err(e) => e as esp_gatt_status_t,
                    };
                    send_response(gatts_if, p.conn_id, p.trans_id, p.handle, status, &[]);
                }
                match verdict {
                    Ok(_) => {
                        if attr == LbsAttribute::ButtonCcc {
                            mirror(attr, data);
                        }
                        match heapless::Vec::from_slice(data) {
                            Ok(data) => post(StackEvent::AttrWrite {
                                attr,
                                offset: p.offset,
                                data,
                            }),
                            Err(()) => warn!("BLE GATTS: write to {:?} too long", attr),
                        }
                    }
                    Err(e) => debug!("BLE GATTS: write to {:?} refused: {}", attr, e),
                }
            },
            _ => {}
        }
    }

    pub fn ccc_enabled() -> bool {
        CCC_VALUE.load(Ordering::Acquire) & CCC_NOTIFY != 0
    }
}

#[cfg(target_os = "espidf")]
fn check(rc: esp_idf_svc::sys::esp_err_t, err: fn(i32) -> BleError) -> Result<(), BleError> {
    if rc == esp_idf_svc::sys::ESP_OK as i32 {
        Ok(())
    } else {
        Err(err(rc))
    }
}

#[cfg(target_os = "espidf")]
impl RadioStack for BleStack {
    fn register_auth_callbacks(&self) -> Result<(), BleError> {
        use core::sync::atomic::Ordering;
        use esp_idf_svc::sys::*;

        // Display-only with yes/no confirmation, bonding, Secure Connections.
        let auth_req: esp_ble_auth_req_t = ESP_LE_AUTH_REQ_SC_MITM_BOND as esp_ble_auth_req_t;
        let iocap: esp_ble_io_cap_t = ESP_IO_CAP_IO as esp_ble_io_cap_t;
        let key_size: u8 = 16;
        let keys: u8 = (ESP_BLE_ENC_KEY_MASK | ESP_BLE_ID_KEY_MASK) as u8;
        let params: [(esp_ble_sm_param_t, *const u8, u32); 5] = [
            (esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE, &auth_req as *const _ as *const u8, core::mem::size_of_val(&auth_req) as u32),
            (esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE, &iocap as *const _ as *const u8, core::mem::size_of_val(&iocap) as u32),
            (esp_ble_sm_param_t_ESP_BLE_SM_MAX_KEY_SIZE, &key_size, 1),
            (esp_ble_sm_param_t_ESP_BLE_SM_SET_INIT_KEY, &keys, 1),
            (esp_ble_sm_param_t_ESP_BLE_SM_SET_RSP_KEY, &keys, 1),
        ];
        for (param, value, len) in params {
            let rc = unsafe { esp_ble_gap_set_security_param(param, value as *mut _, len as u8) };
            check(rc, BleError::AuthRegister)?;
        }
        esp::AUTH_ENABLED.store(true, Ordering::Release);
        info!("BLE: authorization callbacks registered");
        Ok(())
    }

    fn register_auth_info_callbacks(&self) -> Result<(), BleError> {
        esp::AUTH_INFO_ENABLED.store(true, core::sync::atomic::Ordering::Release);
        info!("BLE: authorization info callbacks registered");
        Ok(())
    }

    fn enable(&self) -> Result<(), BleError> {
        use esp_idf_svc::sys::*;
        unsafe {
            // BLE only; release classic BT memory.
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg), BleError::StackEnable)?;
            check(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE), BleError::StackEnable)?;
            check(esp_bluedroid_init(), BleError::StackEnable)?;
            check(esp_bluedroid_enable(), BleError::StackEnable)?;

            check(esp_ble_gap_register_callback(Some(esp::gap_event_handler)), BleError::StackEnable)?;
            check(esp_ble_gatts_register_callback(Some(esp::gatts_event_handler)), BleError::StackEnable)?;
        }
        info!("BLE(espidf): Bluedroid stack enabled");
        Ok(())
    }

    fn init_service(&self) -> Result<(), BleError> {
        // Service and characteristics are created from the GATTS callback
        // once the app registration completes.
        let rc = unsafe { esp_idf_svc::sys::esp_ble_gatts_app_register(0) };
        check(rc, BleError::ServiceInit)
    }

    fn start_advertising(&self) -> Result<(), BleError> {
        use esp_idf_svc::sys::*;
        let mut name: heapless::Vec<u8, 25> = heapless::Vec::new();
        // Fits: at most 24 bytes of name plus the terminator.
        let _ = name.extend_from_slice(self.device_name.as_bytes());
        let _ = name.push(0);
        unsafe {
            check(esp_ble_gap_set_device_name(name.as_ptr() as *const _), BleError::AdvertisingStart)?;
            let mut params = esp::adv_params();
            check(esp_ble_gap_start_advertising(&mut params), BleError::AdvertisingStart)?;
        }
        info!("BLE(espidf): advertising as '{}'", self.device_name);
        Ok(())
    }

    fn set_value(&self, attr: LbsAttribute, value: &[u8]) {
        esp::mirror(attr, value);
        let handle = esp::handle_of(attr);
        if handle != 0 {
            unsafe {
                esp_idf_svc::sys::esp_ble_gatts_set_attr_value(handle, value.len() as u16, value.as_ptr());
            }
        }
    }

    fn notify(&self, conn_handle: u16, attr: LbsAttribute, value: &[u8]) -> Result<(), BleError> {
        use core::sync::atomic::Ordering;
        let handle = esp::handle_of(attr);
        if handle == 0 {
            return Err(BleError::Notify(esp_idf_svc::sys::ESP_ERR_INVALID_STATE as i32));
        }
        if !esp::ccc_enabled() {
            return Err(BleError::NotSubscribed);
        }
        let rc = unsafe {
            esp_idf_svc::sys::esp_ble_gatts_send_indicate(
                esp::GATTS_IF.load(Ordering::Acquire) as u8,
                conn_handle,
                handle,
                value.len() as u16,
                value.as_ptr() as *mut u8,
                false,
            )
        };
        check(rc, BleError::Notify)
    }

    fn pairing_reply(&self, accept: bool) -> Result<(), BleError> {
        let Some(mut addr) = esp::take_pending_confirm() else {
            log::debug!("BLE: no confirmation pending");
            return Ok(());
        };
        let rc = unsafe { esp_idf_svc::sys::esp_ble_confirm_reply(addr.as_mut_ptr(), accept) };
        check(rc, BleError::PairingReply)
    }

    fn restore_bonds(&self, bonds: &[BondRecord]) -> usize {
        use crate::app::ports::MAX_BONDS;
        use esp_idf_svc::sys::*;

        // Bluedroid reloads its own keys from NVS; report which stored
        // peers it actually holds keys for.
        let mut held: [esp_ble_bond_dev_t; MAX_BONDS] = unsafe { core::mem::zeroed() };
        let mut num = MAX_BONDS as core::ffi::c_int;
        let rc = unsafe { esp_ble_get_bond_device_list(&mut num, held.as_mut_ptr()) };
        if rc != ESP_OK as i32 {
            log::warn!("BLE: bond list unavailable (err {})", rc);
            return 0;
        }
        let held = &held[..(num.max(0) as usize).min(MAX_BONDS)];
        bonds
            .iter()
            .filter(|b| {
                let known = held.iter().any(|d| d.bd_addr == b.peer.0);
                if !known {
                    log::warn!("BLE: no keys for bonded peer {}", b.peer);
                }
                known
            })
            .count()
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn long_names_are_truncated() {
        let stack = BleStack::new("Nordic_LBS_with_a_really_long_name");
        assert_eq!(stack.device_name().len(), 24);
        assert_eq!(BleStack::new("Nordic_LBS").device_name(), "Nordic_LBS");
    }

    #[test]
    fn steps_are_recorded_in_call_order() {
        let stack = BleStack::new("lbs");
        stack.enable().unwrap();
        stack.init_service().unwrap();
        stack.start_advertising().unwrap();
        assert_eq!(
            stack.sim().steps(),
            vec![RadioStep::Enable, RadioStep::ServiceInit, RadioStep::Advertising]
        );
        assert_eq!(stack.sim().advertising_starts(), 1);
    }

    #[test]
    fn injected_failure_maps_to_its_error() {
        let stack = BleStack::new("lbs").with_failure(RadioStep::Enable, -12);
        assert_eq!(stack.enable(), Err(BleError::StackEnable(-12)));
        let stack = BleStack::new("lbs").with_failure(RadioStep::AuthInfoRegister, -22);
        assert_eq!(
            stack.register_auth_info_callbacks(),
            Err(BleError::AuthInfoRegister(-22))
        );
    }

    #[test]
    fn advertising_needs_an_enabled_stack() {
        let stack = BleStack::new("lbs");
        assert_eq!(
            stack.start_advertising(),
            Err(BleError::AdvertisingStart(EAGAIN))
        );
        assert_eq!(stack.init_service(), Err(BleError::ServiceInit(EAGAIN)));
    }

    #[test]
    fn pairing_answers_and_bonds_are_recorded() {
        let stack = BleStack::new("lbs");
        let bonds = [BondRecord {
            peer: crate::link::PeerAddr([1, 2, 3, 4, 5, 6]),
            level: crate::link::SecurityLevel::L4,
        }];
        assert_eq!(stack.restore_bonds(&bonds), 1);
        stack.pairing_reply(true).unwrap();
        stack.pairing_reply(false).unwrap();
        assert_eq!(stack.sim().replies(), vec![true, false]);
        assert_eq!(stack.sim().bonds(), bonds.to_vec());
    }

    #[test]
    fn clones_share_the_stack() {
        let stack = BleStack::new("lbs");
        let other = stack.clone();
        other.set_value(LbsAttribute::Led, &[1]);
        other.notify(3, LbsAttribute::Button, &[1]).unwrap();
        assert_eq!(stack.sim().value(LbsAttribute::Led), Some(vec![1]));
        assert_eq!(stack.sim().notifications(), vec![(3, vec![1])]);
    }
}
