//! C ABI transport descriptor
//!
//! Exposes a [`BtleConnection`] as the `MblMwBtleConnection` struct the
//! MetaWear C library takes when a board is created.

use crate::domain::models::{GattChar, GattCharWriteType, NOTIFY_FAILED};
use crate::infrastructure::bluetooth::bridge::BtleConnection;
use std::ffi::{c_int, c_void};
use std::ptr;
use std::sync::Arc;
use tracing::error;

/// `int32_t (*)(const void* caller, const uint8_t* value, uint8_t length)`
pub type MblMwFnIntVoidPtrArray =
    Option<unsafe extern "C" fn(caller: *const c_void, value: *const u8, length: u8) -> i32>;

/// `void (*)(const void* caller, int32_t value)`
pub type MblMwFnVoidVoidPtrInt = Option<unsafe extern "C" fn(caller: *const c_void, value: i32)>;

/// Mirrors `MblMwBtleConnection` from `metawear/platform/btle_connection.h`
#[repr(C)]
pub struct MblMwBtleConnection {
    pub context: *mut c_void,
    pub write_gatt_char: Option<
        unsafe extern "C" fn(
            context: *mut c_void,
            caller: *const c_void,
            write_type: c_int,
            characteristic: *const GattChar,
            value: *const u8,
            length: u8,
        ),
    >,
    pub read_gatt_char: Option<
        unsafe extern "C" fn(
            context: *mut c_void,
            caller: *const c_void,
            characteristic: *const GattChar,
            handler: MblMwFnIntVoidPtrArray,
        ),
    >,
    pub enable_notifications: Option<
        unsafe extern "C" fn(
            context: *mut c_void,
            caller: *const c_void,
            characteristic: *const GattChar,
            handler: MblMwFnIntVoidPtrArray,
            ready: MblMwFnVoidVoidPtrInt,
        ),
    >,
    pub on_disconnect: Option<
        unsafe extern "C" fn(
            context: *mut c_void,
            caller: *const c_void,
            handler: MblMwFnVoidVoidPtrInt,
        ),
    >,
}

/// Owns an `MblMwBtleConnection` and the transport its context points to.
///
/// Must outlive every board created from [`Self::as_ptr`].
pub struct BtleConnectionFfi {
    connection: Box<MblMwBtleConnection>,
    transport: *mut Arc<dyn BtleConnection>,
}

impl BtleConnectionFfi {
    pub fn new(transport: Arc<dyn BtleConnection>) -> Self {
        let transport = Box::into_raw(Box::new(transport));
        let connection = Box::new(MblMwBtleConnection {
            context: transport.cast(),
            write_gatt_char: Some(write_gatt_char),
            read_gatt_char: Some(read_gatt_char),
            enable_notifications: Some(enable_notifications),
            on_disconnect: Some(on_disconnect),
        });
        Self {
            connection,
            transport,
        }
    }

    pub fn connection(&self) -> &MblMwBtleConnection {
        &self.connection
    }

    /// Address to hand to `mbl_mw_metawearboard_create`
    pub fn as_ptr(&self) -> *const MblMwBtleConnection {
        &*self.connection
    }
}

impl Drop for BtleConnectionFfi {
    fn drop(&mut self) {
        // SAFETY: allocated by Box::into_raw in new() and released only here
        drop(unsafe { Box::from_raw(self.transport) });
    }
}

/// Opaque `caller` pointer carried into callbacks
#[derive(Clone, Copy)]
struct Caller(*const c_void);

// SAFETY: never dereferenced on the Rust side, only handed back to C
unsafe impl Send for Caller {}
unsafe impl Sync for Caller {}

impl Caller {
    fn get(self) -> *const c_void {
        self.0
    }
}

unsafe fn transport_from<'a>(context: *mut c_void) -> Option<&'a Arc<dyn BtleConnection>> {
    unsafe { context.cast::<Arc<dyn BtleConnection>>().as_ref() }
}

unsafe fn deliver(
    handler: unsafe extern "C" fn(*const c_void, *const u8, u8) -> i32,
    caller: Caller,
    value: Option<&[u8]>,
) {
    match value {
        Some(bytes) => {
            let length = bytes.len().min(u8::MAX as usize);
            unsafe { handler(caller.get(), bytes.as_ptr(), length as u8) };
        }
        None => {
            unsafe { handler(caller.get(), ptr::null(), 0) };
        }
    }
}

unsafe extern "C" fn write_gatt_char(
    context: *mut c_void,
    _caller: *const c_void,
    write_type: c_int,
    characteristic: *const GattChar,
    value: *const u8,
    length: u8,
) {
    let (Some(transport), Some(characteristic)) =
        (unsafe { transport_from(context) }, unsafe { characteristic.as_ref() })
    else {
        return;
    };
    let value = if value.is_null() || length == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(value, length as usize) }
    };
    transport.write_gatt_char(GattCharWriteType::from_raw(write_type), characteristic, value);
}

unsafe extern "C" fn read_gatt_char(
    context: *mut c_void,
    caller: *const c_void,
    characteristic: *const GattChar,
    handler: MblMwFnIntVoidPtrArray,
) {
    let Some(handler) = handler else {
        error!("read_gatt_char called without a result handler");
        return;
    };
    let caller = Caller(caller);

    match (unsafe { transport_from(context) }, unsafe { characteristic.as_ref() }) {
        (Some(transport), Some(characteristic)) => transport.read_gatt_char(
            characteristic,
            Box::new(move |value: Option<&[u8]>| unsafe { deliver(handler, caller, value) }),
        ),
        _ => {
            error!("read_gatt_char: null context");
            unsafe { deliver(handler, caller, None) };
        }
    }
}

unsafe extern "C" fn enable_notifications(
    context: *mut c_void,
    caller: *const c_void,
    characteristic: *const GattChar,
    handler: MblMwFnIntVoidPtrArray,
    ready: MblMwFnVoidVoidPtrInt,
) {
    let caller = Caller(caller);
    let on_ready = move |status: i32| {
        if let Some(ready) = ready {
            unsafe { ready(caller.get(), status) };
        }
    };

    let (Some(transport), Some(characteristic), Some(handler)) = (
        unsafe { transport_from(context) },
        unsafe { characteristic.as_ref() },
        handler,
    ) else {
        error!("enable_notifications: null context");
        on_ready(NOTIFY_FAILED);
        return;
    };

    transport.enable_notifications(
        characteristic,
        Arc::new(move |bytes: &[u8]| unsafe { deliver(handler, caller, Some(bytes)) }),
        Box::new(on_ready),
    );
}

unsafe extern "C" fn on_disconnect(
    context: *mut c_void,
    caller: *const c_void,
    handler: MblMwFnVoidVoidPtrInt,
) {
    let (Some(transport), Some(handler)) = (unsafe { transport_from(context) }, handler) else {
        return;
    };
    let caller = Caller(caller);
    transport.on_disconnect(Arc::new(move |status: i32| unsafe {
        handler(caller.get(), status)
    }));
}
