//! In-process stand-in for the native side of the listener interfaces.

use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::interop::upcall::{CreateFn, DestroyFn, SetProcsFn};
use crate::interop::{Arena, Bridge, StaticSymbols};

/// What the native library keeps per listener object.
struct NativeListener {
    user_data: *const c_void,
}

static INSTALLED: Lazy<Mutex<HashMap<&'static str, usize>>> = Lazy::new(Default::default);
static LIVE: Lazy<Mutex<HashSet<usize>>> = Lazy::new(Default::default);

fn record_procs(kind: &'static str, procs: *const c_void) {
    let previous = INSTALLED.lock().unwrap().insert(kind, procs as usize);
    assert!(previous.is_none(), "{} procs installed twice", kind);
}

fn create(user_data: *mut c_void) -> *mut c_void {
    let object = Box::into_raw(Box::new(NativeListener { user_data })) as *mut c_void;
    LIVE.lock().unwrap().insert(object as usize);
    object
}

unsafe fn destroy(object: *mut c_void) {
    assert!(LIVE.lock().unwrap().remove(&(object as usize)), "double delete");
    drop(Box::from_raw(object as *mut NativeListener));
}

macro_rules! stub_kind {
    ($kind:literal, $set_procs:ident, $new:ident, $delete:ident) => {
        unsafe extern "C" fn $set_procs(procs: *const c_void) {
            record_procs($kind, procs);
        }

        unsafe extern "C" fn $new(user_data: *mut c_void) -> *mut c_void {
            create(user_data)
        }

        unsafe extern "C" fn $delete(object: *mut c_void) {
            destroy(object);
        }
    };
}

stub_kind!("ObjectLayerPairFilter", filter_set_procs, filter_new, filter_delete);
stub_kind!("BodyActivationListener", activation_set_procs, activation_new, activation_delete);
stub_kind!("ContactListener", contact_set_procs, contact_new, contact_delete);

pub fn symbols() -> StaticSymbols {
    StaticSymbols::new("listener stub")
        .with::<SetProcsFn>("JPC_ObjectLayerPairFilter_SetProcs", filter_set_procs)
        .with::<CreateFn>("JPC_ObjectLayerPairFilter_new", filter_new)
        .with::<DestroyFn>("JPC_ObjectLayerPairFilter_delete", filter_delete)
        .with::<SetProcsFn>("JPC_BodyActivationListener_SetProcs", activation_set_procs)
        .with::<CreateFn>("JPC_BodyActivationListener_new", activation_new)
        .with::<DestroyFn>("JPC_BodyActivationListener_delete", activation_delete)
        .with::<SetProcsFn>("JPC_ContactListener_SetProcs", contact_set_procs)
        .with::<CreateFn>("JPC_ContactListener_new", contact_new)
        .with::<DestroyFn>("JPC_ContactListener_delete", contact_delete)
}

pub fn bridge() -> (Bridge, Arena) {
    let _ = env_logger::builder().is_test(true).try_init();
    (Bridge::new(symbols()), Arena::new())
}

/// The procs table installed for `kind`.
pub fn installed<P>(kind: &str) -> &'static P {
    let address = INSTALLED.lock().unwrap()[kind];
    unsafe { &*(address as *const P) }
}

/// The user data the native library stored for a listener object.
pub fn user_data(object: *mut c_void) -> *const c_void {
    assert!(is_live(object));
    unsafe { (*(object as *const NativeListener)).user_data }
}

pub fn is_live(object: *mut c_void) -> bool {
    LIVE.lock().unwrap().contains(&(object as usize))
}
