//! The plugin capability interface and the module entry-point contract.
//!
//! A plugin module is a `cdylib` that exports three C-ABI symbols, all
//! generated by [`export_plugin!`](crate::export_plugin):
//!
//! - [`CREATE_SYMBOL`] returns a heap-allocated [`PluginBox`];
//! - [`DESTROY_SYMBOL`] releases one, inside the module that allocated it;
//! - [`API_VERSION_SYMBOL`] returns the version of this crate the module
//!   was built against, as a NUL-terminated string.
//!
//! Instances cross the boundary as Rust trait objects, so host and module
//! must be built with the same toolchain. Panics never cross it: a factory
//! that panics yields a null instance and a panicking destructor is
//! contained inside the module.

use crate::context::PluginContext;
use crate::error::PluginResult;
use crate::events::{CycleResult, Event, ServiceEvent};

/// Version of the plugin interface, checked by the host at load time.
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// [`API_VERSION`] with a trailing NUL, returned by the exported symbol.
#[doc(hidden)]
pub const API_VERSION_NUL: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();

pub const CREATE_SYMBOL: &str = "bs_plugin_create";
pub const DESTROY_SYMBOL: &str = "bs_plugin_destroy";
pub const API_VERSION_SYMBOL: &str = "bs_plugin_api_version";

/// Owned, type-erased plugin instance.
pub type PluginBox = Box<dyn Plugin>;

/// Signature of [`CREATE_SYMBOL`].
pub type CreateFn = unsafe extern "C" fn() -> *mut PluginBox;
/// Signature of [`DESTROY_SYMBOL`].
pub type DestroyFn = unsafe extern "C" fn(*mut PluginBox);
/// Signature of [`API_VERSION_SYMBOL`].
pub type ApiVersionFn = unsafe extern "C" fn() -> *const std::ffi::c_char;

/// Capability interface every plugin implements.
///
/// All calls are made synchronously from the host's single scheduler
/// thread; a slow call stalls the whole tick.
pub trait Plugin: Send {
    /// Version string reported in the registry.
    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Set up the plugin. Subscriptions must be declared here through
    /// `ctx`; `args` is the host process's full argument vector.
    fn init(&mut self, ctx: &mut PluginContext, args: &[String]) -> PluginResult<()>;

    /// Tear down. Called on every plugin before any module is unloaded, so
    /// other plugins are still alive.
    fn deinit(&mut self, _ctx: &mut PluginContext) -> PluginResult<()> {
        Ok(())
    }

    /// One scheduler tick. Returned messages are dispatched after every
    /// plugin has cycled, in registry order.
    fn cycle(&mut self, _ctx: &mut PluginContext) -> CycleResult {
        CycleResult::ok()
    }

    /// Receive an event this plugin subscribed to.
    fn consume_event(&mut self, ctx: &mut PluginContext, event: &Event);

    /// Receive a service event for a service this plugin serves.
    fn consume_service_event(&mut self, _ctx: &mut PluginContext, _event: &ServiceEvent) {}
}

/// Export the module entry points for a plugin type.
///
/// ```ignore
/// beliefstate_plugin::export_plugin!(Supervisor::default());
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($constructor:expr) => {
        /// Returns null if the constructor panics.
        #[no_mangle]
        pub extern "C" fn bs_plugin_create() -> *mut $crate::PluginBox {
            let created = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                let instance: $crate::PluginBox = ::std::boxed::Box::new($constructor);
                instance
            }));
            match created {
                Ok(instance) => ::std::boxed::Box::into_raw(::std::boxed::Box::new(instance)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }

        /// # Safety
        ///
        /// `instance` must come from `bs_plugin_create` of this module and
        /// must not be used afterwards.
        #[no_mangle]
        pub unsafe extern "C" fn bs_plugin_destroy(instance: *mut $crate::PluginBox) {
            if instance.is_null() {
                return;
            }
            let instance = unsafe { ::std::boxed::Box::from_raw(instance) };
            // a panicking Drop must not unwind into the host
            let _ = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(move || {
                drop(instance)
            }));
        }

        #[no_mangle]
        pub extern "C" fn bs_plugin_api_version() -> *const ::std::ffi::c_char {
            $crate::plugin::API_VERSION_NUL.as_ptr().cast()
        }
    };
}
