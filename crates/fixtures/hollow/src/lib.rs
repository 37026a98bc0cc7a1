//! Test module: passes the api check but exports no factory.

#[no_mangle]
pub extern "C" fn bs_plugin_api_version() -> *const std::ffi::c_char {
    beliefstate_plugin::plugin::API_VERSION_NUL.as_ptr().cast()
}
