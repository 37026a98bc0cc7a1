//! Test module: built against an interface version the host rejects.

#[no_mangle]
pub extern "C" fn bs_plugin_api_version() -> *const std::ffi::c_char {
    b"999.0.0\0".as_ptr().cast()
}
