// A loadable library whose constructor export is misnamed.
#[unsafe(no_mangle)]
pub extern "C" fn _tether_plugin_make() -> *mut u8 {
    std::ptr::null_mut()
}
