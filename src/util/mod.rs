pub(crate) mod background;
pub(crate) mod ffi_ptr;
