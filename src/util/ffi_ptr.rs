/// Turns a possibly empty slice into the pointer half of a Vulkan `(count, pointer)` pair.
///
/// An empty slice yields a dangling pointer which drivers would accept alongside a zero count,
/// but a null pointer is what validation layers expect to see.
pub(crate) trait AsFfiPtr {
    type Pointee;
    fn as_ffi_ptr(&self) -> *const Self::Pointee;
    fn ffi_len(&self) -> u32;
}

impl<T> AsFfiPtr for [T] {
    type Pointee = T;
    #[inline(always)]
    fn as_ffi_ptr(&self) -> *const T {
        if self.is_empty() {
            std::ptr::null()
        } else {
            self.as_ptr()
        }
    }
    #[inline(always)]
    fn ffi_len(&self) -> u32 {
        self.len() as u32
    }
}
