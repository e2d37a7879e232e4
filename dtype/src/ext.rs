use super::*;

/// Rust types with a known [`ScalarDType`].
///
/// # Safety
///
/// Implementors must be plain old data: no padding, no pointers, and every
/// bit pattern of `size_of::<Self>()` bytes must be a valid value. Host
/// storage is overwritten byte-wise by device→host copies.
pub unsafe trait HasDType: Copy + Default + PartialEq + std::fmt::Debug + 'static {
    const DTYPE: ScalarDType;
}

macro_rules! impl_dtype_ext {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(unsafe impl HasDType for $ty { const DTYPE: ScalarDType = $dtype; })*
    };
}

impl_dtype_ext! {
    i8 => ScalarDType::Int8, i16 => ScalarDType::Int16, i32 => ScalarDType::Int32, i64 => ScalarDType::Int64,
    u8 => ScalarDType::UInt8, u16 => ScalarDType::UInt16, u32 => ScalarDType::UInt32, u64 => ScalarDType::UInt64,
    f32 => ScalarDType::Float32, f64 => ScalarDType::Float64,
}

/// Reinterpret a slice of elements as its raw bytes.
pub fn as_bytes<T: HasDType>(values: &[T]) -> &[u8] {
    // SAFETY: `HasDType` guarantees no padding, so every byte is initialized.
    unsafe { std::slice::from_raw_parts(values.as_ptr() as *const u8, std::mem::size_of_val(values)) }
}

/// Reinterpret a mutable slice of elements as its raw bytes.
pub fn as_bytes_mut<T: HasDType>(values: &mut [T]) -> &mut [u8] {
    // SAFETY: `HasDType` guarantees every bit pattern is a valid `T`.
    unsafe { std::slice::from_raw_parts_mut(values.as_mut_ptr() as *mut u8, std::mem::size_of_val(values)) }
}
