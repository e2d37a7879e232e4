//! Compound-assignment operators.
//!
//! Every operator is an element-wise in-place update, so it goes through
//! [`MirrorArray::update`] and marks the host mutated like any other write.

use std::ops;

use mirror_dtype::HasDType;

use crate::MirrorArray;

/// Implements `op=` for a scalar rhs and for a `&MirrorArray` rhs.
///
/// The array rhs must have the same number of elements; a mismatch panics,
/// like slice `copy_from_slice`. Use [`MirrorArray::zip_inplace`] for the
/// fallible form.
macro_rules! assign_ops {
    ($($trait:ident, $method:ident => $op:ident :: $op_method:ident);* $(;)?) => {
        $(
            impl<T: HasDType + ops::$op<Output = T>> ops::$trait<T> for MirrorArray<T> {
                fn $method(&mut self, rhs: T) {
                    self.map_inplace(|x| ops::$op::$op_method(x, rhs));
                }
            }

            impl<T: HasDType + ops::$op<Output = T>> ops::$trait<&MirrorArray<T>> for MirrorArray<T> {
                #[track_caller]
                fn $method(&mut self, rhs: &MirrorArray<T>) {
                    if let Err(err) = self.zip_inplace(rhs, |x, y| ops::$op::$op_method(x, y)) {
                        panic!("{}: {err}", stringify!($method));
                    }
                }
            }
        )*
    };
}

assign_ops! {
    AddAssign, add_assign => Add::add;
    SubAssign, sub_assign => Sub::sub;
    MulAssign, mul_assign => Mul::mul;
    DivAssign, div_assign => Div::div;
    RemAssign, rem_assign => Rem::rem;
    BitAndAssign, bitand_assign => BitAnd::bitand;
    BitOrAssign, bitor_assign => BitOr::bitor;
    BitXorAssign, bitxor_assign => BitXor::bitxor;
}
