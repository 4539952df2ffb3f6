//! Index types. See [`::index_vec`].

pub use index_vec::{Idx, IndexSlice, IndexVec, index_vec};

/// Declares `u32`-backed index newtypes for use with [`IndexVec`].
#[macro_export]
macro_rules! newtype_index {
    () => {};
    ($(#[$attr:meta])* $vis:vis struct $name:ident; $($rest:tt)*) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        $vis struct $name(u32);

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl $crate::index::Idx for $name {
            #[inline(always)]
            fn from_usize(value: usize) -> Self {
                let value = u32::try_from(value).expect("index overflowed");
                Self(value)
            }

            #[inline(always)]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $name {
            /// Creates a new `$name` from the given `value`.
            #[inline(always)]
            $vis const fn new(value: u32) -> Self {
                Self(value)
            }

            /// Gets the underlying index value.
            #[inline(always)]
            $vis const fn get(self) -> u32 {
                self.0
            }

            /// Gets the underlying index value as `usize`.
            #[inline(always)]
            $vis const fn index(self) -> usize {
                self.0 as usize
            }
        }

        $crate::newtype_index!($($rest)*);
    };
}
pub use newtype_index;

#[cfg(test)]
mod tests {
    newtype_index! {
        struct MyIndex;
    }

    #[test]
    fn roundtrips() {
        use index_vec::Idx;
        assert_eq!(MyIndex::new(7).get(), 7);
        assert_eq!(MyIndex::from_usize(3).index(), 3);
    }

    #[test]
    fn index_size() {
        assert_eq!(std::mem::size_of::<MyIndex>(), 4);
    }
}
