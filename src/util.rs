macro_rules! bool_enum {
    ($name:ident) => {
        #[derive(Debug, PartialEq, Eq, Clone, Copy)]
        pub enum $name {
            Yes,
            No,
        }

        impl From<bool> for $name {
            fn from(value: bool) -> Self {
                if value {
                    $name::Yes
                } else {
                    $name::No
                }
            }
        }
    };
}

pub(crate) use bool_enum;

/// Rounds `size` up to the next multiple of `align`, which must be a power of two.
pub const fn align_up(size: usize, align: usize) -> usize {
    align_down(size + align - 1, align)
}

/// Rounds `size` down to a multiple of `align`, which must be a power of two.
pub const fn align_down(size: usize, align: usize) -> usize {
    size & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_to_eight() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(13, 8), 16);
        assert_eq!(align_down(15, 8), 8);
    }
}
