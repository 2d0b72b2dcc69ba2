//! Bit-set newtypes with named constants.

/// Declares a `Copy` bit-set newtype over an unsigned integer with named
/// constants, `NONE`/`ALL`, set operators and a `Debug` listing the names.
#[macro_export]
macro_rules! bit_flags {
    (
        $(#[$outer:meta])*
        $vis:vis struct $name:ident: $repr:ty {
            $(
                $(#[$inner:meta])*
                const $flag:ident = $value:expr;
            )+
        }
    ) => {
        $(#[$outer])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name($repr);

        impl $name {
            $(
                $(#[$inner])*
                pub const $flag: $name = $name($value);
            )+

            pub const NONE: $name = $name(0);
            pub const ALL: $name = $name(0 $(| $value)+);

            const NAMED: &'static [(&'static str, $name)] = &[$((stringify!($flag), $name($value))),+];

            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Keeps only bits that name a flag.
            pub const fn from_bits_truncate(bits: $repr) -> Self {
                $name(bits & Self::ALL.0)
            }

            /// `None` if any unnamed bit is set.
            pub const fn from_bits(bits: $repr) -> Option<Self> {
                if bits & !Self::ALL.0 == 0 {
                    Some($name(bits))
                } else {
                    None
                }
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: $name) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }

            /// Individual named flags that are set, in declaration order.
            pub fn iter(self) -> impl Iterator<Item = $name> {
                Self::NAMED
                    .iter()
                    .map(|(_, f)| *f)
                    .filter(move |f| self.contains(*f))
            }

            /// Name of a flag if `self` is exactly one named flag.
            pub fn name(self) -> Option<&'static str> {
                Self::NAMED
                    .iter()
                    .find(|(_, f)| *f == self)
                    .map(|(n, _)| *n)
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl ::std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl ::std::ops::BitAnd for $name {
            type Output = $name;
            fn bitand(self, rhs: $name) -> $name {
                $name(self.0 & rhs.0)
            }
        }

        impl ::std::ops::Not for $name {
            type Output = $name;
            fn not(self) -> $name {
                $name(!self.0 & Self::ALL.0)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                if self.is_empty() {
                    return write!(f, "{}(NONE)", stringify!($name));
                }
                write!(f, "{}(", stringify!($name))?;
                let mut first = true;
                for (n, flag) in Self::NAMED {
                    if self.contains(*flag) {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        f.write_str(n)?;
                        first = false;
                    }
                }
                f.write_str(")")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    bit_flags! {
        struct Sample: u8 {
            const A = 1 << 0;
            const B = 1 << 1;
            const C = 1 << 3;
        }
    }

    #[test]
    fn all_and_none() {
        assert_eq!(Sample::ALL.bits(), 0b1011);
        assert!(Sample::NONE.is_empty());
        assert!(Sample::ALL.contains(Sample::A | Sample::C));
    }

    #[test]
    fn from_bits_rejects_unknown() {
        assert_eq!(Sample::from_bits(0b0100), None);
        assert_eq!(Sample::from_bits(0b0011), Some(Sample::A | Sample::B));
        assert_eq!(Sample::from_bits_truncate(0xff), Sample::ALL);
    }

    #[test]
    fn not_stays_within_named_bits() {
        assert_eq!(!Sample::A, Sample::B | Sample::C);
        assert_eq!(!Sample::ALL, Sample::NONE);
    }

    #[test]
    fn iter_and_names() {
        let set = Sample::A | Sample::C;
        let names: Vec<_> = set.iter().filter_map(Sample::name).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(format!("{:?}", set), "Sample(A | C)");
        assert_eq!(format!("{:?}", Sample::NONE), "Sample(NONE)");
        assert_eq!(set.name(), None);
    }

    #[test]
    fn insert_remove() {
        let mut s = Sample::NONE;
        s.insert(Sample::B);
        s |= Sample::A;
        assert!(s.intersects(Sample::A));
        s.remove(Sample::A);
        assert_eq!(s, Sample::B);
    }
}
