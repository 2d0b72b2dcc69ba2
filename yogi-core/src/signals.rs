//! Signals that can be raised and awaited through signal sets.

crate::bit_flags! {
    /// Signal mask. `INT` and `TERM` mirror the OS signals; `USR1..USR8` are
    /// free for application use.
    pub struct Signals: u32 {
        const INT = 1 << 0;
        const TERM = 1 << 1;
        const USR1 = 1 << 24;
        const USR2 = 1 << 25;
        const USR3 = 1 << 26;
        const USR4 = 1 << 27;
        const USR5 = 1 << 28;
        const USR6 = 1 << 29;
        const USR7 = 1 << 30;
        const USR8 = 1 << 31;
    }
}

impl Signals {
    /// Whether this is exactly one signal, as `raise_signal` requires.
    pub fn is_single(self) -> bool {
        self.bits().count_ones() == 1 && Signals::ALL.contains(self)
    }
}
