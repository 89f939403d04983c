//! Sequence number extension
//!
//! Narrow modular counters (RTP sequence numbers, transport-wide sequence
//! numbers, SRTP indices) are turned into monotonic extended counters here.
//! Every tracked counter owns its own [`WrapExtender`]; instances never share
//! state.

use std::fmt::Debug;
use std::marker::PhantomData;

/// An unsigned counter width usable by [`WrapExtender`]
pub trait SequenceWidth: Copy + Debug + Default + PartialEq + PartialOrd {
    /// Number of bits in the counter
    const BITS: u32;

    /// Widen to u64
    fn to_u64(self) -> u64;

    /// Narrow from u64, truncating
    fn from_u64(value: u64) -> Self;
}

macro_rules! impl_sequence_width {
    ($($ty:ty),*) => {
        $(
            impl SequenceWidth for $ty {
                const BITS: u32 = <$ty>::BITS;

                fn to_u64(self) -> u64 {
                    self as u64
                }

                fn from_u64(value: u64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_sequence_width!(u8, u16, u32, u64);

/// Lower guard band for the 16-bit RTP sequence wrap test
pub const RTP_WRAP_LOW: u16 = 0x0FFF;

/// Upper guard band for the 16-bit RTP sequence wrap test
pub const RTP_WRAP_HIGH: u32 = 0xF000;

/// Guard-band forward wrap test for 16-bit RTP sequence numbers
///
/// A sequence value below `0x0FFF` following a stored value whose low 16 bits
/// are above `0xF000` is treated as a wrap into the next cycle.
pub fn rtp_sequence_wrapped(last_extended: u32, seq: u16) -> bool {
    seq < RTP_WRAP_LOW && (last_extended & 0xFFFF) > RTP_WRAP_HIGH
}

/// Mirror of [`rtp_sequence_wrapped`] for stragglers
///
/// A value above `0xF000` right after a wrap belongs to the previous cycle.
pub fn rtp_sequence_from_previous_cycle(last_extended: u32, seq: u16) -> bool {
    last_extended > 0xFFFF && seq as u32 > RTP_WRAP_HIGH && (last_extended & 0xFFFF) < RTP_WRAP_LOW as u32
}

/// Extends a narrow counter `N` into a wide counter `X`
///
/// The extended value only ever moves forward; samples from the previous
/// cycle are reported against that cycle without touching the state.
#[derive(Debug, Clone)]
pub struct WrapExtender<N: SequenceWidth, X: SequenceWidth = u64> {
    /// Highest extended value observed
    extended: X,

    /// Number of wraps observed
    cycles: X,

    /// Whether a first value has been seen
    initialized: bool,

    _narrow: PhantomData<N>,
}

impl<N: SequenceWidth, X: SequenceWidth> Default for WrapExtender<N, X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: SequenceWidth, X: SequenceWidth> WrapExtender<N, X> {
    /// Create an empty extender
    pub fn new() -> Self {
        Self {
            extended: X::default(),
            cycles: X::default(),
            initialized: false,
            _narrow: PhantomData,
        }
    }

    fn mask() -> u64 {
        if N::BITS >= 64 {
            u64::MAX
        } else {
            (1u64 << N::BITS) - 1
        }
    }

    fn half_range() -> u64 {
        Self::mask() / 2
    }

    fn compose(cycles: u64, value: u64) -> u64 {
        cycles.checked_shl(N::BITS).unwrap_or(0) | value
    }

    /// Feed a new counter value, returning the cycle it belongs to
    pub fn extend(&mut self, value: N) -> X {
        let value = value.to_u64();

        if !self.initialized {
            self.initialized = true;
            self.extended = X::from_u64(Self::compose(self.cycles.to_u64(), value));
            return self.cycles;
        }

        let last = self.extended.to_u64() & Self::mask();
        let mut cycles = self.cycles.to_u64();

        if value < last && last - value > Self::half_range() {
            // Forward wrap
            cycles += 1;
            self.cycles = X::from_u64(cycles);
        } else if value > last && value - last > Self::half_range() && cycles > 0 {
            // Late arrival from the previous cycle
            return X::from_u64(cycles - 1);
        }

        let extended = Self::compose(cycles, value);
        if extended > self.extended.to_u64() {
            self.extended = X::from_u64(extended);
        }

        self.cycles
    }

    /// Classify a counter value against the stored state without mutating it
    pub fn recover_cycles(&self, value: N) -> X {
        let value = value.to_u64();
        let cycles = self.cycles.to_u64();

        if !self.initialized {
            return self.cycles;
        }

        let last = self.extended.to_u64() & Self::mask();
        if value < last && last - value > Self::half_range() {
            X::from_u64(cycles + 1)
        } else if value > last && value - last > Self::half_range() && cycles > 0 {
            X::from_u64(cycles - 1)
        } else {
            self.cycles
        }
    }

    /// Compose the extended value for `value` in the given cycle
    pub fn extended_for(cycles: X, value: N) -> X {
        X::from_u64(Self::compose(cycles.to_u64(), value.to_u64()))
    }

    /// Highest extended value observed
    pub fn extended(&self) -> X {
        self.extended
    }

    /// Low bits of the highest extended value
    pub fn seq_num(&self) -> N {
        N::from_u64(self.extended.to_u64() & Self::mask())
    }

    /// Number of wraps observed
    pub fn cycles(&self) -> X {
        self.cycles
    }

    /// Whether any value has been observed since creation or reset
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Forget all state
    pub fn reset(&mut self) {
        self.extended = X::default();
        self.cycles = X::default();
        self.initialized = false;
    }
}
