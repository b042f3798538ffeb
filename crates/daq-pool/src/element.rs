//! Element types a sample buffer can hold.

use daq_core::SampleType;
use std::fmt::Debug;

/// Plain-data element of a sample buffer.
///
/// The element type of a sample is fixed when it is allocated from its pool and is
/// recorded in the type bits of the sample id.
pub trait SampleElement: Copy + Default + Debug + PartialEq + Send + Sync + 'static {
    /// Type tag stored in sample ids.
    const TYPE: SampleType;
    /// Value written past the data length of recycled buffers in debug builds.
    const POISON: Self;
}

macro_rules! sample_element {
    ($t:ty, $tag:ident, $poison:expr) => {
        impl SampleElement for $t {
            const TYPE: SampleType = SampleType::$tag;
            const POISON: Self = $poison;
        }
    };
}

sample_element!(i8, Char, 0x55);
sample_element!(u8, UChar, 0xa5);
sample_element!(i16, Short, 0x5a5a);
sample_element!(u16, UShort, 0xa5a5);
sample_element!(i32, Int32, 0x5a5a_5a5a);
sample_element!(u32, UInt32, 0xa5a5_a5a5);
sample_element!(i64, Int64, 0x5a5a_5a5a_5a5a_5a5a);
sample_element!(f32, Float, f32::NAN);
sample_element!(f64, Double, f64::NAN);
