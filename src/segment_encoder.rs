use crate::Result;
use crate::segments::Segment;

/// A sink that serializes segments into some subtitle/transcript format.
pub trait SegmentEncoder {
    fn write_segment(&mut self, seg: &Segment) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}
