pub mod classifier;
pub mod segments;

pub use classifier::SegmentClassifier;
pub use segments::{ split_reasoning, Segments, SplitTier };
