pub mod brace;
pub mod detector;
pub mod normalize;

pub use brace::BraceDepthTracker;
pub use detector::{ToolCallDetector, ToolDetectorEvent};
pub use normalize::{normalize_tool_call, NormalizedToolCall};
