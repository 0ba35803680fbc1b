//! Detection module: frame/detection types, the violation rule, and the
//! contract between the orchestrator and a continuous detection source.

mod channel;
mod rule;
mod token;
mod traits;
mod types;

pub use channel::{channel_source, ChannelSource, ChannelSourceHandle};
pub use rule::{PpeRule, PpeRuleConfig};
pub use token::{ControlToken, RunState};
pub use traits::{DetectError, DetectionSource, FrameHandler, ViolationRule};
pub use types::{BoundingBox, Detection, Frame, Severity, Verdict, ViolationEvent};
