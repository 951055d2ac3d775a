//! Tool registry, results, and backend dispatch

mod dispatch;
mod lazy;
mod registry;
mod remote;
mod result;

pub use dispatch::{Answerer, Detector, Dispatcher, EditRequest, Editor, Segmenter, Toolbox};
pub use lazy::LazyTool;
pub use registry::{Capability, MaskPolicy, ToolRegistry, ToolSpec};
pub use remote::RemoteTools;
pub use result::{BoundingBox, Image, ResultPayload, ToolResult, NO_RESULT_TEXT};
