mod backend;
mod backends;
mod labels;
mod registry;
mod result;
mod tracker;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::{scripted_cow, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{coco_label, COCO_CLASSES, COW_CLASS_ID};
pub use registry::BackendRegistry;
pub use result::{BoundingBox, Detection, DetectionResult};
pub use tracker::{IouTracker, TrackerSettings};
