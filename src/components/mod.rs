pub mod feature_cache;
pub mod session;

pub use feature_cache::FeatureCache;
pub use session::{DragParams, DragSession, InitParams, StepOutput, OPTIMIZED_LAYERS};
