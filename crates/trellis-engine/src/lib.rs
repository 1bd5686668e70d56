//! Execution engine: the context tree, hierarchical lookup, settings
//! resolution, and the component executor.

pub mod context;
pub mod executor;
pub mod lookup;
pub mod record;
pub mod settings;

pub use context::{ContextArena, ContextId, ExecutionContext};
pub use executor::ComponentExecutor;
pub use lookup::ContextLookup;
pub use record::{ComponentRecord, ExecutionRecorder, ResultHydrator};
