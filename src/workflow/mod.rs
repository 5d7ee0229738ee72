// Curator workflow: explicit state, a pure reducer and the effects around it

pub mod effects;
pub mod state;

pub use effects::{MappingStore, WorkflowError};
pub use state::{reduce, AppEvent, AppState, AutomapState, ViewSource};
