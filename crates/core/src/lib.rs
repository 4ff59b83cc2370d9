//! Keel core: typed documents, error taxonomy, label conventions, clock,
//! retry and the resource transport trait the engine consumes.

#![forbid(unsafe_code)]

pub mod client;
pub mod clock;
pub mod definition;
pub mod error;
pub mod handle;
pub mod labels;
pub mod object;
pub mod retry;

pub use client::{DeleteOptions, PropagationPolicy, ResourceClient};
pub use clock::{Clock, TokioClock};
pub use definition::{CustomResourceDefinition, DefinitionNames, DefinitionScope, DefinitionSpec, DefinitionVersion};
pub use error::{ErrorKind, KeelError, Result, ResultExt};
pub use handle::{GroupVersionResource, ResourceHandle};
pub use object::{Annotations, Labels, ObjectMeta, Resource};
pub use retry::RetryPolicy;

pub mod prelude {
    pub use super::{
        Annotations, CustomResourceDefinition, DefinitionSpec, KeelError, Labels, Resource, ResourceClient,
        ResourceHandle, Result, ResultExt,
    };
}
