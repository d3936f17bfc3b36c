pub mod dependency;
pub mod span;

pub use dependency::DependencyLink;
pub use span::{Annotation, Endpoint, Span, SpanKind};
