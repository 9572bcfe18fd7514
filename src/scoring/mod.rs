pub mod engine;
pub mod expr;

pub use engine::Scorer;
pub use expr::{Context, ExprError, Predicate};
