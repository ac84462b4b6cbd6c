//! Schema-driven form state.
//!
//! A schema is compiled into [`schema::SchemaNode`]s and mounted as a tree of
//! stateful field nodes. The [`form::FormController`] routes widget input into
//! the tree, keeps the merged value, and validates it asynchronously so that
//! only the result for the latest value is applied. Nothing here renders: a
//! renderer asks for [`field::FieldProps`] and forwards events back.
pub mod coerce;
pub mod compiler;
pub mod context;
pub mod error;
pub mod expr;
pub mod field;
pub mod form;
pub mod normalize;
pub mod path;
pub mod schema;
pub mod validate;
pub mod widget;

pub use error::FormError;
pub use form::{FormCallbacks, FormConfig, FormController, FormHandle, FormSnapshot};
pub use path::DataPath;
pub use validate::ErrorEntry;
