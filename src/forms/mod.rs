pub mod model;
pub mod service;

pub use model::{FieldDef, FieldKind, Form, FormStatus, FormVersion};
pub use service::{
    archive, create_form, create_version, duplicate_form, get_form, get_version, list_forms,
    list_versions, publish, rename_form, unpublish,
};
