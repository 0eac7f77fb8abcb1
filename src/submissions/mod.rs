pub mod admission;
pub mod model;
pub mod service;

pub use admission::validate_answers;
pub use model::{Answer, Submission, SubmissionMeta, SubmissionSource};
pub use service::{
    accept, accept_public, delete_submission, get_submission, list_for_form, list_for_version,
    list_for_workspace,
};
