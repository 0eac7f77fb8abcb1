use crate::ids::FormId;
use crate::storage::TableName;
use crate::storage::pool::PoolKind;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Workspace,
    Membership,
    Form,
    FormVersion,
    Submission,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Workspace => write!(f, "workspace"),
            ResourceType::Membership => write!(f, "membership"),
            ResourceType::Form => write!(f, "form"),
            ResourceType::FormVersion => write!(f, "form version"),
            ResourceType::Submission => write!(f, "submission"),
        }
    }
}

/// Authentication and scope failures.
///
/// The variants are distinct so operators can tell them apart in logs, but
/// every credential failure collapses to the same status and message at the
/// request boundary (see [`AuthError::public_message`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authorization credential missing")]
    MissingCredential,
    #[error("credential malformed or signature invalid")]
    InvalidCredential,
    #[error("credential expired")]
    ExpiredCredential,
    #[error("credential is not an access token")]
    WrongTokenKind,
    #[error("workspace scope missing")]
    MissingScope,
    #[error("workspace scope denied")]
    ScopeDenied,
}

impl AuthError {
    /// Specific cause for structured logs. Never send this to the caller.
    pub fn log_cause(self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::ExpiredCredential => "expired_credential",
            AuthError::WrongTokenKind => "wrong_token_kind",
            AuthError::MissingScope => "missing_scope",
            AuthError::ScopeDenied => "scope_denied",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            AuthError::MissingCredential
            | AuthError::InvalidCredential
            | AuthError::ExpiredCredential
            | AuthError::WrongTokenKind => 401,
            AuthError::MissingScope => 403,
            // Same answer as a missing row: workspace existence is not revealed.
            AuthError::ScopeDenied => 404,
        }
    }

    pub fn public_message(self) -> &'static str {
        match self {
            AuthError::MissingCredential
            | AuthError::InvalidCredential
            | AuthError::ExpiredCredential
            | AuthError::WrongTokenKind => "unauthorized",
            AuthError::MissingScope => "workspace scope required",
            AuthError::ScopeDenied => "not found",
        }
    }
}

/// Form version / submission consistency violations. These are client errors
/// and carry full detail because they reveal nothing across tenants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("form {form_id} is not published")]
    FormNotPublished { form_id: FormId },
    #[error("form {form_id} is archived")]
    FormArchived { form_id: FormId },
    #[error("form {form_id} has no draft version")]
    NoDraft { form_id: FormId },
    #[error("draft version of form {form_id} has no fields")]
    EmptyDraft { form_id: FormId },
    #[error("invalid field definition: {0}")]
    InvalidFieldDefinition(String),
    #[error("unknown field '{field_id}'")]
    UnknownField { field_id: String },
    #[error("missing required field '{field_id}'")]
    MissingRequiredField { field_id: String },
    #[error("field '{field_id}' answered more than once")]
    DuplicateAnswer { field_id: String },
    #[error("invalid answer for field '{field_id}': {reason}")]
    InvalidAnswer { field_id: String, reason: String },
}

/// Failures raised by the embedded storage engine and its pools.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("{pool} pool acquire timed out after {waited_ms}ms")]
    PoolTimeout { pool: PoolKind, waited_ms: u64 },
    #[error("{pool} pool is closed")]
    PoolClosed { pool: PoolKind },
    #[error("service sessions are not enabled")]
    ServiceSessionUnavailable,
    #[error("protected table '{table}' accessed without a bound scope")]
    ScopeNotBound { table: TableName },
    #[error("new row violates row-level policy on '{table}'")]
    PolicyViolation { table: TableName },
    #[error("row {key} not found in '{table}'")]
    RowNotFound { table: TableName, key: String },
    #[error("duplicate key {key} in '{table}'")]
    DuplicateKey { table: TableName, key: String },
    #[error("rows in '{table}' are immutable ({key})")]
    ImmutableRow { table: TableName, key: String },
    #[error("invalid reference in '{table}': {detail}")]
    InvalidReference { table: TableName, detail: String },
    #[error("trusted setting '{name}' rejected")]
    InvalidSetting { name: String },
    #[error("statement issued outside a transaction")]
    NoTransaction,
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StorageError {
    /// Binding defects are programming errors, never user-facing conditions.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            StorageError::ScopeNotBound { .. }
                | StorageError::NoTransaction
                | StorageError::InvalidSetting { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MissingCredential,
    InvalidCredential,
    ExpiredCredential,
    WrongTokenKind,
    MissingScope,
    ScopeDenied,
    PermissionDenied,
    WorkspaceNotFound,
    MembershipNotFound,
    FormNotFound,
    FormVersionNotFound,
    SubmissionNotFound,
    Conflict,
    Validation,
    InvalidConfig,
    Encode,
    FormNotPublished,
    FormArchived,
    NoDraft,
    EmptyDraft,
    InvalidFieldDefinition,
    UnknownField,
    MissingRequiredField,
    DuplicateAnswer,
    InvalidAnswer,
    PoolTimeout,
    PoolClosed,
    ServiceSessionUnavailable,
    ScopeNotBound,
    PolicyViolation,
    RowNotFound,
    DuplicateKey,
    ImmutableRow,
    InvalidReference,
    InvalidSetting,
    NoTransaction,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingCredential => "missing_credential",
            ErrorCode::InvalidCredential => "invalid_credential",
            ErrorCode::ExpiredCredential => "expired_credential",
            ErrorCode::WrongTokenKind => "wrong_token_kind",
            ErrorCode::MissingScope => "missing_scope",
            ErrorCode::ScopeDenied => "scope_denied",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::WorkspaceNotFound => "workspace_not_found",
            ErrorCode::MembershipNotFound => "membership_not_found",
            ErrorCode::FormNotFound => "form_not_found",
            ErrorCode::FormVersionNotFound => "form_version_not_found",
            ErrorCode::SubmissionNotFound => "submission_not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Validation => "validation",
            ErrorCode::InvalidConfig => "invalid_config",
            ErrorCode::Encode => "encode",
            ErrorCode::FormNotPublished => "form_not_published",
            ErrorCode::FormArchived => "form_archived",
            ErrorCode::NoDraft => "no_draft",
            ErrorCode::EmptyDraft => "empty_draft",
            ErrorCode::InvalidFieldDefinition => "invalid_field_definition",
            ErrorCode::UnknownField => "unknown_field",
            ErrorCode::MissingRequiredField => "missing_required_field",
            ErrorCode::DuplicateAnswer => "duplicate_answer",
            ErrorCode::InvalidAnswer => "invalid_answer",
            ErrorCode::PoolTimeout => "pool_timeout",
            ErrorCode::PoolClosed => "pool_closed",
            ErrorCode::ServiceSessionUnavailable => "service_session_unavailable",
            ErrorCode::ScopeNotBound => "scope_not_bound",
            ErrorCode::PolicyViolation => "policy_violation",
            ErrorCode::RowNotFound => "row_not_found",
            ErrorCode::DuplicateKey => "duplicate_key",
            ErrorCode::ImmutableRow => "immutable_row",
            ErrorCode::InvalidReference => "invalid_reference",
            ErrorCode::InvalidSetting => "invalid_setting",
            ErrorCode::NoTransaction => "no_transaction",
        }
    }
}

#[derive(Debug, Error)]
pub enum FormVaultError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("encode error: {0}")]
    Encode(String),
}

impl FormVaultError {
    pub(crate) fn not_found(resource_type: ResourceType, resource_id: impl ToString) -> Self {
        FormVaultError::NotFound {
            resource_type,
            resource_id: resource_id.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            FormVaultError::Auth(err) => match err {
                AuthError::MissingCredential => ErrorCode::MissingCredential,
                AuthError::InvalidCredential => ErrorCode::InvalidCredential,
                AuthError::ExpiredCredential => ErrorCode::ExpiredCredential,
                AuthError::WrongTokenKind => ErrorCode::WrongTokenKind,
                AuthError::MissingScope => ErrorCode::MissingScope,
                AuthError::ScopeDenied => ErrorCode::ScopeDenied,
            },
            FormVaultError::Consistency(err) => match err {
                ConsistencyError::FormNotPublished { .. } => ErrorCode::FormNotPublished,
                ConsistencyError::FormArchived { .. } => ErrorCode::FormArchived,
                ConsistencyError::NoDraft { .. } => ErrorCode::NoDraft,
                ConsistencyError::EmptyDraft { .. } => ErrorCode::EmptyDraft,
                ConsistencyError::InvalidFieldDefinition(_) => ErrorCode::InvalidFieldDefinition,
                ConsistencyError::UnknownField { .. } => ErrorCode::UnknownField,
                ConsistencyError::MissingRequiredField { .. } => ErrorCode::MissingRequiredField,
                ConsistencyError::DuplicateAnswer { .. } => ErrorCode::DuplicateAnswer,
                ConsistencyError::InvalidAnswer { .. } => ErrorCode::InvalidAnswer,
            },
            FormVaultError::Storage(err) => match err {
                StorageError::PoolTimeout { .. } => ErrorCode::PoolTimeout,
                StorageError::PoolClosed { .. } => ErrorCode::PoolClosed,
                StorageError::ServiceSessionUnavailable => ErrorCode::ServiceSessionUnavailable,
                StorageError::ScopeNotBound { .. } => ErrorCode::ScopeNotBound,
                StorageError::PolicyViolation { .. } => ErrorCode::PolicyViolation,
                StorageError::RowNotFound { .. } => ErrorCode::RowNotFound,
                StorageError::DuplicateKey { .. } => ErrorCode::DuplicateKey,
                StorageError::ImmutableRow { .. } => ErrorCode::ImmutableRow,
                StorageError::InvalidReference { .. } => ErrorCode::InvalidReference,
                StorageError::InvalidSetting { .. } => ErrorCode::InvalidSetting,
                StorageError::NoTransaction => ErrorCode::NoTransaction,
                StorageError::Conflict(_) => ErrorCode::Conflict,
            },
            FormVaultError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Workspace => ErrorCode::WorkspaceNotFound,
                ResourceType::Membership => ErrorCode::MembershipNotFound,
                ResourceType::Form => ErrorCode::FormNotFound,
                ResourceType::FormVersion => ErrorCode::FormVersionNotFound,
                ResourceType::Submission => ErrorCode::SubmissionNotFound,
            },
            FormVaultError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            FormVaultError::Conflict(_) => ErrorCode::Conflict,
            FormVaultError::Validation(_) => ErrorCode::Validation,
            FormVaultError::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            FormVaultError::Encode(_) => ErrorCode::Encode,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Status class for the request boundary. Scope denials and missing rows
    /// share 404 so the answer never depends on which tenant owns a resource.
    pub fn http_status(&self) -> u16 {
        match self {
            FormVaultError::Auth(err) => err.http_status(),
            FormVaultError::Consistency(err) => match err {
                ConsistencyError::FormNotPublished { .. } => 404,
                ConsistencyError::FormArchived { .. }
                | ConsistencyError::NoDraft { .. }
                | ConsistencyError::EmptyDraft { .. } => 409,
                ConsistencyError::InvalidFieldDefinition(_)
                | ConsistencyError::InvalidAnswer { .. } => 422,
                ConsistencyError::UnknownField { .. }
                | ConsistencyError::MissingRequiredField { .. }
                | ConsistencyError::DuplicateAnswer { .. } => 400,
            },
            FormVaultError::Storage(err) => match err {
                StorageError::PoolTimeout { .. }
                | StorageError::PoolClosed { .. }
                | StorageError::ServiceSessionUnavailable => 503,
                StorageError::RowNotFound { .. } => 404,
                StorageError::PolicyViolation { .. } => 403,
                StorageError::DuplicateKey { .. } | StorageError::Conflict(_) => 409,
                StorageError::ImmutableRow { .. } | StorageError::InvalidReference { .. } => 409,
                StorageError::ScopeNotBound { .. }
                | StorageError::InvalidSetting { .. }
                | StorageError::NoTransaction => 500,
            },
            FormVaultError::NotFound { .. } => 404,
            FormVaultError::PermissionDenied(_) => 403,
            FormVaultError::Conflict(_) => 409,
            FormVaultError::Validation(_) => 422,
            FormVaultError::InvalidConfig { .. } | FormVaultError::Encode(_) => 500,
        }
    }

    /// Message that is safe to hand to an unauthenticated caller.
    pub fn public_message(&self) -> String {
        match self {
            FormVaultError::Auth(err) => err.public_message().to_string(),
            FormVaultError::Consistency(err) => err.to_string(),
            FormVaultError::NotFound { .. } | FormVaultError::Storage(StorageError::RowNotFound { .. }) => {
                "not found".to_string()
            }
            FormVaultError::Storage(StorageError::PolicyViolation { .. })
            | FormVaultError::PermissionDenied(_) => "forbidden".to_string(),
            FormVaultError::Storage(
                StorageError::PoolTimeout { .. }
                | StorageError::PoolClosed { .. }
                | StorageError::ServiceSessionUnavailable,
            ) => "service unavailable".to_string(),
            FormVaultError::Storage(StorageError::Conflict(_))
            | FormVaultError::Storage(StorageError::DuplicateKey { .. })
            | FormVaultError::Storage(StorageError::ImmutableRow { .. })
            | FormVaultError::Storage(StorageError::InvalidReference { .. })
            | FormVaultError::Conflict(_) => "conflict".to_string(),
            FormVaultError::Validation(message) => message.clone(),
            FormVaultError::Storage(_)
            | FormVaultError::InvalidConfig { .. }
            | FormVaultError::Encode(_) => "internal error".to_string(),
        }
    }

    pub fn is_defect(&self) -> bool {
        matches!(self, FormVaultError::Storage(err) if err.is_defect())
    }
}
