pub mod errors;
pub mod patch;
pub mod projects;
pub mod remote;
pub mod service;
pub mod text;

pub use errors::WorkspaceError;
pub use patch::{AppliedFile, FileEdit, PatchConflict, PatchReport, PatchRequest};
pub use projects::{InMemoryProjectStore, ProjectRecord, ProjectStore};
pub use remote::{RemoteBackend, RemoteCommit, RemoteDeletion, RemoteError, RemoteFile};
pub use service::{
    DeleteRequest, ReadRequest, WorkspaceCapabilities, WorkspaceService, WorkspaceSettings,
    WriteRequest,
};
