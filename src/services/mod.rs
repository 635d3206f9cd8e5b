//! Use-case orchestration over the catalog and a blob backend.

pub mod file_service;

pub use file_service::{
    DEFAULT_PRESIGN_TTL_SECS, DeleteResponse, DownloadResponse, FileService, OriginInfo,
    PresignRequest, PresignedUrlResponse, ServiceError, ServiceResult, UploadRequest,
    UploadResponse,
};
