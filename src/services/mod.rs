pub mod format_service;
pub mod image_service;
pub mod memory_storage;
pub mod resize_service;
pub mod s3_storage;
pub mod storage_service;
