/// gRPC service implementations for the provisioner

pub mod creator;

pub use creator::{status_from_error, CreatorServiceImpl};
