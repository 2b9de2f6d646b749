pub mod url_validation;
pub use url_validation::{UrlValidationError, validate_backend_url, validate_realtime_url};
