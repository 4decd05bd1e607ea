//! Well-known span tag keys (Zipkin conventions).

pub const HTTP_HOST: &str = "http.host";
pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_PATH: &str = "http.path";
pub const HTTP_URL: &str = "http.url";
pub const HTTP_STATUS_CODE: &str = "http.status_code";
pub const HTTP_REQUEST_SIZE: &str = "http.request.size";
pub const HTTP_RESPONSE_SIZE: &str = "http.response.size";
pub const ERROR: &str = "error";
pub const ERROR_MESSAGE: &str = "error.message";
