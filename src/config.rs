use std::time::Duration;

/// Tunables for `TcpServer` / `HttpServer`, set field-by-field before `start()`.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_request_buffer_size: usize,
    pub http_request_max_body: usize,
    pub http_response_buffer_size: usize,
    pub http_response_max_body: usize,
    pub poll_timeout: Duration,
    pub chunk_base_size: usize,
    pub high_water_mark: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            http_request_buffer_size: 4 * 1024,
            http_request_max_body: 64 * 1024 * 1024,
            http_response_buffer_size: 4 * 1024,
            http_response_max_body: 64 * 1024 * 1024,
            poll_timeout: Duration::from_secs(10),
            chunk_base_size: 4 * 1024,
            high_water_mark: 64 * 1024 * 1024,
        }
    }
}
