/// 注册中心网关错误类型
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Registry unreachable: {0}")]
    Unreachable(String),
    #[error("Registry returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed registry response: {0}")]
    MalformedResponse(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::MalformedResponse(err.to_string())
    }
}
